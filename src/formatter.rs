//! Console rendering of task durations.

use crate::entities::TaskLength;
use serde::{Deserialize, Serialize};

/// Banner line printed around the output publisher's section.
pub const BANNER: &str = "================";
/// Title printed between the banner lines.
pub const TITLE: &str = "OutputPublisher";

/// Sort direction by task duration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    /// Fastest first.
    #[default]
    Asc,
    /// Slowest first.
    Desc,
}

/// Render a duration in the largest unit that does not truncate to zero.
///
/// ```rust
/// use buildwatch::formatter::format_duration;
///
/// assert_eq!(format_duration(10), "10 ms");
/// assert_eq!(format_duration(2_000), "2 sec");
/// assert_eq!(format_duration(65_000), "1 min");
/// ```
pub fn format_duration(duration_ms: u64) -> String {
    match duration_ms {
        ms if ms >= 60_000 => format!("{} min", ms / 60_000),
        ms if ms >= 1_000 => format!("{} sec", ms / 1_000),
        ms => format!("{} ms", ms),
    }
}

/// Sort `tasks` by duration, keep at most `limit`, and render banner plus one
/// line per task.
///
/// The sort is stable: equal durations keep emission order. A `limit` larger
/// than the input shows everything.
pub fn format(tasks: &[TaskLength], order: Order, limit: Option<usize>) -> Vec<String> {
    let mut sorted: Vec<&TaskLength> = tasks.iter().collect();
    match order {
        Order::Asc => sorted.sort_by(|a, b| a.duration_ms.cmp(&b.duration_ms)),
        Order::Desc => sorted.sort_by(|a, b| b.duration_ms.cmp(&a.duration_ms)),
    }
    let shown = limit.unwrap_or(usize::MAX);

    let mut lines = vec![BANNER.to_string(), TITLE.to_string(), BANNER.to_string()];
    lines.extend(
        sorted
            .into_iter()
            .take(shown)
            .map(|task| format!("{} : {}", task.identifier, format_duration(task.duration_ms))),
    );
    lines
}
