//! Per-unit-of-work state tracking.
//!
//! Two independent channels feed the tracker: the execution channel reports
//! when a unit of work finishes and with which outcome, the cache channel
//! reports whether its outputs were served from the build cache. The two may
//! arrive in any order. Each identifier keeps a small record with one slot per
//! channel; [`TaskStateTracker::finalize`] resolves the slots with an explicit
//! precedence rule instead of trusting arrival order.
//!
//! The tracker is single-writer: it is owned by one build session and mutated
//! from the host's event thread only.

use crate::entities::{TaskLength, TaskMessageState};
use crate::error::TrackerAnomaly;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
struct Execution {
    duration_ms: u64,
    outcome: TaskMessageState,
    /// Position in terminal order.
    seq: usize,
}

#[derive(Debug, Default)]
struct Record {
    execution: Option<Execution>,
    served_from_cache: Option<bool>,
}

/// Merges execution and cache events into one terminal record per unit of work.
#[derive(Debug, Default)]
pub struct TaskStateTracker {
    records: HashMap<String, Record>,
    started: Vec<String>,
    finished: usize,
    anomalies: Vec<TrackerAnomaly>,
}

impl TaskStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit of work. Events for identifiers that never started are
    /// rejected.
    pub fn on_task_started(&mut self, identifier: &str) -> Result<(), TrackerAnomaly> {
        if identifier.is_empty() {
            return self.reject(TrackerAnomaly::EmptyIdentifier);
        }
        if self.records.contains_key(identifier) {
            return self
                .reject(TrackerAnomaly::DuplicateStart { identifier: identifier.to_string() });
        }
        self.records.insert(identifier.to_string(), Record::default());
        self.started.push(identifier.to_string());
        Ok(())
    }

    /// Record the execution-channel terminal state. A second finish for the
    /// same identifier keeps the first value.
    pub fn on_task_finished(
        &mut self,
        identifier: &str,
        duration_ms: i64,
        outcome: TaskMessageState,
    ) -> Result<(), TrackerAnomaly> {
        if identifier.is_empty() {
            return self.reject(TrackerAnomaly::EmptyIdentifier);
        }
        let duration_ms = match u64::try_from(duration_ms) {
            Ok(ms) => ms,
            Err(_) => {
                return self.reject(TrackerAnomaly::NegativeDuration {
                    identifier: identifier.to_string(),
                    duration_ms,
                })
            }
        };
        let seq = self.finished;
        let anomaly = match self.records.get_mut(identifier) {
            None => TrackerAnomaly::UnknownIdentifier { identifier: identifier.to_string() },
            Some(record) if record.execution.is_some() => {
                TrackerAnomaly::DuplicateFinish { identifier: identifier.to_string() }
            }
            Some(record) => {
                record.execution = Some(Execution { duration_ms, outcome, seq });
                self.finished += 1;
                return Ok(());
            }
        };
        self.reject(anomaly)
    }

    /// Record the cache-channel notification; may arrive before or after the
    /// finish.
    ///
    /// A later cache hit overrides an earlier miss (and is reported as a
    /// conflict); a later miss never clears a hit.
    pub fn on_cache_event(
        &mut self,
        identifier: &str,
        served_from_cache: bool,
    ) -> Result<(), TrackerAnomaly> {
        if identifier.is_empty() {
            return self.reject(TrackerAnomaly::EmptyIdentifier);
        }
        let anomaly = match self.records.get_mut(identifier) {
            None => TrackerAnomaly::UnknownIdentifier { identifier: identifier.to_string() },
            Some(record) => match record.served_from_cache {
                None => {
                    record.served_from_cache = Some(served_from_cache);
                    return Ok(());
                }
                Some(previous) if previous == served_from_cache => return Ok(()),
                Some(_) => {
                    if served_from_cache {
                        record.served_from_cache = Some(true);
                    }
                    TrackerAnomaly::ConflictingCacheEvent { identifier: identifier.to_string() }
                }
            },
        };
        self.reject(anomaly)
    }

    /// Resolve both channels into terminal records, first-terminal-first.
    ///
    /// A cache hit turns the outcome into `FROM_CACHE`, except for `FAILED`,
    /// which is always kept. Units that never finished are dropped and
    /// reported as anomalies.
    pub fn finalize(&mut self) -> Vec<TaskLength> {
        let mut resolved: Vec<(usize, TaskLength)> = Vec::with_capacity(self.finished);
        let mut unfinished = Vec::new();
        for identifier in &self.started {
            let Some(record) = self.records.get(identifier) else { continue };
            match record.execution {
                Some(execution) => {
                    let state = resolve_state(execution.outcome, record.served_from_cache);
                    resolved.push((
                        execution.seq,
                        TaskLength::new(execution.duration_ms, identifier.clone(), state),
                    ));
                }
                None => unfinished
                    .push(TrackerAnomaly::NeverFinished { identifier: identifier.clone() }),
            }
        }
        self.anomalies.extend(unfinished);
        resolved.sort_by_key(|(seq, _)| *seq);
        resolved.into_iter().map(|(_, task)| task).collect()
    }

    /// Anomalies seen so far, in arrival order.
    pub fn anomalies(&self) -> &[TrackerAnomaly] {
        &self.anomalies
    }

    /// Number of units that reached a terminal state.
    pub fn finished_count(&self) -> usize {
        self.finished
    }

    fn reject(&mut self, anomaly: TrackerAnomaly) -> Result<(), TrackerAnomaly> {
        self.anomalies.push(anomaly.clone());
        Err(anomaly)
    }
}

fn resolve_state(outcome: TaskMessageState, served_from_cache: Option<bool>) -> TaskMessageState {
    match (outcome, served_from_cache) {
        (TaskMessageState::Failed, _) => TaskMessageState::Failed,
        (_, Some(true)) => TaskMessageState::FromCache,
        (outcome, _) => outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskMessageState::*;

    fn started(ids: &[&str]) -> TaskStateTracker {
        let mut tracker = TaskStateTracker::new();
        for id in ids {
            tracker.on_task_started(id).unwrap();
        }
        tracker
    }

    #[test]
    fn cache_hit_overrides_executed() {
        let mut tracker = started(&[":app:compile"]);
        tracker.on_task_finished(":app:compile", 120, Executed).unwrap();
        tracker.on_cache_event(":app:compile", true).unwrap();

        let tasks = tracker.finalize();
        assert_eq!(tasks, vec![TaskLength::new(120, ":app:compile", FromCache)]);
    }

    #[test]
    fn cache_event_before_finish_is_merged() {
        let mut tracker = started(&[":a"]);
        tracker.on_cache_event(":a", true).unwrap();
        tracker.on_task_finished(":a", 5, UpToDate).unwrap();
        assert_eq!(tracker.finalize()[0].state, FromCache);
    }

    #[test]
    fn cache_miss_keeps_execution_outcome() {
        let mut tracker = started(&[":a"]);
        tracker.on_task_finished(":a", 5, Executed).unwrap();
        tracker.on_cache_event(":a", false).unwrap();
        assert_eq!(tracker.finalize()[0].state, Executed);
    }

    #[test]
    fn failed_wins_over_cache_hit() {
        let mut tracker = started(&[":a"]);
        tracker.on_cache_event(":a", true).unwrap();
        tracker.on_task_finished(":a", 5, Failed).unwrap();
        assert_eq!(tracker.finalize()[0].state, Failed);
    }

    #[test]
    fn order_is_first_terminal_first() {
        let mut tracker = started(&[":first", ":second", ":third"]);
        tracker.on_task_finished(":third", 1, Executed).unwrap();
        tracker.on_task_finished(":first", 2, Executed).unwrap();
        tracker.on_task_finished(":second", 3, Executed).unwrap();

        let ids: Vec<_> = tracker.finalize().into_iter().map(|t| t.identifier).collect();
        assert_eq!(ids, vec![":third", ":first", ":second"]);
    }

    #[test]
    fn duplicate_finish_keeps_first_value() {
        let mut tracker = started(&[":a"]);
        tracker.on_task_finished(":a", 10, Executed).unwrap();
        let err = tracker.on_task_finished(":a", 99, Failed).unwrap_err();
        assert_eq!(err, TrackerAnomaly::DuplicateFinish { identifier: ":a".into() });

        assert_eq!(tracker.finalize(), vec![TaskLength::new(10, ":a", Executed)]);
        assert_eq!(tracker.anomalies().len(), 1);
    }

    #[test]
    fn unknown_identifier_is_dropped() {
        let mut tracker = started(&[":a"]);
        assert!(matches!(
            tracker.on_task_finished(":ghost", 1, Executed),
            Err(TrackerAnomaly::UnknownIdentifier { .. })
        ));
        assert!(matches!(
            tracker.on_cache_event(":ghost", true),
            Err(TrackerAnomaly::UnknownIdentifier { .. })
        ));
        tracker.on_task_finished(":a", 1, Executed).unwrap();
        assert_eq!(tracker.finalize().len(), 1);
        assert_eq!(tracker.anomalies().len(), 2);
    }

    #[test]
    fn malformed_and_negative_events_are_anomalies() {
        let mut tracker = started(&[":a"]);
        assert_eq!(tracker.on_task_started(""), Err(TrackerAnomaly::EmptyIdentifier));
        assert!(matches!(
            tracker.on_task_finished(":a", -3, Executed),
            Err(TrackerAnomaly::NegativeDuration { duration_ms: -3, .. })
        ));
        assert!(matches!(
            tracker.on_task_started(":a"),
            Err(TrackerAnomaly::DuplicateStart { .. })
        ));
        // the negative report did not consume the finish slot
        tracker.on_task_finished(":a", 3, Executed).unwrap();
        assert_eq!(tracker.finalize()[0].duration_ms, 3);
    }

    #[test]
    fn conflicting_cache_events_keep_hit() {
        let mut tracker = started(&[":a", ":b"]);
        tracker.on_cache_event(":a", false).unwrap();
        assert!(tracker.on_cache_event(":a", true).is_err());
        tracker.on_cache_event(":b", true).unwrap();
        assert!(tracker.on_cache_event(":b", false).is_err());
        tracker.on_cache_event(":b", true).unwrap();

        tracker.on_task_finished(":a", 1, Executed).unwrap();
        tracker.on_task_finished(":b", 1, Executed).unwrap();
        let states: Vec<_> = tracker.finalize().into_iter().map(|t| t.state).collect();
        assert_eq!(states, vec![FromCache, FromCache]);
    }

    #[test]
    fn unfinished_units_are_reported() {
        let mut tracker = started(&[":a", ":hung"]);
        tracker.on_task_finished(":a", 1, Executed).unwrap();
        let tasks = tracker.finalize();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tracker.finished_count(), 1);
        assert_eq!(
            tracker.anomalies(),
            &[TrackerAnomaly::NeverFinished { identifier: ":hung".into() }]
        );
    }
}
