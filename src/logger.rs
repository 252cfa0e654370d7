//! The `log(tag, message)` channel every user-visible line goes through.
//!
//! Publishers and the build session never print directly: they write to a
//! [`LogTracker`], which by default forwards to `tracing`.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// How chatty the tracker is. Errors are always emitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogMode {
    /// Only errors.
    #[default]
    Silent,
    /// Banners, toggles and per-sink progress.
    Info,
}

/// Sink for user-visible log lines.
pub trait LogTracker: Send + Sync + std::fmt::Debug {
    /// Informational line attributed to `tag` (usually a publisher name).
    fn log(&self, tag: &str, message: &str);
    /// Error line; emitted regardless of mode.
    fn error(&self, message: &str);
}

/// Log tracker that forwards to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogTracker {
    mode: LogMode,
}

impl TracingLogTracker {
    pub fn new(mode: LogMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> LogMode {
        self.mode
    }
}

impl LogTracker for TracingLogTracker {
    fn log(&self, tag: &str, message: &str) {
        if self.mode == LogMode::Info {
            tracing::info!(target: "buildwatch", tag = %tag, "{}", message);
        }
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "buildwatch", "{}", message);
    }
}

/// A logged line captured by [`MemoryLogTracker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogLine {
    Info { tag: String, message: String },
    Error { message: String },
}

impl LogLine {
    pub fn message(&self) -> &str {
        match self {
            LogLine::Info { message, .. } | LogLine::Error { message } => message,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, LogLine::Error { .. })
    }
}

/// Log tracker that keeps every line in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogTracker {
    lines: Arc<Mutex<Vec<LogLine>>>,
}

impl MemoryLogTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.lock().map(|lines| lines.clone()).unwrap_or_default()
    }

    /// Messages logged under `tag`, in order.
    pub fn messages_for(&self, tag: &str) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter_map(|line| match line {
                LogLine::Info { tag: t, message } if t == tag => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter_map(|line| match line {
                LogLine::Error { message } => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.clear();
        }
    }

    fn push(&self, line: LogLine) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line);
        }
    }
}

impl LogTracker for MemoryLogTracker {
    fn log(&self, tag: &str, message: &str) {
        self.push(LogLine::Info { tag: tag.to_string(), message: message.to_string() });
    }

    fn error(&self, message: &str) {
        self.push(LogLine::Error { message: message.to_string() });
    }
}
