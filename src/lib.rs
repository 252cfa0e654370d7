#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # buildwatch
//!
//! Build telemetry: per-task state tracking, a one-shot environment snapshot,
//! and fan-out of a single execution report to pluggable publishers.
//!
//! ## Features
//!
//! - **Task state tracking** merging execution and cache notifications that
//!   arrive in any order
//! - **Environment snapshot** from independent, failure-isolated probes
//! - **Task and build filters** driven by regular expressions, states and
//!   duration thresholds
//! - **Publisher dispatch** with per-sink failure isolation, timeouts and
//!   background delivery
//! - **Console output** of task durations; search-index, time-series and
//!   JSON-lines sinks live in the `buildwatch-*` crates
//!
//! ## Quick Start
//!
//! ```rust
//! use buildwatch::{BuildMeta, BuildSession, BuildwatchConfig, MemoryPublisher, TaskMessageState};
//! use buildwatch::logger::TracingLogTracker;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let sink = MemoryPublisher::default();
//!     let logger = Arc::new(TracingLogTracker::default());
//!     let mut session = BuildSession::new(BuildwatchConfig::default(), logger)
//!         .unwrap()
//!         .with_publisher(sink.clone());
//!
//!     session.on_build_start();
//!     session.on_task_started(":app:compile");
//!     session.on_task_finished(":app:compile", 420, TaskMessageState::Executed);
//!
//!     let meta = BuildMeta { success: true, ..Default::default() };
//!     if let Some(handle) = session.on_build_finish(meta).await {
//!         handle.join().await;
//!     }
//!     assert_eq!(sink.reports()[0].tasks().len(), 1);
//! }
//! ```

pub mod clock;
pub mod config;
pub mod entities;
pub mod environment;
pub mod error;
pub mod filter;
pub mod formatter;
pub mod logger;
pub mod prelude;
pub mod publisher;
pub mod report;
pub mod session;
pub mod tracker;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::BuildwatchConfig;
pub use entities::{Environment, ExecutionReport, TaskLength, TaskMessageState};
pub use error::{CaptureError, ConfigError, PublishError, TrackerAnomaly};
pub use filter::{BuildFilter, TaskFilter};
pub use publisher::{MemoryPublisher, Publisher, PublisherDispatch};
pub use report::BuildMeta;
pub use session::BuildSession;
pub use tracker::TaskStateTracker;
