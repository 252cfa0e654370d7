//! Fan-out of one finished report to every configured publisher.
//!
//! Each publisher is validated first; an invalid one is logged and skipped.
//! Valid publishers each get the same shared, read-only report. A failure,
//! timeout or panic in one publisher is logged and never reaches the others.
//!
//! In [`DispatchMode::Background`] each publisher runs on its own spawned
//! task and `dispatch` returns as soon as they are scheduled; the returned
//! [`DispatchHandle`] can still be joined by callers that care.

use super::Publisher;
use crate::config::DispatchConfiguration;
use crate::entities::ExecutionReport;
use crate::error::PublishError;
use crate::logger::LogTracker;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Whether `dispatch` waits for publishers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// Publish one after another and return when all are done.
    #[default]
    Blocking,
    /// Spawn each publisher and return immediately.
    Background,
}

/// What happened to one publisher.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkOutcome {
    Delivered,
    /// Validation failed; nothing was sent.
    Skipped(PublishError),
    Failed(PublishError),
}

impl SinkOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, SinkOutcome::Delivered)
    }

    pub fn error(&self) -> Option<&PublishError> {
        match self {
            SinkOutcome::Delivered => None,
            SinkOutcome::Skipped(e) | SinkOutcome::Failed(e) => Some(e),
        }
    }
}

/// Result of a dispatch: finished outcomes plus any still-running publishers.
#[derive(Debug, Default)]
pub struct DispatchHandle {
    finished: Vec<(String, SinkOutcome)>,
    pending: Vec<(String, JoinHandle<SinkOutcome>)>,
}

impl DispatchHandle {
    /// Outcomes known at the time `dispatch` returned.
    pub fn outcomes(&self) -> &[(String, SinkOutcome)] {
        &self.finished
    }

    /// Number of publishers still running in the background.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Wait for every background publisher and return all outcomes, skipped
    /// publishers first, then in registration order.
    pub async fn join(self) -> Vec<(String, SinkOutcome)> {
        let DispatchHandle { mut finished, pending } = self;
        let (names, handles): (Vec<_>, Vec<_>) = pending.into_iter().unzip();
        let results = futures::future::join_all(handles).await;
        for (name, joined) in names.into_iter().zip(results) {
            let outcome = joined.unwrap_or_else(|e| {
                let message = format!("publisher task aborted: {e}");
                SinkOutcome::Failed(PublishError::delivery(&name, message))
            });
            finished.push((name, outcome));
        }
        finished
    }
}

/// Holds the publishers of a session and hands reports to them.
#[derive(Clone)]
pub struct PublisherDispatch {
    publishers: Vec<Arc<dyn Publisher>>,
    mode: DispatchMode,
    timeout: Option<Duration>,
    logger: Arc<dyn LogTracker>,
}

impl std::fmt::Debug for PublisherDispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublisherDispatch")
            .field("publishers", &self.publisher_names())
            .field("mode", &self.mode)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl PublisherDispatch {
    pub fn new(logger: Arc<dyn LogTracker>) -> Self {
        Self { publishers: Vec::new(), mode: DispatchMode::default(), timeout: None, logger }
    }

    pub fn from_config(config: &DispatchConfiguration, logger: Arc<dyn LogTracker>) -> Self {
        let mode = if config.background {
            DispatchMode::Background
        } else {
            DispatchMode::Blocking
        };
        Self::new(logger)
            .with_mode(mode)
            .with_timeout(config.publish_timeout_ms.map(Duration::from_millis))
    }

    pub fn with_mode(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Bound each `publish` call. `None` waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_publisher<P: Publisher + 'static>(self, publisher: P) -> Self {
        self.with_shared(Arc::new(publisher))
    }

    pub fn with_shared(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    pub fn add(&mut self, publisher: Arc<dyn Publisher>) {
        self.publishers.push(publisher);
    }

    pub fn publisher_names(&self) -> Vec<String> {
        self.publishers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }

    /// Hand `report` to every publisher.
    pub async fn dispatch(&self, report: Arc<ExecutionReport>) -> DispatchHandle {
        let mut handle = DispatchHandle::default();
        for publisher in &self.publishers {
            let name = publisher.name().to_string();
            if let Err(e) = validate_one(publisher.as_ref(), &name) {
                warn!(
                    target: "buildwatch::dispatch",
                    publisher = %name,
                    error = %e,
                    "publisher skipped"
                );
                self.logger.error(&e.to_string());
                handle.finished.push((name, SinkOutcome::Skipped(e)));
                continue;
            }

            let publisher = Arc::clone(publisher);
            let report = Arc::clone(&report);
            let logger = Arc::clone(&self.logger);
            let timeout = self.timeout;
            match self.mode {
                DispatchMode::Blocking => {
                    let outcome = run_one(publisher, report, timeout, logger).await;
                    handle.finished.push((name, outcome));
                }
                DispatchMode::Background => {
                    let task = tokio::spawn(run_one(publisher, report, timeout, logger));
                    handle.pending.push((name, task));
                }
            }
        }
        debug!(
            target: "buildwatch::dispatch",
            finished = handle.finished.len(),
            pending = handle.pending.len(),
            "dispatch scheduled"
        );
        handle
    }
}

/// A panicking `validate` skips the publisher like an invalid one.
fn validate_one(publisher: &dyn Publisher, name: &str) -> Result<(), PublishError> {
    match std::panic::catch_unwind(AssertUnwindSafe(|| publisher.validate())) {
        Ok(result) => result,
        Err(_) => Err(PublishError::delivery(name, "publisher panicked during validation")),
    }
}

async fn run_one(
    publisher: Arc<dyn Publisher>,
    report: Arc<ExecutionReport>,
    timeout: Option<Duration>,
    logger: Arc<dyn LogTracker>,
) -> SinkOutcome {
    let name = publisher.name().to_string();
    let publish = AssertUnwindSafe(publisher.publish(&report)).catch_unwind();

    let result = match timeout {
        None => publish.await,
        Some(limit) => match tokio::time::timeout(limit, publish).await {
            Ok(result) => result,
            Err(_) => Ok(Err(PublishError::delivery(
                &name,
                format!("timed out after {} ms", limit.as_millis()),
            ))),
        },
    };

    let outcome = match result {
        Ok(Ok(())) => SinkOutcome::Delivered,
        Ok(Err(e)) => SinkOutcome::Failed(e),
        Err(_) => SinkOutcome::Failed(PublishError::delivery(&name, "publisher panicked")),
    };

    match &outcome {
        SinkOutcome::Delivered => {
            debug!(target: "buildwatch::dispatch", publisher = %name, "report delivered");
        }
        SinkOutcome::Failed(e) | SinkOutcome::Skipped(e) => {
            warn!(target: "buildwatch::dispatch", publisher = %name, error = %e, "publish failed");
            logger.error(&format!("{name}: {e}"));
        }
    }
    outcome
}
