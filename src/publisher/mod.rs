//! Publishers and the dispatch that fans a report out to them.
//!
//! A publisher is anything implementing [`Publisher`]: a name, a cheap
//! configuration check, and an async `publish`. New sinks are added by
//! implementing the trait; dispatch never branches on the concrete type.
//!
//! # Implementing a Custom Publisher
//!
//! ```rust
//! use async_trait::async_trait;
//! use buildwatch::publisher::Publisher;
//! use buildwatch::{ExecutionReport, PublishError};
//!
//! struct StdoutPublisher;
//!
//! #[async_trait]
//! impl Publisher for StdoutPublisher {
//!     fn name(&self) -> &str {
//!         "StdoutPublisher"
//!     }
//!
//!     fn validate(&self) -> Result<(), PublishError> {
//!         Ok(())
//!     }
//!
//!     async fn publish(&self, report: &ExecutionReport) -> Result<(), PublishError> {
//!         println!("{} tasks", report.tasks().len());
//!         Ok(())
//!     }
//! }
//! ```

pub mod dispatch;
pub mod documents;
pub mod output;

pub use dispatch::{DispatchHandle, DispatchMode, PublisherDispatch, SinkOutcome};
pub use documents::{build_document, publish_documents, task_document, DocumentTransport};
pub use output::OutputPublisher;

use crate::entities::ExecutionReport;
use crate::error::PublishError;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// A delivery target for the execution report.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Tag used in log lines and errors.
    fn name(&self) -> &str;

    /// Check required settings before any delivery is attempted.
    ///
    /// # Errors
    /// `PublishError::ConfigurationInvalid` naming the missing keys.
    fn validate(&self) -> Result<(), PublishError>;

    /// Deliver the report. The report is shared and must not be mutated.
    async fn publish(&self, report: &ExecutionReport) -> Result<(), PublishError>;
}

#[async_trait]
impl<P: Publisher + ?Sized> Publisher for Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn validate(&self) -> Result<(), PublishError> {
        (**self).validate()
    }

    async fn publish(&self, report: &ExecutionReport) -> Result<(), PublishError> {
        (**self).publish(report).await
    }
}

/// A publisher that keeps every report it receives in memory.
#[derive(Clone, Debug)]
pub struct MemoryPublisher {
    name: String,
    reports: Arc<Mutex<Vec<ExecutionReport>>>,
}

impl MemoryPublisher {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), reports: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn reports(&self) -> Vec<ExecutionReport> {
        self.reports.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryPublisher {
    fn default() -> Self {
        Self::new("MemoryPublisher")
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<(), PublishError> {
        Ok(())
    }

    async fn publish(&self, report: &ExecutionReport) -> Result<(), PublishError> {
        self.reports
            .lock()
            .map_err(|e| PublishError::delivery(&self.name, e))?
            .push(report.clone());
        Ok(())
    }
}
