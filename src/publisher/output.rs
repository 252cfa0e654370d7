//! Human-readable task timings, written through the log tracker.

use super::Publisher;
use crate::config::OutputPublisherConfiguration;
use crate::entities::ExecutionReport;
use crate::error::PublishError;
use crate::formatter::{self, TITLE};
use crate::logger::LogTracker;
use async_trait::async_trait;
use std::sync::Arc;

/// Logs the filtered tasks sorted by duration under the `OutputPublisher`
/// tag.
#[derive(Debug, Clone)]
pub struct OutputPublisher {
    config: OutputPublisherConfiguration,
    logger: Arc<dyn LogTracker>,
}

impl OutputPublisher {
    pub fn new(config: OutputPublisherConfiguration, logger: Arc<dyn LogTracker>) -> Self {
        Self { config, logger }
    }

    /// Lines that `publish` would log for `report`.
    pub fn render(&self, report: &ExecutionReport) -> Vec<String> {
        formatter::format(report.tasks(), self.config.order, self.config.number_of_tasks)
    }
}

#[async_trait]
impl Publisher for OutputPublisher {
    fn name(&self) -> &str {
        TITLE
    }

    fn validate(&self) -> Result<(), PublishError> {
        Ok(())
    }

    async fn publish(&self, report: &ExecutionReport) -> Result<(), PublishError> {
        for line in self.render(report) {
            self.logger.log(TITLE, &line);
        }
        Ok(())
    }
}
