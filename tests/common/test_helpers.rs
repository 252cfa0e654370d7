use async_trait::async_trait;
use buildwatch::{ExecutionReport, PublishError, Publisher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Publisher whose `validate` always reports a missing `url`.
pub struct Unconfigured;

#[async_trait]
impl Publisher for Unconfigured {
    fn name(&self) -> &str {
        "Unconfigured"
    }

    fn validate(&self) -> Result<(), PublishError> {
        Err(PublishError::ConfigurationInvalid {
            publisher: "Unconfigured".into(),
            missing: vec!["url".into()],
            remediation: "Please update your configuration".into(),
        })
    }

    async fn publish(&self, _report: &ExecutionReport) -> Result<(), PublishError> {
        panic!("an invalid publisher must never be published to")
    }
}

/// Publisher that fails every delivery and counts attempts.
#[derive(Default, Clone)]
pub struct Flaky {
    pub attempts: Arc<AtomicUsize>,
}

impl Flaky {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for Flaky {
    fn name(&self) -> &str {
        "Flaky"
    }

    fn validate(&self) -> Result<(), PublishError> {
        Ok(())
    }

    async fn publish(&self, _report: &ExecutionReport) -> Result<(), PublishError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(PublishError::delivery("Flaky", "connection reset"))
    }
}
