//! JSON-lines publisher for `buildwatch`. Writes the whole execution report
//! as one line, appending by default.
//!
//! ```toml
//! [publishers.json]
//! path = "build/buildwatch/reports.jsonl"
//! ```

use async_trait::async_trait;
use buildwatch::config::BuildwatchConfig;
use buildwatch::logger::LogTracker;
use buildwatch::publisher::Publisher;
use buildwatch::{ConfigError, ExecutionReport, PublishError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub const PUBLISHER_NAME: &str = "JsonPublisher";
pub const SECTION: &str = "json";

/// How an existing file is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// One report per line, accumulated across builds.
    #[default]
    Append,
    /// Only the latest report.
    Overwrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonPublisherConfiguration {
    pub path: PathBuf,
    pub mode: WriteMode,
    /// Also write `unfilteredTasks`.
    pub include_unfiltered_tasks: bool,
}

impl Default for JsonPublisherConfiguration {
    fn default() -> Self {
        Self { path: PathBuf::new(), mode: WriteMode::default(), include_unfiltered_tasks: true }
    }
}

#[derive(Debug, Clone)]
pub struct JsonPublisher {
    config: JsonPublisherConfiguration,
    logger: Arc<dyn LogTracker>,
}

impl JsonPublisher {
    pub fn new(config: JsonPublisherConfiguration, logger: Arc<dyn LogTracker>) -> Self {
        Self { config, logger }
    }

    /// Build from `[publishers.json]`. `Ok(None)` when the section is absent.
    pub fn from_config(
        config: &BuildwatchConfig,
        logger: Arc<dyn LogTracker>,
    ) -> Result<Option<Self>, ConfigError> {
        Ok(config
            .publisher_section::<JsonPublisherConfiguration>(SECTION)?
            .map(|section| Self::new(section, logger)))
    }

    /// The line written for `report`, newline included.
    pub fn render(&self, report: &ExecutionReport) -> Result<String, serde_json::Error> {
        let line = if self.config.include_unfiltered_tasks {
            serde_json::to_string(report)?
        } else {
            let trimmed = ExecutionReport { unfiltered_tasks: None, ..report.clone() };
            serde_json::to_string(&trimmed)?
        };
        Ok(line + "\n")
    }
}

#[async_trait]
impl Publisher for JsonPublisher {
    fn name(&self) -> &str {
        PUBLISHER_NAME
    }

    fn validate(&self) -> Result<(), PublishError> {
        if self.config.path.as_os_str().is_empty() {
            return Err(PublishError::ConfigurationInvalid {
                publisher: PUBLISHER_NAME.to_string(),
                missing: vec!["path".to_string()],
                remediation: "Please update your configuration".to_string(),
            });
        }
        Ok(())
    }

    async fn publish(&self, report: &ExecutionReport) -> Result<(), PublishError> {
        let fail = |e: std::io::Error| PublishError::delivery(PUBLISHER_NAME, e);
        let line = self.render(report).map_err(|e| PublishError::delivery(PUBLISHER_NAME, e))?;
        let path = &self.config.path;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(fail)?;
        }
        let mut options = tokio::fs::OpenOptions::new();
        options.create(true);
        match self.config.mode {
            WriteMode::Append => options.append(true),
            WriteMode::Overwrite => options.write(true).truncate(true),
        };
        let mut file = options.open(path).await.map_err(fail)?;
        file.write_all(line.as_bytes()).await.map_err(fail)?;
        file.flush().await.map_err(fail)?;

        debug!(
            target: "buildwatch::json",
            path = %path.display(),
            bytes = line.len(),
            "report written"
        );
        self.logger.log(PUBLISHER_NAME, &format!("report written to {}", path.display()));
        Ok(())
    }
}
