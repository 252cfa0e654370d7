//! InfluxDB publisher for `buildwatch`.
//!
//! Writes one build point and one task point per filtered task through the
//! HTTP `/write` endpoint with millisecond precision.
//!
//! ```toml
//! [publishers.influx]
//! url = "http://localhost:8086"
//! db_name = "builds"
//! ```

pub mod line;

use async_trait::async_trait;
use buildwatch::config::{BasicAuth, BuildwatchConfig};
use buildwatch::logger::LogTracker;
use buildwatch::publisher::documents::{Document, DocumentToggles};
use buildwatch::publisher::{publish_documents, DocumentTransport, Publisher};
use buildwatch::{ConfigError, ExecutionReport, PublishError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const PUBLISHER_NAME: &str = "InfluxDbPublisher";
pub const SECTION: &str = "influx";

const REMEDIATION: &str = "Please update your configuration";

/// Endpoint, database and measurement names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxDbPublisherConfiguration {
    pub url: String,
    pub db_name: String,
    pub retention_policy: Option<String>,
    pub task_metric_name: String,
    pub build_metric_name: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ignore_ssl_certificates: bool,
    pub connect_timeout_ms: Option<u64>,
    pub socket_timeout_ms: Option<u64>,
    pub publish_build_metrics: bool,
    pub publish_task_metrics: bool,
}

impl Default for InfluxDbPublisherConfiguration {
    fn default() -> Self {
        Self {
            url: String::new(),
            db_name: String::new(),
            retention_policy: None,
            task_metric_name: "task".to_string(),
            build_metric_name: "build".to_string(),
            username: None,
            password: None,
            ignore_ssl_certificates: false,
            connect_timeout_ms: None,
            socket_timeout_ms: None,
            publish_build_metrics: true,
            publish_task_metrics: true,
        }
    }
}

impl InfluxDbPublisherConfiguration {
    pub fn missing_keys(&self) -> Vec<String> {
        let mut missing = Vec::new();
        for (key, value) in [
            ("url", &self.url),
            ("db_name", &self.db_name),
            ("task_metric_name", &self.task_metric_name),
            ("build_metric_name", &self.build_metric_name),
        ] {
            if value.trim().is_empty() {
                missing.push(key.to_string());
            }
        }
        if self.basic_auth().is_incomplete() {
            missing.push("username and password".to_string());
        }
        missing
    }

    pub fn basic_auth(&self) -> BasicAuth<'_> {
        BasicAuth::from_pair(self.username.as_deref(), self.password.as_deref())
    }

    /// `{url}/write`, tolerating a trailing slash on `url`.
    pub fn write_url(&self) -> String {
        format!("{}/write", self.url.trim_end_matches('/'))
    }

    fn toggles(&self) -> DocumentToggles {
        DocumentToggles { build: self.publish_build_metrics, tasks: self.publish_task_metrics }
    }
}

/// Publishes build and task points to InfluxDB.
#[derive(Debug, Clone)]
pub struct InfluxDbPublisher {
    config: InfluxDbPublisherConfiguration,
    logger: Arc<dyn LogTracker>,
}

impl InfluxDbPublisher {
    pub fn new(config: InfluxDbPublisherConfiguration, logger: Arc<dyn LogTracker>) -> Self {
        Self { config, logger }
    }

    /// Build from `[publishers.influx]`. `Ok(None)` when the section is absent.
    pub fn from_config(
        config: &BuildwatchConfig,
        logger: Arc<dyn LogTracker>,
    ) -> Result<Option<Self>, ConfigError> {
        Ok(config
            .publisher_section::<InfluxDbPublisherConfiguration>(SECTION)?
            .map(|section| Self::new(section, logger)))
    }

    pub fn config(&self) -> &InfluxDbPublisherConfiguration {
        &self.config
    }

    fn client(&self) -> Result<reqwest::Client, PublishError> {
        let mut builder =
            reqwest::Client::builder()
                .danger_accept_invalid_certs(self.config.ignore_ssl_certificates);
        if let Some(ms) = self.config.connect_timeout_ms {
            builder = builder.connect_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.config.socket_timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        builder.build().map_err(|e| PublishError::delivery(PUBLISHER_NAME, e))
    }
}

#[async_trait]
impl Publisher for InfluxDbPublisher {
    fn name(&self) -> &str {
        PUBLISHER_NAME
    }

    fn validate(&self) -> Result<(), PublishError> {
        let missing = self.config.missing_keys();
        if missing.is_empty() {
            return Ok(());
        }
        Err(PublishError::ConfigurationInvalid {
            publisher: PUBLISHER_NAME.to_string(),
            missing,
            remediation: REMEDIATION.to_string(),
        })
    }

    async fn publish(&self, report: &ExecutionReport) -> Result<(), PublishError> {
        let transport = InfluxTransport {
            client: self.client()?,
            config: self.config.clone(),
            timestamp_ms: report
                .end_ms
                .as_deref()
                .or(report.begin_ms.as_deref())
                .and_then(|ms| ms.parse().ok()),
        };
        let toggles = self.config.toggles();
        publish_documents(PUBLISHER_NAME, &transport, report, toggles, self.logger.as_ref())
            .await
    }
}

/// Writes single points over HTTP.
#[derive(Debug, Clone)]
struct InfluxTransport {
    client: reqwest::Client,
    config: InfluxDbPublisherConfiguration,
    timestamp_ms: Option<u64>,
}

impl InfluxTransport {
    async fn write(&self, measurement: &str, document: &Document) -> Result<(), String> {
        let Some(body) = line::to_line(measurement, document, self.timestamp_ms) else {
            debug!(target: "buildwatch::influx", measurement, "point without fields skipped");
            return Ok(());
        };

        let mut query = vec![("db", self.config.db_name.as_str()), ("precision", "ms")];
        if let Some(rp) = &self.config.retention_policy {
            query.push(("rp", rp.as_str()));
        }
        let mut request = self.client.post(self.config.write_url()).query(&query).body(body);
        if let Some((username, password)) = self.config.basic_auth().pair() {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if status.is_success() {
            debug!(
                target: "buildwatch::influx",
                measurement,
                status = status.as_u16(),
                "point written"
            );
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(format!("write returned {status}: {body}"))
        }
    }
}

#[async_trait]
impl DocumentTransport for InfluxTransport {
    type Error = String;

    async fn send_build(&self, document: &Document) -> Result<(), String> {
        self.write(&self.config.build_metric_name, document).await
    }

    async fn send_task(&self, document: &Document) -> Result<(), String> {
        self.write(&self.config.task_metric_name, document).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildwatch::logger::MemoryLogTracker;

    fn publisher(config: InfluxDbPublisherConfiguration) -> InfluxDbPublisher {
        InfluxDbPublisher::new(config, Arc::new(MemoryLogTracker::new()))
    }

    #[test]
    fn defaults_need_url_and_database() {
        let err = publisher(InfluxDbPublisherConfiguration::default()).validate().unwrap_err();
        assert_eq!(
            err,
            PublishError::ConfigurationInvalid {
                publisher: PUBLISHER_NAME.into(),
                missing: vec!["url".into(), "db_name".into()],
                remediation: REMEDIATION.into(),
            }
        );
    }

    #[test]
    fn password_without_username_is_invalid() {
        let config = InfluxDbPublisherConfiguration {
            url: "http://influx:8086".into(),
            db_name: "builds".into(),
            password: Some("secret".into()),
            ..Default::default()
        };
        assert_eq!(config.missing_keys(), vec!["username and password"]);

        let empty_user = InfluxDbPublisherConfiguration { username: Some(String::new()), ..config };
        assert_eq!(empty_user.missing_keys(), vec!["username and password"]);
    }

    #[test]
    fn write_url_trims_trailing_slash() {
        let config =
            InfluxDbPublisherConfiguration {
                url: "http://influx:8086/".into(),
                ..Default::default()
            };
        assert_eq!(config.write_url(), "http://influx:8086/write");
    }

    #[test]
    fn reads_its_section() {
        let config = BuildwatchConfig::from_toml_str(
            r#"
            [publishers.influx]
            url = "http://influx:8086"
            db_name = "builds"
            task_metric_name = "gradle_task"
            publish_build_metrics = false
            "#,
        )
        .unwrap();
        let publisher = InfluxDbPublisher::from_config(&config, Arc::new(MemoryLogTracker::new()))
            .unwrap()
            .unwrap();
        assert_eq!(publisher.config().task_metric_name, "gradle_task");
        assert_eq!(publisher.config().build_metric_name, "build");
        assert!(!publisher.config().publish_build_metrics);
        assert!(publisher.validate().is_ok());
    }
}
