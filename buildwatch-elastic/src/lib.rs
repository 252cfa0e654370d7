//! Elasticsearch publisher for `buildwatch`.
//!
//! Sends the build document to `build_index_name` and one task document per
//! filtered task to `task_index_name`. A rejected document is logged and the
//! remaining ones are still sent.
//!
//! ```toml
//! [publishers.elastic]
//! url = "http://localhost:9200"
//! build_index_name = "build"
//! task_index_name = "task"
//! ```

use async_trait::async_trait;
use buildwatch::config::{BasicAuth, BuildwatchConfig};
use buildwatch::logger::LogTracker;
use buildwatch::publisher::documents::{Document, DocumentToggles};
use buildwatch::publisher::{publish_documents, DocumentTransport, Publisher};
use buildwatch::{ConfigError, ExecutionReport, PublishError};
use elasticsearch::auth::Credentials;
use elasticsearch::cert::CertificateValidation;
use elasticsearch::http::transport::{SingleNodeConnectionPool, TransportBuilder};
use elasticsearch::http::Url;
use elasticsearch::{Elasticsearch, IndexParts};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Name used in logs, errors and the `[publishers.<section>]` key.
pub const PUBLISHER_NAME: &str = "ElasticSearchPublisher";
/// Configuration section under `[publishers]`.
pub const SECTION: &str = "elastic";

const REMEDIATION: &str = "Please update your configuration";

/// Connection and index settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticSearchPublisherConfiguration {
    pub url: String,
    pub build_index_name: String,
    pub task_index_name: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Accept any server certificate.
    pub ignore_ssl_certificates: bool,
    pub connect_timeout_ms: Option<u64>,
    pub socket_timeout_ms: Option<u64>,
    pub publish_build_metrics: bool,
    pub publish_task_metrics: bool,
}

impl Default for ElasticSearchPublisherConfiguration {
    fn default() -> Self {
        Self {
            url: String::new(),
            build_index_name: String::new(),
            task_index_name: String::new(),
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

impl ElasticSearchPublisherConfiguration {
    /// Keys that must be set before anything is sent. Credentials count as
    /// one `username and password` entry when only one of them is present.
    pub fn missing_keys(&self) -> Vec<String> {
        let mut missing = Vec::new();
        for (key, value) in [
            ("url", &self.url),
            ("build_index_name", &self.build_index_name),
            ("task_index_name", &self.task_index_name),
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

    /// Only the transport-wide timeout exists on the client; the socket
    /// timeout wins when both are set.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.socket_timeout_ms.or(self.connect_timeout_ms).map(Duration::from_millis)
    }

    fn toggles(&self) -> DocumentToggles {
        DocumentToggles { build: self.publish_build_metrics, tasks: self.publish_task_metrics }
    }
}

/// Publishes build and task documents to Elasticsearch.
#[derive(Debug, Clone)]
pub struct ElasticSearchPublisher {
    config: ElasticSearchPublisherConfiguration,
    logger: Arc<dyn LogTracker>,
}

impl ElasticSearchPublisher {
    pub fn new(config: ElasticSearchPublisherConfiguration, logger: Arc<dyn LogTracker>) -> Self {
        Self { config, logger }
    }

    /// Build from `[publishers.elastic]`. `Ok(None)` when the section is absent.
    pub fn from_config(
        config: &BuildwatchConfig,
        logger: Arc<dyn LogTracker>,
    ) -> Result<Option<Self>, ConfigError> {
        Ok(config
            .publisher_section::<ElasticSearchPublisherConfiguration>(SECTION)?
            .map(|section| Self::new(section, logger)))
    }

    pub fn config(&self) -> &ElasticSearchPublisherConfiguration {
        &self.config
    }

    fn client(&self) -> Result<Elasticsearch, PublishError> {
        let url = Url::parse(&self.config.url)
            .map_err(|e| PublishError::delivery(PUBLISHER_NAME, format!("invalid url: {e}")))?;
        let mut builder = TransportBuilder::new(SingleNodeConnectionPool::new(url));
        if let Some((username, password)) = self.config.basic_auth().pair() {
            builder = builder.auth(Credentials::Basic(username.into(), password.into()));
        }
        if self.config.ignore_ssl_certificates {
            builder = builder.cert_validation(CertificateValidation::None);
        }
        if let Some(timeout) = self.config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let transport = builder.build().map_err(|e| PublishError::delivery(PUBLISHER_NAME, e))?;
        Ok(Elasticsearch::new(transport))
    }
}

#[async_trait]
impl Publisher for ElasticSearchPublisher {
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
        let transport = ElasticTransport {
            client: self.client()?,
            build_index: self.config.build_index_name.clone(),
            task_index: self.config.task_index_name.clone(),
        };
        let toggles = self.config.toggles();
        publish_documents(PUBLISHER_NAME, &transport, report, toggles, self.logger.as_ref())
            .await
    }
}

/// Indexes documents through one client.
#[derive(Debug, Clone)]
pub struct ElasticTransport {
    client: Elasticsearch,
    build_index: String,
    task_index: String,
}

impl ElasticTransport {
    pub fn new(
        client: Elasticsearch,
        build_index: impl Into<String>,
        task_index: impl Into<String>,
    ) -> Self {
        Self { client, build_index: build_index.into(), task_index: task_index.into() }
    }

    async fn index(&self, index: &str, document: &Document) -> Result<(), String> {
        let response = self
            .client
            .index(IndexParts::Index(index))
            .body(document)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status_code();
        if status.is_success() {
            debug!(
                target: "buildwatch::elastic",
                index,
                status = status.as_u16(),
                "document indexed"
            );
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(format!("{index} returned {status}: {body}"))
        }
    }
}

#[async_trait]
impl DocumentTransport for ElasticTransport {
    type Error = String;

    async fn send_build(&self, document: &Document) -> Result<(), String> {
        self.index(&self.build_index, document).await
    }

    async fn send_task(&self, document: &Document) -> Result<(), String> {
        self.index(&self.task_index, document).await
    }
}
