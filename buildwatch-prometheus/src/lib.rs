//! Prometheus publisher for `buildwatch`.
//!
//! Builds a fresh registry per report (build gauges plus one
//! `task_duration_ms` series per filtered task) and pushes it to a
//! Pushgateway. The push is a single request; it either lands or the whole
//! publish fails.
//!
//! ```toml
//! [publishers.prometheus]
//! url = "http://pushgateway:9091"
//! job_name = "android-build"
//! ```

use async_trait::async_trait;
use buildwatch::config::{BasicAuth, BuildwatchConfig};
use buildwatch::logger::LogTracker;
use buildwatch::publisher::documents::{log_start, DocumentToggles};
use buildwatch::publisher::Publisher;
use buildwatch::{ConfigError, ExecutionReport, PublishError};
use prometheus::{BasicAuthentication, Gauge, GaugeVec, Opts, Registry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

pub const PUBLISHER_NAME: &str = "PrometheusPublisher";
pub const SECTION: &str = "prometheus";

const REMEDIATION: &str = "Please update your configuration";

/// Pushgateway endpoint and job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusPublisherConfiguration {
    /// Pushgateway base URL, e.g. `http://pushgateway:9091`.
    pub url: String,
    pub job_name: String,
    /// Prefix of every metric name.
    pub namespace: String,
    /// Extra grouping labels for the push.
    pub grouping: BTreeMap<String, String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub publish_build_metrics: bool,
    pub publish_task_metrics: bool,
}

impl Default for PrometheusPublisherConfiguration {
    fn default() -> Self {
        Self {
            url: String::new(),
            job_name: "buildwatch".to_string(),
            namespace: "buildwatch".to_string(),
            grouping: BTreeMap::new(),
            username: None,
            password: None,
            publish_build_metrics: true,
            publish_task_metrics: true,
        }
    }
}

impl PrometheusPublisherConfiguration {
    pub fn missing_keys(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if self.url.trim().is_empty() {
            missing.push("url".to_string());
        }
        if self.job_name.trim().is_empty() {
            missing.push("job_name".to_string());
        }
        if self.basic_auth().is_incomplete() {
            missing.push("username and password".to_string());
        }
        missing
    }

    pub fn basic_auth(&self) -> BasicAuth<'_> {
        BasicAuth::from_pair(self.username.as_deref(), self.password.as_deref())
    }

    fn toggles(&self) -> DocumentToggles {
        DocumentToggles { build: self.publish_build_metrics, tasks: self.publish_task_metrics }
    }
}

fn ms(value: Option<&str>) -> Option<f64> {
    value.and_then(|v| v.parse::<u64>().ok()).map(|v| v as f64)
}

/// Register the report's metrics into a new registry.
///
/// # Errors
/// Returns an error if a metric cannot be created or registered (for example
/// an invalid `namespace`).
pub fn collect(
    report: &ExecutionReport,
    namespace: &str,
    toggles: DocumentToggles,
) -> Result<Registry, prometheus::Error> {
    let registry = Registry::new();

    if toggles.build {
        let gauge = |name: &str, help: &str, value: Option<f64>| -> Result<(), prometheus::Error> {
            let Some(value) = value else { return Ok(()) };
            let gauge = Gauge::with_opts(Opts::new(name, help).namespace(namespace))?;
            gauge.set(value);
            registry.register(Box::new(gauge))
        };
        gauge("build_duration_ms", "Wall time of the build", ms(report.duration_ms.as_deref()))?;
        gauge(
            "build_configuration_ms",
            "Configuration phase duration",
            ms(report.configuration_duration_ms.as_deref()),
        )?;
        gauge(
            "build_execution_ms",
            "Execution phase duration",
            ms(report.execution_duration_ms.as_deref()),
        )?;
        gauge("build_cache_ratio", "Share of tasks served from cache", report.cache_ratio_value())?;
        let success = if report.success { 1.0 } else { 0.0 };
        gauge("build_success", "1 when the build succeeded", Some(success))?;
        gauge("build_tasks", "Tasks after filtering", Some(report.tasks().len() as f64))?;
    }

    if toggles.tasks && !report.tasks().is_empty() {
        let tasks = GaugeVec::new(
            Opts::new("task_duration_ms", "Duration of one task").namespace(namespace),
            &["task", "module", "state"],
        )?;
        for task in report.tasks() {
            tasks
                .with_label_values(&[task.identifier.as_str(), task.module(), task.state.as_str()])
                .set(task.duration_ms as f64);
        }
        registry.register(Box::new(tasks))?;
    }
    Ok(registry)
}

/// Pushes report metrics to a Pushgateway.
#[derive(Debug, Clone)]
pub struct PrometheusPublisher {
    config: PrometheusPublisherConfiguration,
    logger: Arc<dyn LogTracker>,
}

impl PrometheusPublisher {
    pub fn new(config: PrometheusPublisherConfiguration, logger: Arc<dyn LogTracker>) -> Self {
        Self { config, logger }
    }

    /// Build from `[publishers.prometheus]`. `Ok(None)` when the section is absent.
    pub fn from_config(
        config: &BuildwatchConfig,
        logger: Arc<dyn LogTracker>,
    ) -> Result<Option<Self>, ConfigError> {
        Ok(config
            .publisher_section::<PrometheusPublisherConfiguration>(SECTION)?
            .map(|section| Self::new(section, logger)))
    }

    pub fn config(&self) -> &PrometheusPublisherConfiguration {
        &self.config
    }

    fn grouping(&self, report: &ExecutionReport) -> HashMap<String, String> {
        let mut grouping: HashMap<String, String> =
            self.config.grouping.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        if let Some(build_id) = &report.build_id {
            grouping.entry("build_id".to_string()).or_insert_with(|| build_id.clone());
        }
        grouping
    }
}

#[async_trait]
impl Publisher for PrometheusPublisher {
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
        let toggles = self.config.toggles();
        log_start(PUBLISHER_NAME, toggles, self.logger.as_ref());

        let registry = collect(report, &self.config.namespace, toggles)
            .map_err(|e| PublishError::delivery(PUBLISHER_NAME, e))?;
        let families = registry.gather();
        if families.is_empty() {
            self.logger.log(PUBLISHER_NAME, "nothing to push");
            return Ok(());
        }

        let job = self.config.job_name.clone();
        let url = self.config.url.clone();
        let grouping = self.grouping(report);
        let auth = self.config.basic_auth().pair().map(|(username, password)| {
            BasicAuthentication { username: username.to_string(), password: password.to_string() }
        });

        // push_metrics blocks on its own HTTP client
        let pushed = tokio::task::spawn_blocking(move || {
            prometheus::push_metrics(&job, grouping, &url, families, auth)
        })
        .await
        .map_err(|e| PublishError::delivery(PUBLISHER_NAME, e))?;

        match pushed {
            Ok(()) => {
                debug!(
                    target: "buildwatch::prometheus",
                    job = %self.config.job_name,
                    "metrics pushed"
                );
                self.logger.log(PUBLISHER_NAME, "Result push: ok");
                Ok(())
            }
            Err(e) => {
                self.logger.error(&format!("{PUBLISHER_NAME}: push failed: {e}"));
                Err(PublishError::delivery(PUBLISHER_NAME, e))
            }
        }
    }
}
