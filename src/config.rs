//! Configuration for a build session.
//!
//! Loaded from TOML. Core settings (filters, metrics, dispatch, logging) are
//! typed here; every other table under `[publishers]` is kept raw and handed
//! to the sink crate that owns it via [`BuildwatchConfig::publisher_section`].
//!
//! ```toml
//! log_mode = "info"
//!
//! [dispatch]
//! background = true
//! publish_timeout_ms = 30000
//!
//! [filter.tasks]
//! excludes = [":buildSrc:.*"]
//!
//! [publishers.output]
//! order = "desc"
//! number_of_tasks = 10
//!
//! [publishers.elastic]
//! url = "http://localhost:9200"
//! ```

use crate::entities::{CustomProperties, TaskMessageState};
use crate::error::ConfigError;
use crate::filter::{BuildFilter, TaskFilter};
use crate::formatter::Order;
use crate::logger::LogMode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildwatchConfig {
    pub log_mode: LogMode,
    /// Skip tracking entirely when an environment variable has a given value.
    pub ignore_when: Option<IgnoreWhen>,
    pub dispatch: DispatchConfiguration,
    pub filter: FilterConfiguration,
    pub metrics: MetricsConfiguration,
    pub publishers: PublishersConfiguration,
}

/// Disable tracking when `env_name` equals `value`, e.g. on CI agents that
/// report elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreWhen {
    pub env_name: String,
    pub value: String,
}

impl IgnoreWhen {
    /// Check against an explicit lookup so tests need not touch the process
    /// environment.
    pub fn matches_with<F>(&self, lookup: F) -> bool
    where
        F: Fn(&str) -> Option<String>,
    {
        lookup(&self.env_name).is_some_and(|v| v == self.value)
    }

    pub fn matches(&self) -> bool {
        self.matches_with(|name| std::env::var(name).ok())
    }
}

/// How the report is handed to publishers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfiguration {
    /// Run each publisher on its own task and do not wait for it.
    pub background: bool,
    /// Upper bound for one publisher's `publish` call.
    pub publish_timeout_ms: Option<u64>,
}

/// Include/exclude regular expressions, matched against the whole value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StringFilter {
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
}

/// Include/exclude sets of terminal states.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateFilter {
    pub includes: Vec<TaskMessageState>,
    pub excludes: Vec<TaskMessageState>,
}

/// Inclusive duration bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfiguration {
    pub min_execution_time_ms: Option<u64>,
    pub max_execution_time_ms: Option<u64>,
}

/// Decides whether a finished build is published at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildFilterConfiguration {
    /// Publish only builds whose success flag equals this value.
    pub success: Option<bool>,
    /// Matched against each whitespace-separated requested task.
    pub requested_tasks: StringFilter,
}

/// Rules deriving `tasks` from `unfilteredTasks`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfiguration {
    /// Matched against the full task identifier.
    pub tasks: StringFilter,
    /// Matched against the module part of the identifier.
    pub modules: StringFilter,
    pub states: StateFilter,
    pub threshold: ThresholdConfiguration,
    pub build: BuildFilterConfiguration,
}

/// Which environment probes run, plus user-defined properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfiguration {
    /// CPU, OS, hostname, user, locale.
    pub host: bool,
    /// VCS branch and user.
    pub git: bool,
    /// Daemon and compiler process discovery.
    pub processes: bool,
    /// Values supplied by the host tool (versions, switches, plugins).
    pub tool: bool,
    pub build_properties: BTreeMap<String, String>,
    pub task_properties: BTreeMap<String, String>,
}

impl Default for MetricsConfiguration {
    fn default() -> Self {
        Self {
            host: true,
            git: true,
            processes: true,
            tool: true,
            build_properties: BTreeMap::new(),
            task_properties: BTreeMap::new(),
        }
    }
}

impl MetricsConfiguration {
    pub fn custom_properties(&self) -> CustomProperties {
        CustomProperties {
            build_properties: self.build_properties.clone(),
            task_properties: self.task_properties.clone(),
        }
    }
}

/// Settings of the console publisher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputPublisherConfiguration {
    pub order: Order,
    /// Show at most this many tasks; all when unset.
    pub number_of_tasks: Option<usize>,
}

/// The optional username/password pair of a sink. Empty values count as unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasicAuth<'a> {
    Anonymous,
    Credentials { username: &'a str, password: &'a str },
    /// Only one of the two is set.
    Incomplete,
}

impl<'a> BasicAuth<'a> {
    pub fn from_pair(username: Option<&'a str>, password: Option<&'a str>) -> Self {
        let set = |value: Option<&'a str>| value.filter(|v| !v.trim().is_empty());
        match (set(username), set(password)) {
            (None, None) => BasicAuth::Anonymous,
            (Some(username), Some(password)) => BasicAuth::Credentials { username, password },
            _ => BasicAuth::Incomplete,
        }
    }

    pub fn is_incomplete(&self) -> bool {
        matches!(self, BasicAuth::Incomplete)
    }

    /// The pair to send, if any.
    pub fn pair(&self) -> Option<(&'a str, &'a str)> {
        match *self {
            BasicAuth::Credentials { username, password } => Some((username, password)),
            _ => None,
        }
    }
}

/// Publisher sections. `output` is handled by this crate; anything else is
/// kept raw for the sink crates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishersConfiguration {
    pub output: Option<OutputPublisherConfiguration>,
    #[serde(flatten)]
    pub sinks: BTreeMap<String, toml::Value>,
}

impl BuildwatchConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BuildwatchConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        info!(target: "buildwatch::config", path = %path.display(), "loading config");
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        debug!(target: "buildwatch::config", path = %path.display(), "config loaded and validated");
        Ok(config)
    }

    /// Check the parts of the configuration that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        TaskFilter::from_config(&self.filter)?;
        BuildFilter::from_config(&self.filter.build)?;
        if let Some(ignore) = &self.ignore_when {
            if ignore.env_name.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "ignore_when.env_name".to_string(),
                    message: "cannot be empty".to_string(),
                });
            }
        }
        if self.dispatch.publish_timeout_ms == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "dispatch.publish_timeout_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        let threshold = &self.filter.threshold;
        if let (Some(min), Some(max)) =
            (threshold.min_execution_time_ms, threshold.max_execution_time_ms)
        {
            if min > max {
                return Err(ConfigError::InvalidValue {
                    field: "filter.threshold".to_string(),
                    message: format!("min_execution_time_ms ({min}) exceeds max ({max})"),
                });
            }
        }
        Ok(())
    }

    /// Deserialize the raw `[publishers.<name>]` table into a sink's
    /// configuration type. `Ok(None)` when the section is absent.
    pub fn publisher_section<T: DeserializeOwned>(
        &self,
        name: &str,
    ) -> Result<Option<T>, ConfigError> {
        match self.publishers.sinks.get(name) {
            None => Ok(None),
            Some(value) => value.clone().try_into().map(Some).map_err(|e: toml::de::Error| {
                ConfigError::InvalidValue {
                    field: format!("publishers.{name}"),
                    message: e.to_string(),
                }
            }),
        }
    }

    /// Whether the ignore rule is active in the current process.
    pub fn is_ignored(&self) -> bool {
        self.ignore_when.as_ref().is_some_and(IgnoreWhen::matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        log_mode = "info"

        [ignore_when]
        env_name = "CI"
        value = "true"

        [dispatch]
        background = true
        publish_timeout_ms = 5000

        [filter.tasks]
        excludes = [":buildSrc:.*"]

        [filter.states]
        includes = ["EXECUTED", "FROM_CACHE"]

        [filter.threshold]
        min_execution_time_ms = 10

        [filter.build]
        success = true

        [metrics]
        git = false
        build_properties = { team = "platform" }

        [publishers.output]
        order = "desc"
        number_of_tasks = 5

        [publishers.demo]
        url = "http://localhost:9200"
        retries = 3
    "#;

    #[derive(Debug, Deserialize, PartialEq)]
    struct DemoSection {
        url: String,
        retries: u32,
    }

    #[test]
    fn parses_full_document() {
        let config = BuildwatchConfig::from_toml_str(FULL).unwrap();
        assert_eq!(config.log_mode, LogMode::Info);
        assert!(config.dispatch.background);
        assert_eq!(config.dispatch.publish_timeout_ms, Some(5000));
        assert_eq!(config.filter.tasks.excludes, vec![":buildSrc:.*"]);
        assert_eq!(
            config.filter.states.includes,
            vec![TaskMessageState::Executed, TaskMessageState::FromCache]
        );
        assert_eq!(config.filter.build.success, Some(true));
        assert!(!config.metrics.git);
        assert!(config.metrics.host);
        assert_eq!(config.metrics.custom_properties().build_properties["team"], "platform");
        let output = config.publishers.output.clone().unwrap();
        assert_eq!(output.order, Order::Desc);
        assert_eq!(output.number_of_tasks, Some(5));
    }

    #[test]
    fn raw_sections_deserialize_on_demand() {
        let config = BuildwatchConfig::from_toml_str(FULL).unwrap();
        let demo: DemoSection = config.publisher_section("demo").unwrap().unwrap();
        assert_eq!(demo, DemoSection { url: "http://localhost:9200".into(), retries: 3 });
        assert!(config.publisher_section::<DemoSection>("missing").unwrap().is_none());
        assert!(!config.publishers.sinks.contains_key("output"));
    }

    #[test]
    fn mistyped_section_is_invalid_value() {
        let config =
            BuildwatchConfig::from_toml_str("[publishers.demo]\nurl = 3\nretries = 1").unwrap();
        let err = config.publisher_section::<DemoSection>("demo").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, .. } if field == "publishers.demo"
        ));
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = BuildwatchConfig::from_toml_str("").unwrap();
        assert_eq!(config.log_mode, LogMode::Silent);
        assert!(!config.dispatch.background);
        assert_eq!(config.metrics, MetricsConfiguration::default());
        assert!(config.publishers.output.is_none());
        assert!(!config.is_ignored());
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let err =
            BuildwatchConfig::from_toml_str("[filter.tasks]\nincludes = [\"(\"]").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn inverted_threshold_is_rejected() {
        let toml = "[filter.threshold]\nmin_execution_time_ms = 10\nmax_execution_time_ms = 5";
        assert!(BuildwatchConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(BuildwatchConfig::from_toml_str("[dispatch]\npublish_timeout_ms = 0").is_err());
    }

    #[test]
    fn empty_credentials_count_as_unset() {
        assert_eq!(BasicAuth::from_pair(None, None), BasicAuth::Anonymous);
        assert_eq!(BasicAuth::from_pair(Some(""), Some(" ")), BasicAuth::Anonymous);
        assert!(BasicAuth::from_pair(Some(""), Some("secret")).is_incomplete());
        assert!(BasicAuth::from_pair(Some("ci"), None).is_incomplete());
        assert_eq!(BasicAuth::from_pair(Some("ci"), Some("token")).pair(), Some(("ci", "token")));
    }

    #[test]
    fn ignore_when_uses_lookup() {
        let rule = IgnoreWhen { env_name: "CI".into(), value: "true".into() };
        assert!(rule.matches_with(|_| Some("true".into())));
        assert!(!rule.matches_with(|_| Some("false".into())));
        assert!(!rule.matches_with(|_| None));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buildwatch.toml");
        std::fs::write(&path, "log_mode = \"info\"").unwrap();
        assert_eq!(BuildwatchConfig::load(&path).unwrap().log_mode, LogMode::Info);
        assert!(matches!(
            BuildwatchConfig::load(&dir.path().join("absent.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
