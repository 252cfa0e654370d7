//! Error types for tracking, capture, configuration and publishing.
//!
//! None of these errors are allowed to fail the host build. Each one is
//! returned up to a boundary (the build session or the publisher dispatch)
//! which logs it and carries on.

/// An environment probe could not produce its fields.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CaptureError {
    /// The underlying provider is not available on this host.
    #[error("{probe}: provider unavailable: {reason}")]
    Unavailable {
        /// Probe that failed.
        probe: &'static str,
        /// Provider message.
        reason: String,
    },
    /// The probe panicked while capturing.
    #[error("{probe}: capture panicked")]
    Panicked {
        /// Probe that panicked.
        probe: &'static str,
    },
}

impl CaptureError {
    pub fn unavailable(probe: &'static str, reason: impl Into<String>) -> Self {
        CaptureError::Unavailable { probe, reason: reason.into() }
    }

    /// Name of the probe that produced this error.
    pub fn probe(&self) -> &'static str {
        match self {
            CaptureError::Unavailable { probe, .. } | CaptureError::Panicked { probe } => probe,
        }
    }
}

/// A host event the tracker refused to apply.
///
/// Anomalies are dropped events; the tracker state is left as it was before
/// the event arrived.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TrackerAnomaly {
    /// Event carried an empty identifier.
    #[error("malformed event: empty identifier")]
    EmptyIdentifier,
    /// Event for an identifier that never started.
    #[error("unknown unit of work '{identifier}'")]
    UnknownIdentifier {
        /// Offending identifier.
        identifier: String,
    },
    /// A second start for the same unit of work.
    #[error("unit of work '{identifier}' started twice")]
    DuplicateStart {
        /// Offending identifier.
        identifier: String,
    },
    /// A second terminal event for the same unit of work; the first is kept.
    #[error("unit of work '{identifier}' finished twice; keeping first value")]
    DuplicateFinish {
        /// Offending identifier.
        identifier: String,
    },
    /// Negative duration reported by the execution channel.
    #[error("unit of work '{identifier}' reported negative duration {duration_ms} ms")]
    NegativeDuration {
        /// Offending identifier.
        identifier: String,
        /// Reported duration.
        duration_ms: i64,
    },
    /// The cache channel reported contradicting values for one unit of work.
    #[error("unit of work '{identifier}' received conflicting cache events")]
    ConflictingCacheEvent {
        /// Offending identifier.
        identifier: String,
    },
    /// A unit of work started but never reached a terminal state.
    #[error("unit of work '{identifier}' never finished")]
    NeverFinished {
        /// Offending identifier.
        identifier: String,
    },
}

/// Configuration could not be loaded or is inconsistent.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// TOML could not be parsed into the expected shape.
    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
    /// A value is present but unusable.
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        /// Dotted path of the field.
        field: String,
        /// What is wrong with it.
        message: String,
    },
}

/// Failure surfaced by a single publisher.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PublishError {
    /// Required settings are missing or inconsistent; the sink is skipped.
    #[error("{publisher} not executed. Configuration requires {}: {remediation}", .missing.join(", "))]
    ConfigurationInvalid {
        /// Publisher name.
        publisher: String,
        /// Configuration keys that need attention.
        missing: Vec<String>,
        /// Human-readable fix, usually an example configuration block.
        remediation: String,
    },
    /// Transport or remote error; nothing (or nothing further) was delivered.
    #[error("{publisher} delivery failed: {message}")]
    DeliveryFailed {
        /// Publisher name.
        publisher: String,
        /// Underlying failure.
        message: String,
    },
    /// Some per-task documents failed; already-sent documents stay sent.
    #[error("{publisher} failed to deliver {failed} of {attempted} documents")]
    PartialDeliveryFailed {
        /// Publisher name.
        publisher: String,
        /// Documents that could not be sent.
        failed: usize,
        /// Documents attempted.
        attempted: usize,
    },
}

impl PublishError {
    pub fn delivery(publisher: impl Into<String>, message: impl std::fmt::Display) -> Self {
        PublishError::DeliveryFailed { publisher: publisher.into(), message: message.to_string() }
    }

    /// Check if the sink was skipped because of its configuration.
    pub fn is_configuration_invalid(&self) -> bool {
        matches!(self, Self::ConfigurationInvalid { .. })
    }

    /// Check if nothing could be delivered.
    pub fn is_delivery_failed(&self) -> bool {
        matches!(self, Self::DeliveryFailed { .. })
    }

    /// Check if delivery stopped being complete part way through.
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::PartialDeliveryFailed { .. })
    }

    /// Publisher that raised the error.
    pub fn publisher(&self) -> &str {
        match self {
            Self::ConfigurationInvalid { publisher, .. }
            | Self::DeliveryFailed { publisher, .. }
            | Self::PartialDeliveryFailed { publisher, .. } => publisher,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_invalid_names_missing_keys() {
        let err = PublishError::ConfigurationInvalid {
            publisher: "ElasticSearchPublisher".into(),
            missing: vec!["url".into(), "taskIndexName".into()],
            remediation: "Please update your configuration".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ElasticSearchPublisher not executed"));
        assert!(msg.contains("url, taskIndexName"));
        assert!(err.is_configuration_invalid());
        assert!(!err.is_delivery_failed());
    }

    #[test]
    fn partial_delivery_reports_counts() {
        let err =
            PublishError::PartialDeliveryFailed { publisher: "p".into(), failed: 1, attempted: 4 };
        assert_eq!(err.to_string(), "p failed to deliver 1 of 4 documents");
        assert!(err.is_partial());
        assert_eq!(err.publisher(), "p");
    }

    #[test]
    fn delivery_helper_keeps_message() {
        let err = PublishError::delivery("influx", "connection refused");
        assert_eq!(err.to_string(), "influx delivery failed: connection refused");
    }

    #[test]
    fn capture_error_exposes_probe() {
        let err = CaptureError::unavailable("git", "not a repository");
        assert_eq!(err.probe(), "git");
        assert!(err.to_string().contains("not a repository"));
        assert_eq!(CaptureError::Panicked { probe: "host" }.probe(), "host");
    }

    #[test]
    fn anomaly_display() {
        let err = TrackerAnomaly::DuplicateFinish { identifier: ":app:build".into() };
        assert!(err.to_string().contains("keeping first value"));
    }
}
