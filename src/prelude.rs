//! Convenient re-exports for hosts and sink crates.
pub use crate::{
    config::{BasicAuth, BuildwatchConfig, OutputPublisherConfiguration},
    entities::{CustomProperties, Environment, ExecutionReport, TaskLength, TaskMessageState},
    environment::{EnvironmentSnapshotter, Probe, ToolInfo},
    error::{CaptureError, ConfigError, PublishError, TrackerAnomaly},
    logger::{LogMode, LogTracker, MemoryLogTracker, TracingLogTracker},
    publisher::{
        documents::{Document, DocumentToggles},
        publish_documents, DispatchHandle, DispatchMode, DocumentTransport, OutputPublisher,
        Publisher, PublisherDispatch, SinkOutcome,
    },
    report::BuildMeta,
    session::BuildSession,
};
