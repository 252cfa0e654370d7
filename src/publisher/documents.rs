//! Document shapes shared by network publishers, and the driver that sends
//! one build document plus one document per task.
//!
//! Every document send is isolated: a failure is logged and counted, then the
//! next document is attempted. Documents already delivered are never rolled
//! back.

use crate::entities::{ExecutionReport, ProcessSummary, TaskLength};
use crate::error::PublishError;
use crate::logger::LogTracker;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;

/// A flat JSON object, as sent to a sink.
pub type Document = Map<String, Value>;

/// Wire side of a document publisher.
#[async_trait]
pub trait DocumentTransport: Send + Sync {
    type Error: fmt::Display + Send;

    async fn send_build(&self, document: &Document) -> Result<(), Self::Error>;

    async fn send_task(&self, document: &Document) -> Result<(), Self::Error>;
}

/// Which document families a publisher sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentToggles {
    pub build: bool,
    pub tasks: bool,
}

impl Default for DocumentToggles {
    fn default() -> Self {
        Self { build: true, tasks: true }
    }
}

/// Start banner with the toggle echo, logged under `publisher`.
pub fn log_start(publisher: &str, toggles: DocumentToggles, logger: &dyn LogTracker) {
    logger.log(publisher, crate::formatter::BANNER);
    logger.log(publisher, publisher);
    logger.log(publisher, &format!("publishBuildMetrics: {}", toggles.build));
    logger.log(publisher, &format!("publishTaskMetrics: {}", toggles.tasks));
    logger.log(publisher, crate::formatter::BANNER);
}

/// Send the build document and then every filtered task document.
///
/// Logs the start banner and toggle echo under `publisher`, then each send.
///
/// # Errors
/// `DeliveryFailed` when every attempted document failed (the last failure's
/// message is kept), `PartialDeliveryFailed` when only some did.
pub async fn publish_documents<T>(
    publisher: &str,
    transport: &T,
    report: &ExecutionReport,
    toggles: DocumentToggles,
    logger: &dyn LogTracker,
) -> Result<(), PublishError>
where
    T: DocumentTransport + ?Sized,
{
    log_start(publisher, toggles, logger);

    let mut attempted = 0usize;
    let mut failed = 0usize;
    let mut last_error = None;

    if toggles.build {
        logger.log(publisher, "Sending Build metrics");
        attempted += 1;
        match transport.send_build(&build_document(report)).await {
            Ok(()) => logger.log(publisher, "Result Build metrics: ok"),
            Err(e) => {
                failed += 1;
                logger.error(&format!("{publisher}: build document failed: {e}"));
                last_error = Some(e.to_string());
            }
        }
    }

    if toggles.tasks {
        logger.log(publisher, "Sending Task metrics");
        logger.log(publisher, &format!("number of tasks: {}", report.tasks().len()));
        for task in report.tasks() {
            attempted += 1;
            if let Err(e) = transport.send_task(&task_document(task, report)).await {
                failed += 1;
                let id = &task.identifier;
                logger.error(&format!("{publisher}: task document {id} failed: {e}"));
                last_error = Some(e.to_string());
            }
        }
    }

    match (failed, last_error) {
        (0, _) | (_, None) => Ok(()),
        (failed, Some(message)) if failed == attempted => {
            Err(PublishError::DeliveryFailed { publisher: publisher.to_string(), message })
        }
        (failed, Some(_)) => Err(PublishError::PartialDeliveryFailed {
            publisher: publisher.to_string(),
            failed,
            attempted,
        }),
    }
}

fn put_str(doc: &mut Document, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        doc.insert(key.to_string(), Value::String(value.to_string()));
    }
}

/// Millisecond strings become numbers; anything unparsable stays a string.
fn put_ms(doc: &mut Document, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        let json = value.parse::<u64>().map(Value::from).unwrap_or_else(|_| Value::from(value));
        doc.insert(key.to_string(), json);
    }
}

fn put_processes(doc: &mut Document, prefix: &str, summary: &ProcessSummary) {
    if let Some(count) = summary.processes_available {
        doc.insert(format!("{prefix}ProcessesAvailable"), Value::from(count));
    }
    if let Some(multiple) = summary.multiple_processes {
        doc.insert(format!("{prefix}MultipleProcesses"), Value::from(multiple));
    }
    if let Some(args) = &summary.jvm_args {
        for (key, value) in args {
            doc.insert(format!("{prefix}JvmArgs.{key}"), Value::from(value.as_str()));
        }
    }
}

/// Every scalar field of the report, flattened environment included. Task
/// lists are left out.
pub fn build_document(report: &ExecutionReport) -> Document {
    let mut doc = Document::new();
    put_ms(&mut doc, "duration", report.duration_ms.as_deref());
    put_ms(&mut doc, "configuration", report.configuration_duration_ms.as_deref());
    put_ms(&mut doc, "execution", report.execution_duration_ms.as_deref());
    put_ms(&mut doc, "beginMs", report.begin_ms.as_deref());
    put_ms(&mut doc, "endMs", report.end_ms.as_deref());
    doc.insert("success".into(), Value::from(report.success));
    doc.insert("configurationCacheHit".into(), Value::from(report.configuration_cache_hit));
    put_str(&mut doc, "requestedTasks", report.requested_tasks.as_deref());
    put_str(&mut doc, "buildId", report.build_id.as_deref());
    put_str(&mut doc, "buildInvocationId", report.build_invocation_id.as_deref());
    put_str(&mut doc, "rootProject", report.root_project.as_deref());
    put_str(&mut doc, "scanLink", report.scan_link.as_deref());
    put_str(&mut doc, "cacheRatio", report.cache_ratio().as_deref());

    let env = &report.environment;
    put_str(&mut doc, "cpuCount", env.cpu_count.as_deref());
    put_str(&mut doc, "osVersion", env.os_version.as_deref());
    put_str(&mut doc, "maxWorkers", env.max_workers.as_deref());
    put_str(&mut doc, "javaRuntime", env.java_runtime.as_deref());
    put_str(&mut doc, "javaVmName", env.java_vm_name.as_deref());
    put_str(&mut doc, "javaXmsBytes", env.java_xms_bytes.as_deref());
    put_str(&mut doc, "javaXmxBytes", env.java_xmx_bytes.as_deref());
    put_str(&mut doc, "javaMaxPermSize", env.java_max_perm_size.as_deref());
    put_str(&mut doc, "locale", env.locale.as_deref());
    put_str(&mut doc, "username", env.username.as_deref());
    put_str(&mut doc, "defaultCharset", env.default_charset.as_deref());
    put_str(&mut doc, "ideVersion", env.ide_version.as_deref());
    put_str(&mut doc, "buildToolVersion", env.build_tool_version.as_deref());
    put_str(&mut doc, "cacheUrl", env.cache_url.as_deref());
    put_str(&mut doc, "cacheStore", env.cache_store.as_deref());
    put_str(&mut doc, "gitBranch", env.git_branch.as_deref());
    put_str(&mut doc, "gitUser", env.git_user.as_deref());
    put_str(&mut doc, "hostname", env.hostname.as_deref());
    if !env.plugins.is_empty() {
        let ids: Vec<&str> = env.plugins.iter().map(|p| p.id.as_str()).collect();
        doc.insert("plugins".into(), Value::from(ids.join(",")));
    }
    for (name, value) in env.switches.entries() {
        doc.insert(format!("switch.{name}"), Value::from(value));
    }
    put_processes(&mut doc, "build", &env.build_processes);
    put_processes(&mut doc, "compiler", &env.compiler_processes);

    for (key, value) in &report.custom_properties.build_properties {
        doc.entry(key.clone()).or_insert_with(|| Value::from(value.as_str()));
    }
    doc
}

/// One task joined with the identifying fields of its build.
pub fn task_document(task: &TaskLength, report: &ExecutionReport) -> Document {
    let mut doc = Document::new();
    doc.insert("state".into(), Value::from(task.state.as_str()));
    doc.insert("module".into(), Value::from(task.module()));
    doc.insert("task".into(), Value::from(task.identifier.as_str()));
    doc.insert("taskName".into(), Value::from(task.task_name()));
    doc.insert("value".into(), Value::from(task.duration_ms));
    put_str(&mut doc, "buildId", report.build_id.as_deref());
    put_str(&mut doc, "buildInvocationId", report.build_invocation_id.as_deref());
    put_str(&mut doc, "rootProject", report.root_project.as_deref());
    for (key, value) in &report.custom_properties.task_properties {
        doc.entry(key.clone()).or_insert_with(|| Value::from(value.as_str()));
    }
    doc
}
