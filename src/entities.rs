//! Report model: per-task terminal records, the environment snapshot and the
//! execution report built once per build.
//!
//! Almost everything is optional: capture is best-effort and the host decides
//! which build metadata it can supply.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Terminal outcome of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskMessageState {
    /// The unit ran its actions.
    Executed,
    /// Outputs were restored from the build cache.
    FromCache,
    /// Outputs were already current; nothing ran.
    UpToDate,
    /// The unit was skipped by a predicate or dependency failure.
    Skipped,
    /// The unit had no inputs to process.
    NoSource,
    /// The unit failed.
    Failed,
}

impl TaskMessageState {
    /// Upper snake case name, as it appears in documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskMessageState::Executed => "EXECUTED",
            TaskMessageState::FromCache => "FROM_CACHE",
            TaskMessageState::UpToDate => "UP_TO_DATE",
            TaskMessageState::Skipped => "SKIPPED",
            TaskMessageState::NoSource => "NO_SOURCE",
            TaskMessageState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TaskMessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One terminal record per unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLength {
    /// Wall time in milliseconds.
    pub duration_ms: u64,
    /// Fully-qualified path, e.g. `:app:compileKotlin`.
    pub identifier: String,
    /// Terminal state after merging the execution and cache channels.
    pub state: TaskMessageState,
}

impl TaskLength {
    pub fn new(duration_ms: u64, identifier: impl Into<String>, state: TaskMessageState) -> Self {
        Self { duration_ms, identifier: identifier.into(), state }
    }

    /// Path of the owning module: the identifier minus its last segment.
    ///
    /// Units declared at the root (`:build`, or a bare `build`) belong to `:`.
    pub fn module(&self) -> &str {
        match self.identifier.rfind(':') {
            Some(0) | None => ":",
            Some(idx) => &self.identifier[..idx],
        }
    }

    /// Last path segment.
    pub fn task_name(&self) -> &str {
        match self.identifier.rfind(':') {
            Some(idx) => &self.identifier[idx + 1..],
            None => &self.identifier,
        }
    }
}

/// A plugin applied to the build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plugin {
    pub id: String,
    pub main_class: String,
    pub version: String,
}

/// Effective values of the build tool's feature flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Switches {
    pub build_cache: Option<String>,
    pub configuration_on_demand: Option<String>,
    pub daemon: Option<String>,
    pub parallel: Option<String>,
    pub continue_on_failure: Option<String>,
    pub dry_run: Option<String>,
    pub offline: Option<String>,
    pub rerun_tasks: Option<String>,
    pub refresh_dependencies: Option<String>,
    pub build_scan: Option<String>,
    pub configuration_cache: Option<String>,
}

impl Switches {
    /// Flags that carry a value, keyed by their document name.
    pub fn entries(&self) -> Vec<(&'static str, &str)> {
        [
            ("buildCache", &self.build_cache),
            ("configurationOnDemand", &self.configuration_on_demand),
            ("daemon", &self.daemon),
            ("parallel", &self.parallel),
            ("continueOnFailure", &self.continue_on_failure),
            ("dryRun", &self.dry_run),
            ("offline", &self.offline),
            ("rerunTasks", &self.rerun_tasks),
            ("refreshDependencies", &self.refresh_dependencies),
            ("buildScan", &self.build_scan),
            ("configurationCache", &self.configuration_cache),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.as_deref().map(|v| (name, v)))
        .collect()
    }
}

/// A process observed by the process probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub memory_bytes: u64,
}

/// Summary of one family of co-running JVM processes (build daemons,
/// compiler daemons).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessSummary {
    /// JVM arguments of the first process found.
    pub jvm_args: Option<BTreeMap<String, String>>,
    /// Number of processes of this family.
    pub processes_available: Option<usize>,
    /// Whether more than one process was found.
    pub multiple_processes: Option<bool>,
    /// JVM arguments per pid, only when more than one process was found.
    pub multiple_jvm_args: Option<BTreeMap<String, BTreeMap<String, String>>>,
}

/// Point-in-time snapshot of the host, captured once at build start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Environment {
    pub cpu_count: Option<String>,
    pub os_version: Option<String>,
    pub max_workers: Option<String>,
    pub java_runtime: Option<String>,
    pub java_vm_name: Option<String>,
    pub java_xms_bytes: Option<String>,
    pub java_xmx_bytes: Option<String>,
    pub java_max_perm_size: Option<String>,
    pub locale: Option<String>,
    pub username: Option<String>,
    pub default_charset: Option<String>,
    pub ide_version: Option<String>,
    pub build_tool_version: Option<String>,
    pub cache_url: Option<String>,
    pub cache_store: Option<String>,
    pub plugins: Vec<Plugin>,
    pub git_branch: Option<String>,
    pub git_user: Option<String>,
    pub switches: Switches,
    pub hostname: Option<String>,
    /// Build daemon processes.
    pub build_processes: ProcessSummary,
    /// Compiler daemon processes.
    pub compiler_processes: ProcessSummary,
    pub processes_stats: Vec<ProcessInfo>,
}

/// User-supplied properties attached to the build document and to every
/// task document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomProperties {
    pub build_properties: BTreeMap<String, String>,
    pub task_properties: BTreeMap<String, String>,
}

/// Everything known about one build. Assembled once at build finish and
/// read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionReport {
    pub environment: Environment,
    pub custom_properties: CustomProperties,
    pub begin_ms: Option<String>,
    pub end_ms: Option<String>,
    pub duration_ms: Option<String>,
    pub configuration_duration_ms: Option<String>,
    pub execution_duration_ms: Option<String>,
    /// Tasks left after filtering.
    pub tasks: Option<Vec<TaskLength>>,
    /// Every tracked task, in build-emission order.
    pub unfiltered_tasks: Option<Vec<TaskLength>>,
    pub build_id: Option<String>,
    pub root_project: Option<String>,
    pub requested_tasks: Option<String>,
    pub success: bool,
    pub scan_link: Option<String>,
    /// Same value for every stage of a multi-stage invocation.
    pub build_invocation_id: Option<String>,
    pub configuration_cache_hit: bool,
}

impl ExecutionReport {
    /// Fraction of unfiltered tasks restored from cache, `None` when no task
    /// was tracked.
    pub fn cache_ratio_value(&self) -> Option<f64> {
        let tasks = self.unfiltered_tasks.as_ref()?;
        if tasks.is_empty() {
            return None;
        }
        let cached = tasks.iter().filter(|t| t.state == TaskMessageState::FromCache).count();
        Some(cached as f64 / tasks.len() as f64)
    }

    /// Cache ratio rendered as the shortest decimal string, e.g. `"0.5"`.
    pub fn cache_ratio(&self) -> Option<String> {
        self.cache_ratio_value().map(|ratio| ratio.to_string())
    }

    /// Filtered tasks, empty when unset.
    pub fn tasks(&self) -> &[TaskLength] {
        self.tasks.as_deref().unwrap_or_default()
    }

    /// Unfiltered tasks, empty when unset.
    pub fn unfiltered_tasks(&self) -> &[TaskLength] {
        self.unfiltered_tasks.as_deref().unwrap_or_default()
    }
}
