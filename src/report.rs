//! Assembly of the execution report at build finish.

use crate::entities::{CustomProperties, Environment, ExecutionReport, TaskLength};
use serde::{Deserialize, Serialize};

/// Build-level facts supplied by the host orchestrator when the build ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildMeta {
    /// Epoch millis of build start.
    pub begin_ms: Option<u64>,
    /// Epoch millis of build end.
    pub end_ms: Option<u64>,
    pub configuration_duration_ms: Option<u64>,
    pub success: bool,
    /// Requested tasks verbatim, e.g. `"clean assemble"`.
    pub requested_tasks: Option<String>,
    pub build_id: Option<String>,
    pub build_invocation_id: Option<String>,
    pub root_project: Option<String>,
    pub scan_link: Option<String>,
    pub configuration_cache_hit: bool,
}

/// Combine the pieces collected during one build into its report.
///
/// Deterministic and free of I/O. `tasks` starts as a copy of the tracked
/// tasks; filtering narrows it afterwards.
pub fn assemble(
    environment: Environment,
    custom_properties: CustomProperties,
    tracker_output: Vec<TaskLength>,
    meta: BuildMeta,
) -> ExecutionReport {
    let duration = match (meta.begin_ms, meta.end_ms) {
        (Some(begin), Some(end)) => Some(end.saturating_sub(begin)),
        _ => None,
    };
    let execution_duration = match (duration, meta.configuration_duration_ms) {
        (Some(total), Some(configuration)) => Some(total.saturating_sub(configuration)),
        _ => None,
    };

    ExecutionReport {
        environment,
        custom_properties,
        begin_ms: meta.begin_ms.map(|ms| ms.to_string()),
        end_ms: meta.end_ms.map(|ms| ms.to_string()),
        duration_ms: duration.map(|ms| ms.to_string()),
        configuration_duration_ms: meta.configuration_duration_ms.map(|ms| ms.to_string()),
        execution_duration_ms: execution_duration.map(|ms| ms.to_string()),
        tasks: Some(tracker_output.clone()),
        unfiltered_tasks: Some(tracker_output),
        build_id: meta.build_id,
        root_project: meta.root_project,
        requested_tasks: meta.requested_tasks,
        success: meta.success,
        scan_link: meta.scan_link,
        build_invocation_id: meta.build_invocation_id,
        configuration_cache_hit: meta.configuration_cache_hit,
    }
}
