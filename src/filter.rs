//! Task and build filtering.
//!
//! Exclude rules run first and always win. A task then has to satisfy every
//! include list that is not empty. With no rules at all, the filter is the
//! identity.

use crate::config::{BuildFilterConfiguration, FilterConfiguration, StringFilter};
use crate::entities::{ExecutionReport, TaskLength, TaskMessageState};
use crate::error::ConfigError;
use regex::Regex;

/// Compiled include/exclude patterns, anchored to the whole value.
#[derive(Debug, Clone, Default)]
struct Patterns {
    includes: Vec<Regex>,
    excludes: Vec<Regex>,
}

impl Patterns {
    fn compile(filter: &StringFilter, field: &str) -> Result<Self, ConfigError> {
        let build = |patterns: &[String], kind: &str| -> Result<Vec<Regex>, ConfigError> {
            patterns
                .iter()
                .map(|p| {
                    Regex::new(&format!("^(?:{p})$")).map_err(|e| ConfigError::InvalidValue {
                        field: format!("{field}.{kind}"),
                        message: e.to_string(),
                    })
                })
                .collect()
        };
        Ok(Self {
            includes: build(&filter.includes, "includes")?,
            excludes: build(&filter.excludes, "excludes")?,
        })
    }

    fn excluded(&self, value: &str) -> bool {
        self.excludes.iter().any(|r| r.is_match(value))
    }

    fn included(&self, value: &str) -> bool {
        self.includes.is_empty() || self.includes.iter().any(|r| r.is_match(value))
    }

    fn is_empty(&self) -> bool {
        self.includes.is_empty() && self.excludes.is_empty()
    }
}

/// Derives the filtered task list from the unfiltered one.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    tasks: Patterns,
    modules: Patterns,
    include_states: Vec<TaskMessageState>,
    exclude_states: Vec<TaskMessageState>,
    min_ms: Option<u64>,
    max_ms: Option<u64>,
}

impl TaskFilter {
    /// Compile the rules.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` naming the offending list when a
    /// pattern is not a valid regular expression.
    pub fn from_config(config: &FilterConfiguration) -> Result<Self, ConfigError> {
        Ok(Self {
            tasks: Patterns::compile(&config.tasks, "filter.tasks")?,
            modules: Patterns::compile(&config.modules, "filter.modules")?,
            include_states: config.states.includes.clone(),
            exclude_states: config.states.excludes.clone(),
            min_ms: config.threshold.min_execution_time_ms,
            max_ms: config.threshold.max_execution_time_ms,
        })
    }

    /// True when no rule is configured.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
            && self.modules.is_empty()
            && self.include_states.is_empty()
            && self.exclude_states.is_empty()
            && self.min_ms.is_none()
            && self.max_ms.is_none()
    }

    /// Whether a single task survives the rules.
    pub fn accepts(&self, task: &TaskLength) -> bool {
        if self.tasks.excluded(&task.identifier)
            || self.modules.excluded(task.module())
            || self.exclude_states.contains(&task.state)
        {
            return false;
        }
        let within_threshold = self.min_ms.map_or(true, |min| task.duration_ms >= min)
            && self.max_ms.map_or(true, |max| task.duration_ms <= max);

        within_threshold
            && self.tasks.included(&task.identifier)
            && self.modules.included(task.module())
            && (self.include_states.is_empty() || self.include_states.contains(&task.state))
    }

    /// Keep the tasks that pass, in their original order.
    pub fn filter(&self, unfiltered: &[TaskLength]) -> Vec<TaskLength> {
        if self.is_empty() {
            return unfiltered.to_vec();
        }
        unfiltered.iter().filter(|task| self.accepts(task)).cloned().collect()
    }

    /// Replace `report.tasks` with the filtered view of `unfiltered_tasks`.
    pub fn apply(&self, report: &mut ExecutionReport) {
        report.tasks = report.unfiltered_tasks.as_deref().map(|tasks| self.filter(tasks));
    }
}

/// Decides whether a finished build is published.
#[derive(Debug, Clone, Default)]
pub struct BuildFilter {
    success: Option<bool>,
    requested_tasks: Patterns,
}

impl BuildFilter {
    pub fn from_config(config: &BuildFilterConfiguration) -> Result<Self, ConfigError> {
        Ok(Self {
            success: config.success,
            requested_tasks: Patterns::compile(
                &config.requested_tasks,
                "filter.build.requested_tasks",
            )?,
        })
    }

    /// `success` must match when set. Each requested task is checked on its
    /// own: any excluded one rejects the build, and with includes configured
    /// at least one must match.
    pub fn should_publish(&self, report: &ExecutionReport) -> bool {
        if self.success.is_some_and(|expected| expected != report.success) {
            return false;
        }
        if self.requested_tasks.is_empty() {
            return true;
        }
        let requested: Vec<&str> = report
            .requested_tasks
            .as_deref()
            .map(|r| r.split_whitespace().collect())
            .unwrap_or_default();
        if requested.iter().any(|t| self.requested_tasks.excluded(t)) {
            return false;
        }
        self.requested_tasks.includes.is_empty()
            || requested.iter().any(|t| self.requested_tasks.included(t))
    }
}
