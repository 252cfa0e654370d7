//! The per-build context value.
//!
//! A [`BuildSession`] is created once per build and owned by the host's event
//! call sites. It routes lifecycle events to the tracker and, at build finish,
//! runs assemble, filter and dispatch in that order.

use crate::clock::{Clock, SystemClock};
use crate::config::BuildwatchConfig;
use crate::entities::{Environment, TaskMessageState};
use crate::environment::{EnvironmentSnapshotter, ToolInfo};
use crate::error::{ConfigError, TrackerAnomaly};
use crate::filter::{BuildFilter, TaskFilter};
use crate::logger::{LogTracker, TracingLogTracker};
use crate::publisher::{DispatchHandle, OutputPublisher, Publisher, PublisherDispatch};
use crate::report::{self, BuildMeta};
use crate::tracker::TaskStateTracker;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

const TAG: &str = "buildwatch";

/// Collects one build and publishes its report.
#[derive(Debug)]
pub struct BuildSession {
    config: BuildwatchConfig,
    task_filter: TaskFilter,
    build_filter: BuildFilter,
    tracker: TaskStateTracker,
    snapshotter: EnvironmentSnapshotter,
    environment: Option<Environment>,
    clock: Arc<dyn Clock>,
    dispatch: PublisherDispatch,
    logger: Arc<dyn LogTracker>,
    started_at: Option<u64>,
    ignored: bool,
    finished: bool,
}

impl BuildSession {
    /// A session with no probes and no publishers.
    ///
    /// # Errors
    /// `ConfigError::InvalidValue` when a filter pattern does not compile.
    pub fn new(config: BuildwatchConfig, logger: Arc<dyn LogTracker>) -> Result<Self, ConfigError> {
        config.validate()?;
        let task_filter = TaskFilter::from_config(&config.filter)?;
        let build_filter = BuildFilter::from_config(&config.filter.build)?;
        let dispatch = PublisherDispatch::from_config(&config.dispatch, Arc::clone(&logger));
        Ok(Self {
            config,
            task_filter,
            build_filter,
            tracker: TaskStateTracker::new(),
            snapshotter: EnvironmentSnapshotter::new(),
            environment: None,
            clock: Arc::new(SystemClock),
            dispatch,
            logger,
            started_at: None,
            ignored: false,
            finished: false,
        })
    }

    /// A session wired from configuration: tracing-backed logging, the probes
    /// enabled under `[metrics]`, and the console publisher when
    /// `[publishers.output]` is present. Sink crates are added with
    /// [`BuildSession::with_publisher`].
    pub fn from_config(
        config: BuildwatchConfig,
        tool: ToolInfo,
        project_dir: PathBuf,
    ) -> Result<Self, ConfigError> {
        let logger: Arc<dyn LogTracker> = Arc::new(TracingLogTracker::new(config.log_mode));
        let snapshotter = EnvironmentSnapshotter::from_config(&config.metrics, tool, project_dir);
        let output = config.publishers.output.clone();
        let mut session = Self::new(config, Arc::clone(&logger))?.with_snapshotter(snapshotter);
        if let Some(output) = output {
            session = session.with_publisher(OutputPublisher::new(output, logger));
        }
        Ok(session)
    }

    pub fn with_snapshotter(mut self, snapshotter: EnvironmentSnapshotter) -> Self {
        self.snapshotter = snapshotter;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_publisher<P: Publisher + 'static>(mut self, publisher: P) -> Self {
        self.dispatch.add(Arc::new(publisher));
        self
    }

    pub fn with_shared_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.dispatch.add(publisher);
        self
    }

    /// Names of the registered publishers, in dispatch order.
    pub fn publishers(&self) -> Vec<String> {
        self.dispatch.publisher_names()
    }

    pub fn is_ignored(&self) -> bool {
        self.ignored
    }

    /// Anomalies the tracker has dropped so far.
    pub fn anomalies(&self) -> &[TrackerAnomaly] {
        self.tracker.anomalies()
    }

    /// Snapshot the environment once and stamp the build start. Does nothing
    /// but mark the session ignored when the ignore rule matches.
    pub fn on_build_start(&mut self) {
        if self.config.is_ignored() {
            self.ignore();
            return;
        }
        self.start();
    }

    /// Like [`BuildSession::on_build_start`] with the ignore decision made by
    /// the caller.
    pub fn on_build_start_with(&mut self, ignored: bool) {
        if ignored {
            self.ignore();
        } else {
            self.start();
        }
    }

    fn ignore(&mut self) {
        self.ignored = true;
        info!(target: "buildwatch::session", "tracking disabled by ignore rule");
        self.logger.log(TAG, "tracking disabled by ignore rule");
    }

    fn start(&mut self) {
        if self.started_at.is_some() {
            debug!(target: "buildwatch::session", "build already started");
            return;
        }
        self.started_at = Some(self.clock.now_millis());
        self.environment = Some(self.snapshot());
    }

    fn snapshot(&self) -> Environment {
        let snapshot = self.snapshotter.capture();
        for failure in &snapshot.failures {
            debug!(
                target: "buildwatch::session",
                probe = failure.probe(),
                error = %failure,
                "probe skipped"
            );
        }
        snapshot.environment
    }

    pub fn on_task_started(&mut self, identifier: &str) {
        if self.ignored {
            return;
        }
        let result = self.tracker.on_task_started(identifier);
        self.note(result);
    }

    /// `duration_ms` is signed because hosts report raw differences; negative
    /// values are dropped.
    pub fn on_task_finished(
        &mut self,
        identifier: &str,
        duration_ms: i64,
        outcome: TaskMessageState,
    ) {
        if self.ignored {
            return;
        }
        let result = self.tracker.on_task_finished(identifier, duration_ms, outcome);
        self.note(result);
    }

    pub fn on_cache_event(&mut self, identifier: &str, served_from_cache: bool) {
        if self.ignored {
            return;
        }
        let result = self.tracker.on_cache_event(identifier, served_from_cache);
        self.note(result);
    }

    fn note(&self, result: Result<(), TrackerAnomaly>) {
        if let Err(anomaly) = result {
            warn!(target: "buildwatch::session", %anomaly, "event dropped");
            self.logger.log(TAG, &format!("event dropped: {anomaly}"));
        }
    }

    /// Assemble, filter and dispatch the report.
    ///
    /// Missing `begin_ms`/`end_ms` are taken from the session clock and a
    /// missing `build_id` is generated. Returns `None` when the session is
    /// ignored, already finished, or the build filter rejects the report.
    pub async fn on_build_finish(&mut self, mut meta: BuildMeta) -> Option<DispatchHandle> {
        if self.ignored || self.finished {
            return None;
        }
        self.finished = true;

        let environment = match self.environment.take() {
            Some(environment) => environment,
            None => self.snapshot(),
        };
        meta.begin_ms = meta.begin_ms.or(self.started_at);
        meta.end_ms = meta.end_ms.or_else(|| Some(self.clock.now_millis()));
        if meta.build_id.is_none() {
            meta.build_id = Some(uuid::Uuid::new_v4().to_string());
        }

        let seen = self.tracker.anomalies().len();
        let tasks = self.tracker.finalize();
        for anomaly in &self.tracker.anomalies()[seen..] {
            warn!(target: "buildwatch::session", %anomaly, "unit dropped at finish");
            self.logger.log(TAG, &format!("event dropped: {anomaly}"));
        }
        let mut report = report::assemble(
            environment,
            self.config.metrics.custom_properties(),
            tasks,
            meta,
        );
        self.task_filter.apply(&mut report);

        info!(
            target: "buildwatch::session",
            build_id = report.build_id.as_deref().unwrap_or_default(),
            tasks = report.tasks().len(),
            unfiltered = report.unfiltered_tasks().len(),
            anomalies = self.tracker.anomalies().len(),
            "build finished"
        );

        if !self.build_filter.should_publish(&report) {
            self.logger.log(TAG, "build excluded by build filter; nothing published");
            return None;
        }
        Some(self.dispatch.dispatch(Arc::new(report)).await)
    }
}
