//! One-shot, best-effort capture of the build environment.
//!
//! The snapshot is assembled from independent [`Probe`]s. Each probe writes
//! into a scratch copy of the environment; the copy is kept only when the probe
//! returns `Ok`. A probe that errors or panics leaves its fields unset and
//! does not stop the others.

use crate::config::MetricsConfiguration;
use crate::entities::{Environment, Plugin, ProcessInfo, ProcessSummary, Switches};
use crate::error::CaptureError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use sysinfo::{PidExt, ProcessExt, System, SystemExt};
use tracing::debug;

/// A single, isolated capture step.
pub trait Probe: Send + Sync {
    /// Short name used in capture errors.
    fn name(&self) -> &'static str;
    /// Fill the fields this probe owns.
    fn capture(&self, env: &mut Environment) -> Result<(), CaptureError>;
}

/// Result of one capture run.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub environment: Environment,
    /// Probes that failed, in probe order.
    pub failures: Vec<CaptureError>,
}

/// Runs every configured probe once.
#[derive(Default)]
pub struct EnvironmentSnapshotter {
    probes: Vec<Box<dyn Probe>>,
}

impl std::fmt::Debug for EnvironmentSnapshotter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.probes.iter().map(|p| p.name()).collect();
        f.debug_struct("EnvironmentSnapshotter").field("probes", &names).finish()
    }
}

impl EnvironmentSnapshotter {
    /// A snapshotter without probes; captures an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe<P: Probe + 'static>(mut self, probe: P) -> Self {
        self.probes.push(Box::new(probe));
        self
    }

    /// Probes enabled by `metrics`, in a fixed order.
    pub fn from_config(
        metrics: &MetricsConfiguration,
        tool: ToolInfo,
        project_dir: PathBuf,
    ) -> Self {
        let mut snapshotter = Self::new();
        if metrics.host {
            snapshotter = snapshotter.with_probe(HostProbe).with_probe(UserProbe::from_process());
        }
        if metrics.tool {
            snapshotter = snapshotter.with_probe(ToolProbe::new(tool));
        }
        if metrics.git {
            snapshotter = snapshotter
                .with_probe(GitBranchProbe::new(project_dir.clone()))
                .with_probe(GitUserProbe::new(project_dir));
        }
        if metrics.processes {
            snapshotter = snapshotter.with_probe(ProcessProbe::default());
        }
        snapshotter
    }

    pub fn probe_names(&self) -> Vec<&'static str> {
        self.probes.iter().map(|p| p.name()).collect()
    }

    pub fn capture(&self) -> Snapshot {
        let mut snapshot = Snapshot::default();
        for probe in &self.probes {
            let mut scratch = snapshot.environment.clone();
            let outcome = catch_unwind(AssertUnwindSafe(|| probe.capture(&mut scratch)))
                .unwrap_or(Err(CaptureError::Panicked { probe: probe.name() }));
            match outcome {
                Ok(()) => snapshot.environment = scratch,
                Err(err) => {
                    debug!(
                        target: "buildwatch::environment",
                        probe = probe.name(),
                        error = %err,
                        "capture failed"
                    );
                    snapshot.failures.push(err);
                }
            }
        }
        snapshot
    }
}

/// CPU count, OS version and hostname from `sysinfo`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostProbe;

impl Probe for HostProbe {
    fn name(&self) -> &'static str {
        "host"
    }

    fn capture(&self, env: &mut Environment) -> Result<(), CaptureError> {
        if !System::IS_SUPPORTED {
            return Err(CaptureError::unavailable(self.name(), "platform not supported by sysinfo"));
        }
        let mut sys = System::new();
        sys.refresh_cpu();
        let cpus = match sys.cpus().len() {
            0 => std::thread::available_parallelism().map(|n| n.get()).unwrap_or(0),
            n => n,
        };
        if cpus > 0 {
            env.cpu_count = Some(cpus.to_string());
        }
        env.os_version = sys.long_os_version();
        env.hostname = sys.host_name();
        Ok(())
    }
}

type Lookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Username, locale and charset from environment variables, read when the
/// probe runs.
#[derive(Clone)]
pub struct UserProbe {
    lookup: Lookup,
}

impl std::fmt::Debug for UserProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserProbe").finish_non_exhaustive()
    }
}

impl Default for UserProbe {
    fn default() -> Self {
        Self::from_process()
    }
}

impl UserProbe {
    pub fn from_process() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_vars(vars: BTreeMap<String, String>) -> Self {
        Self::from_lookup(move |name| vars.get(name).cloned())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self { lookup: Arc::new(lookup) }
    }

    fn first(&self, names: &[&str]) -> Option<String> {
        names.iter().find_map(|n| (self.lookup)(n).filter(|v| !v.is_empty()))
    }
}

impl Probe for UserProbe {
    fn name(&self) -> &'static str {
        "user"
    }

    fn capture(&self, env: &mut Environment) -> Result<(), CaptureError> {
        env.username = self.first(&["USER", "USERNAME"]);
        if let Some(raw) = self.first(&["LC_ALL", "LC_CTYPE", "LANG"]) {
            // en_US.UTF-8@euro -> locale en_US, charset UTF-8
            let without_modifier = raw.split('@').next().unwrap_or(&raw);
            let mut parts = without_modifier.splitn(2, '.');
            env.locale = parts.next().filter(|l| !l.is_empty()).map(str::to_string);
            env.default_charset = parts.next().map(str::to_string);
        }
        Ok(())
    }
}

/// Values only the host tool knows: versions, worker count, runtime, cache
/// endpoint, plugins and switches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolInfo {
    pub max_workers: Option<u32>,
    pub java_runtime: Option<String>,
    pub java_vm_name: Option<String>,
    pub java_xms_bytes: Option<u64>,
    pub java_xmx_bytes: Option<u64>,
    pub java_max_perm_size: Option<u64>,
    pub ide_version: Option<String>,
    pub build_tool_version: Option<String>,
    pub cache_url: Option<String>,
    pub cache_store: Option<String>,
    pub plugins: Vec<Plugin>,
    pub switches: Switches,
}

#[derive(Debug, Clone, Default)]
pub struct ToolProbe {
    info: ToolInfo,
}

impl ToolProbe {
    pub fn new(info: ToolInfo) -> Self {
        Self { info }
    }
}

impl Probe for ToolProbe {
    fn name(&self) -> &'static str {
        "tool"
    }

    fn capture(&self, env: &mut Environment) -> Result<(), CaptureError> {
        let info = self.info.clone();
        env.max_workers = info.max_workers.map(|n| n.to_string());
        env.java_runtime = info.java_runtime;
        env.java_vm_name = info.java_vm_name;
        env.java_xms_bytes = info.java_xms_bytes.map(|n| n.to_string());
        env.java_xmx_bytes = info.java_xmx_bytes.map(|n| n.to_string());
        env.java_max_perm_size = info.java_max_perm_size.map(|n| n.to_string());
        env.ide_version = info.ide_version;
        env.build_tool_version = info.build_tool_version;
        env.cache_url = info.cache_url;
        env.cache_store = info.cache_store;
        env.plugins = info.plugins;
        env.switches = info.switches;
        Ok(())
    }
}

#[cfg(feature = "git")]
fn discover(
    probe: &'static str,
    dir: &std::path::Path,
) -> Result<git2::Repository, CaptureError> {
    git2::Repository::discover(dir).map_err(|e| CaptureError::unavailable(probe, e.message()))
}

/// Current branch of the repository containing the project.
#[derive(Debug, Clone)]
pub struct GitBranchProbe {
    project_dir: PathBuf,
}

impl GitBranchProbe {
    pub fn new(project_dir: PathBuf) -> Self {
        Self { project_dir }
    }
}

impl Probe for GitBranchProbe {
    fn name(&self) -> &'static str {
        "git.branch"
    }

    #[cfg(feature = "git")]
    fn capture(&self, env: &mut Environment) -> Result<(), CaptureError> {
        let repo = discover(self.name(), &self.project_dir)?;
        env.git_branch = match repo.head() {
            Ok(head) => head.shorthand().map(str::to_string),
            // unborn branch: no commit yet, HEAD still names the branch
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => repo
                .find_reference("HEAD")
                .ok()
                .and_then(|r| r.symbolic_target().map(str::to_string))
                .map(|t| t.trim_start_matches("refs/heads/").to_string()),
            Err(e) => return Err(CaptureError::unavailable(self.name(), e.message())),
        };
        Ok(())
    }

    #[cfg(not(feature = "git"))]
    fn capture(&self, _env: &mut Environment) -> Result<(), CaptureError> {
        let _ = &self.project_dir;
        Err(CaptureError::unavailable(self.name(), "built without the `git` feature"))
    }
}

/// `user.name` from the git configuration seen by the project's repository.
#[derive(Debug, Clone)]
pub struct GitUserProbe {
    project_dir: PathBuf,
}

impl GitUserProbe {
    pub fn new(project_dir: PathBuf) -> Self {
        Self { project_dir }
    }
}

impl Probe for GitUserProbe {
    fn name(&self) -> &'static str {
        "git.user"
    }

    #[cfg(feature = "git")]
    fn capture(&self, env: &mut Environment) -> Result<(), CaptureError> {
        let repo = discover(self.name(), &self.project_dir)?;
        let unavailable = |e: git2::Error| CaptureError::unavailable("git.user", e.message());
        let config = repo.config().map_err(unavailable)?;
        env.git_user = match config.get_string("user.name") {
            Ok(name) => Some(name),
            Err(e) if e.code() == git2::ErrorCode::NotFound => None,
            Err(e) => return Err(unavailable(e)),
        };
        Ok(())
    }

    #[cfg(not(feature = "git"))]
    fn capture(&self, _env: &mut Environment) -> Result<(), CaptureError> {
        let _ = &self.project_dir;
        Err(CaptureError::unavailable(self.name(), "built without the `git` feature"))
    }
}

/// Command-line markers identifying the two daemon families.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessMarkers {
    pub build_daemon: String,
    pub compiler_daemon: String,
}

impl Default for ProcessMarkers {
    fn default() -> Self {
        Self {
            build_daemon: "GradleDaemon".to_string(),
            compiler_daemon: "KotlinCompileDaemon".to_string(),
        }
    }
}

/// A process as seen by the process table, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedProcess {
    pub pid: u32,
    pub name: String,
    pub memory_bytes: u64,
    pub cmd: Vec<String>,
}

/// Build and compiler daemon discovery via `sysinfo`.
#[derive(Debug, Clone, Default)]
pub struct ProcessProbe {
    markers: ProcessMarkers,
}

impl ProcessProbe {
    pub fn new(markers: ProcessMarkers) -> Self {
        Self { markers }
    }

    /// Classify observed processes into the environment fields.
    pub fn apply(&self, env: &mut Environment, observed: &[ObservedProcess]) {
        let build = matching(observed, &self.markers.build_daemon);
        let compiler = matching(observed, &self.markers.compiler_daemon);

        env.build_processes = summarize(&build);
        env.compiler_processes = summarize(&compiler);
        env.processes_stats = build
            .iter()
            .chain(compiler.iter())
            .map(|p| ProcessInfo { pid: p.pid, name: p.name.clone(), memory_bytes: p.memory_bytes })
            .collect();
    }
}

impl Probe for ProcessProbe {
    fn name(&self) -> &'static str {
        "processes"
    }

    fn capture(&self, env: &mut Environment) -> Result<(), CaptureError> {
        if !System::IS_SUPPORTED {
            return Err(CaptureError::unavailable(self.name(), "platform not supported by sysinfo"));
        }
        let mut sys = System::new();
        sys.refresh_processes();
        let observed: Vec<ObservedProcess> = sys
            .processes()
            .values()
            .map(|p| ObservedProcess {
                pid: p.pid().as_u32(),
                name: p.name().to_string(),
                memory_bytes: p.memory(),
                cmd: p.cmd().to_vec(),
            })
            .collect();
        self.apply(env, &observed);
        Ok(())
    }
}

fn matching<'a>(observed: &'a [ObservedProcess], marker: &str) -> Vec<&'a ObservedProcess> {
    let mut found: Vec<_> =
        observed.iter().filter(|p| p.cmd.iter().any(|arg| arg.contains(marker))).collect();
    found.sort_by_key(|p| p.pid);
    found
}

fn summarize(processes: &[&ObservedProcess]) -> ProcessSummary {
    if processes.is_empty() {
        return ProcessSummary {
            processes_available: Some(0),
            multiple_processes: Some(false),
            ..Default::default()
        };
    }
    let multiple = processes.len() > 1;
    ProcessSummary {
        jvm_args: processes.first().map(|p| parse_jvm_args(&p.cmd)),
        processes_available: Some(processes.len()),
        multiple_processes: Some(multiple),
        multiple_jvm_args: multiple.then(|| {
            processes.iter().map(|p| (p.pid.to_string(), parse_jvm_args(&p.cmd))).collect()
        }),
    }
}

/// Extract `-X` and `-XX:` options from a JVM command line.
///
/// `-Xmx4g` gives `Xmx = 4g`, `-XX:MaxMetaspaceSize=512m` gives
/// `MaxMetaspaceSize = 512m`, `-XX:+UseParallelGC` gives
/// `UseParallelGC = true`. Everything else is ignored.
pub fn parse_jvm_args(cmd: &[String]) -> BTreeMap<String, String> {
    const SIZED: [&str; 4] = ["Xmx", "Xms", "Xss", "Xmn"];
    let mut args = BTreeMap::new();
    for arg in cmd {
        if let Some(option) = arg.strip_prefix("-XX:") {
            if let Some(flag) = option.strip_prefix('+') {
                args.insert(flag.to_string(), "true".to_string());
            } else if let Some(flag) = option.strip_prefix('-') {
                args.insert(flag.to_string(), "false".to_string());
            } else if let Some((key, value)) = option.split_once('=') {
                args.insert(key.to_string(), value.to_string());
            }
        } else if let Some(option) = arg.strip_prefix('-') {
            if let Some(key) = SIZED.iter().find(|k| option.starts_with(**k)) {
                args.insert(key.to_string(), option[key.len()..].to_string());
            }
        }
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;
    impl Probe for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn capture(&self, env: &mut Environment) -> Result<(), CaptureError> {
            env.hostname = Some("half-written".into());
            Err(CaptureError::unavailable("failing", "provider down"))
        }
    }

    struct Panicking;
    impl Probe for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }
        fn capture(&self, _env: &mut Environment) -> Result<(), CaptureError> {
            panic!("provider threw")
        }
    }

    fn tool() -> ToolInfo {
        ToolInfo {
            max_workers: Some(8),
            build_tool_version: Some("8.5".into()),
            java_xmx_bytes: Some(4_294_967_296),
            switches: Switches { parallel: Some("true".into()), ..Default::default() },
            ..Default::default()
        }
    }

    #[test]
    fn failing_probes_do_not_stop_capture() {
        let snapshot = EnvironmentSnapshotter::new()
            .with_probe(Failing)
            .with_probe(Panicking)
            .with_probe(ToolProbe::new(tool()))
            .capture();

        assert_eq!(snapshot.failures.len(), 2);
        assert_eq!(snapshot.failures[0].probe(), "failing");
        assert_eq!(snapshot.failures[1], CaptureError::Panicked { probe: "panicking" });
        // partial writes of a failed probe are discarded
        assert!(snapshot.environment.hostname.is_none());
        assert_eq!(snapshot.environment.max_workers.as_deref(), Some("8"));
        assert_eq!(snapshot.environment.java_xmx_bytes.as_deref(), Some("4294967296"));
        assert_eq!(snapshot.environment.switches.parallel.as_deref(), Some("true"));
    }

    #[test]
    fn user_probe_splits_locale_and_charset() {
        let vars = BTreeMap::from([
            ("USER".to_string(), "dev".to_string()),
            ("LANG".to_string(), "en_US.UTF-8@euro".to_string()),
        ]);
        let snapshot =
            EnvironmentSnapshotter::new().with_probe(UserProbe::from_vars(vars)).capture();
        let env = snapshot.environment;
        assert_eq!(env.username.as_deref(), Some("dev"));
        assert_eq!(env.locale.as_deref(), Some("en_US"));
        assert_eq!(env.default_charset.as_deref(), Some("UTF-8"));
    }

    #[test]
    fn user_probe_reads_variables_when_it_runs() {
        let user = Arc::new(std::sync::Mutex::new("first".to_string()));
        let source = Arc::clone(&user);
        let probe = UserProbe::from_lookup(move |name| {
            (name == "USER").then(|| source.lock().unwrap().clone())
        });
        *user.lock().unwrap() = "second".to_string();

        let snapshot = EnvironmentSnapshotter::new().with_probe(probe).capture();
        assert_eq!(snapshot.environment.username.as_deref(), Some("second"));
        assert!(snapshot.environment.locale.is_none());
    }

    #[cfg(feature = "git")]
    fn repository_with_user(dir: &std::path::Path) -> git2::Repository {
        let repo = git2::Repository::init(dir).unwrap();
        repo.config()
            .unwrap()
            .open_level(git2::ConfigLevel::Local)
            .unwrap()
            .set_str("user.name", "Build User")
            .unwrap();
        repo.set_head("refs/heads/main").unwrap();
        repo
    }

    #[cfg(feature = "git")]
    fn git_snapshot(dir: &std::path::Path) -> Snapshot {
        EnvironmentSnapshotter::new()
            .with_probe(GitBranchProbe::new(dir.to_path_buf()))
            .with_probe(GitUserProbe::new(dir.to_path_buf()))
            .capture()
    }

    #[cfg(feature = "git")]
    #[test]
    fn git_probes_read_unborn_branch_and_user() {
        let dir = tempfile::tempdir().unwrap();
        repository_with_user(dir.path());

        let snapshot = git_snapshot(dir.path());
        assert!(snapshot.failures.is_empty(), "{:?}", snapshot.failures);
        assert_eq!(snapshot.environment.git_branch.as_deref(), Some("main"));
        assert_eq!(snapshot.environment.git_user.as_deref(), Some("Build User"));
    }

    #[cfg(feature = "git")]
    #[test]
    fn corrupted_branch_ref_keeps_git_user() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repository_with_user(dir.path());
        std::fs::write(repo.path().join("refs").join("heads").join("main"), "not-a-sha\n")
            .unwrap();

        let snapshot = git_snapshot(dir.path());
        assert_eq!(snapshot.failures.len(), 1);
        assert_eq!(snapshot.failures[0].probe(), "git.branch");
        assert!(snapshot.environment.git_branch.is_none());
        assert_eq!(snapshot.environment.git_user.as_deref(), Some("Build User"));
    }

    #[test]
    fn from_config_respects_toggles() {
        let metrics = MetricsConfiguration {
            git: false,
            processes: false,
            ..Default::default()
        };
        let snapshotter =
            EnvironmentSnapshotter::from_config(&metrics, ToolInfo::default(), PathBuf::from("."));
        assert_eq!(snapshotter.probe_names(), vec!["host", "user", "tool"]);

        let all = EnvironmentSnapshotter::from_config(
            &MetricsConfiguration::default(),
            ToolInfo::default(),
            PathBuf::from("."),
        );
        assert_eq!(
            all.probe_names(),
            vec!["host", "user", "tool", "git.branch", "git.user", "processes"]
        );
    }

    #[test]
    fn parses_jvm_options() {
        let cmd: Vec<String> = [
            "/usr/bin/java",
            "-Xmx4g",
            "-Xms512m",
            "-XX:MaxMetaspaceSize=1g",
            "-XX:+UseParallelGC",
            "-XX:-UseCompressedOops",
            "-Dfile.encoding=UTF-8",
            "org.gradle.launcher.daemon.bootstrap.GradleDaemon",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let args = parse_jvm_args(&cmd);
        assert_eq!(args["Xmx"], "4g");
        assert_eq!(args["Xms"], "512m");
        assert_eq!(args["MaxMetaspaceSize"], "1g");
        assert_eq!(args["UseParallelGC"], "true");
        assert_eq!(args["UseCompressedOops"], "false");
        assert_eq!(args.len(), 5);
    }

    #[test]
    fn classifies_daemon_processes() {
        let process = |pid: u32, marker: &str, xmx: &str| ObservedProcess {
            pid,
            name: "java".into(),
            memory_bytes: 1024,
            cmd: vec![format!("-Xmx{xmx}"), marker.to_string()],
        };
        let observed = vec![
            process(30, "GradleDaemon", "2g"),
            process(10, "GradleDaemon", "4g"),
            process(20, "KotlinCompileDaemon", "1g"),
            ObservedProcess { pid: 5, name: "bash".into(), memory_bytes: 1, cmd: vec![] },
        ];
        let mut env = Environment::default();
        ProcessProbe::default().apply(&mut env, &observed);

        let build = &env.build_processes;
        assert_eq!(build.processes_available, Some(2));
        assert_eq!(build.multiple_processes, Some(true));
        assert_eq!(build.jvm_args.as_ref().unwrap()["Xmx"], "4g");
        let per_pid = build.multiple_jvm_args.as_ref().unwrap();
        assert_eq!(per_pid["30"]["Xmx"], "2g");

        let compiler = &env.compiler_processes;
        assert_eq!(compiler.processes_available, Some(1));
        assert_eq!(compiler.multiple_processes, Some(false));
        assert!(compiler.multiple_jvm_args.is_none());

        let pids: Vec<u32> = env.processes_stats.iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![10, 30, 20]);
    }

    #[test]
    fn no_daemons_reports_zero() {
        let mut env = Environment::default();
        ProcessProbe::default().apply(&mut env, &[]);
        assert_eq!(env.build_processes.processes_available, Some(0));
        assert_eq!(env.build_processes.multiple_processes, Some(false));
        assert!(env.build_processes.jvm_args.is_none());
    }

    #[test]
    fn host_probe_is_best_effort() {
        let snapshot = EnvironmentSnapshotter::new().with_probe(HostProbe).capture();
        if snapshot.failures.is_empty() {
            assert!(snapshot.environment.cpu_count.is_some());
        }
    }
}
