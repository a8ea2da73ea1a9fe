//! Shared fixtures: a temp bench builder and recording doubles

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;

use benchctl::bench::{Application, Bench, Site};
use benchctl::deploy::{
    BackupArtifact, BenchBackend, CommandOutput, PullMode, RemoteBranch, ServiceKind,
};
use benchctl::errors::BenchError;
use benchctl::patches::{Patch, PatchOutcome};
use benchctl::update::Confirm;

/// Calls that change the bench or the services around it
pub const MUTATING_CALLS: [&str; 9] = [
    "unshallow",
    "fetch_app",
    "pull_app",
    "install_dependencies",
    "build_assets",
    "backup_site",
    "regenerate_service_config",
    "restart_services",
    "run_framework_command",
];

/// A bench skeleton in a temp directory
pub struct BenchFixture {
    dir: TempDir,
}

impl BenchFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["apps", "sites", "config", "logs", "config/pids"] {
            std::fs::create_dir_all(dir.path().join(sub)).unwrap();
        }
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Install an app checked out on `branch`, with a git directory
    pub fn with_app(self, name: &str, version: &str, branch: &str) -> Self {
        let app_dir = self.path().join("apps").join(name);
        std::fs::create_dir_all(app_dir.join(name)).unwrap();
        std::fs::create_dir_all(app_dir.join(".git")).unwrap();
        std::fs::write(
            app_dir.join(name).join("__init__.py"),
            format!("__version__ = '{}'\n", version),
        )
        .unwrap();
        std::fs::write(
            app_dir.join(".git").join("HEAD"),
            format!("ref: refs/heads/{}\n", branch),
        )
        .unwrap();
        self.append_line("sites/apps.txt", name);
        self
    }

    /// Write the app's hooks module
    pub fn with_hooks(self, name: &str, contents: &str) -> Self {
        std::fs::write(
            self.path().join("apps").join(name).join(name).join("hooks.py"),
            contents,
        )
        .unwrap();
        self
    }

    /// Mark an app repository as a shallow clone
    pub fn shallow(self, name: &str) -> Self {
        std::fs::write(
            self.path().join("apps").join(name).join(".git").join("shallow"),
            "3f1c2a9e\n",
        )
        .unwrap();
        self
    }

    pub fn with_site(self, name: &str) -> Self {
        let site_dir = self.path().join("sites").join(name);
        std::fs::create_dir_all(&site_dir).unwrap();
        std::fs::write(site_dir.join("site_config.json"), "{}\n").unwrap();
        self
    }

    pub fn with_config(self, config: Value) -> Self {
        std::fs::write(
            self.config_path(),
            serde_json::to_string_pretty(&config).unwrap(),
        )
        .unwrap();
        self
    }

    pub fn with_ledger(self, lines: &[&str]) -> Self {
        for line in lines {
            self.append_line("patches.txt", line);
        }
        self
    }

    fn append_line(&self, relative: &str, line: &str) {
        let path = self.path().join(relative);
        let mut contents = std::fs::read_to_string(&path).unwrap_or_default();
        contents.push_str(line);
        contents.push('\n');
        std::fs::write(path, contents).unwrap();
    }

    pub fn config_path(&self) -> PathBuf {
        self.path().join("config").join("common_config.json")
    }

    /// Raw config file contents, `None` if never written
    pub fn config_text(&self) -> Option<String> {
        std::fs::read_to_string(self.config_path()).ok()
    }

    pub fn config(&self) -> Value {
        self.config_text()
            .map(|text| serde_json::from_str(&text).unwrap())
            .unwrap_or(Value::Object(Default::default()))
    }

    pub fn maintenance_mode(&self) -> i64 {
        observed_maintenance(self.path())
    }

    pub fn ledger(&self) -> Vec<String> {
        std::fs::read_to_string(self.path().join("patches.txt"))
            .unwrap_or_default()
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect()
    }

    pub async fn open(&self) -> Bench {
        Bench::open(self.path()).await.unwrap()
    }
}

fn observed_maintenance(bench: &Path) -> i64 {
    let Ok(text) = std::fs::read_to_string(bench.join("config").join("common_config.json")) else {
        return 0;
    };
    let config: Value = serde_json::from_str(&text).unwrap();
    match config.get("maintenance_mode") {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::Bool(b)) => i64::from(*b),
        _ => 0,
    }
}

/// One recorded backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub name: &'static str,
    pub target: String,
    /// `maintenance_mode` on disk when the call was made
    pub maintenance_mode: i64,
}

/// Backend double recording every call
pub struct RecordingBackend {
    bench_path: PathBuf,
    calls: Mutex<Vec<Call>>,
    upstream: HashMap<String, String>,
    upstream_hooks: HashMap<String, String>,
    failing: HashSet<&'static str>,
    dirty: HashSet<String>,
    no_remote: HashSet<String>,
    untracked: HashSet<String>,
    missing_executables: bool,
}

impl RecordingBackend {
    pub fn new(fixture: &BenchFixture) -> Self {
        Self {
            bench_path: fixture.path().to_path_buf(),
            calls: Mutex::new(Vec::new()),
            upstream: HashMap::new(),
            upstream_hooks: HashMap::new(),
            failing: HashSet::new(),
            dirty: HashSet::new(),
            no_remote: HashSet::new(),
            untracked: HashSet::new(),
            missing_executables: false,
        }
    }

    /// Version advertised by the app's upstream branch
    pub fn with_upstream(mut self, app: &str, version: &str) -> Self {
        self.upstream.insert(app.to_string(), version.to_string());
        self
    }

    /// Hooks module served from the app's upstream branch
    pub fn with_upstream_hooks(mut self, app: &str, contents: &str) -> Self {
        self.upstream_hooks.insert(app.to_string(), contents.to_string());
        self
    }

    pub fn failing(mut self, call: &'static str) -> Self {
        self.failing.insert(call);
        self
    }

    pub fn dirty(mut self, app: &str) -> Self {
        self.dirty.insert(app.to_string());
        self
    }

    pub fn without_remote(mut self, app: &str) -> Self {
        self.no_remote.insert(app.to_string());
        self
    }

    pub fn untracked(mut self, app: &str) -> Self {
        self.untracked.insert(app.to_string());
        self
    }

    pub fn without_node(mut self) -> Self {
        self.missing_executables = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_names(&self) -> Vec<&'static str> {
        self.calls().into_iter().map(|c| c.name).collect()
    }

    pub fn calls_named(&self, name: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.name == name).collect()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| MUTATING_CALLS.contains(&c.name))
            .collect()
    }

    /// Index of the first call with this name
    pub fn position(&self, name: &str) -> Option<usize> {
        self.calls().iter().position(|c| c.name == name)
    }

    fn record(&self, name: &'static str, target: impl Into<String>) -> Result<(), BenchError> {
        self.calls.lock().unwrap().push(Call {
            name,
            target: target.into(),
            maintenance_mode: observed_maintenance(&self.bench_path),
        });
        if self.failing.contains(name) {
            return Err(BenchError::CommandFailed {
                command: name.to_string(),
                code: Some(1),
                stderr: "simulated failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BenchBackend for RecordingBackend {
    async fn resolve_remote(&self, app: &Application) -> Result<Option<String>, BenchError> {
        self.record("resolve_remote", &app.name)?;
        Ok((!self.no_remote.contains(&app.name)).then(|| "upstream".to_string()))
    }

    async fn current_branch(&self, app: &Application) -> Result<Option<String>, BenchError> {
        self.record("current_branch", &app.name)?;
        Ok(app.branch.clone())
    }

    async fn has_local_changes(&self, app: &Application) -> Result<bool, BenchError> {
        self.record("has_local_changes", &app.name)?;
        Ok(self.dirty.contains(&app.name))
    }

    async fn fetch_upstream(
        &self,
        app: &Application,
        upstream: &RemoteBranch,
    ) -> Result<(), BenchError> {
        self.record("fetch_upstream", format!("{} {}", app.name, upstream))
            .map_err(|e| BenchError::RemoteUnavailable {
                app: app.name.clone(),
                remote: upstream.remote.clone(),
                reason: e.to_string(),
            })
    }

    async fn read_upstream_file(
        &self,
        app: &Application,
        upstream: &RemoteBranch,
        path: &str,
    ) -> Result<Option<String>, BenchError> {
        self.record("read_upstream_file", format!("{}:{}", upstream, path))?;
        if self.untracked.contains(&app.name) {
            return Ok(None);
        }
        if path.ends_with("hooks.py") {
            return Ok(self.upstream_hooks.get(&app.name).cloned());
        }
        let version = self
            .upstream
            .get(&app.name)
            .cloned()
            .or_else(|| app.version.clone())
            .unwrap_or_default();
        Ok(Some(format!("__version__ = '{}'\n", version)))
    }

    async fn unshallow(&self, app: &Application, remote: &str) -> Result<(), BenchError> {
        self.record("unshallow", format!("{} {}", app.name, remote))
    }

    async fn fetch_app(
        &self,
        bench: &Bench,
        name: &str,
        source_url: &str,
        _branch: Option<&str>,
    ) -> Result<Application, BenchError> {
        self.record("fetch_app", format!("{} {}", name, source_url))?;
        bench.add_app(name).await?;
        Ok(Application {
            name: name.to_string(),
            version: None,
            source_location: bench.layout().app_dir(name).path().to_path_buf(),
            branch: None,
        })
    }

    async fn pull_app(
        &self,
        app: &Application,
        upstream: &RemoteBranch,
        mode: PullMode,
    ) -> Result<(), BenchError> {
        self.record("pull_app", format!("{} {} {:?}", app.name, upstream, mode))
            .map_err(|_| BenchError::MergeConflict {
                app: app.name.clone(),
            })
    }

    async fn install_dependencies(&self, _bench: &Bench, app: &Application) -> Result<(), BenchError> {
        self.record("install_dependencies", &app.name)
    }

    async fn build_assets(&self, _bench: &Bench, app: Option<&str>) -> Result<(), BenchError> {
        self.record("build_assets", app.unwrap_or("*"))
    }

    async fn backup_site(&self, _bench: &Bench, site: &Site) -> Result<BackupArtifact, BenchError> {
        self.record("backup_site", &site.name)?;
        Ok(BackupArtifact {
            site: site.name.clone(),
            created_at: chrono::Utc::now(),
            database: None,
        })
    }

    async fn regenerate_service_config(
        &self,
        _bench: &Bench,
        kind: ServiceKind,
    ) -> Result<(), BenchError> {
        self.record("regenerate_service_config", kind.to_string())
    }

    async fn restart_services(&self, _bench: &Bench, kind: ServiceKind) -> Result<(), BenchError> {
        self.record("restart_services", kind.to_string())
    }

    async fn run_framework_command(
        &self,
        _bench: &Bench,
        args: &[String],
    ) -> Result<CommandOutput, BenchError> {
        self.record("run_framework_command", args.join(" "))?;
        Ok(CommandOutput {
            code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    fn find_executable(&self, name: &str) -> Option<PathBuf> {
        (!self.missing_executables).then(|| PathBuf::from("/usr/bin").join(name))
    }
}

/// What a scripted patch does when executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Apply,
    Mark,
    Skip,
    Fail,
    /// Fail on the first execution only
    FailOnce,
}

/// Patch double logging each execution into a shared journal
pub struct ScriptedPatch {
    id: String,
    script: Script,
    journal: Arc<Mutex<Vec<String>>>,
}

impl ScriptedPatch {
    pub fn boxed(id: &str, script: Script, journal: &Arc<Mutex<Vec<String>>>) -> Box<dyn Patch> {
        Box::new(Self {
            id: id.to_string(),
            script,
            journal: Arc::clone(journal),
        })
    }
}

#[async_trait]
impl Patch for ScriptedPatch {
    fn identifier(&self) -> &str {
        &self.id
    }

    async fn execute(&self, _bench: &Bench) -> Result<PatchOutcome, BenchError> {
        let earlier_runs = {
            let mut journal = self.journal.lock().unwrap();
            let earlier = journal.iter().filter(|id| **id == self.id).count();
            journal.push(self.id.clone());
            earlier
        };
        match self.script {
            Script::FailOnce if earlier_runs == 0 => {
                Err(BenchError::Internal(format!("{} exploded", self.id)))
            }
            Script::FailOnce => Ok(PatchOutcome::Applied),
            Script::Apply => Ok(PatchOutcome::Applied),
            Script::Mark => Ok(PatchOutcome::AppliedWithSkipMarker),
            Script::Skip => Ok(PatchOutcome::NotApplicable),
            Script::Fail => Err(BenchError::Internal(format!("{} exploded", self.id))),
        }
    }
}

pub fn journal() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

/// Confirmation double with a fixed answer
pub struct FixedAnswer {
    interactive: bool,
    answer: bool,
    asked: Mutex<Vec<String>>,
}

impl FixedAnswer {
    pub fn terminal(answer: bool) -> Self {
        Self {
            interactive: true,
            answer,
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn no_terminal() -> Self {
        Self {
            interactive: false,
            answer: false,
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }
}

impl Confirm for FixedAnswer {
    fn is_interactive(&self) -> bool {
        self.interactive
    }

    fn confirm(&self, prompt: &str) -> Result<bool, BenchError> {
        self.asked.lock().unwrap().push(prompt.to_string());
        Ok(self.answer)
    }
}
