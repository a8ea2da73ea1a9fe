//! Update orchestrator
//!
//! Drives one update run through [`WorkflowState`] in strict order. Steps
//! are never retried here; every step is idempotent so the operator
//! recovers by re-running the update.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bench::app::DEPRECATED_BRANCHES;
use crate::bench::{Application, Bench, BenchConfig, FRAMEWORK_APP, PRIMARY_APPS};
use crate::deploy::{BackupArtifact, BenchBackend, PullMode, RemoteBranch, ServiceKind};
use crate::errors::{BenchError, UpdateAborted};
use crate::patches::{PatchRunSummary, PatchRunner};
use crate::update::confirm::Confirm;
use crate::update::lock::UpdateLock;
use crate::update::options::{UpdateOptions, UpdatePhase};
use crate::update::state::{UpdateFsm, WorkflowEvent, WorkflowState};
use crate::version::{self, VersionComparison};

/// Node is required to build assets from this framework major on
const NODE_REQUIRED_FROM_MAJOR: u64 = 6;

/// Outcome of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub run_id: Uuid,
    pub phase: UpdatePhase,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub comparison: Option<VersionComparison>,
    pub patches: Option<PatchRunSummary>,
    pub states: Vec<WorkflowState>,
    pub pulled_apps: Vec<String>,
    pub backups: Vec<BackupArtifact>,
}

/// Values threaded through the steps of one run
struct RunContext {
    options: UpdateOptions,
    config: BenchConfig,
    comparison: Option<VersionComparison>,
    patches: Option<PatchRunSummary>,
    pulled_apps: Vec<String>,
    backups: Vec<BackupArtifact>,
    proxy_regenerated: bool,
    lock: Option<UpdateLock>,
}

impl RunContext {
    fn new(options: UpdateOptions) -> Self {
        Self {
            comparison: options.known_comparison,
            options,
            config: BenchConfig::default(),
            patches: None,
            pulled_apps: Vec::new(),
            backups: Vec::new(),
            proxy_regenerated: false,
            lock: None,
        }
    }

    fn restart_supervisor(&self) -> bool {
        self.options.restart_supervisor || self.config.restart_supervisor_on_update()
    }

    fn restart_systemd(&self) -> bool {
        self.options.restart_systemd || self.config.restart_systemd_on_update()
    }
}

pub struct UpdateOrchestrator<'a> {
    bench: &'a Bench,
    backend: &'a dyn BenchBackend,
    confirm: &'a dyn Confirm,
    patches: &'a PatchRunner,
}

impl<'a> UpdateOrchestrator<'a> {
    pub fn new(
        bench: &'a Bench,
        backend: &'a dyn BenchBackend,
        confirm: &'a dyn Confirm,
        patches: &'a PatchRunner,
    ) -> Self {
        Self {
            bench,
            backend,
            confirm,
            patches,
        }
    }

    pub async fn run(&self, options: UpdateOptions) -> Result<UpdateReport, UpdateAborted> {
        let options = options.normalized();
        let phase = options.phase;
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        let mut fsm = UpdateFsm::resume_from(phase.start_state());
        let mut run = RunContext::new(options);
        info!(%run_id, ?phase, bench = %self.bench.path().display(), "Starting update");

        if phase == UpdatePhase::Finish {
            if let Err(cause) = self.check_finish(&mut run).await {
                return Err(self.abort(&mut fsm, run_id, WorkflowState::Patched, cause).await);
            }
        }

        for step in phase.steps() {
            debug!(%run_id, %step, "Entering step");
            if let Err(cause) = self.execute(step, &mut run).await {
                return Err(self.abort(&mut fsm, run_id, step, cause).await);
            }
            if let Err(e) = fsm.process(WorkflowEvent::Completed(step)) {
                return Err(self.abort(&mut fsm, run_id, step, BenchError::Internal(e)).await);
            }
        }

        drop(run.lock.take());
        info!(%run_id, state = %fsm.state(), "Update finished");

        Ok(UpdateReport {
            run_id,
            phase,
            started_at,
            finished_at: Utc::now(),
            comparison: run.comparison,
            patches: run.patches,
            states: fsm.history().to_vec(),
            pulled_apps: run.pulled_apps,
            backups: run.backups,
        })
    }

    async fn abort(
        &self,
        fsm: &mut UpdateFsm,
        run_id: Uuid,
        step: WorkflowState,
        cause: BenchError,
    ) -> UpdateAborted {
        // Report what is actually on disk; fall back to what the FSM committed.
        let maintenance_left_on = match self.bench.config().await {
            Ok(config) => config.maintenance_mode(),
            Err(_) => fsm.maintenance_engaged(),
        };
        let _ = fsm.process(WorkflowEvent::Failed {
            step,
            error: cause.to_string(),
        });
        error!(%run_id, %step, maintenance_left_on, error = %cause, "Update aborted");
        UpdateAborted::new(step, maintenance_left_on, cause)
    }

    async fn execute(&self, step: WorkflowState, run: &mut RunContext) -> Result<(), BenchError> {
        match step {
            WorkflowState::Idle | WorkflowState::Done => Ok(()),
            WorkflowState::Validated => self.validate(run).await,
            WorkflowState::MaintenanceOn => self.enter_maintenance(run).await,
            WorkflowState::BackedUp => self.backup_sites(run).await,
            WorkflowState::SourcesUpdated => self.pull_apps(run).await,
            WorkflowState::DependenciesInstalled => self.install_dependencies(run).await,
            WorkflowState::Patched => self.patch(run).await,
            WorkflowState::AssetsBuilt => self.build_assets(run).await,
            WorkflowState::PostUpgradeDone => self.post_upgrade(run).await,
            WorkflowState::ServicesRestarted => self.restart_services(run).await,
            WorkflowState::MaintenanceOff => self.bench.set_maintenance(false).await.map(|_| ()),
        }
    }

    /// Gates shared by both phases; nothing is written before they pass
    fn check_policies(&self, run: &RunContext) -> Result<(), BenchError> {
        if run.config.release_bench() {
            return Err(BenchError::ReleaseDeployment);
        }
        run.config.validate_restart_policy()?;
        if run.restart_supervisor() && run.restart_systemd() {
            return Err(BenchError::ConflictingRestartPolicy);
        }
        Ok(())
    }

    fn acquire_lock(&self, run: &mut RunContext) -> Result<(), BenchError> {
        let path = self.bench.layout().update_lock_file();
        run.lock = Some(UpdateLock::acquire(path.path())?);
        Ok(())
    }

    async fn validate(&self, run: &mut RunContext) -> Result<(), BenchError> {
        run.config = self.bench.config().await?;
        self.check_policies(run)?;
        self.acquire_lock(run)?;

        for app in self.bench.apps().await? {
            if !app.is_primary() {
                continue;
            }
            if let Some(branch) = &app.branch {
                if DEPRECATED_BRANCHES.contains(&branch.as_str()) {
                    return Err(BenchError::DeprecatedBranch {
                        app: app.name.clone(),
                        branch: branch.clone(),
                    });
                }
            }
        }

        if run.options.pull && !run.options.reset && run.config.shallow_clone() {
            warn!(
                "shallow_clone is set: shallow repositories will be unshallowed before pulling. \
                 Pass --reset to update them without fetching full history"
            );
        }
        Ok(())
    }

    async fn check_finish(&self, run: &mut RunContext) -> Result<(), BenchError> {
        run.config = self.bench.config().await?;
        self.check_policies(run)?;
        if !run.config.maintenance_mode() {
            return Err(BenchError::ConfigError(
                "maintenance mode is off, so there is no prepared update to finish; \
                 run a full update instead"
                    .to_string(),
            ));
        }
        self.acquire_lock(run)
    }

    async fn enter_maintenance(&self, run: &mut RunContext) -> Result<(), BenchError> {
        if run.comparison.is_none() && run.options.pull {
            run.comparison = self.compare_primary_apps().await?;
        }

        if let Some(comparison) = run.comparison.filter(|c| c.is_major_upgrade) {
            let (from, to) = (comparison.local_major, comparison.upstream_major);
            if run.options.force {
                warn!(from, to, "Forcing major version upgrade without confirmation");
            } else if self.confirm.is_interactive() {
                let prompt = format!(
                    "This update will perform a major version upgrade from {} to {}. \
                     This would take significant time to migrate and might break custom apps. \
                     Do you want to continue?",
                    from, to
                );
                if !self.confirm.confirm(&prompt)? {
                    return Err(BenchError::ConfirmationDeclined);
                }
            } else {
                return Err(BenchError::ConfirmationRequired { from, to });
            }
        }
        // Forced runs get the same toolchain check as a major upgrade
        if let Some(comparison) = run
            .comparison
            .filter(|c| c.is_major_upgrade || run.options.force)
        {
            self.check_prerequisites(comparison.upstream_major)?;
        }

        self.bench.set_maintenance(true).await?;
        Ok(())
    }

    async fn compare_primary_apps(&self) -> Result<Option<VersionComparison>, BenchError> {
        let mut driver: Option<VersionComparison> = None;

        for name in PRIMARY_APPS {
            let Some(app) = self.bench.app(name).await? else {
                continue;
            };
            if !app.has_git_dir().await {
                debug!(app = %name, "Not a git repository, skipping version check");
                continue;
            }

            let comparison = version::compare_app(&app, self.backend)
                .await
                .map_err(|e| e.context(format!("checking upstream version of {}", name)))?;

            driver = match driver {
                None => Some(comparison),
                Some(current) if !current.is_major_upgrade && comparison.is_major_upgrade => {
                    Some(comparison)
                }
                keep => keep,
            };
        }
        Ok(driver)
    }

    fn check_prerequisites(&self, to_major: u64) -> Result<(), BenchError> {
        if to_major < NODE_REQUIRED_FROM_MAJOR {
            return Ok(());
        }
        let found = |names: &[&str]| names.iter().any(|n| self.backend.find_executable(n).is_some());

        if !found(&["node", "nodejs"]) {
            return Err(BenchError::MissingPrerequisite(
                "node is required to build assets; install nodejs and rerun".to_string(),
            ));
        }
        if !found(&["npm", "yarn"]) {
            return Err(BenchError::MissingPrerequisite(
                "a node package manager (npm or yarn) is required; install one and rerun"
                    .to_string(),
            ));
        }
        Ok(())
    }

    async fn backup_sites(&self, run: &mut RunContext) -> Result<(), BenchError> {
        if !run.options.backup {
            warn!("Backups disabled, sites will not be backed up before updating");
            return Ok(());
        }

        for site in self.bench.sites().await? {
            info!(site = %site.name, "Backing up site");
            let artifact = self
                .backend
                .backup_site(self.bench, &site)
                .await
                .map_err(|e| e.context(format!("backing up site {}", site.name)))?;
            run.backups.push(artifact);
        }
        Ok(())
    }

    async fn pull_targets(&self, run: &RunContext) -> Result<Vec<Application>, BenchError> {
        let excluded = self.bench.excluded_apps().await?;
        let apps = self.bench.apps().await?;

        for name in &run.options.apps {
            if !apps.iter().any(|a| &a.name == name) {
                warn!(app = %name, "Requested app is not installed, ignoring");
            }
        }

        let mut targets = Vec::new();
        for app in apps {
            if !run.options.apps.is_empty() && !run.options.apps.contains(&app.name) {
                continue;
            }
            if excluded.contains(&app.name) {
                info!(app = %app.name, "Skipping excluded app");
                continue;
            }
            if !app.has_git_dir().await {
                debug!(app = %app.name, "Not a git repository, skipping pull");
                continue;
            }
            targets.push(app);
        }
        Ok(targets)
    }

    async fn pull_apps(&self, run: &mut RunContext) -> Result<(), BenchError> {
        if !run.options.pull {
            return Ok(());
        }

        let targets = self.pull_targets(run).await?;
        let reset = run.options.reset;

        if !reset {
            for app in &targets {
                if self.backend.has_local_changes(app).await? {
                    return Err(BenchError::LocalChanges {
                        app: app.name.clone(),
                    });
                }
            }
        }

        let mode = if reset {
            PullMode::Reset
        } else if run.config.rebase_on_pull() {
            PullMode::Rebase
        } else {
            PullMode::Merge
        };

        for app in &targets {
            let Some(remote) = self.backend.resolve_remote(app).await? else {
                if app.name == FRAMEWORK_APP {
                    return Err(BenchError::RemoteUnavailable {
                        app: app.name.clone(),
                        remote: String::new(),
                        reason: "no remote configured".to_string(),
                    });
                }
                warn!(app = %app.name, "No remote configured, excluding app from updates");
                self.bench.exclude_app(&app.name).await?;
                continue;
            };

            let branch = match &app.branch {
                Some(branch) => branch.clone(),
                None => self.backend.current_branch(app).await?.ok_or_else(|| {
                    BenchError::BranchNotTracked {
                        app: app.name.clone(),
                        branch: "HEAD".to_string(),
                    }
                })?,
            };
            let upstream = RemoteBranch::new(remote, branch);

            if !reset && run.config.shallow_clone() && app.is_shallow().await {
                self.backend
                    .unshallow(app, &upstream.remote)
                    .await
                    .map_err(|e| e.context(format!("unshallowing {}", app.name)))?;
            }

            info!(app = %app.name, %upstream, ?mode, "Pulling app");
            self.backend
                .pull_app(app, &upstream, mode)
                .await
                .map_err(|e| e.context(format!("pulling {}", app.name)))?;
            run.pulled_apps.push(app.name.clone());
        }
        Ok(())
    }

    async fn install_dependencies(&self, run: &mut RunContext) -> Result<(), BenchError> {
        if !run.options.requirements {
            return Ok(());
        }

        let excluded = self.bench.excluded_apps().await?;
        let mut apps: Vec<Application> = self
            .bench
            .apps()
            .await?
            .into_iter()
            .filter(|a| !excluded.contains(&a.name))
            .collect();
        // Framework first; the rest keep install order
        apps.sort_by_key(|a| !a.is_framework());

        for app in &apps {
            info!(app = %app.name, "Installing dependencies");
            self.backend
                .install_dependencies(self.bench, app)
                .await
                .map_err(|e| e.context(format!("installing dependencies of {}", app.name)))?;
        }
        Ok(())
    }

    async fn patch(&self, run: &mut RunContext) -> Result<(), BenchError> {
        if !run.options.patch {
            return Ok(());
        }

        let summary = self.patches.run(self.bench).await?;
        info!(
            applied = summary.applied.len(),
            marked = summary.marked.len(),
            skipped = summary.skipped.len(),
            "Bench patches done"
        );
        run.patches = Some(summary);

        for site in self.bench.sites().await? {
            info!(site = %site.name, "Migrating site");
            let args = vec!["--site".to_string(), site.name.clone(), "migrate".to_string()];
            self.backend
                .run_framework_command(self.bench, &args)
                .await
                .and_then(|output| output.into_result(args.join(" ")))
                .map_err(|e| e.context(format!("migrating site {}", site.name)))?;
        }
        Ok(())
    }

    async fn build_assets(&self, run: &mut RunContext) -> Result<(), BenchError> {
        if !run.options.build {
            return Ok(());
        }
        self.backend
            .build_assets(self.bench, None)
            .await
            .map_err(|e| e.context("building assets"))
    }

    async fn post_upgrade(&self, run: &mut RunContext) -> Result<(), BenchError> {
        let major = run.comparison.map(|c| c.is_major_upgrade).unwrap_or(false);
        if !major && !run.options.force {
            debug!("No major upgrade, skipping post-upgrade hooks");
            return Ok(());
        }

        // Pulled code may carry new defaults; read the config afresh.
        let config = self.bench.config().await?;
        if config.restart_supervisor_on_update() {
            self.regenerate(ServiceKind::Redis).await?;
            self.regenerate(ServiceKind::Supervisor).await?;
            self.regenerate(ServiceKind::Proxy).await?;
            run.proxy_regenerated = true;
        }
        if config.restart_systemd_on_update() {
            self.regenerate(ServiceKind::Systemd).await?;
        }
        run.config = config;

        match run.comparison {
            Some(c) if c.is_major_upgrade => {
                info!(to = c.upstream_major, "Bench upgraded to a new major version")
            }
            _ => info!("Post-upgrade hooks done"),
        }
        if !run.proxy_regenerated {
            info!(
                "Service config was not regenerated; reload nginx and supervisor \
                 if this bench serves production traffic"
            );
        }
        Ok(())
    }

    async fn regenerate(&self, kind: ServiceKind) -> Result<(), BenchError> {
        info!(%kind, "Regenerating service config");
        self.backend
            .regenerate_service_config(self.bench, kind)
            .await
            .map_err(|e| e.context(format!("regenerating {} config", kind)))
    }

    async fn restart_services(&self, run: &mut RunContext) -> Result<(), BenchError> {
        let mut kinds = Vec::new();
        if run.restart_supervisor() {
            kinds.push(ServiceKind::Supervisor);
        }
        if run.restart_systemd() {
            kinds.push(ServiceKind::Systemd);
        }
        if run.proxy_regenerated {
            kinds.push(ServiceKind::Proxy);
        }
        if kinds.is_empty() {
            debug!("No restart policy configured");
        }

        for kind in kinds {
            info!(%kind, "Restarting services");
            self.backend
                .restart_services(self.bench, kind)
                .await
                .map_err(|e| e.context(format!("restarting {}", kind)))?;
        }
        Ok(())
    }
}
