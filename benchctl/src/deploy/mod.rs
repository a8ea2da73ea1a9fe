//! External collaborators of the update workflow
//!
//! Everything that leaves the process (git, the framework CLI, package
//! managers, service managers) goes through [`BenchBackend`], so the
//! orchestrator can be driven against a recording double in tests.

pub mod framework;
pub mod git;
pub mod process;
pub mod services;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use crate::bench::{Application, Bench, Site};
use crate::errors::BenchError;

pub use framework::BackupArtifact;
pub use process::CommandOutput;
pub use services::ServiceKind;

/// Default external generator for supervisor/systemd/nginx config
pub const DEFAULT_CONFIG_GENERATOR: &str = "bench";

/// A branch on a named remote, displayed as `remote/branch`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteBranch {
    pub remote: String,
    pub branch: String,
}

impl RemoteBranch {
    pub fn new(remote: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            branch: branch.into(),
        }
    }
}

impl fmt::Display for RemoteBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.remote, self.branch)
    }
}

/// How a pull integrates upstream changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullMode {
    #[default]
    Merge,
    Rebase,
    /// Hard reset to upstream, discarding local changes
    Reset,
}

/// Side effects the update workflow needs from the outside world
#[async_trait]
pub trait BenchBackend: Send + Sync {
    /// Remote to track for an app, `None` when it has no remote
    async fn resolve_remote(&self, app: &Application) -> Result<Option<String>, BenchError>;

    async fn current_branch(&self, app: &Application) -> Result<Option<String>, BenchError>;

    async fn has_local_changes(&self, app: &Application) -> Result<bool, BenchError>;

    /// Shallow fetch of the upstream branch tip
    async fn fetch_upstream(
        &self,
        app: &Application,
        upstream: &RemoteBranch,
    ) -> Result<(), BenchError>;

    /// File contents at the upstream branch; `None` if the ref is unknown
    async fn read_upstream_file(
        &self,
        app: &Application,
        upstream: &RemoteBranch,
        path: &str,
    ) -> Result<Option<String>, BenchError>;

    async fn unshallow(&self, app: &Application, remote: &str) -> Result<(), BenchError>;

    async fn fetch_app(
        &self,
        bench: &Bench,
        name: &str,
        source_url: &str,
        branch: Option<&str>,
    ) -> Result<Application, BenchError>;

    async fn pull_app(
        &self,
        app: &Application,
        upstream: &RemoteBranch,
        mode: PullMode,
    ) -> Result<(), BenchError>;

    async fn install_dependencies(&self, bench: &Bench, app: &Application) -> Result<(), BenchError>;

    async fn build_assets(&self, bench: &Bench, app: Option<&str>) -> Result<(), BenchError>;

    async fn backup_site(&self, bench: &Bench, site: &Site) -> Result<BackupArtifact, BenchError>;

    async fn regenerate_service_config(
        &self,
        bench: &Bench,
        kind: ServiceKind,
    ) -> Result<(), BenchError>;

    async fn restart_services(&self, bench: &Bench, kind: ServiceKind) -> Result<(), BenchError>;

    /// Escape hatch to the framework's own CLI
    async fn run_framework_command(
        &self,
        bench: &Bench,
        args: &[String],
    ) -> Result<CommandOutput, BenchError>;

    fn find_executable(&self, name: &str) -> Option<PathBuf>;
}

/// Backend spawning real processes
#[derive(Debug, Clone)]
pub struct SystemBackend {
    config_generator: String,
}

impl SystemBackend {
    pub fn new() -> Self {
        Self {
            config_generator: DEFAULT_CONFIG_GENERATOR.to_string(),
        }
    }
}

impl Default for SystemBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BenchBackend for SystemBackend {
    async fn resolve_remote(&self, app: &Application) -> Result<Option<String>, BenchError> {
        let remotes = git::remotes(&app.source_location).await?;
        Ok(git::pick_remote(&remotes))
    }

    async fn current_branch(&self, app: &Application) -> Result<Option<String>, BenchError> {
        git::current_branch(&app.source_location).await
    }

    async fn has_local_changes(&self, app: &Application) -> Result<bool, BenchError> {
        git::has_local_changes(&app.source_location).await
    }

    async fn fetch_upstream(
        &self,
        app: &Application,
        upstream: &RemoteBranch,
    ) -> Result<(), BenchError> {
        git::fetch_shallow(&app.source_location, &app.name, upstream).await
    }

    async fn read_upstream_file(
        &self,
        app: &Application,
        upstream: &RemoteBranch,
        path: &str,
    ) -> Result<Option<String>, BenchError> {
        git::show_file(&app.source_location, upstream, path).await
    }

    async fn unshallow(&self, app: &Application, remote: &str) -> Result<(), BenchError> {
        git::unshallow(&app.source_location, remote).await
    }

    async fn fetch_app(
        &self,
        bench: &Bench,
        name: &str,
        source_url: &str,
        branch: Option<&str>,
    ) -> Result<Application, BenchError> {
        let target = bench.layout().app_dir(name);
        if target.exists().await {
            return Err(BenchError::ValidationError(format!(
                "{} already exists at {}",
                name,
                target.path().display()
            )));
        }

        let config = bench.config().await?;
        let shallow = config.shallow_clone() && !config.release_bench();
        info!(app = %name, url = %source_url, ?branch, "Fetching app");
        git::clone(source_url, target.path(), branch, shallow).await?;

        let app = Application::load(name, target.path()).await?;
        framework::install_dependencies(bench, &app).await?;
        bench.add_app(name).await?;
        Ok(app)
    }

    async fn pull_app(
        &self,
        app: &Application,
        upstream: &RemoteBranch,
        mode: PullMode,
    ) -> Result<(), BenchError> {
        git::pull(&app.source_location, &app.name, upstream, mode).await
    }

    async fn install_dependencies(&self, bench: &Bench, app: &Application) -> Result<(), BenchError> {
        framework::install_dependencies(bench, app).await
    }

    async fn build_assets(&self, bench: &Bench, app: Option<&str>) -> Result<(), BenchError> {
        framework::build_assets(bench, app).await
    }

    async fn backup_site(&self, bench: &Bench, site: &Site) -> Result<BackupArtifact, BenchError> {
        framework::backup_site(bench, site).await
    }

    async fn regenerate_service_config(
        &self,
        bench: &Bench,
        kind: ServiceKind,
    ) -> Result<(), BenchError> {
        services::regenerate_config(bench, &self.config_generator, kind).await
    }

    async fn restart_services(&self, bench: &Bench, kind: ServiceKind) -> Result<(), BenchError> {
        services::restart(bench, kind).await
    }

    async fn run_framework_command(
        &self,
        bench: &Bench,
        args: &[String],
    ) -> Result<CommandOutput, BenchError> {
        framework::run_framework_command(bench, args).await
    }

    fn find_executable(&self, name: &str) -> Option<PathBuf> {
        which::which(name).ok()
    }
}
