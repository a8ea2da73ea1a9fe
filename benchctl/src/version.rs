//! Version comparator
//!
//! Decides whether pulling an app's tracked branch crosses a major
//! version boundary. Computed fresh for every workflow run.

use std::path::PathBuf;

use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bench::app::{self, Application, VERSION_FIELD};
use crate::bench::Bench;
use crate::deploy::{BenchBackend, RemoteBranch};
use crate::errors::BenchError;

/// Size of the jump between the local and the upstream version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpgradeClass {
    None,
    Minor,
    Major,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionComparison {
    pub is_major_upgrade: bool,
    pub local_major: u64,
    pub upstream_major: u64,
    pub class: UpgradeClass,
}

impl VersionComparison {
    pub fn between(local: &Version, upstream: &Version) -> Self {
        let class = if upstream.major > local.major {
            UpgradeClass::Major
        } else if upstream.major == local.major && upstream > local {
            UpgradeClass::Minor
        } else {
            UpgradeClass::None
        };

        Self {
            is_major_upgrade: class == UpgradeClass::Major,
            local_major: local.major,
            upstream_major: upstream.major,
            class,
        }
    }

    /// Rebuild a comparison from major numbers handed over between processes
    pub fn from_majors(local_major: u64, upstream_major: u64) -> Self {
        let class = if upstream_major > local_major {
            UpgradeClass::Major
        } else {
            UpgradeClass::None
        };
        Self {
            is_major_upgrade: class == UpgradeClass::Major,
            local_major,
            upstream_major,
            class,
        }
    }

    /// Upstream went back a major version
    pub fn is_downgrade(&self) -> bool {
        self.upstream_major < self.local_major
    }
}

/// Strict semver parse; failure is never "no upgrade"
pub fn parse_version(app: &str, raw: &str) -> Result<Version, BenchError> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(trimmed).map_err(|_| BenchError::MalformedVersion {
        app: app.to_string(),
        value: raw.to_string(),
    })
}

/// Compare an installed app against the tip of its tracked upstream branch
pub async fn compare(
    app_name: &str,
    bench: &Bench,
    backend: &dyn BenchBackend,
) -> Result<VersionComparison, BenchError> {
    let app = bench
        .app(app_name)
        .await?
        .ok_or_else(|| BenchError::NotFound(format!("app {} is not installed", app_name)))?;
    compare_app(&app, backend).await
}

pub async fn compare_app(
    app: &Application,
    backend: &dyn BenchBackend,
) -> Result<VersionComparison, BenchError> {
    let local_raw = app.version.as_deref().ok_or_else(|| BenchError::VersionNotFound {
        app: app.name.clone(),
        path: app.source_location.join(app.metadata_path()),
    })?;
    let local = parse_version(&app.name, local_raw)?;

    let branch = match &app.branch {
        Some(branch) => branch.clone(),
        None => backend
            .current_branch(app)
            .await?
            .ok_or_else(|| BenchError::BranchNotTracked {
                app: app.name.clone(),
                branch: "HEAD".to_string(),
            })?,
    };
    let remote = backend
        .resolve_remote(app)
        .await?
        .ok_or_else(|| BenchError::RemoteUnavailable {
            app: app.name.clone(),
            remote: String::new(),
            reason: "no remote configured".to_string(),
        })?;
    let upstream = RemoteBranch::new(remote, branch);

    debug!(app = %app.name, %upstream, "Fetching upstream metadata");
    backend.fetch_upstream(app, &upstream).await?;

    let metadata_path = app.metadata_path();
    let contents = backend
        .read_upstream_file(app, &upstream, &metadata_path)
        .await?
        .ok_or_else(|| BenchError::BranchNotTracked {
            app: app.name.clone(),
            branch: upstream.branch.clone(),
        })?;

    let not_found = || BenchError::VersionNotFound {
        app: app.name.clone(),
        path: PathBuf::from(format!("{}:{}", upstream, metadata_path)),
    };
    let declared = app::version_from_source(&contents, VERSION_FIELD).ok_or_else(not_found)?;

    // Pre-release branches declare the real version in hooks, same as locally
    let hooks = if parse_version(&app.name, &declared).is_ok() {
        None
    } else {
        backend
            .read_upstream_file(app, &upstream, &app.hooks_path())
            .await?
    };
    let upstream_raw = app::select_version(&contents, hooks.as_deref()).ok_or_else(not_found)?;
    let upstream_version = parse_version(&app.name, &upstream_raw)?;

    let comparison = VersionComparison::between(&local, &upstream_version);
    if comparison.is_downgrade() {
        warn!(
            app = %app.name,
            local = %local,
            upstream = %upstream_version,
            "Upstream is on an older major version than the local checkout"
        );
    } else {
        info!(
            app = %app.name,
            local = %local,
            upstream = %upstream_version,
            class = ?comparison.class,
            "Compared versions"
        );
    }
    Ok(comparison)
}
