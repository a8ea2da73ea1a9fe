use async_trait::async_trait;
use tracing::{debug, info};

use crate::bench::{Bench, FRAMEWORK_APP};
use crate::errors::BenchError;
use crate::filesys::dir::Dir;
use crate::patches::runner::{Patch, PatchOutcome};
use crate::version::parse_version;

/// Give every site its own `logs/` directory.
pub struct UpdateSiteLogging;

#[async_trait]
impl Patch for UpdateSiteLogging {
    fn identifier(&self) -> &str {
        "bench.patches.v5.update_site_logging"
    }

    async fn execute(&self, bench: &Bench) -> Result<PatchOutcome, BenchError> {
        for site in bench.sites().await? {
            let logs = site.logs_dir();
            if !logs.exists().await {
                logs.create().await?;
                debug!(site = %site.name, "Created site logs directory");
            }
        }
        Ok(PatchOutcome::Applied)
    }
}

/// Move `archived_sites/` to `archived/sites/`, leaving a symlink behind.
///
/// Only for framework v14 and later on unix; older benches are re-checked
/// on every run until they upgrade.
pub struct UpdateArchivedSites;

const ARCHIVE_MIN_MAJOR: u64 = 14;

#[async_trait]
impl Patch for UpdateArchivedSites {
    fn identifier(&self) -> &str {
        "bench.patches.v5.update_archived_sites"
    }

    async fn execute(&self, bench: &Bench) -> Result<PatchOutcome, BenchError> {
        if !cfg!(unix) {
            return Ok(PatchOutcome::NotApplicable);
        }

        let framework_major = match bench.app(FRAMEWORK_APP).await? {
            Some(app) => match app.version.as_deref() {
                Some(raw) => parse_version(FRAMEWORK_APP, raw)?.major,
                None => return Ok(PatchOutcome::NotApplicable),
            },
            None => return Ok(PatchOutcome::NotApplicable),
        };
        if framework_major < ARCHIVE_MIN_MAJOR {
            return Ok(PatchOutcome::NotApplicable);
        }

        let old_dir = Dir::new(bench.path().join("archived_sites"));
        let new_dir = Dir::new(bench.path().join("archived").join("sites"));

        // A dangling link counts as missing
        if !old_dir.exists().await {
            return Ok(PatchOutcome::NotApplicable);
        }
        if old_dir.is_symlink().await {
            return Ok(PatchOutcome::AppliedWithSkipMarker);
        }

        new_dir.create().await?;
        for entry in old_dir.list().await? {
            if let Some(name) = entry.file_name() {
                tokio::fs::rename(&entry, new_dir.path().join(name)).await?;
            }
        }
        info!(path = %new_dir.path().display(), "Archived sites are now stored here");

        if old_dir.is_empty().await? {
            tokio::fs::remove_dir(old_dir.path()).await?;
        }
        link(new_dir.path(), old_dir.path()).await?;
        info!(link = %old_dir.path().display(), target = %new_dir.path().display(), "Created symlink");

        Ok(PatchOutcome::Applied)
    }
}

#[cfg(unix)]
async fn link(target: &std::path::Path, link: &std::path::Path) -> Result<(), BenchError> {
    tokio::fs::symlink(target, link).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn link(_target: &std::path::Path, _link: &std::path::Path) -> Result<(), BenchError> {
    Err(BenchError::Internal("symlinks are only supported on unix".to_string()))
}
