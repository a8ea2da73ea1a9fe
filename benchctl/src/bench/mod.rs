//! Deployment descriptor
//!
//! Read accessors for the apps, sites and config of one bench, and the
//! read-modify-write entry point for its config.

pub mod app;
pub mod config;
pub mod layout;
pub mod site;

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{info, warn};

pub use app::{Application, FRAMEWORK_APP, PRIMARY_APPS};
pub use config::{BenchConfig, ConfigStore};
pub use layout::BenchLayout;
pub use site::Site;

use crate::errors::BenchError;
use crate::patches::ledger::PatchLedger;

/// A bench directory that passed the skeleton check
#[derive(Debug, Clone)]
pub struct Bench {
    layout: BenchLayout,
    config: ConfigStore,
}

impl Bench {
    /// Open an existing bench, failing when the skeleton is incomplete
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, BenchError> {
        let layout = BenchLayout::new(path);
        if let Some(missing) = layout.missing_dir().await {
            return Err(BenchError::NotADeployment {
                path: layout.base_dir.clone(),
                missing: missing.to_string(),
            });
        }

        let config = ConfigStore::new(layout.common_config_file());
        Ok(Self { layout, config })
    }

    pub fn layout(&self) -> &BenchLayout {
        &self.layout
    }

    pub fn path(&self) -> &Path {
        self.layout.base_dir()
    }

    /// Directory name of the bench, used to name its process groups
    pub fn name(&self) -> String {
        self.path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "frappe-bench".to_string())
    }

    /// App names in install order, duplicates collapsed
    pub async fn app_names(&self) -> Result<Vec<String>, BenchError> {
        let mut names: Vec<String> = Vec::new();
        for name in self.layout.apps_txt().read_lines().await? {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Installed apps in install order
    pub async fn apps(&self) -> Result<Vec<Application>, BenchError> {
        let mut apps = Vec::new();
        for name in self.app_names().await? {
            let dir = self.layout.app_dir(&name);
            if !dir.exists().await {
                warn!(app = %name, path = %dir.path().display(), "App listed in apps.txt has no source directory");
                continue;
            }
            apps.push(Application::load(&name, dir.path()).await?);
        }
        Ok(apps)
    }

    pub async fn app(&self, name: &str) -> Result<Option<Application>, BenchError> {
        if !self.app_names().await?.iter().any(|n| n == name) {
            return Ok(None);
        }
        let dir = self.layout.app_dir(name);
        if !dir.exists().await {
            return Ok(None);
        }
        Application::load(name, dir.path()).await.map(Some)
    }

    /// Register a freshly fetched app
    pub async fn add_app(&self, name: &str) -> Result<(), BenchError> {
        let mut names = self.app_names().await?;
        if names.iter().any(|n| n == name) {
            return Ok(());
        }
        names.push(name.to_string());
        self.layout.apps_txt().write_lines(&names).await?;
        info!(app = %name, "App added to apps.txt");
        Ok(())
    }

    pub async fn excluded_apps(&self) -> Result<Vec<String>, BenchError> {
        self.layout.excluded_apps_txt().read_lines().await
    }

    /// Stop pulling an app on update
    pub async fn exclude_app(&self, name: &str) -> Result<(), BenchError> {
        if name == FRAMEWORK_APP {
            return Err(BenchError::ValidationError(format!(
                "{} cannot be excluded from updates",
                FRAMEWORK_APP
            )));
        }

        let mut excluded = self.excluded_apps().await?;
        if excluded.iter().any(|n| n == name) {
            return Ok(());
        }
        excluded.push(name.to_string());
        self.layout.excluded_apps_txt().write_lines(&excluded).await?;
        info!(app = %name, "App excluded from updates");
        Ok(())
    }

    /// Every site directory holding a `site_config.json`, by name
    pub async fn sites(&self) -> Result<Vec<Site>, BenchError> {
        let sites_dir = self.layout.sites_dir();
        let mut sites = Vec::new();
        for name in sites_dir.list_dir_names().await? {
            let site = Site::new(&name, sites_dir.subdir(&name).path());
            if site.config_file().exists().await {
                sites.push(site);
            }
        }
        Ok(sites)
    }

    pub async fn config(&self) -> Result<BenchConfig, BenchError> {
        self.config.load().await
    }

    /// Merge `updates` into the persisted config
    pub async fn update_config(&self, updates: Map<String, Value>) -> Result<BenchConfig, BenchError> {
        self.config.update(updates).await
    }

    /// Set or clear `maintenance_mode` and `pause_scheduler` together
    pub async fn set_maintenance(&self, on: bool) -> Result<BenchConfig, BenchError> {
        let config = self.update_config(config::maintenance_updates(on)).await?;
        info!(maintenance_mode = on, "Maintenance mode {}", if on { "enabled" } else { "disabled" });
        Ok(config)
    }

    /// Load the patch ledger
    pub async fn ledger(&self) -> Result<PatchLedger, BenchError> {
        PatchLedger::load(self.layout.patch_ledger_file()).await
    }
}
