//! On-disk layout of a bench

use std::path::{Path, PathBuf};

use crate::errors::BenchError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Directories every bench must have, relative to its root
pub const REQUIRED_DIRS: [&str; 5] = ["apps", "sites", "config", "logs", "config/pids"];

/// Storage layout for a bench
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchLayout {
    /// Root directory of the bench
    pub base_dir: PathBuf,
}

impl BenchLayout {
    /// Create a new bench layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get the apps directory
    pub fn apps_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("apps"))
    }

    /// Get the source directory of one app
    pub fn app_dir(&self, name: &str) -> Dir {
        self.apps_dir().subdir(name)
    }

    /// Get the sites directory
    pub fn sites_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("sites"))
    }

    /// Get the config directory
    pub fn config_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("config"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Get the pids directory
    pub fn pids_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("config").join("pids"))
    }

    /// Deployment-wide key-value config
    pub fn common_config_file(&self) -> File {
        self.config_dir().file("common_config.json")
    }

    /// Pre-v4 bench config, merged away by a patch
    pub fn legacy_config_file(&self) -> File {
        File::new(self.base_dir.join("config.json"))
    }

    /// Ledger of executed patches
    pub fn patch_ledger_file(&self) -> File {
        File::new(self.base_dir.join("patches.txt"))
    }

    /// Installed apps, in install order
    pub fn apps_txt(&self) -> File {
        self.sites_dir().file("apps.txt")
    }

    /// Apps that are never pulled
    pub fn excluded_apps_txt(&self) -> File {
        self.sites_dir().file("excluded_apps.txt")
    }

    /// Advisory lock held while an update runs
    pub fn update_lock_file(&self) -> File {
        self.pids_dir().file("update.lock")
    }

    /// Python interpreter of the bench virtualenv
    pub fn env_python(&self) -> PathBuf {
        self.base_dir.join("env").join("bin").join("python")
    }

    /// Return the first required directory that is absent
    pub async fn missing_dir(&self) -> Option<&'static str> {
        for dir in REQUIRED_DIRS {
            if !Dir::new(self.base_dir.join(dir)).exists().await {
                return Some(dir);
            }
        }
        None
    }

    /// Setup the bench skeleton (create directories)
    pub async fn setup(&self) -> Result<(), BenchError> {
        for dir in REQUIRED_DIRS {
            Dir::new(self.base_dir.join(dir)).create().await?;
        }
        Ok(())
    }
}
