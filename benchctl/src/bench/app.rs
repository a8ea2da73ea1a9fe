//! Installed applications and their metadata

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::errors::BenchError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// The framework app every bench runs on
pub const FRAMEWORK_APP: &str = "frappe";

/// Apps whose version jumps gate the update workflow, in priority order
pub const PRIMARY_APPS: [&str; 2] = [FRAMEWORK_APP, "erpnext"];

/// Legacy default branch of the primary apps, removed upstream
pub const DEPRECATED_BRANCHES: [&str; 1] = ["master"];

pub const VERSION_FIELD: &str = "__version__";
pub const STAGING_VERSION_FIELD: &str = "staging_version";
pub const DEVELOP_VERSION_FIELD: &str = "develop_version";

/// One installed app
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Application {
    pub name: String,
    /// Raw version string from the app metadata, if any
    pub version: Option<String>,
    pub source_location: PathBuf,
    /// Checked-out branch, `None` on a detached HEAD
    pub branch: Option<String>,
}

impl Application {
    /// Read an app from its source directory
    pub async fn load(name: &str, source_location: &Path) -> Result<Self, BenchError> {
        let version = match read_local_version(name, source_location).await {
            Ok(version) => Some(version),
            Err(BenchError::VersionNotFound { path, .. }) => {
                debug!(app = %name, path = %path.display(), "No version metadata");
                None
            }
            Err(e) => return Err(e),
        };
        let branch = read_head_branch(source_location).await?;

        Ok(Self {
            name: name.to_string(),
            version,
            source_location: source_location.to_path_buf(),
            branch,
        })
    }

    pub fn is_framework(&self) -> bool {
        self.name == FRAMEWORK_APP
    }

    pub fn is_primary(&self) -> bool {
        PRIMARY_APPS.contains(&self.name.as_str())
    }

    /// Path of the metadata file in the source tree, relative to the repo root
    pub fn metadata_path(&self) -> String {
        format!("{}/__init__.py", self.name)
    }

    /// Path of the hooks module relative to the repository root
    pub fn hooks_path(&self) -> String {
        format!("{}/hooks.py", self.name)
    }

    fn git_path(&self) -> PathBuf {
        self.source_location.join(".git")
    }

    /// Whether the app is under source control
    pub async fn has_git_dir(&self) -> bool {
        tokio::fs::metadata(self.git_path()).await.is_ok()
    }

    /// Whether the repository was cloned with truncated history
    pub async fn is_shallow(&self) -> bool {
        File::new(self.git_path().join("shallow")).exists().await
    }

    pub async fn has_package_json(&self) -> bool {
        File::new(self.source_location.join("package.json"))
            .exists()
            .await
    }
}

/// Extract `field = 'value'` from python source
pub fn version_from_source(contents: &str, field: &str) -> Option<String> {
    let pattern = format!(r#"(?m)^\s*{}\s*=\s*['"](.+?)['"]"#, regex::escape(field));
    let re = Regex::new(&pattern).ok()?;
    re.captures(contents)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Pick the version an app reports.
///
/// Pre-release branches carry a non-semver `__version__` and declare the
/// real one in hooks as `staging_version` or `develop_version`.
pub fn select_version(init_source: &str, hooks_source: Option<&str>) -> Option<String> {
    let version = version_from_source(init_source, VERSION_FIELD)?;
    if semver::Version::parse(&version).is_ok() {
        return Some(version);
    }

    hooks_source
        .and_then(|hooks| {
            version_from_source(hooks, STAGING_VERSION_FIELD)
                .or_else(|| version_from_source(hooks, DEVELOP_VERSION_FIELD))
        })
        .or(Some(version))
}

async fn read_local_version(name: &str, source_location: &Path) -> Result<String, BenchError> {
    let module = Dir::new(source_location).subdir(name);
    let init = module.file("__init__.py");

    let not_found = || BenchError::VersionNotFound {
        app: name.to_string(),
        path: init.path().to_path_buf(),
    };

    let init_source = init.read_optional().await?.ok_or_else(not_found)?;
    let hooks_source = module.file("hooks.py").read_optional().await?;

    select_version(&init_source, hooks_source.as_deref()).ok_or_else(not_found)
}

/// Read the branch `HEAD` points at without spawning git.
async fn read_head_branch(source_location: &Path) -> Result<Option<String>, BenchError> {
    let dot_git = source_location.join(".git");
    let git_dir = match tokio::fs::metadata(&dot_git).await {
        Err(_) => return Ok(None),
        Ok(meta) if meta.is_dir() => dot_git,
        Ok(_) => {
            // Worktrees and submodules: ".git" is a file holding "gitdir: <path>"
            let contents = File::new(&dot_git).read_string().await?;
            match contents.trim().strip_prefix("gitdir:") {
                Some(path) => source_location.join(path.trim()),
                None => return Ok(None),
            }
        }
    };

    let head = File::new(git_dir.join("HEAD")).read_optional().await?;
    Ok(head.and_then(|head| {
        head.trim()
            .strip_prefix("ref: refs/heads/")
            .map(str::to_string)
    }))
}
