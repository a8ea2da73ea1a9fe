//! Directory operations

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::BenchError;
use crate::filesys::file::File;

/// A directory wrapper with path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Check whether the path itself is a symlink
    pub async fn is_symlink(&self) -> bool {
        fs::symlink_metadata(&self.path)
            .await
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), BenchError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// List entry paths, sorted by name
    pub async fn list(&self) -> Result<Vec<PathBuf>, BenchError> {
        let mut paths = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            paths.push(entry.path());
        }

        paths.sort();
        Ok(paths)
    }

    /// List subdirectory names, sorted
    pub async fn list_dir_names(&self) -> Result<Vec<String>, BenchError> {
        let mut names = Vec::new();
        for path in self.list().await? {
            if fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false) {
                if let Some(name) = path.file_name() {
                    names.push(name.to_string_lossy().into_owned());
                }
            }
        }
        Ok(names)
    }

    /// Check whether the directory has no entries
    pub async fn is_empty(&self) -> Result<bool, BenchError> {
        let mut entries = fs::read_dir(&self.path).await?;
        Ok(entries.next_entry().await?.is_none())
    }

    /// Get a file within this directory
    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    /// Get a subdirectory
    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }
}
