use std::path::PathBuf;

use serde::Serialize;

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// One tenant of a bench
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Site {
    pub name: String,
    pub path: PathBuf,
}

impl Site {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    pub fn dir(&self) -> Dir {
        Dir::new(&self.path)
    }

    pub fn config_file(&self) -> File {
        self.dir().file("site_config.json")
    }

    pub fn logs_dir(&self) -> Dir {
        self.dir().subdir("logs")
    }
}
