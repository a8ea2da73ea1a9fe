//! Ledger of executed patches (`<bench>/patches.txt`)

use tracing::debug;

use crate::errors::BenchError;
use crate::filesys::file::File;

/// In-memory copy of the ledger file.
///
/// Lines are kept verbatim so entries written by older tools, including
/// trailing annotations, survive a rewrite.
#[derive(Debug, Clone)]
pub struct PatchLedger {
    file: File,
    lines: Vec<String>,
}

impl PatchLedger {
    pub async fn load(file: File) -> Result<Self, BenchError> {
        let lines = file.read_lines().await?;
        debug!(path = %file.path().display(), entries = lines.len(), "Loaded patch ledger");
        Ok(Self { file, lines })
    }

    /// Recorded patch identifiers, in ledger order
    pub fn identifiers(&self) -> Vec<&str> {
        self.lines.iter().filter_map(|line| entry_identifier(line)).collect()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.lines
            .iter()
            .filter_map(|line| entry_identifier(line))
            .any(|id| id == identifier)
    }

    /// Append an identifier unless already present
    pub fn record(&mut self, identifier: &str) -> bool {
        if self.contains(identifier) {
            return false;
        }
        self.lines.push(identifier.to_string());
        true
    }

    /// Rewrite the whole file, one entry per line with a trailing newline
    pub async fn persist(&self) -> Result<(), BenchError> {
        self.file.write_lines(&self.lines).await
    }
}

/// First token of a non-comment ledger line
fn entry_identifier(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.starts_with('#') {
        return None;
    }
    line.split_whitespace().next()
}
