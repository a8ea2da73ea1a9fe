//! Patch runner

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::bench::Bench;
use crate::errors::BenchError;
use crate::patches::registry;

/// What a patch did to the bench
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchOutcome {
    /// Changes were made
    Applied,
    /// Nothing to do and never will be; record it anyway
    AppliedWithSkipMarker,
    /// Not applicable yet; leave it unrecorded so the next run re-checks it
    NotApplicable,
}

impl PatchOutcome {
    pub fn is_recorded(&self) -> bool {
        !matches!(self, PatchOutcome::NotApplicable)
    }
}

/// A one-time migration shipped with the tool.
///
/// Identifiers are ledger keys; a released identifier must never be reused
/// for different work.
#[async_trait]
pub trait Patch: Send + Sync {
    fn identifier(&self) -> &str;

    async fn execute(&self, bench: &Bench) -> Result<PatchOutcome, BenchError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatchRunSummary {
    pub applied: Vec<String>,
    pub marked: Vec<String>,
    pub skipped: Vec<String>,
    pub already_recorded: usize,
}

impl PatchRunSummary {
    /// Number of patch actions invoked
    pub fn executed(&self) -> usize {
        self.applied.len() + self.marked.len() + self.skipped.len()
    }

    fn note(&mut self, identifier: &str, outcome: PatchOutcome) {
        let bucket = match outcome {
            PatchOutcome::Applied => &mut self.applied,
            PatchOutcome::AppliedWithSkipMarker => &mut self.marked,
            PatchOutcome::NotApplicable => &mut self.skipped,
        };
        bucket.push(identifier.to_string());
    }
}

/// Recorded state of one patch, for status listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchStatus {
    pub identifier: String,
    pub recorded: bool,
}

/// Runs patches in canonical order against a bench
pub struct PatchRunner {
    patches: Vec<Box<dyn Patch>>,
}

impl PatchRunner {
    pub fn new(patches: Vec<Box<dyn Patch>>) -> Self {
        Self { patches }
    }

    /// The patches shipped with this build
    pub fn shipped() -> Self {
        Self::new(registry::shipped_patches())
    }

    pub fn identifiers(&self) -> Vec<&str> {
        self.patches.iter().map(|p| p.identifier()).collect()
    }

    pub async fn status(&self, bench: &Bench) -> Result<Vec<PatchStatus>, BenchError> {
        let ledger = bench.ledger().await?;
        Ok(self
            .patches
            .iter()
            .map(|p| PatchStatus {
                identifier: p.identifier().to_string(),
                recorded: ledger.contains(p.identifier()),
            })
            .collect())
    }

    /// Execute every unrecorded patch.
    ///
    /// The ledger is persisted after each patch. On a patch error it is
    /// persisted once more before the error is returned.
    pub async fn run(&self, bench: &Bench) -> Result<PatchRunSummary, BenchError> {
        let mut ledger = bench.ledger().await?;
        let mut summary = PatchRunSummary::default();

        for patch in &self.patches {
            let identifier = patch.identifier();
            if ledger.contains(identifier) {
                summary.already_recorded += 1;
                continue;
            }

            debug!(patch = %identifier, "Executing patch");
            let outcome = match patch.execute(bench).await {
                Ok(outcome) => outcome,
                Err(cause) => {
                    error!(patch = %identifier, error = %cause, "Patch failed");
                    if let Err(e) = ledger.persist().await {
                        error!(error = %e, "Failed to persist patch ledger");
                    }
                    return Err(BenchError::PatchExecution {
                        identifier: identifier.to_string(),
                        cause: Box::new(cause),
                    });
                }
            };

            if outcome.is_recorded() {
                ledger.record(identifier);
                ledger.persist().await?;
                info!(patch = %identifier, ?outcome, "Patch recorded");
            } else {
                info!(patch = %identifier, "Patch not applicable yet, will retry on next run");
            }
            summary.note(identifier, outcome);
        }

        Ok(summary)
    }
}
