//! One-time migrations applied against a bench

pub mod ledger;
pub mod registry;
pub mod runner;
pub mod v3;
pub mod v5;

pub use ledger::PatchLedger;
pub use runner::{Patch, PatchOutcome, PatchRunSummary, PatchRunner};
