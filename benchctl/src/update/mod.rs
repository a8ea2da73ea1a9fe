//! Update workflow

pub mod confirm;
pub mod lock;
pub mod options;
pub mod orchestrator;
pub mod state;

pub use confirm::{Confirm, NoPrompt, TerminalConfirm};
pub use options::{UpdateOptions, UpdatePhase};
pub use orchestrator::{UpdateOrchestrator, UpdateReport};
pub use state::WorkflowState;
