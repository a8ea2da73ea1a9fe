//! Operator confirmation

use std::io::IsTerminal;

use crate::errors::BenchError;

/// Source of yes/no answers for blocking prompts
pub trait Confirm: Send + Sync {
    /// Whether someone can answer a prompt
    fn is_interactive(&self) -> bool;

    fn confirm(&self, prompt: &str) -> Result<bool, BenchError>;
}

/// Prompt on the controlling terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn is_interactive(&self) -> bool {
        std::io::stdin().is_terminal() && std::io::stderr().is_terminal()
    }

    fn confirm(&self, prompt: &str) -> Result<bool, BenchError> {
        dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .map_err(|e| BenchError::Internal(format!("confirmation prompt failed: {}", e)))
    }
}

/// Never interactive; every prompt must be bypassed with a flag
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrompt;

impl Confirm for NoPrompt {
    fn is_interactive(&self) -> bool {
        false
    }

    fn confirm(&self, _prompt: &str) -> Result<bool, BenchError> {
        Ok(false)
    }
}
