//! Finite state machine for one update run

use std::fmt;

use serde::{Deserialize, Serialize};

/// Workflow state, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WorkflowState {
    Idle,
    Validated,
    MaintenanceOn,
    BackedUp,
    SourcesUpdated,
    DependenciesInstalled,
    Patched,
    AssetsBuilt,
    PostUpgradeDone,
    ServicesRestarted,
    MaintenanceOff,
    Done,
}

impl WorkflowState {
    pub const ALL: [WorkflowState; 12] = [
        WorkflowState::Idle,
        WorkflowState::Validated,
        WorkflowState::MaintenanceOn,
        WorkflowState::BackedUp,
        WorkflowState::SourcesUpdated,
        WorkflowState::DependenciesInstalled,
        WorkflowState::Patched,
        WorkflowState::AssetsBuilt,
        WorkflowState::PostUpgradeDone,
        WorkflowState::ServicesRestarted,
        WorkflowState::MaintenanceOff,
        WorkflowState::Done,
    ];

    /// The only state reachable from this one on success
    pub fn next(&self) -> Option<WorkflowState> {
        let index = Self::ALL.iter().position(|s| s == self)?;
        Self::ALL.get(index + 1).copied()
    }

    /// Whether maintenance mode is engaged once this state is committed
    pub fn holds_maintenance(&self) -> bool {
        *self >= WorkflowState::MaintenanceOn && *self < WorkflowState::MaintenanceOff
    }

    /// States from `from` to `to`, both inclusive
    pub fn range(from: WorkflowState, to: WorkflowState) -> Vec<WorkflowState> {
        Self::ALL
            .iter()
            .copied()
            .filter(|s| *s >= from && *s <= to)
            .collect()
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Workflow event
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// The step leading to this state finished
    Completed(WorkflowState),

    /// The step leading to this state failed
    Failed {
        step: WorkflowState,
        error: String,
    },
}

/// Update FSM
#[derive(Debug, Clone)]
pub struct UpdateFsm {
    state: WorkflowState,
    history: Vec<WorkflowState>,
    aborted: Option<(WorkflowState, String)>,
}

impl UpdateFsm {
    /// Create a new FSM in idle state
    pub fn new() -> Self {
        Self::resume_from(WorkflowState::Idle)
    }

    /// Start from a state committed by an earlier process
    pub fn resume_from(state: WorkflowState) -> Self {
        Self {
            state,
            history: vec![state],
            aborted: None,
        }
    }

    /// Last committed state
    pub fn state(&self) -> WorkflowState {
        self.state
    }

    /// Committed states, oldest first
    pub fn history(&self) -> &[WorkflowState] {
        &self.history
    }

    /// Step that failed and its error, once aborted
    pub fn aborted(&self) -> Option<(WorkflowState, &str)> {
        self.aborted.as_ref().map(|(step, error)| (*step, error.as_str()))
    }

    pub fn is_done(&self) -> bool {
        self.state == WorkflowState::Done
    }

    /// Whether the flag is still on at the last committed state
    pub fn maintenance_engaged(&self) -> bool {
        self.state.holds_maintenance()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: WorkflowEvent) -> Result<(), String> {
        if let Some((step, _)) = &self.aborted {
            return Err(format!("Workflow already aborted during {}", step));
        }

        match event {
            WorkflowEvent::Completed(to) if self.state.next() == Some(to) => {
                self.state = to;
                self.history.push(to);
                Ok(())
            }
            WorkflowEvent::Completed(to) => Err(format!(
                "Invalid transition from {} to {}",
                self.state, to
            )),
            WorkflowEvent::Failed { step, error } if !self.is_done() => {
                self.aborted = Some((step, error));
                Ok(())
            }
            WorkflowEvent::Failed { .. } => Err("Workflow already done".to_string()),
        }
    }
}

impl Default for UpdateFsm {
    fn default() -> Self {
        Self::new()
    }
}
