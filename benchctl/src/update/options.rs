use serde::{Deserialize, Serialize};

use crate::update::state::WorkflowState;
use crate::version::VersionComparison;

/// Which slice of the workflow one process runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePhase {
    /// Everything, in one process
    #[default]
    All,
    /// Validation through dependency install
    Prepare,
    /// Patches through maintenance off, with freshly pulled code loaded
    Finish,
}

impl UpdatePhase {
    /// The steps this phase executes, as target states
    pub fn steps(&self) -> Vec<WorkflowState> {
        match self {
            UpdatePhase::All => {
                WorkflowState::range(WorkflowState::Validated, WorkflowState::Done)
            }
            UpdatePhase::Prepare => WorkflowState::range(
                WorkflowState::Validated,
                WorkflowState::DependenciesInstalled,
            ),
            UpdatePhase::Finish => {
                WorkflowState::range(WorkflowState::Patched, WorkflowState::Done)
            }
        }
    }

    /// Committed state the phase starts from
    pub fn start_state(&self) -> WorkflowState {
        match self {
            UpdatePhase::All | UpdatePhase::Prepare => WorkflowState::Idle,
            UpdatePhase::Finish => WorkflowState::DependenciesInstalled,
        }
    }
}

/// Options for one update run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOptions {
    pub pull: bool,
    pub patch: bool,
    pub build: bool,
    pub requirements: bool,
    /// Restrict pulling to these apps; empty means all
    pub apps: Vec<String>,
    pub backup: bool,
    /// Skip the major-upgrade confirmation and run post-upgrade hooks
    pub force: bool,
    /// Hard reset sources to upstream instead of merging
    pub reset: bool,
    pub restart_supervisor: bool,
    pub restart_systemd: bool,
    pub phase: UpdatePhase,
    /// Comparison computed by the prepare phase of a split run
    pub known_comparison: Option<VersionComparison>,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            pull: false,
            patch: false,
            build: false,
            requirements: false,
            apps: Vec::new(),
            backup: true,
            force: false,
            reset: false,
            restart_supervisor: false,
            restart_systemd: false,
            phase: UpdatePhase::All,
            known_comparison: None,
        }
    }
}

impl UpdateOptions {
    /// Enable all four phases when none was selected
    pub fn normalized(mut self) -> Self {
        if !(self.pull || self.patch || self.build || self.requirements) {
            self.pull = true;
            self.patch = true;
            self.build = true;
            self.requirements = true;
        }
        if !self.pull {
            self.apps.clear();
        }
        self
    }
}

/// Parse `--apps a,b c` into names
pub fn parse_app_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
