//! Error types for benchctl

use std::path::PathBuf;

use thiserror::Error;

use crate::update::state::WorkflowState;

/// Main error type for benchctl
#[derive(Error, Debug)]
pub enum BenchError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Not a bench directory: {} (missing {missing})", path.display())]
    NotADeployment { path: PathBuf, missing: String },

    #[error("Release bench detected, cannot update")]
    ReleaseDeployment,

    #[error(
        "Both restart_supervisor_on_update and restart_systemd_on_update are set; \
         enable only one restart policy"
    )]
    ConflictingRestartPolicy,

    #[error(
        "App {app} is checked out on the deprecated branch '{branch}'; \
         switch to a maintained branch before updating"
    )]
    DeprecatedBranch { app: String, branch: String },

    #[error("Failed to fetch from remote '{remote}' for {app}: {reason}")]
    RemoteUnavailable {
        app: String,
        remote: String,
        reason: String,
    },

    #[error("Branch '{branch}' of app {app} is not in the upstream remote")]
    BranchNotTracked { app: String, branch: String },

    #[error("Malformed version '{value}' for app {app}")]
    MalformedVersion { app: String, value: String },

    #[error("No version found for app {app} in {}", path.display())]
    VersionNotFound { app: String, path: PathBuf },

    #[error(
        "App {app} has local changes that are not committed. \
         Commit or stash them, or discard them with `benchctl update --reset`"
    )]
    LocalChanges { app: String },

    #[error("Pulling app {app} could not be applied cleanly; merge it manually")]
    MergeConflict { app: String },

    #[error("Command `{command}` failed with exit code {}: {stderr}", display_code(.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Patch {identifier} failed: {cause}")]
    PatchExecution {
        identifier: String,
        #[source]
        cause: Box<BenchError>,
    },

    #[error(
        "Major version upgrade from {from} to {to} needs confirmation; \
         rerun from a terminal or pass --force"
    )]
    ConfirmationRequired { from: u64, to: u64 },

    #[error("Update declined by operator")]
    ConfirmationDeclined,

    #[error("Another update is running (pid {pid}, lock {})", path.display())]
    LockHeld { pid: u32, path: PathBuf },

    #[error("{context}: {cause}")]
    Context {
        context: String,
        #[source]
        cause: Box<BenchError>,
    },

    #[error("Missing prerequisite: {0}")]
    MissingPrerequisite(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BenchError {
    /// Attach the app, site or step a failure belongs to
    pub fn context(self, context: impl Into<String>) -> Self {
        BenchError::Context {
            context: context.into(),
            cause: Box::new(self),
        }
    }

    /// Innermost error, looking through [`BenchError::Context`]
    pub fn root_cause(&self) -> &BenchError {
        match self {
            BenchError::Context { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

impl From<anyhow::Error> for BenchError {
    fn from(err: anyhow::Error) -> Self {
        BenchError::Internal(err.to_string())
    }
}

fn display_code(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none (terminated by signal)".to_string())
}

/// Terminal failure of an update workflow.
///
/// Carries the state at which the workflow stopped and whether the
/// maintenance flag was left engaged for the operator to clear.
#[derive(Error, Debug)]
#[error("Update aborted at {at}: {cause}{}", maintenance_hint(.maintenance_left_on))]
pub struct UpdateAborted {
    pub at: WorkflowState,
    pub maintenance_left_on: bool,
    #[source]
    pub cause: BenchError,
}

impl UpdateAborted {
    pub fn new(at: WorkflowState, maintenance_left_on: bool, cause: BenchError) -> Self {
        Self {
            at,
            maintenance_left_on,
            cause,
        }
    }

    /// The operator answered "no" at the confirmation prompt.
    pub fn is_declined(&self) -> bool {
        matches!(self.cause.root_cause(), BenchError::ConfirmationDeclined)
    }
}

fn maintenance_hint(left_on: &bool) -> &'static str {
    if *left_on {
        "\nMaintenance mode remains ON. Fix the problem, then rerun the update \
         or clear it manually with `benchctl maintenance off`."
    } else {
        ""
    }
}
