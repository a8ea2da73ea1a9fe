//! Child process execution

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::BenchError;

/// Exit code and captured output of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into [`BenchError::CommandFailed`]
    pub fn into_result(self, command: impl Into<String>) -> Result<Self, BenchError> {
        if self.success() {
            Ok(self)
        } else {
            Err(BenchError::CommandFailed {
                command: command.into(),
                code: self.code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// External command builder
#[derive(Debug, Clone)]
pub struct ProcessCommand {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
}

impl ProcessCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    /// `sh -c <script>`, for operator-supplied command lines
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }

    fn spawn_error(&self, err: std::io::Error) -> BenchError {
        BenchError::CommandFailed {
            command: self.to_string(),
            code: None,
            stderr: format!("failed to start {}: {}", self.program, err),
        }
    }

    /// Run to completion capturing output, whatever the exit code
    pub async fn output(&self) -> Result<CommandOutput, BenchError> {
        debug!(cwd = ?self.cwd, "$ {}", self);
        let output = self
            .command()
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run capturing output; a non-zero exit is an error
    pub async fn run(&self) -> Result<CommandOutput, BenchError> {
        let output = self.output().await?;
        output.into_result(self.to_string())
    }

    /// Run with the operator's terminal attached; a non-zero exit is an error
    pub async fn run_attached(&self) -> Result<(), BenchError> {
        info!("$ {}", self);
        let status = self
            .command()
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if status.success() {
            Ok(())
        } else {
            Err(BenchError::CommandFailed {
                command: self.to_string(),
                code: status.code(),
                stderr: String::new(),
            })
        }
    }
}

impl fmt::Display for ProcessCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}
