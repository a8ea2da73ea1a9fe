//! Process supervisor, systemd and reverse proxy

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::bench::Bench;
use crate::deploy::process::ProcessCommand;
use crate::errors::BenchError;

/// Services whose config is generated from bench state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// Cache and queue servers, run under the supervisor
    Redis,
    Supervisor,
    Systemd,
    Proxy,
}

impl ServiceKind {
    /// Name of the `setup` subcommand that renders this config
    pub fn setup_target(&self) -> &'static str {
        match self {
            ServiceKind::Redis => "redis",
            ServiceKind::Supervisor => "supervisor",
            ServiceKind::Systemd => "systemd",
            ServiceKind::Proxy => "nginx",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.setup_target())
    }
}

/// Re-render service config with the bench's config generator
pub async fn regenerate_config(
    bench: &Bench,
    generator: &str,
    kind: ServiceKind,
) -> Result<(), BenchError> {
    ProcessCommand::new(generator)
        .args(["setup", kind.setup_target(), "--yes"])
        .current_dir(bench.path())
        .run_attached()
        .await
}

pub async fn restart(bench: &Bench, kind: ServiceKind) -> Result<(), BenchError> {
    match kind {
        // Picked up when the supervisor restarts its groups
        ServiceKind::Redis => Ok(()),
        ServiceKind::Supervisor => restart_supervisor(bench).await,
        ServiceKind::Systemd => restart_systemd(bench).await,
        ServiceKind::Proxy => reload_proxy().await,
    }
}

async fn restart_supervisor(bench: &Bench) -> Result<(), BenchError> {
    let config = bench.config().await?;
    if let Some(cmd) = config.supervisor_restart_cmd() {
        return ProcessCommand::shell(cmd)
            .current_dir(bench.path())
            .run_attached()
            .await;
    }

    let (sudo, status) = supervisor_status(bench).await?;
    for group in supervisor_groups(&bench.name(), &status) {
        let cmd = if sudo {
            ProcessCommand::new("sudo").args(["supervisorctl", "restart", group.as_str()])
        } else {
            ProcessCommand::new("supervisorctl").args(["restart", group.as_str()])
        };
        cmd.current_dir(bench.path()).run_attached().await?;
    }
    Ok(())
}

/// `supervisorctl status`, retried under sudo when the socket is not ours
async fn supervisor_status(bench: &Bench) -> Result<(bool, String), BenchError> {
    let output = ProcessCommand::new("supervisorctl")
        .arg("status")
        .current_dir(bench.path())
        .output()
        .await
        .map_err(|e| {
            BenchError::MissingPrerequisite(format!("supervisorctl not found in PATH ({})", e))
        })?;

    let denied = output.stdout.contains("Permission denied") || output.stderr.contains("Permission denied");
    // supervisorctl exits 3 when some programs are stopped; that is still a usable status
    if !denied && matches!(output.code, Some(0) | Some(3)) {
        return Ok((false, output.stdout));
    }

    warn!("supervisorctl status failed, retrying with sudo");
    let output = ProcessCommand::new("sudo")
        .args(["supervisorctl", "status"])
        .current_dir(bench.path())
        .output()
        .await?;
    if matches!(output.code, Some(0) | Some(3)) {
        Ok((true, output.stdout))
    } else {
        output.into_result("sudo supervisorctl status").map(|o| (true, o.stdout))
    }
}

/// Process groups to restart for this bench, newest naming first
pub fn supervisor_groups(bench_name: &str, status: &str) -> Vec<String> {
    let web = format!("{}-web:", bench_name);
    let workers = format!("{}-workers:", bench_name);
    let processes = format!("{}-processes:", bench_name);

    if status.contains(&workers) {
        vec![web, workers]
    } else if status.contains(&processes) {
        vec![processes]
    } else {
        vec!["frappe:".to_string()]
    }
}

async fn restart_systemd(bench: &Bench) -> Result<(), BenchError> {
    let target = format!("{}.target", bench.name());
    info!(%target, "Restarting systemd units");
    ProcessCommand::new("sudo")
        .args(["systemctl", "restart", target.as_str()])
        .run_attached()
        .await
}

async fn reload_proxy() -> Result<(), BenchError> {
    ProcessCommand::new("sudo")
        .args(["nginx", "-t"])
        .run()
        .await?;
    ProcessCommand::new("sudo")
        .args(["systemctl", "reload", "nginx"])
        .run_attached()
        .await
}
