//! Framework CLI, dependency install, backups and asset builds

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::bench::{Application, Bench, Site};
use crate::deploy::process::{CommandOutput, ProcessCommand};
use crate::errors::BenchError;

/// Result of one site backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupArtifact {
    pub site: String,
    pub created_at: DateTime<Utc>,
    /// Database dump reported by the framework, when it printed one
    pub database: Option<PathBuf>,
}

/// `python -m frappe.utils.bench_helper frappe <args>` run from `sites/`
pub fn framework_command<I, S>(bench: &Bench, args: I) -> ProcessCommand
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    ProcessCommand::new(bench.layout().env_python().to_string_lossy())
        .args(["-m", "frappe.utils.bench_helper", "frappe"])
        .args(args)
        .current_dir(bench.layout().sites_dir().path())
}

pub async fn run_framework_command(
    bench: &Bench,
    args: &[String],
) -> Result<CommandOutput, BenchError> {
    framework_command(bench, args.iter().cloned()).output().await
}

pub async fn backup_site(bench: &Bench, site: &Site) -> Result<BackupArtifact, BenchError> {
    let output = framework_command(bench, ["--site", site.name.as_str(), "backup"])
        .run()
        .await?;

    Ok(BackupArtifact {
        site: site.name.clone(),
        created_at: Utc::now(),
        database: parse_database_path(&output.stdout),
    })
}

fn parse_database_path(stdout: &str) -> Option<PathBuf> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("Database"))
        .and_then(|line| line.split_whitespace().find(|token| token.contains('/')))
        .map(PathBuf::from)
}

/// Editable install into the bench virtualenv, then node packages
pub async fn install_dependencies(bench: &Bench, app: &Application) -> Result<(), BenchError> {
    ProcessCommand::new(bench.layout().env_python().to_string_lossy())
        .args(["-m", "pip", "install", "--quiet", "--upgrade", "-e"])
        .arg(app.source_location.to_string_lossy())
        .current_dir(bench.path())
        .run_attached()
        .await?;

    if app.has_package_json().await {
        ProcessCommand::new("yarn")
            .arg("install")
            .current_dir(&app.source_location)
            .run_attached()
            .await?;
    }
    Ok(())
}

pub async fn build_assets(bench: &Bench, app: Option<&str>) -> Result<(), BenchError> {
    let mut args = vec!["build".to_string()];
    if let Some(app) = app {
        args.push("--app".to_string());
        args.push(app.to_string());
    }
    framework_command(bench, args).run_attached().await
}
