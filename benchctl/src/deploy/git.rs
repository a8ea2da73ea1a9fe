//! Git operations on app repositories

use std::path::Path;

use tracing::{debug, info, warn};

use crate::deploy::process::ProcessCommand;
use crate::deploy::{PullMode, RemoteBranch};
use crate::errors::BenchError;

/// Preferred remote name for upstream tracking
pub const UPSTREAM_REMOTE: &str = "upstream";

fn git(repo: &Path) -> ProcessCommand {
    ProcessCommand::new("git").current_dir(repo)
}

/// Configured remote names, in `git remote` order
pub async fn remotes(repo: &Path) -> Result<Vec<String>, BenchError> {
    let output = git(repo).arg("remote").run().await?;
    Ok(output
        .stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// `upstream` if present, else the first remote
pub fn pick_remote(remotes: &[String]) -> Option<String> {
    remotes
        .iter()
        .find(|r| r.as_str() == UPSTREAM_REMOTE)
        .or_else(|| remotes.first())
        .cloned()
}

/// Checked-out branch, `None` on a detached HEAD
pub async fn current_branch(repo: &Path) -> Result<Option<String>, BenchError> {
    let output = git(repo)
        .args(["symbolic-ref", "-q", "--short", "HEAD"])
        .output()
        .await?;
    if !output.success() {
        return Ok(None);
    }
    let branch = output.stdout.trim();
    Ok((!branch.is_empty()).then(|| branch.to_string()))
}

/// Whether the working tree has uncommitted changes
pub async fn has_local_changes(repo: &Path) -> Result<bool, BenchError> {
    let output = git(repo).args(["status", "--porcelain"]).run().await?;
    Ok(!output.stdout.trim().is_empty())
}

/// Fetch the tip of one branch without history or tags
pub async fn fetch_shallow(
    repo: &Path,
    app: &str,
    upstream: &RemoteBranch,
) -> Result<(), BenchError> {
    let output = git(repo)
        .args(["fetch", "--depth=1", "--no-tags"])
        .arg(&upstream.remote)
        .arg(&upstream.branch)
        .output()
        .await?;

    if !output.success() {
        return Err(BenchError::RemoteUnavailable {
            app: app.to_string(),
            remote: upstream.remote.clone(),
            reason: output.stderr.trim().to_string(),
        });
    }
    Ok(())
}

/// Contents of `path` at `<remote>/<branch>`.
///
/// `None` when git does not know the ref ("invalid object").
pub async fn show_file(
    repo: &Path,
    upstream: &RemoteBranch,
    path: &str,
) -> Result<Option<String>, BenchError> {
    let spec = format!("{}:{}", upstream, path);
    let cmd = git(repo).arg("show").arg(&spec);
    let output = cmd.output().await?;

    if output.success() {
        return Ok(Some(output.stdout));
    }
    if is_invalid_object(&output.stderr) || is_invalid_object(&output.stdout) {
        debug!(%spec, "Upstream ref not found");
        return Ok(None);
    }
    output.into_result(cmd.to_string()).map(|_| None)
}

fn is_invalid_object(message: &str) -> bool {
    message.to_lowercase().contains("invalid object")
}

/// Fetch the full history of a shallow clone
pub async fn unshallow(repo: &Path, remote: &str) -> Result<(), BenchError> {
    info!(repo = %repo.display(), "Unshallowing repository");
    git(repo)
        .args(["fetch", "--unshallow"])
        .arg(remote)
        .run_attached()
        .await
}

/// Bring the checkout up to date with `upstream`
pub async fn pull(
    repo: &Path,
    app: &str,
    upstream: &RemoteBranch,
    mode: PullMode,
) -> Result<(), BenchError> {
    match mode {
        PullMode::Reset => {
            git(repo).args(["fetch", "--all"]).run_attached().await?;
            git(repo)
                .args(["reset", "--hard"])
                .arg(upstream.to_string())
                .run_attached()
                .await
        }
        PullMode::Merge | PullMode::Rebase => {
            let mut cmd = git(repo).arg("pull");
            if mode == PullMode::Rebase {
                cmd = cmd.arg("--rebase");
            }
            cmd = cmd.arg(&upstream.remote).arg(&upstream.branch);

            info!("$ {}", cmd);
            let output = cmd.output().await?;
            if output.success() {
                return Ok(());
            }
            if is_conflict(&output.stdout) || is_conflict(&output.stderr) {
                warn!(app, "Pull stopped on a conflict");
                return Err(BenchError::MergeConflict {
                    app: app.to_string(),
                });
            }
            output.into_result(cmd.to_string()).map(|_| ())
        }
    }
}

fn is_conflict(message: &str) -> bool {
    [
        "CONFLICT",
        "Automatic merge failed",
        "could not apply",
        "Not possible to fast-forward",
        "divergent branches",
    ]
    .iter()
    .any(|marker| message.contains(marker))
}

/// Clone `url` into `target` with `upstream` as the remote name
pub async fn clone(
    url: &str,
    target: &Path,
    branch: Option<&str>,
    shallow: bool,
) -> Result<(), BenchError> {
    let mut cmd = ProcessCommand::new("git")
        .arg("clone")
        .arg(url)
        .arg(target.to_string_lossy())
        .args(["--origin", UPSTREAM_REMOTE]);
    if let Some(branch) = branch {
        cmd = cmd.args(["--branch", branch]);
    }
    if shallow {
        cmd = cmd.args(["--depth", "1"]);
    }
    cmd.run_attached().await
}
