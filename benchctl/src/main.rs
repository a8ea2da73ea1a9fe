//! benchctl - Entry Point
//!
//! Updates a bench: pulls apps, installs dependencies, runs patches,
//! rebuilds assets and restarts services with maintenance mode held.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::{debug, error};

use benchctl::bench::{Bench, BenchLayout};
use benchctl::deploy::process::ProcessCommand;
use benchctl::deploy::{BenchBackend, SystemBackend};
use benchctl::errors::{BenchError, UpdateAborted};
use benchctl::logs::{init_logging, LogLevel, LogOptions};
use benchctl::patches::PatchRunner;
use benchctl::update::options::parse_app_list;
use benchctl::update::{TerminalConfirm, UpdateOptions, UpdateOrchestrator, UpdatePhase, UpdateReport};
use benchctl::utils::{plural, version_info};
use benchctl::version::VersionComparison;

#[derive(Parser, Debug)]
#[command(name = "benchctl", version, about = "Update and patch a framework bench")]
struct Cli {
    /// Bench directory
    #[arg(long, global = true, env = "BENCH_PATH", default_value = ".")]
    bench: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: LogLevel,

    /// Shorthand for --log-level debug
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit terminal logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pull apps, install requirements, run patches and build assets
    Update(UpdateArgs),

    /// Turn maintenance mode on or off
    Maintenance {
        #[command(subcommand)]
        action: MaintenanceAction,
    },

    /// Inspect or run bench patches
    Patches {
        #[command(subcommand)]
        action: PatchesAction,
    },

    /// Clone an app into the bench and install it
    GetApp {
        name: String,
        url: String,
        #[arg(long)]
        branch: Option<String>,
    },

    /// Print build information
    Version,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum MaintenanceAction {
    On,
    Off,
    Status,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum PatchesAction {
    /// List shipped patches and whether they are recorded
    Status,
    /// Run pending patches
    Run,
}

#[derive(Args, Debug, Clone)]
struct UpdateArgs {
    /// Pull updates for all the apps in bench
    #[arg(long)]
    pull: bool,

    /// Run migrations for all sites in the bench
    #[arg(long)]
    patch: bool,

    /// Build JS and CSS assets for the bench
    #[arg(long)]
    build: bool,

    /// Update requirements
    #[arg(long)]
    requirements: bool,

    /// Only pull these apps (comma separated)
    #[arg(long)]
    apps: Option<String>,

    /// Skip site backups before updating
    #[arg(long)]
    no_backup: bool,

    /// Continue past a major version upgrade without asking
    #[arg(long)]
    force: bool,

    /// Hard reset git branches to upstream, discarding local changes
    #[arg(long)]
    reset: bool,

    /// Restart supervisor processes after the update
    #[arg(long)]
    restart_supervisor: bool,

    /// Restart systemd units after the update
    #[arg(long)]
    restart_systemd: bool,

    /// Run only part of the workflow; by default prepare and finish run as
    /// two processes
    #[arg(long, value_enum)]
    phase: Option<UpdatePhase>,

    #[arg(long, hide = true, requires = "upgrade_to")]
    upgrade_from: Option<u64>,

    #[arg(long, hide = true, requires = "upgrade_from")]
    upgrade_to: Option<u64>,
}

impl UpdateArgs {
    fn to_options(&self) -> UpdateOptions {
        UpdateOptions {
            pull: self.pull,
            patch: self.patch,
            build: self.build,
            requirements: self.requirements,
            apps: self.apps.as_deref().map(parse_app_list).unwrap_or_default(),
            backup: !self.no_backup,
            force: self.force,
            reset: self.reset,
            restart_supervisor: self.restart_supervisor,
            restart_systemd: self.restart_systemd,
            phase: self.phase.unwrap_or_default(),
            known_comparison: match (self.upgrade_from, self.upgrade_to) {
                (Some(from), Some(to)) => Some(VersionComparison::from_majors(from, to)),
                _ => None,
            },
        }
        .normalized()
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Command::Version = cli.command {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("{}", e),
        }
        return ExitCode::SUCCESS;
    }

    let log_level = if cli.verbose { LogLevel::Debug } else { cli.log_level };
    let logs_dir = BenchLayout::new(&cli.bench).logs_dir();
    let log_options = LogOptions {
        log_level,
        json_format: cli.json_logs,
        log_dir: logs_dir.path().is_dir().then(|| logs_dir.path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let bench = match Bench::open(&cli.bench).await {
        Ok(bench) => bench,
        Err(e) => {
            eprintln!("{} {}", "ERROR:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    let result = match &cli.command {
        Command::Update(args) => return update(&bench, args, &cli).await,
        Command::Maintenance { action } => maintenance(&bench, *action).await,
        Command::Patches { action } => patches(&bench, *action).await,
        Command::GetApp { name, url, branch } => get_app(&bench, name, url, branch.as_deref()).await,
        Command::Version => Ok(()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("{} {}", "ERROR:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn update(bench: &Bench, args: &UpdateArgs, cli: &Cli) -> ExitCode {
    let options = args.to_options();
    let backend = SystemBackend::new();
    let confirm = TerminalConfirm;
    let patches = PatchRunner::shipped();
    let orchestrator = UpdateOrchestrator::new(bench, &backend, &confirm, &patches);

    if args.phase.is_some() {
        return match orchestrator.run(options).await {
            Ok(report) => {
                print_report(&report);
                ExitCode::SUCCESS
            }
            Err(abort) => report_abort(&abort),
        };
    }

    // Split run: the finish phase starts in a new process so patches and
    // migrations run against the sources that were just pulled.
    let prepare = UpdateOptions {
        phase: UpdatePhase::Prepare,
        ..options.clone()
    };
    let report = match orchestrator.run(prepare).await {
        Ok(report) => report,
        Err(abort) => return report_abort(&abort),
    };
    debug!(run_id = %report.run_id, "Prepare phase done, handing over to finish phase");

    match finish_in_new_process(bench.path(), &options, report.comparison, cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(BenchError::CommandFailed { code, .. }) => {
            // The child reported its own abort.
            debug!(?code, "Finish phase failed");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!(
                "{} could not start the finish phase: {}\n\
                 Maintenance mode remains ON. Run `benchctl update --phase finish` \
                 or clear it with `benchctl maintenance off`.",
                "ERROR:".red().bold(),
                e
            );
            ExitCode::FAILURE
        }
    }
}

async fn finish_in_new_process(
    bench_path: &Path,
    options: &UpdateOptions,
    comparison: Option<VersionComparison>,
    cli: &Cli,
) -> Result<(), BenchError> {
    let exe = std::env::current_exe()?;
    let mut cmd = ProcessCommand::new(exe.to_string_lossy())
        .arg("--bench")
        .arg(bench_path.to_string_lossy())
        .args(["--log-level", if cli.verbose { "debug" } else { cli.log_level.to_filter_string() }])
        .args(["update", "--phase", "finish"]);

    for (enabled, flag) in [
        (options.pull, "--pull"),
        (options.patch, "--patch"),
        (options.build, "--build"),
        (options.requirements, "--requirements"),
        (options.force, "--force"),
        (options.restart_supervisor, "--restart-supervisor"),
        (options.restart_systemd, "--restart-systemd"),
    ] {
        if enabled {
            cmd = cmd.arg(flag);
        }
    }
    if cli.json_logs {
        cmd = cmd.arg("--json-logs");
    }
    if let Some(c) = comparison {
        cmd = cmd
            .arg("--upgrade-from")
            .arg(c.local_major.to_string())
            .arg("--upgrade-to")
            .arg(c.upstream_major.to_string());
    }

    cmd.run_attached().await
}

fn print_report(report: &UpdateReport) {
    if let Some(comparison) = &report.comparison {
        if comparison.is_major_upgrade {
            println!(
                "Upgraded from version {} to {}",
                comparison.local_major, comparison.upstream_major
            );
        }
    }
    if !report.pulled_apps.is_empty() {
        println!("Pulled {}: {}", plural(report.pulled_apps.len(), "app"), report.pulled_apps.join(", "));
    }
    if let Some(summary) = &report.patches {
        println!(
            "Patches: {} applied, {} marked, {} not applicable",
            summary.applied.len(),
            summary.marked.len(),
            summary.skipped.len()
        );
    }
    let last = report.states.last().map(|s| s.to_string()).unwrap_or_default();
    println!("{} ({:?} phase, reached {})", "Update finished".green().bold(), report.phase, last);
}

fn report_abort(abort: &UpdateAborted) -> ExitCode {
    if abort.is_declined() {
        println!("{}", "Update cancelled, nothing was changed.".yellow());
        return ExitCode::SUCCESS;
    }
    eprintln!("{} {}", "ERROR:".red().bold(), abort);
    ExitCode::FAILURE
}

async fn maintenance(bench: &Bench, action: MaintenanceAction) -> Result<(), BenchError> {
    let config = match action {
        MaintenanceAction::On => bench.set_maintenance(true).await?,
        MaintenanceAction::Off => bench.set_maintenance(false).await?,
        MaintenanceAction::Status => bench.config().await?,
    };
    let state = if config.maintenance_mode() { "ON".red().bold() } else { "OFF".green().bold() };
    println!(
        "Maintenance mode: {} (scheduler {})",
        state,
        if config.pause_scheduler() { "paused" } else { "running" }
    );
    Ok(())
}

async fn patches(bench: &Bench, action: PatchesAction) -> Result<(), BenchError> {
    let runner = PatchRunner::shipped();
    match action {
        PatchesAction::Status => {
            for status in runner.status(bench).await? {
                let marker = if status.recorded { "[x]".green() } else { "[ ]".yellow() };
                println!("{} {}", marker, status.identifier);
            }
        }
        PatchesAction::Run => {
            let summary = runner.run(bench).await?;
            println!(
                "Ran {}: {} applied, {} marked, {} not applicable ({} already recorded)",
                plural(summary.executed(), "patch action"),
                summary.applied.len(),
                summary.marked.len(),
                summary.skipped.len(),
                summary.already_recorded
            );
        }
    }
    Ok(())
}

async fn get_app(bench: &Bench, name: &str, url: &str, branch: Option<&str>) -> Result<(), BenchError> {
    let app = SystemBackend::new().fetch_app(bench, name, url, branch).await?;
    println!(
        "Installed {} {} at {}",
        app.name,
        app.version.as_deref().unwrap_or("(unknown version)"),
        app.source_location.display()
    );
    Ok(())
}
