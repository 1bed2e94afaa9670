//! pkgtest - parallel package test-suite runner
//!
//! Installs the dependencies of a selection of packages, then tests every
//! selected package on a fixed pool of persistent worker processes and
//! reports every failure at the end.
//!
//! ## Features
//!
//! - Selection by `all`, `affected` (external command), or regular expression
//! - Bounded, fail-fast dependency installs followed by one finalize step
//! - Long-lived workers fed one package at a time over a JSON-lines protocol
//! - Text, JSON and CSV end-of-run reports
//!
//! ## Usage
//!
//! ```bash
//! # Test packages affected by the current change
//! pkgtest run
//!
//! # Test everything on 8 workers
//! pkgtest run all -p 8
//!
//! # Test packages matching a pattern in the external checkout
//! pkgtest run '^react' --external-checkout
//!
//! # Show what a selection resolves to
//! pkgtest list all --dependencies
//! ```
//!
//! ## Exit status
//!
//! `0` when every package passed, `1` when at least one package failed, `2`
//! when the run itself failed (install error, worker crash, bad config).

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

mod cli;
mod config;
mod executor;
mod install;
mod models;
mod output;
mod selection;
mod utils;

use cli::{Args, Command, ConfigAction, ConfigArgs, ListArgs, RunArgs};
use config::{AppConfig, EnvConfig, LOCAL_CONFIG_FILE};
use executor::{DispatchOptions, SuiteRunner, Verdict};
use install::CommandInstaller;
use models::Selection;
use output::{OutputFormat, ReportFormatter};
use selection::{DirectorySelector, PackageSelector};
use utils::{init_logger, LogLevel};

/// How a completed run ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RunOutcome {
    Passed,
    TestsFailed,
}

impl RunOutcome {
    fn exit_code(self) -> ExitCode {
        match self {
            RunOutcome::Passed => ExitCode::SUCCESS,
            RunOutcome::TestsFailed => ExitCode::from(1),
        }
    }
}

/// Exit code for runs that could not complete
const EXIT_FATAL: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let env = EnvConfig::load();

    let (mut config, source) = match AppConfig::discover(args.config.as_deref(), &env) {
        Ok(found) => found,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::from(EXIT_FATAL);
        }
    };
    config.apply_env(&env);

    let level = if args.verbose {
        LogLevel::Debug
    } else if args.quiet {
        LogLevel::Warn
    } else {
        config.log_level.parse().unwrap_or_default()
    };
    init_logger(level);

    if let Some(path) = &source {
        debug!("Loaded configuration from {}", path.display());
    }
    if env.has_any() {
        debug!("Environment overrides: {:?}", env);
    }

    let result = match args.command {
        Command::Run(run_args) => run_suite(run_args, config).await,
        Command::List(list_args) => list_packages(list_args, &config)
            .await
            .map(|_| RunOutcome::Passed),
        Command::Config(config_args) => {
            manage_config(config_args, &config).map(|_| RunOutcome::Passed)
        }
    };

    match result {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn selector(config: &AppConfig, root: &Path) -> DirectorySelector {
    DirectorySelector::new(root, &config.install.manifest)
        .with_dependency_prefix(config.selection.dependency_prefix.clone())
        .with_affected_command(config.selection.affected_command.clone())
}

/// Make a worker program given as a relative path independent of the
/// worker's working directory
fn resolve_program(program: &str) -> Result<PathBuf> {
    let path = PathBuf::from(program);
    if path.is_absolute() || path.components().count() == 1 {
        return Ok(path);
    }
    let cwd = std::env::current_dir().context("Failed to read working directory")?;
    Ok(cwd.join(path))
}

async fn run_suite(args: RunArgs, mut config: AppConfig) -> Result<RunOutcome> {
    if let Some(processes) = args.processes {
        config.processes = Some(processes);
    }
    if let Some(format) = args.format {
        config.format = format;
    }

    let format: OutputFormat = config.format.parse()?;
    let root = config.packages_dir(args.external_checkout);
    let selection = Selection::parse(&args.selection);

    let packages = selector(&config, &root)
        .select(&selection)
        .await
        .with_context(|| format!("Failed to select packages ({selection})"))?;

    if packages.is_empty() {
        println!("No packages selected ({selection}), nothing to test");
        return Ok(RunOutcome::Passed);
    }

    let items = packages.work_items().len();
    let mut processes = config.resolved_processes();
    if args.clamp && items < processes {
        warn!(
            "Only {} packages selected, lowering worker count from {} to {}",
            items, processes, items
        );
        processes = items;
    }
    info!("Running with {} worker processes", processes);

    let options = DispatchOptions {
        worker: resolve_program(&config.worker.program)?,
        extra_args: config.worker.args.clone(),
        processes,
        cwd: root.clone(),
    };
    let mut runner = SuiteRunner::new(options.dispatcher(), &root);

    if config.install.enabled && !args.skip_install {
        let installer = CommandInstaller::new(
            config.install.command.clone(),
            config.install.manifest.clone(),
        )
        .with_finalize(config.install.finalize.clone());
        runner = runner.with_installer(Arc::new(installer));
    }

    let mut formatter = ReportFormatter::new(format);
    if !std::io::stdout().is_terminal() {
        formatter = formatter.no_color();
    }

    let report = runner
        .run(&packages, |response, done, total| {
            let line = formatter.format_progress(response, done, total);
            if formatter.format() == OutputFormat::Text {
                println!("{line}");
            } else {
                eprintln!("{line}");
            }
        })
        .await?;

    println!("{}", formatter.format_report(&report)?);

    if let Some(path) = &args.output {
        let rendered = ReportFormatter::new(format).no_color().format_report(&report)?;
        std::fs::write(path, rendered)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!("Report saved to {}", path.display());
    }

    match &report.verdict {
        Verdict::Success => Ok(RunOutcome::Passed),
        Verdict::Failure(failures) => {
            warn!("{} of {} packages failed", failures.len(), report.tested);
            Ok(RunOutcome::TestsFailed)
        }
    }
}

async fn list_packages(args: ListArgs, config: &AppConfig) -> Result<()> {
    let root = config.packages_dir(args.external_checkout);
    let selection = Selection::parse(&args.selection);
    let packages = selector(config, &root).select(&selection).await?;

    println!("\nPackages for {selection} in {}\n", root.display());

    for item in packages.work_items() {
        println!("  {item}");
    }

    if args.dependencies && !packages.dependencies.is_empty() {
        println!("\nDependencies installed but not tested:\n");
        for dependency in &packages.dependencies {
            println!("  {dependency}");
        }
    }

    println!(
        "\n{} packages to test, {} to install\n",
        packages.work_items().len(),
        packages.install_set().len()
    );

    Ok(())
}

fn manage_config(args: ConfigArgs, config: &AppConfig) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
            println!("{yaml}");
        }
        ConfigAction::Init { path, force } => {
            let path = path.unwrap_or_else(|| PathBuf::from(LOCAL_CONFIG_FILE));
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            AppConfig::default().save(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }
        ConfigAction::Env => config::print_env_help(),
    }

    Ok(())
}
