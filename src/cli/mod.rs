//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parallel package test-suite runner
#[derive(Parser, Debug)]
#[command(name = "pkgtest")]
#[command(version)]
#[command(about = "Install and test packages across a pool of persistent workers")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (YAML or JSON)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Install dependencies and run the selected packages' tests
    Run(RunArgs),

    /// Print the packages a selection resolves to
    List(ListArgs),

    /// Show or create configuration
    Config(ConfigArgs),
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Packages to test: `all`, `affected`, or a regular expression.
    ///
    /// `affected` runs `selection.affected_command` from the config file and
    /// fails when none is configured; pass `all` or a pattern instead.
    #[arg(default_value = "affected")]
    pub selection: String,

    /// Number of worker processes
    #[arg(short = 'p', long = "processes", alias = "nProcesses")]
    pub processes: Option<usize>,

    /// Resolve packages in the configured external checkout
    #[arg(short, long)]
    pub external_checkout: bool,

    /// Lower the worker count when fewer packages than workers are selected
    #[arg(long)]
    pub clamp: bool,

    /// Skip the dependency install phase
    #[arg(long)]
    pub skip_install: bool,

    /// Report format (text, json, csv)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Also write the final report to a file
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Packages to list: `all`, `affected`, or a regular expression
    #[arg(default_value = "affected")]
    pub selection: String,

    /// Resolve packages in the configured external checkout
    #[arg(short, long)]
    pub external_checkout: bool,

    /// Also list dependencies that would be installed
    #[arg(short, long)]
    pub dependencies: bool,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Write the default configuration to a file
    Init {
        /// Destination (defaults to ./pkgtest.yaml)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// List supported environment variables
    Env,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_run_defaults_to_affected() {
        let args = Args::parse_from(["pkgtest", "run"]);
        match args.command {
            Command::Run(run) => {
                assert_eq!(run.selection, "affected");
                assert_eq!(run.processes, None);
                assert!(!run.external_checkout);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_run_with_flags() {
        let args = Args::parse_from([
            "pkgtest",
            "-v",
            "run",
            "^react",
            "-p",
            "6",
            "--external-checkout",
        ]);
        assert!(args.verbose);
        match args.command {
            Command::Run(run) => {
                assert_eq!(run.selection, "^react");
                assert_eq!(run.processes, Some(6));
                assert!(run.external_checkout);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_run_help_names_affected_command() {
        let mut command = Args::command();
        let run = command.find_subcommand_mut("run").unwrap();
        let help = run.render_long_help().to_string();
        assert!(help.contains("selection.affected_command"), "{help}");
    }
}
