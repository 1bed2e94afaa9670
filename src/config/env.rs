//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

/// Environment variable prefix
const ENV_PREFIX: &str = "PKGTEST";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Worker count from PKGTEST_PROCESSES
    pub processes: Option<usize>,
    /// Worker program from PKGTEST_WORKER
    pub worker: Option<String>,
    /// Packages root from PKGTEST_ROOT
    pub root: Option<String>,
    /// External checkout from PKGTEST_CHECKOUT
    pub checkout: Option<String>,
    /// Report format from PKGTEST_FORMAT
    pub format: Option<String>,
    /// Log level from PKGTEST_LOG
    pub log_level: Option<String>,
    /// Config file from PKGTEST_CONFIG
    pub config_file: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            processes: get_env_parse("PROCESSES"),
            worker: get_env("WORKER"),
            root: get_env("ROOT"),
            checkout: get_env("CHECKOUT"),
            format: get_env("FORMAT"),
            log_level: get_env("LOG"),
            config_file: get_env("CONFIG"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.processes.is_some()
            || self.worker.is_some()
            || self.root.is_some()
            || self.checkout.is_some()
            || self.format.is_some()
            || self.log_level.is_some()
            || self.config_file.is_some()
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}"))
        .ok()
        .filter(|v| !v.is_empty())
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Print all PKGTEST environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_PROCESSES   Number of worker processes");
    println!("  {ENV_PREFIX}_WORKER      Worker executable");
    println!("  {ENV_PREFIX}_ROOT        Directory containing the packages");
    println!("  {ENV_PREFIX}_CHECKOUT    External checkout used with --external-checkout");
    println!("  {ENV_PREFIX}_FORMAT      Report format (text, json, csv)");
    println!("  {ENV_PREFIX}_LOG         Log level (trace, debug, info, warn, error)");
    println!("  {ENV_PREFIX}_CONFIG      Path to configuration file");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_PROCESSES=8");
    println!("  pkgtest run all");
}
