//! Configuration module
//!
//! Handles loading and managing configuration.

mod env;

pub use env::{print_env_help, EnvConfig};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::install::CommandSpec;

/// File name looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "pkgtest.yaml";

/// Application configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding one sub-directory per package
    pub packages_root: PathBuf,

    /// Checkout used instead of the working directory with `--external-checkout`
    pub external_checkout: PathBuf,

    /// Worker processes; defaults to the available parallelism
    pub processes: Option<usize>,

    /// Worker executable
    pub worker: WorkerConfig,

    /// Dependency installation
    pub install: InstallConfig,

    /// Package selection
    pub selection: SelectionConfig,

    /// Report format (text, json, csv)
    pub format: String,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            packages_root: PathBuf::from("types"),
            external_checkout: PathBuf::from("../packages-checkout"),
            processes: None,
            worker: WorkerConfig::default(),
            install: InstallConfig::default(),
            selection: SelectionConfig::default(),
            format: "text".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Worker executable configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Program started once per worker slot with `--listen`
    pub program: String,

    /// Extra arguments appended after `--listen`
    pub args: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: "pkgtest-worker".to_string(),
            args: Vec::new(),
        }
    }
}

/// Dependency installation configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Run the install phase at all
    pub enabled: bool,

    /// Manifest whose presence marks a package as needing an install
    pub manifest: String,

    /// Command run inside each package directory
    pub command: CommandSpec,

    /// Command run once after every package is installed
    pub finalize: Option<CommandSpec>,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            manifest: "package.json".to_string(),
            command: CommandSpec::new("npm").args([
                "install",
                "--ignore-scripts",
                "--no-shrinkwrap",
                "--no-package-lock",
                "--no-bin-links",
            ]),
            finalize: None,
        }
    }
}

/// Package selection configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Command printing `{"changed": [...], "dependent": [...]}`
    pub affected_command: Option<CommandSpec>,

    /// Prefix stripped from manifest dependency names, e.g. `@types/`
    pub dependency_prefix: Option<String>,
}

impl AppConfig {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Self = if is_yaml(path) {
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?
        } else {
            serde_json::from_str(&content).context("Failed to parse JSON config")?
        };

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Find and load the configuration.
    ///
    /// Lookup order: explicit path, `PKGTEST_CONFIG`, `./pkgtest.yaml`, the
    /// user config directory. Falls back to defaults when nothing exists.
    pub fn discover(explicit: Option<&Path>, env: &EnvConfig) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }
        if let Some(path) = &env.config_file {
            return Ok((Self::load(path)?, Some(PathBuf::from(path))));
        }

        let candidates = [Some(PathBuf::from(LOCAL_CONFIG_FILE)), default_config_path()];
        for path in candidates.into_iter().flatten() {
            if path.is_file() {
                debug!("Using config file {}", path.display());
                return Ok((Self::load(&path)?, Some(path)));
            }
        }

        Ok((Self::default(), None))
    }

    /// Apply `PKGTEST_*` environment overrides
    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(processes) = env.processes {
            self.processes = Some(processes);
        }
        if let Some(worker) = &env.worker {
            self.worker.program = worker.clone();
        }
        if let Some(root) = &env.root {
            self.packages_root = PathBuf::from(root);
        }
        if let Some(checkout) = &env.checkout {
            self.external_checkout = PathBuf::from(checkout);
        }
        if let Some(format) = &env.format {
            self.format = format.clone();
        }
        if let Some(level) = &env.log_level {
            self.log_level = level.clone();
        }
    }

    /// Worker count, defaulting to the available parallelism
    pub fn resolved_processes(&self) -> usize {
        self.processes.filter(|n| *n > 0).unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Directory the packages live in
    pub fn packages_dir(&self, external_checkout: bool) -> PathBuf {
        if external_checkout {
            self.external_checkout.join(&self.packages_root)
        } else {
            self.packages_root.clone()
        }
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

/// `<config dir>/pkgtest/config.yaml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pkgtest").join("config.yaml"))
}
