//! Dependency installation
//!
//! Installs every package that carries an install manifest, at most N at a
//! time, then runs one global finalize step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::limiter::{BoundedLimiter, LimiterError};
use crate::models::PackageRef;
use crate::utils::millis;

/// Install errors. Every variant is fatal to the install phase.
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Failed to start `{command}` in {dir}: {source}")]
    Spawn {
        command: String,
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Install failed in {dir} (exit code {code:?}): {stderr}")]
    Failed {
        dir: PathBuf,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Finalize step failed: {0}")]
    Finalize(String),

    #[error("Install phase aborted: {0}")]
    Aborted(String),
}

/// Program and arguments of an external command
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).kill_on_drop(true);
        command
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured output of a successful install
#[derive(Clone, Debug, Default)]
pub struct InstallOutput {
    pub stdout: String,
    pub stderr: String,
}

impl InstallOutput {
    /// Trimmed stdout, if there is any
    pub fn stdout_text(&self) -> Option<&str> {
        non_blank(&self.stdout)
    }

    /// Trimmed stderr, if there is any
    pub fn stderr_text(&self) -> Option<&str> {
        non_blank(&self.stderr)
    }
}

fn non_blank(text: &str) -> Option<&str> {
    Some(text.trim()).filter(|t| !t.is_empty())
}

/// Collaborator performing the actual installs
#[async_trait]
pub trait Installer: Send + Sync {
    /// Whether the package directory has something to install
    fn has_manifest(&self, dir: &Path) -> bool;

    /// Install one package's dependencies
    async fn install(&self, dir: &Path) -> Result<InstallOutput, InstallError>;

    /// Reconcile install state once every package is installed
    async fn finalize(&self) -> Result<(), InstallError>;
}

/// Installer that shells out to a configured command
#[derive(Clone, Debug)]
pub struct CommandInstaller {
    install: CommandSpec,
    finalize: Option<CommandSpec>,
    manifest: String,
}

impl CommandInstaller {
    pub fn new(install: CommandSpec, manifest: impl Into<String>) -> Self {
        Self {
            install,
            finalize: None,
            manifest: manifest.into(),
        }
    }

    pub fn with_finalize(mut self, finalize: Option<CommandSpec>) -> Self {
        self.finalize = finalize;
        self
    }
}

#[async_trait]
impl Installer for CommandInstaller {
    fn has_manifest(&self, dir: &Path) -> bool {
        dir.join(&self.manifest).is_file()
    }

    async fn install(&self, dir: &Path) -> Result<InstallOutput, InstallError> {
        debug!("Running `{}` in {}", self.install, dir.display());

        let output = self
            .install
            .command()
            .current_dir(dir)
            .output()
            .await
            .map_err(|source| InstallError::Spawn {
                command: self.install.to_string(),
                dir: dir.to_path_buf(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(InstallError::Failed {
                dir: dir.to_path_buf(),
                code: output.status.code(),
                stderr: if stderr.trim().is_empty() { stdout } else { stderr },
            });
        }

        Ok(InstallOutput { stdout, stderr })
    }

    async fn finalize(&self) -> Result<(), InstallError> {
        let Some(finalize) = &self.finalize else {
            return Ok(());
        };

        info!("Running finalize step `{}`", finalize);

        let output = finalize
            .command()
            .output()
            .await
            .map_err(|e| InstallError::Finalize(format!("failed to start `{finalize}`: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(InstallError::Finalize(format!(
                "`{finalize}` exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}

/// What happened to one package during the install phase
#[derive(Clone, Debug, PartialEq, Eq)]
enum InstallStep {
    Installed(PackageRef),
    Skipped(PackageRef),
}

/// Outcome of a completed install phase
#[derive(Clone, Debug, Default)]
pub struct InstallSummary {
    pub installed: Vec<PackageRef>,
    pub skipped: Vec<PackageRef>,
    pub duration: Duration,
}

/// Install phase over a set of packages
pub struct InstallPhase {
    installer: Arc<dyn Installer>,
    limiter: BoundedLimiter,
    root: PathBuf,
}

impl InstallPhase {
    pub fn new(
        installer: Arc<dyn Installer>,
        max_concurrent: usize,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            installer,
            limiter: BoundedLimiter::new(max_concurrent),
            root: root.into(),
        }
    }

    /// Install every package, then finalize.
    ///
    /// Packages without a manifest are skipped. The first failing install
    /// aborts the phase and finalize never runs.
    pub async fn run(&self, packages: &[PackageRef]) -> Result<InstallSummary, InstallError> {
        info!(
            "Installing dependencies for {} packages (max {} concurrent)",
            packages.len(),
            self.limiter.limit()
        );

        let start = Instant::now();
        let root = self.root.clone();
        let installer = self.installer.clone();

        let steps = self
            .limiter
            .run(packages.to_vec(), move |package| {
                let installer = installer.clone();
                let dir = package.dir(&root);
                async move {
                    if !installer.has_manifest(&dir) {
                        debug!("{}: no install manifest, skipping", package);
                        return Ok::<_, InstallError>(InstallStep::Skipped(package));
                    }

                    let output = installer.install(&dir).await?;
                    if let Some(stdout) = output.stdout_text() {
                        info!("{}: {}", package, stdout);
                    }
                    if let Some(stderr) = output.stderr_text() {
                        warn!("{}: {}", package, stderr);
                    }

                    Ok::<_, InstallError>(InstallStep::Installed(package))
                }
            })
            .await
            .map_err(|e| match e {
                LimiterError::Failed(e) => e,
                other => InstallError::Aborted(other.to_string()),
            })?;

        self.installer.finalize().await?;

        let mut summary = InstallSummary {
            duration: start.elapsed(),
            ..Default::default()
        };
        for step in steps {
            match step {
                InstallStep::Installed(p) => summary.installed.push(p),
                InstallStep::Skipped(p) => summary.skipped.push(p),
            }
        }

        info!(
            "Install phase completed in {}ms ({} installed, {} skipped)",
            millis(summary.duration),
            summary.installed.len(),
            summary.skipped.len()
        );

        Ok(summary)
    }
}
