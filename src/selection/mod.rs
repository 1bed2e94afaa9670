//! Package selection
//!
//! Resolves a [`Selection`] into the packages to test. Which packages are
//! affected by a change is decided by an external command; this module only
//! runs it and reads the answer. Dependency closures are read from each
//! package's manifest, restricted to packages that live under the same root.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::install::CommandSpec;
use crate::models::{PackageRef, PackageSet, Selection};

/// Package selection errors
#[derive(Error, Debug)]
pub enum SelectionError {
    #[error("Invalid package pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Failed to read packages root {root}: {source}")]
    Root {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No affected-packages command configured; pass `all` or a pattern instead")]
    NoAffectedCommand,

    #[error("Affected-packages command `{command}` failed: {reason}")]
    AffectedCommand { command: String, reason: String },
}

/// Source of the package set for a run
#[async_trait]
pub trait PackageSelector: Send + Sync {
    async fn select(&self, selection: &Selection) -> Result<PackageSet, SelectionError>;
}

/// Answer expected from the affected-packages command
#[derive(Debug, Default, Deserialize)]
struct AffectedList {
    #[serde(default)]
    changed: Vec<String>,
    #[serde(default)]
    dependent: Vec<String>,
}

/// Selects packages from the directories under one root
#[derive(Clone, Debug)]
pub struct DirectorySelector {
    root: PathBuf,
    manifest: String,
    dependency_prefix: Option<String>,
    affected: Option<CommandSpec>,
}

impl DirectorySelector {
    pub fn new(root: impl Into<PathBuf>, manifest: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            manifest: manifest.into(),
            dependency_prefix: None,
            affected: None,
        }
    }

    /// Prefix stripped from dependency names before matching local packages
    pub fn with_dependency_prefix(mut self, prefix: Option<String>) -> Self {
        self.dependency_prefix = prefix;
        self
    }

    pub fn with_affected_command(mut self, command: Option<CommandSpec>) -> Self {
        self.affected = command;
        self
    }

    /// Every package directory under the root, sorted
    pub fn packages(&self) -> Result<Vec<PackageRef>, SelectionError> {
        let entries = std::fs::read_dir(&self.root).map_err(|source| SelectionError::Root {
            root: self.root.clone(),
            source,
        })?;

        let mut packages: Vec<PackageRef> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| !name.starts_with('.'))
            .map(PackageRef::new)
            .collect();
        packages.sort();

        Ok(packages)
    }

    fn matching(&self, pattern: &str) -> Result<Vec<PackageRef>, SelectionError> {
        let regex = Regex::new(pattern).map_err(|source| SelectionError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;

        Ok(self
            .packages()?
            .into_iter()
            .filter(|p| regex.is_match(p.path()))
            .collect())
    }

    async fn affected(&self) -> Result<AffectedList, SelectionError> {
        let command = self
            .affected
            .as_ref()
            .ok_or(SelectionError::NoAffectedCommand)?;
        let failed = |reason: String| SelectionError::AffectedCommand {
            command: command.to_string(),
            reason,
        };

        debug!("Running affected-packages command `{}`", command);
        let output = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&self.root)
            .output()
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failed(format!("{}: {}", output.status, stderr.trim())));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| failed(format!("invalid output: {e}")))
    }

    /// Names of local packages `package` depends on
    fn local_dependencies(&self, package: &PackageRef) -> Vec<PackageRef> {
        let path = package.dir(&self.root).join(&self.manifest);
        let Ok(content) = std::fs::read_to_string(&path) else {
            return Vec::new();
        };
        let manifest: serde_json::Value = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                warn!("{}: unreadable manifest: {}", path.display(), e);
                return Vec::new();
            }
        };

        ["dependencies", "devDependencies", "peerDependencies"]
            .iter()
            .filter_map(|section| manifest.get(section).and_then(|d| d.as_object()))
            .flat_map(|deps| deps.keys())
            .map(|name| match &self.dependency_prefix {
                Some(prefix) => name.strip_prefix(prefix.as_str()).unwrap_or(name.as_str()),
                None => name.as_str(),
            })
            .filter(|name| is_local_name(name) && self.root.join(name).is_dir())
            .map(PackageRef::from)
            .collect()
    }

    /// Transitive local dependencies of `tested`, excluding `tested` itself
    pub fn dependency_closure(&self, tested: &[PackageRef]) -> Vec<PackageRef> {
        let tested_set: BTreeSet<&PackageRef> = tested.iter().collect();
        let mut seen: BTreeSet<PackageRef> = tested.iter().cloned().collect();
        let mut queue: VecDeque<PackageRef> = tested.iter().cloned().collect();
        let mut closure = BTreeSet::new();

        while let Some(package) = queue.pop_front() {
            for dependency in self.local_dependencies(&package) {
                if seen.insert(dependency.clone()) {
                    if !tested_set.contains(&dependency) {
                        closure.insert(dependency.clone());
                    }
                    queue.push_back(dependency);
                }
            }
        }

        closure.into_iter().collect()
    }

    fn existing(&self, names: Vec<String>) -> Vec<PackageRef> {
        names
            .into_iter()
            .filter(|name| {
                let exists = is_local_name(name) && self.root.join(name).is_dir();
                if !exists {
                    warn!("Ignoring unknown package `{}`", name);
                }
                exists
            })
            .map(PackageRef::new)
            .collect()
    }
}

/// A dependency name that can only refer to a direct child of the root
fn is_local_name(name: &str) -> bool {
    !name.is_empty()
        && Path::new(name).components().count() == 1
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
}

#[async_trait]
impl PackageSelector for DirectorySelector {
    async fn select(&self, selection: &Selection) -> Result<PackageSet, SelectionError> {
        let (changed, dependent) = match selection {
            Selection::All => (self.packages()?, Vec::new()),
            Selection::Pattern(pattern) => (self.matching(pattern)?, Vec::new()),
            Selection::Affected => {
                let affected = self.affected().await?;
                (self.existing(affected.changed), self.existing(affected.dependent))
            }
        };

        let tested: Vec<PackageRef> = changed.iter().chain(&dependent).cloned().collect();
        let dependencies = self.dependency_closure(&tested);

        info!(
            "Selected {} changed and {} dependent packages ({}), {} extra dependencies",
            changed.len(),
            dependent.len(),
            selection,
            dependencies.len()
        );

        Ok(PackageSet {
            changed,
            dependent,
            dependencies,
        })
    }
}
