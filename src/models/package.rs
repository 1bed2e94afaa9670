//! Package references and selections
//!
//! A package is identified by its path relative to the packages root.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use super::{Variant, WorkItem};

/// Reference to one package directory under the packages root
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageRef {
    path: String,
}

impl PackageRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Path relative to the packages root, also used as the unit id
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Resolve against the packages root
    pub fn dir(&self, root: &Path) -> PathBuf {
        root.join(&self.path)
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl From<&str> for PackageRef {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// Which packages a run should cover
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selection {
    /// Every package under the root
    All,
    /// Packages touched by the current change plus their dependents
    Affected,
    /// Packages whose path matches a regular expression
    Pattern(String),
}

impl Selection {
    pub fn parse(s: &str) -> Self {
        match s {
            "all" => Selection::All,
            "affected" | "" => Selection::Affected,
            pattern => Selection::Pattern(pattern.to_string()),
        }
    }
}

impl Default for Selection {
    fn default() -> Self {
        Selection::Affected
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::All => write!(f, "all"),
            Selection::Affected => write!(f, "affected"),
            Selection::Pattern(p) => write!(f, "/{p}/"),
        }
    }
}

/// Result of package selection
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSet {
    /// Packages tested against every type-definition version
    pub changed: Vec<PackageRef>,

    /// Packages tested against the forward-looking version only
    pub dependent: Vec<PackageRef>,

    /// Transitive dependencies of the tested packages; installed, not tested
    #[serde(default)]
    pub dependencies: Vec<PackageRef>,
}

impl PackageSet {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.dependent.is_empty()
    }

    /// Number of packages that will be tested
    pub fn tested_len(&self) -> usize {
        self.changed.len() + self.dependent.len()
    }

    /// Tested packages plus their dependency closure, de-duplicated
    pub fn install_set(&self) -> Vec<PackageRef> {
        self.changed
            .iter()
            .chain(&self.dependent)
            .chain(&self.dependencies)
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Work items in submission order: changed packages first, then dependents.
    ///
    /// A package listed both as changed and dependent is tested once, fully.
    pub fn work_items(&self) -> Vec<WorkItem> {
        let mut seen = BTreeSet::new();
        let mut items = Vec::with_capacity(self.tested_len());

        for package in &self.changed {
            if seen.insert(package.path()) {
                items.push(WorkItem::new(package.path(), Variant::Full));
            }
        }
        for package in &self.dependent {
            if seen.insert(package.path()) {
                items.push(WorkItem::new(package.path(), Variant::NextOnly));
            }
        }

        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(paths: &[&str]) -> Vec<PackageRef> {
        paths.iter().map(|p| PackageRef::from(*p)).collect()
    }

    #[test]
    fn test_selection_parse() {
        assert_eq!(Selection::parse("all"), Selection::All);
        assert_eq!(Selection::parse("affected"), Selection::Affected);
        assert_eq!(
            Selection::parse("^react"),
            Selection::Pattern("^react".to_string())
        );
    }

    #[test]
    fn test_install_set_dedups() {
        let set = PackageSet {
            changed: refs(&["foo", "bar"]),
            dependent: refs(&["baz"]),
            dependencies: refs(&["bar", "node"]),
        };

        let install: Vec<_> = set.install_set().iter().map(|p| p.to_string()).collect();
        assert_eq!(install, vec!["bar", "baz", "foo", "node"]);
    }

    #[test]
    fn test_work_items_variants() {
        let set = PackageSet {
            changed: refs(&["foo"]),
            dependent: refs(&["bar", "foo"]),
            dependencies: refs(&["node"]),
        };

        let items = set.work_items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].unit_id(), "foo");
        assert_eq!(items[0].variant, Variant::Full);
        assert_eq!(items[1].unit_id(), "bar");
        assert_eq!(items[1].variant, Variant::NextOnly);
    }
}
