//! Dependency installation phase
//!
//! Bounded, fail-fast installs followed by a single finalize step.

mod installer;
mod limiter;

pub use installer::{CommandInstaller, CommandSpec, InstallError, InstallPhase, Installer};

#[cfg(test)]
pub(crate) use installer::InstallOutput;
