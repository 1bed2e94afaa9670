//! Suite runner
//!
//! Runs the install phase to completion, then dispatches every selected
//! package to the worker pool and aggregates the outcome.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::aggregate::{FailureAggregator, Verdict};
use super::dispatcher::{DispatchError, Dispatcher};
use crate::install::{InstallError, InstallPhase, Installer};
use crate::models::{PackageSet, Response};
use crate::utils::PhaseTimer;

/// Infrastructure failure of a run
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Install phase failed: {0}")]
    Install(#[from] InstallError),

    #[error("Test dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Everything reported at the end of a run
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub tested: usize,
    pub passed: usize,
    /// Serialized as `failures`, the failing units in arrival order
    #[serde(rename = "failures")]
    pub verdict: Verdict,
    pub installed: usize,
    pub install_skipped: usize,
    pub workers: usize,
    pub install_ms: u64,
    pub dispatch_ms: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    fn empty(started_at: DateTime<Utc>) -> Self {
        Self {
            tested: 0,
            passed: 0,
            verdict: Verdict::Success,
            installed: 0,
            install_skipped: 0,
            workers: 0,
            install_ms: 0,
            dispatch_ms: 0,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Install-then-test pipeline over one package set
pub struct SuiteRunner {
    installer: Option<Arc<dyn Installer>>,
    dispatcher: Dispatcher,
    root: std::path::PathBuf,
}

impl SuiteRunner {
    pub fn new(dispatcher: Dispatcher, root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            installer: None,
            dispatcher,
            root: root.into(),
        }
    }

    /// Install dependencies before testing
    pub fn with_installer(mut self, installer: Arc<dyn Installer>) -> Self {
        self.installer = Some(installer);
        self
    }

    /// Run the suite.
    ///
    /// `on_response` sees every response as it arrives, together with the
    /// number of responses so far and the total.
    pub async fn run<F>(
        &self,
        packages: &PackageSet,
        mut on_response: F,
    ) -> Result<RunReport, RunError>
    where
        F: FnMut(&Response, usize, usize),
    {
        let started_at = Utc::now();

        if packages.is_empty() {
            info!("No packages selected, nothing to test");
            return Ok(RunReport::empty(started_at));
        }

        let mut report = RunReport::empty(started_at);

        if let Some(installer) = &self.installer {
            let phase = InstallPhase::new(
                installer.clone(),
                self.dispatcher.processes(),
                self.root.clone(),
            );
            let timer = PhaseTimer::start("install");
            let summary = phase.run(&packages.install_set()).await?;
            report.installed = summary.installed.len();
            report.install_skipped = summary.skipped.len();
            report.install_ms = timer.finish();
        }

        let items = packages.work_items();
        let total = items.len();
        info!(
            "Testing {} packages: {} changed, {} dependent",
            total,
            packages.changed.len(),
            packages.dependent.len()
        );

        let timer = PhaseTimer::start("dispatch");
        let mut aggregator = FailureAggregator::new();
        let summary = self
            .dispatcher
            .dispatch(items, |response| {
                aggregator.record(response);
                on_response(response, aggregator.responses(), total);
            })
            .await?;

        debug!("Items completed per worker: {:?}", summary.per_worker);

        report.tested = aggregator.responses();
        report.passed = aggregator.passed();
        report.workers = summary.workers;
        report.dispatch_ms = timer.finish();
        report.verdict = aggregator.into_verdict();
        report.finished_at = Utc::now();

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::{FakeReply, FakeSpawner};
    use crate::install::InstallOutput;
    use crate::models::PackageRef;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    #[derive(Default)]
    struct RecordingInstaller {
        without_manifest: Vec<String>,
        failing: Option<String>,
        installed: Mutex<Vec<String>>,
        finalized: AtomicUsize,
    }

    #[async_trait]
    impl Installer for RecordingInstaller {
        fn has_manifest(&self, dir: &Path) -> bool {
            !self.without_manifest.iter().any(|n| dir.ends_with(n))
        }

        async fn install(&self, dir: &Path) -> Result<InstallOutput, InstallError> {
            let name = dir.file_name().unwrap().to_string_lossy().into_owned();
            if self.failing.as_deref() == Some(name.as_str()) {
                return Err(InstallError::Failed {
                    dir: dir.to_path_buf(),
                    code: Some(1),
                    stderr: "404 Not Found".to_string(),
                });
            }
            self.installed.lock().unwrap().push(name);
            Ok(InstallOutput::default())
        }

        async fn finalize(&self) -> Result<(), InstallError> {
            self.finalized.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn package_set(changed: &[&str], dependent: &[&str]) -> PackageSet {
        PackageSet {
            changed: changed.iter().map(|p| PackageRef::from(*p)).collect(),
            dependent: dependent.iter().map(|p| PackageRef::from(*p)).collect(),
            dependencies: Vec::new(),
        }
    }

    fn recording_spawner(seen: Arc<Mutex<Vec<String>>>) -> Arc<FakeSpawner> {
        Arc::new(FakeSpawner::new(move |request| {
            seen.lock().unwrap().push(request.path.clone());
            if request.path == "foo" {
                FakeReply::Fail("type error X".to_string())
            } else {
                FakeReply::Pass
            }
        }))
    }

    #[tokio::test]
    async fn test_five_packages_two_workers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let spawner = recording_spawner(seen.clone());
        let runner = SuiteRunner::new(Dispatcher::new(spawner.clone(), 2), "/types");

        let mut progress = Vec::new();
        let report = assert_ok!(
            runner
                .run(
                    &package_set(&["foo", "bar", "baz"], &["qux", "quux"]),
                    |r, done, total| progress.push((r.unit_id.clone(), done, total)),
                )
                .await
        );

        assert_eq!(spawner.spawned.load(Ordering::SeqCst), 2);
        assert_eq!(report.tested, 5);
        assert_eq!(report.passed, 4);
        assert_eq!(progress.len(), 5);
        assert_eq!(progress.last().map(|p| (p.1, p.2)), Some((5, 5)));
        let failures: Vec<String> = report
            .verdict
            .failures()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(failures, vec!["foo: type error X"]);
        assert!(matches!(report.verdict, Verdict::Failure(_)));
    }

    #[tokio::test]
    async fn test_package_without_manifest_is_still_tested() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let installer = Arc::new(RecordingInstaller {
            without_manifest: vec!["bar".to_string()],
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(recording_spawner(seen.clone()), 2);
        let runner = SuiteRunner::new(dispatcher, "/types").with_installer(installer.clone());

        let report = assert_ok!(
            runner
                .run(&package_set(&["bar", "baz"], &["qux"]), |_, _, _| {})
                .await
        );

        let mut installed = installer.installed.lock().unwrap().clone();
        installed.sort();
        assert_eq!(installed, vec!["baz", "qux"]);
        assert_eq!(installer.finalized.load(Ordering::SeqCst), 1);
        assert_eq!(report.installed, 2);
        assert_eq!(report.install_skipped, 1);
        assert!(seen.lock().unwrap().contains(&"bar".to_string()));
        assert_eq!(report.verdict, Verdict::Success);
    }

    #[tokio::test]
    async fn test_install_failure_prevents_dispatch() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let spawner = recording_spawner(seen);
        let installer = Arc::new(RecordingInstaller {
            failing: Some("baz".to_string()),
            ..Default::default()
        });
        let runner = SuiteRunner::new(Dispatcher::new(spawner.clone(), 1), "/types")
            .with_installer(installer);

        let err = assert_err!(
            runner
                .run(&package_set(&["bar", "baz"], &[]), |_, _, _| {})
                .await
        );

        assert!(matches!(err, RunError::Install(InstallError::Failed { .. })));
        assert_eq!(spawner.spawned.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_selection_succeeds_without_workers() {
        let spawner = Arc::new(FakeSpawner::passing());
        let runner = SuiteRunner::new(Dispatcher::new(spawner.clone(), 4), "/types");

        let report = assert_ok!(runner.run(&PackageSet::default(), |_, _, _| {}).await);

        assert_eq!(report.verdict, Verdict::Success);
        assert_eq!(report.tested, 0);
        assert_eq!(spawner.spawned.load(Ordering::SeqCst), 0);
    }
}
