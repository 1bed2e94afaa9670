//! Worker transport
//!
//! A worker is a long-lived process started in listening mode. It reads one
//! JSON request per line on stdin and writes one JSON response per line on
//! stdout. Everything a worker reports is forwarded as a [`WorkerEvent`] into
//! the dispatcher's single event channel.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::dispatcher::DispatchError;
use crate::models::WorkRequest;

/// Directive that puts a worker into listening mode
pub const LISTEN_DIRECTIVE: &str = "--listen";

/// How long a closed worker gets to exit before it is killed
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Something a worker did, tagged with its slot index
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerEvent {
    /// One raw response line
    Line { slot: usize, line: String },
    /// The worker is gone
    Exited { slot: usize, reason: String },
}

/// Starts workers
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    /// Start the worker for `slot`, forwarding its output to `events`
    async fn spawn(
        &self,
        slot: usize,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Box<dyn WorkerLink>, DispatchError>;
}

/// Request side of one live worker
#[async_trait]
pub trait WorkerLink: Send {
    /// Send one request
    async fn send(&mut self, request: &WorkRequest) -> Result<(), DispatchError>;

    /// Signal that no more requests follow
    fn close(&mut self);

    /// Wait for the worker to go away after [`WorkerLink::close`]
    async fn wait(&mut self);
}

/// Spawns worker processes over stdin/stdout pipes
#[derive(Clone, Debug)]
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<String>,
    cwd: PathBuf,
}

impl ProcessSpawner {
    pub fn new(program: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
        }
    }

    /// Extra arguments passed after the listen directive
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

#[async_trait]
impl WorkerSpawner for ProcessSpawner {
    async fn spawn(
        &self,
        slot: usize,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Box<dyn WorkerLink>, DispatchError> {
        let mut child = Command::new(&self.program)
            .arg(LISTEN_DIRECTIVE)
            .args(&self.args)
            .current_dir(&self.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DispatchError::Spawn {
                slot,
                program: self.program.display().to_string(),
                source,
            })?;

        debug!("Worker {} started (pid {:?})", slot, child.id());

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(DispatchError::Spawn {
                slot,
                program: self.program.display().to_string(),
                source: std::io::Error::other("worker pipes unavailable"),
            });
        };

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        trace!("Worker {} -> {}", slot, line);
                        if events.send(WorkerEvent::Line { slot, line }).is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Worker {} stdout unreadable: {}", slot, e);
                        break;
                    }
                }
            }

            let reason = match child.wait().await {
                Ok(status) => format!("process exited with {status}"),
                Err(e) => format!("failed to wait for process: {e}"),
            };
            let _ = events.send(WorkerEvent::Exited { slot, reason });
        });

        Ok(Box::new(ProcessLink {
            slot,
            stdin: Some(stdin),
            reader,
        }))
    }
}

struct ProcessLink {
    slot: usize,
    stdin: Option<ChildStdin>,
    reader: JoinHandle<()>,
}

#[async_trait]
impl WorkerLink for ProcessLink {
    async fn send(&mut self, request: &WorkRequest) -> Result<(), DispatchError> {
        let slot = self.slot;
        let stdin = self
            .stdin
            .as_mut()
            .ok_or(DispatchError::ChannelClosed { slot })?;

        let mut line = serde_json::to_vec(request).map_err(|e| DispatchError::Channel {
            slot,
            source: std::io::Error::other(e),
        })?;
        line.push(b'\n');

        stdin
            .write_all(&line)
            .await
            .map_err(|source| DispatchError::Channel { slot, source })?;
        stdin
            .flush()
            .await
            .map_err(|source| DispatchError::Channel { slot, source })
    }

    fn close(&mut self) {
        self.stdin.take();
    }

    async fn wait(&mut self) {
        self.close();
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut self.reader)
            .await
            .is_err()
        {
            warn!("Worker {} did not exit after close, killing it", self.slot);
            self.reader.abort();
        }
    }
}

impl Drop for ProcessLink {
    fn drop(&mut self) {
        // The reader task owns the child; aborting it kills the process.
        self.reader.abort();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::{Response, Variant, WorkItem};

    const ECHO_WORKER: &str = r#"
[ "$1" = "--listen" ] || exit 9
while IFS= read -r line; do
  path=$(printf '%s' "$line" | sed 's/.*"path":"\([^"]*\)".*/\1/')
  printf '{"path":"%s","status":"OK"}\n' "$path"
done
"#;

    fn write_worker(dir: &std::path::Path, body: &str) -> PathBuf {
        let path = dir.join("worker.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_process_worker_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let program = write_worker(dir.path(), ECHO_WORKER);
        let spawner = ProcessSpawner::new(program, dir.path());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut link = spawner.spawn(0, tx).await.unwrap();
        link.send(&WorkItem::new("foo", Variant::Full).request())
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            WorkerEvent::Line { slot, line } => {
                assert_eq!(slot, 0);
                assert_eq!(Response::decode(&line).unwrap(), Response::success("foo"));
            }
            other => panic!("expected a line, got {other:?}"),
        }

        link.wait().await;
        assert!(matches!(
            rx.recv().await,
            Some(WorkerEvent::Exited { slot: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_process_worker_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let program = write_worker(dir.path(), "read -r line; exit 3");
        let spawner = ProcessSpawner::new(program, dir.path());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut link = spawner.spawn(1, tx).await.unwrap();
        link.send(&WorkItem::new("foo", Variant::Full).request())
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            WorkerEvent::Exited { slot, reason } => {
                assert_eq!(slot, 1);
                assert!(reason.contains('3'), "unexpected reason: {reason}");
            }
            other => panic!("expected exit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let spawner = ProcessSpawner::new("/nonexistent/worker", "/");
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(
            spawner.spawn(0, tx).await,
            Err(DispatchError::Spawn { slot: 0, .. })
        ));
    }
}
