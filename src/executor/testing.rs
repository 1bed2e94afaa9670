//! In-memory workers for tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::dispatcher::DispatchError;
use super::worker::{WorkerEvent, WorkerLink, WorkerSpawner};
use crate::models::{Response, WorkRequest};

/// How a fake worker answers one request
#[derive(Clone, Debug)]
pub enum FakeReply {
    Pass,
    Fail(String),
    /// Write this exact line
    Raw(String),
    /// Exit without answering
    Crash,
}

type Script = dyn Fn(&WorkRequest) -> FakeReply + Send + Sync;

/// Spawns in-process workers that answer according to a script
pub struct FakeSpawner {
    script: Arc<Script>,
    pub spawned: AtomicUsize,
    pub requests: Arc<AtomicUsize>,
    pub peak_in_flight: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
}

impl FakeSpawner {
    pub fn new(script: impl Fn(&WorkRequest) -> FakeReply + Send + Sync + 'static) -> Self {
        Self {
            script: Arc::new(script),
            spawned: AtomicUsize::new(0),
            requests: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn passing() -> Self {
        Self::new(|_| FakeReply::Pass)
    }
}

#[async_trait]
impl WorkerSpawner for FakeSpawner {
    async fn spawn(
        &self,
        slot: usize,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Box<dyn WorkerLink>, DispatchError> {
        self.spawned.fetch_add(1, Ordering::SeqCst);

        let (requests_tx, mut requests_rx) = mpsc::unbounded_channel::<WorkRequest>();
        let script = self.script.clone();
        let requests = self.requests.clone();
        let in_flight = self.in_flight.clone();
        let peak = self.peak_in_flight.clone();

        let task = tokio::spawn(async move {
            while let Some(request) = requests_rx.recv().await {
                requests.fetch_add(1, Ordering::SeqCst);
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);

                // Uneven per-item cost so responses interleave across workers
                let cost = 1 + (request.path.len() as u64 * 3 + slot as u64) % 4;
                tokio::time::sleep(Duration::from_millis(cost)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);

                let line = match (*script)(&request) {
                    FakeReply::Pass => Response::success(&request.path).encode(),
                    FakeReply::Fail(message) => Response::failure(&request.path, message).encode(),
                    FakeReply::Raw(line) => line,
                    FakeReply::Crash => {
                        let _ = events.send(WorkerEvent::Exited {
                            slot,
                            reason: "killed by signal 11".to_string(),
                        });
                        return;
                    }
                };

                if events.send(WorkerEvent::Line { slot, line }).is_err() {
                    return;
                }
            }

            let _ = events.send(WorkerEvent::Exited {
                slot,
                reason: "exit status: 0".to_string(),
            });
        });

        Ok(Box::new(FakeLink {
            slot,
            requests: Some(requests_tx),
            task,
        }))
    }
}

struct FakeLink {
    slot: usize,
    requests: Option<mpsc::UnboundedSender<WorkRequest>>,
    task: JoinHandle<()>,
}

#[async_trait]
impl WorkerLink for FakeLink {
    async fn send(&mut self, request: &WorkRequest) -> Result<(), DispatchError> {
        let slot = self.slot;
        self.requests
            .as_ref()
            .ok_or(DispatchError::ChannelClosed { slot })?
            .send(request.clone())
            .map_err(|_| DispatchError::ChannelClosed { slot })
    }

    fn close(&mut self) {
        self.requests.take();
    }

    async fn wait(&mut self) {
        self.close();
        let _ = (&mut self.task).await;
    }
}

impl Drop for FakeLink {
    fn drop(&mut self) {
        self.task.abort();
    }
}
