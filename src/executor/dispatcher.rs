//! Persistent worker dispatch
//!
//! Spawns a fixed pool of listening workers and keeps each one busy with one
//! work item at a time until the queue drains. All bookkeeping happens in a
//! single loop that folds worker events in arrival order, so the queue, the
//! slot table and the response handler never see concurrent access.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::worker::{ProcessSpawner, WorkerEvent, WorkerLink, WorkerSpawner};
use crate::models::{DecodeError, Response, WorkItem};
use crate::utils::millis;

/// Infrastructure errors. Every variant aborts the whole dispatch.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Worker count must be at least 1")]
    NoWorkers,

    #[error("Only {items} work items for {processes} worker processes")]
    InsufficientWork { items: usize, processes: usize },

    #[error("Failed to start worker {slot} (`{program}`): {source}")]
    Spawn {
        slot: usize,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to send request to worker {slot}: {source}")]
    Channel {
        slot: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker {slot} no longer accepts requests")]
    ChannelClosed { slot: usize },

    #[error("Worker {slot} crashed while testing {}: {reason}", .unit.as_deref().unwrap_or("nothing"))]
    WorkerCrashed {
        slot: usize,
        unit: Option<String>,
        reason: String,
    },

    #[error("Malformed response from worker {slot}: {source} (line: {line})")]
    Decode {
        slot: usize,
        line: String,
        #[source]
        source: DecodeError,
    },

    #[error("Worker {slot} answered for {got} but was assigned {}", .expected.as_deref().unwrap_or("nothing"))]
    UnexpectedResponse {
        slot: usize,
        expected: Option<String>,
        got: String,
    },

    #[error("All workers disconnected with {0} responses outstanding")]
    Disconnected(usize),
}

/// One live worker and the unit it is working on
struct WorkerSlot {
    index: usize,
    link: Box<dyn WorkerLink>,
    current: Option<WorkItem>,
    completed: usize,
    retired: bool,
}

impl WorkerSlot {
    fn new(index: usize, link: Box<dyn WorkerLink>) -> Self {
        Self {
            index,
            link,
            current: None,
            completed: 0,
            retired: false,
        }
    }

    async fn assign(&mut self, item: WorkItem) -> Result<(), DispatchError> {
        debug!("Worker {} <- {}", self.index, item);
        self.link.send(&item.request()).await?;
        self.current = Some(item);
        Ok(())
    }

    /// Match a response against the assigned item and free the slot
    fn complete(&mut self, response: &Response) -> Result<WorkItem, DispatchError> {
        match self.current.take() {
            Some(item) if item.unit_id == response.unit_id => {
                self.completed += 1;
                Ok(item)
            }
            other => Err(DispatchError::UnexpectedResponse {
                slot: self.index,
                expected: other.map(|item| item.unit_id),
                got: response.unit_id.clone(),
            }),
        }
    }

    fn retire(&mut self) {
        debug!("Worker {} retired after {} items", self.index, self.completed);
        self.retired = true;
        self.link.close();
    }
}

/// Counts from a completed dispatch
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub workers: usize,
    pub responses: usize,
    /// Items completed by each worker, indexed by slot
    pub per_worker: Vec<usize>,
    pub duration: Duration,
}

/// Pool settings for process-backed workers
#[derive(Clone, Debug)]
pub struct DispatchOptions {
    /// Worker executable, started with the listen directive
    pub worker: PathBuf,
    pub extra_args: Vec<String>,
    pub processes: usize,
    /// Working directory of every worker
    pub cwd: PathBuf,
}

impl DispatchOptions {
    pub fn dispatcher(&self) -> Dispatcher {
        let spawner =
            ProcessSpawner::new(&self.worker, &self.cwd).with_args(self.extra_args.clone());
        Dispatcher::new(Arc::new(spawner), self.processes)
    }
}

/// Drives a fixed-size pool of persistent workers
#[derive(Clone)]
pub struct Dispatcher {
    spawner: Arc<dyn WorkerSpawner>,
    processes: usize,
}

impl Dispatcher {
    pub fn new(spawner: Arc<dyn WorkerSpawner>, processes: usize) -> Self {
        Self { spawner, processes }
    }

    pub fn processes(&self) -> usize {
        self.processes
    }

    /// Run every item through the pool.
    ///
    /// `on_response` is called exactly once per item, in arrival order, from
    /// the dispatching task. Item failures are ordinary responses; only
    /// infrastructure problems produce an error, and the first one ends the
    /// dispatch with the remaining workers torn down.
    pub async fn dispatch<F>(
        &self,
        items: Vec<WorkItem>,
        mut on_response: F,
    ) -> Result<DispatchSummary, DispatchError>
    where
        F: FnMut(&Response),
    {
        let processes = self.processes;
        if processes == 0 {
            return Err(DispatchError::NoWorkers);
        }
        if items.len() < processes {
            return Err(DispatchError::InsufficientWork {
                items: items.len(),
                processes,
            });
        }

        info!(
            "Dispatching {} items to {} workers",
            items.len(),
            processes
        );

        let start = Instant::now();
        let total = items.len();
        let mut queue: VecDeque<WorkItem> = items.into();
        let (events_tx, mut events) = mpsc::unbounded_channel();

        let mut slots = Vec::with_capacity(processes);
        for index in 0..processes {
            let link = self.spawner.spawn(index, events_tx.clone()).await?;
            slots.push(WorkerSlot::new(index, link));
        }
        drop(events_tx);

        for slot in &mut slots {
            if let Some(item) = queue.pop_front() {
                slot.assign(item).await?;
            }
        }

        let mut received = 0;
        while received < total {
            let Some(event) = events.recv().await else {
                return Err(DispatchError::Disconnected(total - received));
            };

            match event {
                WorkerEvent::Line { slot, line } => {
                    let worker = &mut slots[slot];
                    let response = Response::decode(&line).map_err(|source| {
                        DispatchError::Decode {
                            slot,
                            line: line.clone(),
                            source,
                        }
                    })?;

                    worker.complete(&response)?;
                    received += 1;
                    on_response(&response);

                    match queue.pop_front() {
                        Some(next) => worker.assign(next).await?,
                        None => worker.retire(),
                    }
                }
                WorkerEvent::Exited { slot, reason } => {
                    let worker = &slots[slot];
                    if worker.retired {
                        debug!("Worker {} exited: {}", slot, reason);
                        continue;
                    }

                    warn!("Worker {} crashed: {}", slot, reason);
                    return Err(DispatchError::WorkerCrashed {
                        slot,
                        unit: worker.current.as_ref().map(|item| item.unit_id.clone()),
                        reason,
                    });
                }
            }
        }

        for slot in &mut slots {
            slot.link.wait().await;
        }

        let summary = DispatchSummary {
            workers: processes,
            responses: received,
            per_worker: slots.iter().map(|slot| slot.completed).collect(),
            duration: start.elapsed(),
        };

        info!(
            "Dispatch completed in {}ms ({} responses)",
            millis(summary.duration),
            summary.responses
        );

        Ok(summary)
    }
}
