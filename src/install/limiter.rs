//! Bounded concurrent execution
//!
//! Runs one asynchronous operation per input with at most `limit` of them in
//! flight. The first failing operation aborts every other one.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, trace};

/// Why a bounded run stopped early
#[derive(Error, Debug)]
pub enum LimiterError<E> {
    #[error("{0}")]
    Failed(E),

    #[error("Operation panicked: {0}")]
    Panicked(String),

    #[error("Limiter was closed while operations were pending")]
    Closed,
}

/// Caps the number of concurrently running operations
#[derive(Clone, Debug)]
pub struct BoundedLimiter {
    limit: usize,
}

impl BoundedLimiter {
    /// A limit of zero is treated as one
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run `op` for every input and wait for all of them.
    ///
    /// Results are returned in input order. On the first error the remaining
    /// operations are aborted and the error is returned.
    pub async fn run<T, R, E, F, Fut>(
        &self,
        inputs: Vec<T>,
        op: F,
    ) -> Result<Vec<R>, LimiterError<E>>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
    {
        let total = inputs.len();
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let completed = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();

        for (index, input) in inputs.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let completed = completed.clone();
            let operation = op(input);

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return (index, None);
                };

                trace!("Operation {} acquired a slot", index);
                let result = operation.await;
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                trace!("Operation {} finished ({}/{})", index, done, total);

                (index, Some(result))
            });
        }

        let mut results: Vec<Option<R>> = (0..total).map(|_| None).collect();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Some(Ok(value)))) => results[index] = Some(value),
                Ok((_, Some(Err(e)))) => {
                    debug!(
                        "Aborting {} pending operations after failure",
                        tasks.len()
                    );
                    tasks.abort_all();
                    return Err(LimiterError::Failed(e));
                }
                Ok((_, None)) => {
                    tasks.abort_all();
                    return Err(LimiterError::Closed);
                }
                Err(e) => {
                    tasks.abort_all();
                    return Err(LimiterError::Panicked(e.to_string()));
                }
            }
        }

        Ok(results.into_iter().flatten().collect())
    }
}
