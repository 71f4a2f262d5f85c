//! Bounded-concurrency scheduler
//!
//! Runs a collection of work items on the tokio runtime with a hard ceiling
//! on how many worker invocations are active at once. This module handles:
//! - Admission control via a semaphore (one permit per active worker)
//! - Cancellation: once the token fires, nothing new is admitted
//! - Batch-level halts: a worker may report a fatal condition that stops
//!   admission for the rest of the batch
//! - Panic containment: a panicking worker is reported, not propagated

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// What a worker reports for one item
#[derive(Debug, Clone, PartialEq)]
pub enum Completion<R, E> {
    /// The item is finished; keep going
    Done(R),

    /// The item is finished, and the rest of the batch must not be admitted
    Halt { result: R, reason: E },
}

/// Everything a scheduler run produced
#[derive(Debug)]
pub struct SchedulerReport<T, R, E> {
    /// Results of every worker that ran, in completion order
    pub completed: Vec<R>,

    /// Items never admitted because of cancellation or a halt
    pub cancelled: Vec<T>,

    /// Items whose worker panicked
    pub panicked: Vec<T>,

    /// The first halt reason reported, if any
    pub halted: Option<E>,
}

impl<T, R, E> SchedulerReport<T, R, E> {
    fn new() -> Self {
        Self {
            completed: Vec::new(),
            cancelled: Vec::new(),
            panicked: Vec::new(),
            halted: None,
        }
    }

    /// Total number of items accounted for
    pub fn total(&self) -> usize {
        self.completed.len() + self.cancelled.len() + self.panicked.len()
    }
}

/// Runs work items with a fixed concurrency ceiling
#[derive(Debug, Clone)]
pub struct BoundedScheduler {
    limit: usize,
    cancel: CancellationToken,
}

impl BoundedScheduler {
    /// Creates a scheduler admitting at most `limit` workers at once
    ///
    /// A limit of zero is treated as one.
    pub fn new(limit: usize, cancel: CancellationToken) -> Self {
        Self {
            limit: limit.max(1),
            cancel,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Runs `worker` over `items` and waits until every admitted worker finishes
    ///
    /// Workers run as separate tokio tasks, so a slow worker only ever holds
    /// its own permit. Per-item failures are the worker's business and come
    /// back inside `R`; only [`Completion::Halt`] stops the batch early.
    pub async fn run<T, R, E, F, Fut>(&self, items: Vec<T>, worker: F) -> SchedulerReport<T, R, E>
    where
        T: Clone + Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Completion<R, E>> + Send + 'static,
    {
        let batch = self.cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let worker = Arc::new(worker);
        let mut tasks = JoinSet::new();
        let mut report = SchedulerReport::new();
        let mut pending = items.into_iter();

        while let Some(item) = pending.next() {
            let permit = tokio::select! {
                biased;
                _ = batch.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };

            let Some(permit) = permit.filter(|_| !batch.is_cancelled()) else {
                report.cancelled.push(item);
                report.cancelled.extend(pending.by_ref());
                break;
            };

            let worker = Arc::clone(&worker);
            let batch = batch.clone();
            let original = item.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = AssertUnwindSafe((*worker)(item)).catch_unwind().await;
                if let Ok(Completion::Halt { .. }) = &outcome {
                    batch.cancel();
                }
                (original, outcome)
            });
        }

        if !report.cancelled.is_empty() {
            tracing::info!(
                "Scheduler stopped admitting work, {} item(s) not started",
                report.cancelled.len()
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(Completion::Done(result)))) => report.completed.push(result),
                Ok((_, Ok(Completion::Halt { result, reason }))) => {
                    report.completed.push(result);
                    if report.halted.is_none() {
                        report.halted = Some(reason);
                    }
                }
                Ok((item, Err(_))) => {
                    tracing::error!("Worker panicked; item recorded as failed");
                    report.panicked.push(item);
                }
                Err(e) => {
                    // Tasks are never aborted and panics are caught inside them
                    tracing::error!("Worker task could not be joined: {}", e);
                }
            }
        }

        report
    }
}
