//! Bounded worker pool: FIFO admission, at most `concurrency` fetches in flight.

use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::fetch::FetchWorker;
use crate::types::{DownloadResult, DownloadTask};

/// Counts reported once the pool has drained
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolSummary {
    /// Tasks handed to the fetch worker
    pub dispatched: usize,
    /// Tasks resolved as cancelled without a fetch
    pub skipped: usize,
}

/// Dispatches tasks to a [`FetchWorker`] under a concurrency cap.
///
/// Tasks are admitted in iteration order; a new one starts only when a slot
/// frees up. Once the cancellation token fires, every task admitted afterwards
/// resolves as cancelled without touching the network, while attempts already
/// on the wire run to completion.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    concurrency: usize,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Pool with `concurrency` slots (at least one)
    pub fn new(concurrency: usize, cancel: CancellationToken) -> Self {
        Self {
            concurrency: concurrency.max(1),
            cancel,
        }
    }

    /// Slot count
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run every task to a terminal result and send it to `results`
    ///
    /// Returns once every task has resolved and its result was handed off.
    pub async fn run<I>(
        &self,
        tasks: I,
        worker: &FetchWorker,
        results: mpsc::Sender<DownloadResult>,
    ) -> PoolSummary
    where
        I: IntoIterator<Item = DownloadTask>,
    {
        let dispatched = AtomicUsize::new(0);
        let skipped = AtomicUsize::new(0);
        let cancel = &self.cancel;

        stream::iter(tasks)
            .map(|task| {
                let dispatched = &dispatched;
                let skipped = &skipped;
                async move {
                    if cancel.is_cancelled() {
                        skipped.fetch_add(1, Ordering::Relaxed);
                        return DownloadResult::cancelled(task.address, 0, Duration::ZERO);
                    }
                    dispatched.fetch_add(1, Ordering::Relaxed);
                    worker.run(task).await
                }
            })
            .buffer_unordered(self.concurrency)
            .for_each(|result| {
                let results = &results;
                async move {
                    if results.send(result).await.is_err() {
                        tracing::error!("Result channel closed while the pool was running");
                    }
                }
            })
            .await;

        let summary = PoolSummary {
            dispatched: dispatched.load(Ordering::Relaxed),
            skipped: skipped.load(Ordering::Relaxed),
        };
        if summary.skipped > 0 {
            tracing::info!(
                dispatched = summary.dispatched,
                skipped = summary.skipped,
                "Pool drained after cancellation"
            );
        }
        summary
    }
}
