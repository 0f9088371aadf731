//! Progress aggregation
//!
//! Fetch outcomes flow over an mpsc channel into a single consumer task that
//! owns the [`ProgressState`]. Nothing else mutates the counters, so every
//! observation is consistent. Each state change produces a [`ProgressUpdate`]
//! that is queued for a separate dispatcher task, which calls the registered
//! [`ProgressListener`] on the blocking thread pool. A slow listener therefore
//! never holds up the consumer, the workers, or the runtime threads they share.
//!
//! The dispatcher coalesces bursts: when several updates are queued it
//! delivers only the newest. The terminal update is always the last one
//! queued, so it is always delivered.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::stats::format_size;
use crate::types::{DownloadResult, Outcome};

/// Buffer size for the result channel between the pool and the aggregator
pub(crate) const RESULT_CHANNEL_BUFFER: usize = 256;

/// Copyable view of the counters at one point in time
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Planned task count
    pub total: usize,
    /// Tasks that reached a terminal state
    pub completed: usize,
    /// Tasks that succeeded
    pub succeeded: usize,
    /// Tasks that failed
    pub failed: usize,
    /// Tasks that were cancelled
    pub cancelled: usize,
    /// Bytes written by successful tasks
    pub bytes_downloaded: u64,
}

impl ProgressSnapshot {
    /// Completion percentage; an empty batch counts as complete
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.completed as f64 * 100.0 / self.total as f64
        }
    }

    /// Whether every planned task has resolved
    pub fn is_complete(&self) -> bool {
        self.completed == self.total
    }

    /// Verify the counter invariants
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        if self.completed > self.total {
            return Err(format!(
                "completed ({}) exceeds total ({})",
                self.completed, self.total
            ));
        }
        let resolved = self.succeeded + self.failed + self.cancelled;
        if resolved != self.completed {
            return Err(format!(
                "succeeded + failed + cancelled ({resolved}) != completed ({})",
                self.completed
            ));
        }
        Ok(())
    }
}

/// Counters for one chapter run, owned by the aggregator task
#[derive(Clone, Debug)]
pub struct ProgressState {
    chapter: u16,
    counters: ProgressSnapshot,
    started_at: Instant,
}

impl ProgressState {
    /// Fresh state for `total` planned tasks
    pub fn new(chapter: u16, total: usize) -> Self {
        Self {
            chapter,
            counters: ProgressSnapshot {
                total,
                ..ProgressSnapshot::default()
            },
            started_at: Instant::now(),
        }
    }

    /// Chapter the counters belong to
    pub fn chapter(&self) -> u16 {
        self.chapter
    }

    /// When the run started
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Current counters
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.counters
    }

    pub(crate) fn record(&mut self, result: &DownloadResult) {
        let counters = &mut self.counters;
        counters.completed += 1;
        match result.outcome {
            Outcome::Succeeded => {
                counters.succeeded += 1;
                counters.bytes_downloaded += result.bytes;
            }
            Outcome::Failed => counters.failed += 1,
            Outcome::Cancelled => counters.cancelled += 1,
        }
    }
}

/// One progress notification
#[derive(Clone, Debug)]
pub struct ProgressUpdate {
    /// Completion percentage (0.0 to 100.0)
    pub percent: f64,
    /// Tasks resolved so far
    pub completed: usize,
    /// Planned task count
    pub total: usize,
    /// Human-readable description of the latest event
    pub message: String,
    /// Full counters at the time of the update
    pub snapshot: ProgressSnapshot,
}

impl ProgressUpdate {
    fn new(snapshot: ProgressSnapshot, message: String) -> Self {
        Self {
            percent: snapshot.percent(),
            completed: snapshot.completed,
            total: snapshot.total,
            message,
            snapshot,
        }
    }

    /// Whether this is the final update of a run
    pub fn is_terminal(&self) -> bool {
        self.snapshot.is_complete()
    }
}

/// Receiver of progress notifications
///
/// Called on the blocking thread pool, one update at a time, never from a
/// worker. Any `Fn(&ProgressUpdate) + Send + Sync` closure is a listener.
pub trait ProgressListener: Send + Sync {
    /// Handle one update
    fn on_progress(&self, _update: &ProgressUpdate) {}
}

/// Listener that ignores every update
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopListener;

impl ProgressListener for NoopListener {}

impl<F> ProgressListener for F
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    fn on_progress(&self, update: &ProgressUpdate) {
        self(update)
    }
}

/// Terminal state and every result of a run
#[derive(Debug)]
pub struct AggregatedResults {
    /// Final counters
    pub state: ProgressState,
    /// One result per resolved task, in arrival order
    pub results: Vec<DownloadResult>,
}

/// Handle to the running consumer and dispatcher tasks
pub struct ProgressAggregator {
    results_tx: mpsc::Sender<DownloadResult>,
    consumer: JoinHandle<AggregatedResults>,
    dispatcher: JoinHandle<()>,
}

impl ProgressAggregator {
    /// Start the consumer and dispatcher for a run of `total` tasks
    pub fn spawn(chapter: u16, total: usize, listener: Arc<dyn ProgressListener>) -> Self {
        let (results_tx, results_rx) = mpsc::channel(RESULT_CHANNEL_BUFFER);
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();

        let consumer = tokio::spawn(consume_results(
            ProgressState::new(chapter, total),
            results_rx,
            updates_tx,
        ));
        let dispatcher = tokio::spawn(dispatch_updates(updates_rx, listener));

        Self {
            results_tx,
            consumer,
            dispatcher,
        }
    }

    /// Sender for task results
    pub fn sender(&self) -> mpsc::Sender<DownloadResult> {
        self.results_tx.clone()
    }

    /// Completion barrier
    ///
    /// Waits until every sender is dropped, the consumer has drained the
    /// channel, and the dispatcher has delivered the terminal update.
    pub async fn finish(self) -> Result<AggregatedResults> {
        let Self {
            results_tx,
            consumer,
            dispatcher,
        } = self;
        drop(results_tx);

        let aggregated = consumer
            .await
            .map_err(|e| Error::Task(format!("progress consumer: {e}")))?;
        dispatcher
            .await
            .map_err(|e| Error::Task(format!("progress dispatcher: {e}")))?;

        Ok(aggregated)
    }
}

async fn consume_results(
    mut state: ProgressState,
    mut results_rx: mpsc::Receiver<DownloadResult>,
    updates_tx: mpsc::UnboundedSender<ProgressUpdate>,
) -> AggregatedResults {
    let mut results = Vec::with_capacity(state.snapshot().total);

    while let Some(result) = results_rx.recv().await {
        state.record(&result);
        let snapshot = state.snapshot();
        debug_assert!(
            snapshot.check_invariants().is_ok(),
            "progress invariants violated: {snapshot:?}"
        );

        let stem = result.address.stem();
        let mut message = match (&result.outcome, &result.error) {
            (Outcome::Succeeded, _) => {
                tracing::debug!(
                    chapter = result.address.chapter,
                    verse = result.address.verse,
                    word = result.address.word,
                    bytes = result.bytes,
                    attempts = result.attempts,
                    "word downloaded"
                );
                format!("Downloaded {stem} ({})", format_size(result.bytes))
            }
            (Outcome::Failed, error) => {
                let reason = error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "unknown error".to_string());
                tracing::warn!(
                    chapter = result.address.chapter,
                    verse = result.address.verse,
                    word = result.address.word,
                    attempts = result.attempts,
                    error = %reason,
                    "Word download failed"
                );
                format!("Failed {stem}: {reason}")
            }
            (Outcome::Cancelled, _) => {
                tracing::debug!(
                    chapter = result.address.chapter,
                    verse = result.address.verse,
                    word = result.address.word,
                    "word cancelled"
                );
                format!("Cancelled {stem}")
            }
        };

        if snapshot.is_complete() {
            message = finished_message(&snapshot);
        }

        // Dispatcher only exits once this sender is dropped
        let _ = updates_tx.send(ProgressUpdate::new(snapshot, message));
        results.push(result);
    }

    let snapshot = state.snapshot();
    if snapshot.total == 0 {
        let _ = updates_tx.send(ProgressUpdate::new(
            snapshot,
            "Nothing to download".to_string(),
        ));
    } else if !snapshot.is_complete() {
        tracing::warn!(
            chapter = state.chapter(),
            completed = snapshot.completed,
            total = snapshot.total,
            "Result channel closed before every task resolved"
        );
    }

    AggregatedResults { state, results }
}

fn finished_message(snapshot: &ProgressSnapshot) -> String {
    format!(
        "Finished: {} succeeded, {} failed, {} cancelled",
        snapshot.succeeded, snapshot.failed, snapshot.cancelled
    )
}

async fn dispatch_updates(
    mut updates_rx: mpsc::UnboundedReceiver<ProgressUpdate>,
    listener: Arc<dyn ProgressListener>,
) {
    while let Some(mut update) = updates_rx.recv().await {
        // Coalesce: only the newest queued update is worth delivering
        let mut skipped = 0usize;
        while let Ok(newer) = updates_rx.try_recv() {
            update = newer;
            skipped += 1;
        }
        if skipped > 0 {
            tracing::trace!(skipped, "coalesced progress updates");
        }

        // Listeners are synchronous; keep them off the runtime threads
        let (completed, total) = (update.completed, update.total);
        let listener = listener.clone();
        let delivered =
            tokio::task::spawn_blocking(move || listener.on_progress(&update)).await;
        if let Err(e) = delivered {
            tracing::error!(
                completed,
                total,
                error = %e,
                "Progress listener panicked"
            );
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::types::AudioAddress;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    fn recording_listener() -> (Arc<dyn ProgressListener>, Arc<Mutex<Vec<ProgressUpdate>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener = move |update: &ProgressUpdate| {
            sink.lock().unwrap().push(update.clone());
        };
        (Arc::new(listener), seen)
    }

    fn success(word: u16, bytes: u64) -> DownloadResult {
        DownloadResult::succeeded(
            AudioAddress::new(1, 1, word),
            PathBuf::from(format!("001_001_{word:03}.mp3")),
            bytes,
            1,
            Duration::from_millis(1),
        )
    }

    #[test]
    fn snapshot_invariants_detect_violations() {
        let good = ProgressSnapshot {
            total: 3,
            completed: 2,
            succeeded: 1,
            failed: 1,
            cancelled: 0,
            bytes_downloaded: 10,
        };
        assert!(good.check_invariants().is_ok());

        let overrun = ProgressSnapshot {
            completed: 4,
            succeeded: 4,
            ..good
        };
        assert!(overrun.check_invariants().is_err());

        let miscounted = ProgressSnapshot {
            cancelled: 1,
            ..good
        };
        assert!(miscounted.check_invariants().is_err());
    }

    #[test]
    fn empty_batch_is_complete() {
        let snapshot = ProgressSnapshot::default();
        assert!(snapshot.is_complete());
        assert_eq!(snapshot.percent(), 100.0);
    }

    #[tokio::test]
    async fn aggregates_outcomes_and_delivers_terminal_update() {
        let (listener, seen) = recording_listener();
        let aggregator = ProgressAggregator::spawn(1, 3, listener);
        let tx = aggregator.sender();

        tx.send(success(1, 100)).await.unwrap();
        tx.send(DownloadResult::failed(
            AudioAddress::new(1, 1, 2),
            FetchError::status(404),
            1,
            Duration::from_millis(1),
        ))
        .await
        .unwrap();
        tx.send(DownloadResult::cancelled(
            AudioAddress::new(1, 1, 3),
            0,
            Duration::ZERO,
        ))
        .await
        .unwrap();
        drop(tx);

        let aggregated = aggregator.finish().await.unwrap();
        let snapshot = aggregated.state.snapshot();
        assert_eq!(snapshot.completed, 3);
        assert_eq!(snapshot.succeeded, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.cancelled, 1);
        assert_eq!(snapshot.bytes_downloaded, 100);
        assert_eq!(aggregated.results.len(), 3);

        let seen = seen.lock().unwrap();
        let last = seen.last().expect("terminal update must be delivered");
        assert_eq!(last.percent, 100.0);
        assert_eq!(last.completed, 3);
        assert_eq!(last.total, 3);
        assert!(last.is_terminal());
        assert!(last.message.starts_with("Finished"), "got {}", last.message);
        for update in seen.iter() {
            update.snapshot.check_invariants().unwrap();
        }
    }

    #[tokio::test]
    async fn empty_run_still_reports_completion() {
        let (listener, seen) = recording_listener();
        let aggregator = ProgressAggregator::spawn(1, 0, listener);

        let aggregated = aggregator.finish().await.unwrap();
        assert!(aggregated.results.is_empty());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].percent, 100.0);
        assert_eq!(seen[0].total, 0);
    }

    #[tokio::test]
    async fn slow_listener_sees_coalesced_but_monotonic_updates() {
        let seen = Arc::new(Mutex::new(Vec::<ProgressUpdate>::new()));
        let sink = seen.clone();
        let listener = move |update: &ProgressUpdate| {
            std::thread::sleep(Duration::from_millis(2));
            sink.lock().unwrap().push(update.clone());
        };
        let aggregator = ProgressAggregator::spawn(1, 50, Arc::new(listener));
        let tx = aggregator.sender();

        for word in 1..=50 {
            tx.send(success(word, 1)).await.unwrap();
        }
        drop(tx);

        let aggregated = aggregator.finish().await.unwrap();
        assert_eq!(aggregated.state.snapshot().completed, 50);

        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty() && seen.len() <= 50);
        assert!(
            seen.windows(2).all(|w| w[0].completed < w[1].completed),
            "updates must arrive in order"
        );
        let last = seen.last().unwrap();
        assert_eq!(last.completed, 50);
        assert_eq!(last.snapshot.bytes_downloaded, 50);
    }

    struct PanickingListener;

    impl ProgressListener for PanickingListener {
        fn on_progress(&self, _update: &ProgressUpdate) {
            panic!("listener exploded");
        }
    }

    #[tokio::test]
    async fn panicking_listener_does_not_break_the_run() {
        let aggregator = ProgressAggregator::spawn(1, 2, Arc::new(PanickingListener));
        let tx = aggregator.sender();

        tx.send(success(1, 5)).await.unwrap();
        tx.send(success(2, 5)).await.unwrap();
        drop(tx);

        let aggregated = aggregator.finish().await.unwrap();
        assert_eq!(aggregated.state.snapshot().succeeded, 2);
    }

    #[tokio::test]
    async fn noop_listener_accepts_updates() {
        let aggregator = ProgressAggregator::spawn(1, 1, Arc::new(NoopListener));
        aggregator.sender().send(success(1, 1)).await.unwrap();
        let aggregated = aggregator.finish().await.unwrap();
        assert!(aggregated.state.snapshot().is_complete());
    }
}
