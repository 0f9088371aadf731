use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::downloader::test_helpers::{MockSource, test_catalog, test_config, test_downloader};
use crate::downloader::{FetchWorker, WorkerPool};
use crate::types::{AudioAddress, DownloadTask, Outcome};

// -----------------------------------------------------------------------
// concurrency cap
// -----------------------------------------------------------------------

#[tokio::test]
async fn never_more_than_limit_in_flight() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MockSource::new().with_delay(Duration::from_millis(20)));
    let mut config = test_config(dir.path());
    config.download.concurrency = 2;

    let downloader = test_downloader(config, test_catalog(&[10]), source.clone());
    let report = downloader.download_chapter(1).await.unwrap();

    assert_eq!(report.stats.succeeded, 10);
    assert!(
        source.max_in_flight() <= 2,
        "observed {} concurrent fetches",
        source.max_in_flight()
    );
    assert_eq!(source.max_in_flight(), 2, "both slots should be used");
}

#[tokio::test]
async fn single_slot_dispatches_in_plan_order() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MockSource::new());
    let mut config = test_config(dir.path());
    config.download.concurrency = 1;

    let downloader = test_downloader(config, test_catalog(&[3, 2]), source.clone());
    downloader.download_chapter(1).await.unwrap();

    assert_eq!(
        source.calls(),
        vec![
            "001_001_001",
            "001_001_002",
            "001_001_003",
            "001_002_001",
            "001_002_002",
        ]
    );
}

#[tokio::test]
async fn every_address_is_dispatched_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MockSource::new().with_delay(Duration::from_millis(2)));
    let mut config = test_config(dir.path());
    config.download.concurrency = 5;

    let downloader = test_downloader(config, test_catalog(&[4, 4, 4]), source.clone());
    let report = downloader.download_chapter(1).await.unwrap();

    let calls = source.calls();
    let mut unique = calls.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(calls.len(), 12);
    assert_eq!(unique.len(), 12);
    assert_eq!(report.manifest.entries.len(), 12);
}

// -----------------------------------------------------------------------
// pool used directly
// -----------------------------------------------------------------------

fn tasks(dir: &std::path::Path, count: u16) -> Vec<DownloadTask> {
    (1..=count)
        .map(|word| {
            let address = AudioAddress::new(1, 1, word);
            DownloadTask::new(
                address,
                format!("http://mock.test/words/1/{}.mp3", address.stem()),
                dir.join(format!("{}.mp3", address.stem())),
            )
        })
        .collect()
}

#[tokio::test]
async fn pre_cancelled_pool_skips_every_task() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MockSource::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let worker = FetchWorker::new(
        source.clone(),
        RetryConfig::default(),
        Duration::from_secs(1),
        cancel.clone(),
    );
    let pool = WorkerPool::new(3, cancel);
    let (tx, mut rx) = mpsc::channel(16);

    let summary = pool.run(tasks(dir.path(), 4), &worker, tx).await;

    assert_eq!(summary.dispatched, 0);
    assert_eq!(summary.skipped, 4);
    assert!(source.calls().is_empty());

    let mut resolved = 0;
    while let Some(result) = rx.recv().await {
        assert_eq!(result.outcome, Outcome::Cancelled);
        assert_eq!(result.attempts, 0);
        resolved += 1;
    }
    assert_eq!(resolved, 4);
}

#[tokio::test]
async fn zero_concurrency_is_clamped_to_one_slot() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MockSource::new());
    let cancel = CancellationToken::new();
    let worker = FetchWorker::new(
        source.clone(),
        RetryConfig::default(),
        Duration::from_secs(1),
        cancel.clone(),
    );
    let pool = WorkerPool::new(0, cancel);
    assert_eq!(pool.concurrency(), 1);

    let (tx, _rx) = mpsc::channel(16);
    let summary = pool.run(tasks(dir.path(), 3), &worker, tx).await;
    assert_eq!(summary.dispatched, 3);
    assert_eq!(source.max_in_flight(), 1);
}
