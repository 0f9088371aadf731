//! Shared test helpers: a scripted in-memory audio source and downloader builders.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::catalog::{ChapterInfo, StaticCatalog};
use crate::config::Config;
use crate::downloader::{AudioSource, ChapterDownloader};
use crate::error::FetchError;

/// Base URL used by every test downloader
pub(crate) const MOCK_BASE_URL: &str = "http://mock.test/words";

/// What the mock answers for one attempt
#[derive(Clone, Debug)]
pub(crate) enum MockResponse {
    Body(Vec<u8>),
    Error(FetchError),
}

/// In-memory [`AudioSource`] with per-file scripts and concurrency tracking.
///
/// Files are keyed by stem (`001_001_001`). Unscripted files, and scripted
/// files whose script ran out, answer with a small body.
#[derive(Default)]
pub(crate) struct MockSource {
    delay: Duration,
    scripts: Mutex<HashMap<String, VecDeque<MockResponse>>>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    completed: AtomicUsize,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl MockSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Hold every attempt for `delay` before answering
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Answer attempts on `stem` with `responses`, in order
    pub(crate) fn script(self, stem: &str, responses: Vec<MockResponse>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(stem.to_string(), responses.into());
        self
    }

    /// Fire `token` once `count` attempts have completed
    pub(crate) fn cancel_after(mut self, count: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((count, token));
        self
    }

    /// Stems in the order attempts started
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Attempts made for `stem`
    pub(crate) fn attempts_for(&self, stem: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == stem).count()
    }

    /// Highest number of concurrent attempts observed
    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

fn stem_of(url: &str) -> String {
    let file = url.rsplit('/').next().unwrap_or(url);
    file.split('.').next().unwrap_or(file).to_string()
}

#[async_trait::async_trait]
impl AudioSource for MockSource {
    async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        _timeout: Duration,
    ) -> Result<u64, FetchError> {
        let stem = stem_of(url);
        self.calls.lock().unwrap().push(stem.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let response = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&stem)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| MockResponse::Body(format!("audio {stem}").into_bytes()));

        let result = match response {
            MockResponse::Body(body) => tokio::fs::write(destination, &body)
                .await
                .map(|()| body.len() as u64)
                .map_err(FetchError::from),
            MockResponse::Error(e) => Err(e),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((count, token)) = &self.cancel_after {
            if completed == *count {
                token.cancel();
            }
        }
        result
    }
}

/// Catalog with chapter 1 ("Al-Fatihah") and the given words per verse
pub(crate) fn test_catalog(words_per_verse: &[u16]) -> Arc<StaticCatalog> {
    let counts: BTreeMap<u16, u16> = words_per_verse
        .iter()
        .enumerate()
        .map(|(i, &words)| (i as u16 + 1, words))
        .collect();
    Arc::new(StaticCatalog::new().with_chapter(
        ChapterInfo {
            id: 1,
            name_native: "الفاتحة".to_string(),
            name_translated: "Al-Fatihah".to_string(),
            verse_count: words_per_verse.len() as u16,
        },
        counts,
    ))
}

/// Config pointing at `download_dir` with fast retries
pub(crate) fn test_config(download_dir: &Path) -> Config {
    let mut config = Config::default();
    config.download.download_dir = download_dir.to_path_buf();
    config.download.base_url = MOCK_BASE_URL.to_string();
    config.retry.initial_delay = Duration::from_millis(1);
    config.retry.max_delay = Duration::from_millis(5);
    config
}

/// Downloader over `catalog` using `source`, with `config`
pub(crate) fn test_downloader(
    config: Config,
    catalog: Arc<StaticCatalog>,
    source: Arc<MockSource>,
) -> ChapterDownloader {
    ChapterDownloader::new(config, catalog)
        .unwrap()
        .with_source(source)
}
