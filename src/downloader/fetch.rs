//! Fetch worker: one task, bounded retries, one terminal result.

use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::{Error, FetchError};
use crate::retry::{RetryOutcome, run_with_retry};
use crate::types::{AudioAddress, DownloadResult, DownloadTask, TaskState};

/// Abstraction over the remote audio store, enabling testability.
///
/// An implementation writes the body of `url` to `destination` and returns
/// the number of bytes written. It must not leave a partial file at
/// `destination` when it fails.
#[async_trait::async_trait]
pub trait AudioSource: Send + Sync {
    /// Fetch one file within `timeout`
    async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        timeout: Duration,
    ) -> Result<u64, FetchError>;
}

/// Production [`AudioSource`] backed by reqwest.
pub struct HttpAudioSource {
    client: reqwest::Client,
}

impl HttpAudioSource {
    /// Build a client that identifies itself as `user_agent`
    pub fn new(user_agent: &str) -> Result<Self, Error> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client })
    }

    /// Use an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// `destination` with `.part` appended
pub(crate) fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

async fn stream_to_file(response: reqwest::Response, path: &Path) -> Result<u64, FetchError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

#[async_trait::async_trait]
impl AudioSource for HttpAudioSource {
    async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        timeout: Duration,
    ) -> Result<u64, FetchError> {
        let response = self.client.get(url).timeout(timeout).send().await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(FetchError::status(status.as_u16()));
        }

        let part = part_path(destination);
        let result = match stream_to_file(response, &part).await {
            Ok(bytes) => tokio::fs::rename(&part, destination)
                .await
                .map(|()| bytes)
                .map_err(FetchError::from),
            Err(e) => Err(e),
        };

        if result.is_err() {
            if let Err(e) = tokio::fs::remove_file(&part).await {
                tracing::trace!(path = ?part, error = %e, "no partial file to remove");
            }
        }
        result
    }
}

/// Drives one [`DownloadTask`] to a terminal [`DownloadResult`].
#[derive(Clone)]
pub struct FetchWorker {
    source: Arc<dyn AudioSource>,
    retry: RetryConfig,
    timeout: Duration,
    cancel: CancellationToken,
}

impl FetchWorker {
    /// Worker fetching from `source`
    pub fn new(
        source: Arc<dyn AudioSource>,
        retry: RetryConfig,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            retry,
            timeout,
            cancel,
        }
    }

    /// Run `task` through attempts and backoff until it reaches a terminal state
    pub async fn run(&self, mut task: DownloadTask) -> DownloadResult {
        let started = Instant::now();
        let address = task.address;
        let source = &self.source;
        let url = task.url.as_str();
        let destination = task.destination.as_path();
        let timeout = self.timeout;
        let mut state = TaskState::Pending;

        let outcome = run_with_retry(&self.retry, &self.cancel, |attempt| {
            if attempt > 1 {
                enter(&mut state, TaskState::Retrying, &address);
            }
            enter(&mut state, TaskState::InFlight, &address);
            tracing::trace!(
                chapter = address.chapter,
                verse = address.verse,
                word = address.word,
                attempt,
                "fetching word"
            );
            async move { source.fetch(url, destination, timeout).await }
        })
        .await;

        task.attempts = outcome.attempts();
        let elapsed = started.elapsed();

        let result = match outcome {
            RetryOutcome::Succeeded { value: bytes, .. } => {
                enter(&mut state, TaskState::Succeeded, &address);
                DownloadResult::succeeded(address, task.destination, bytes, task.attempts, elapsed)
            }
            RetryOutcome::Failed { error, .. } => {
                enter(&mut state, TaskState::Failed, &address);
                DownloadResult::failed(address, error, task.attempts, elapsed)
            }
            RetryOutcome::Cancelled { .. } => {
                // Only observed while waiting out a backoff
                enter(&mut state, TaskState::Retrying, &address);
                enter(&mut state, TaskState::Cancelled, &address);
                DownloadResult::cancelled(address, task.attempts, elapsed)
            }
        };
        debug_assert!(
            state.is_terminal(),
            "{address} resolved in non-terminal state {state:?}"
        );
        tracing::trace!(
            %address,
            ?state,
            attempts = result.attempts,
            "task resolved"
        );
        result
    }
}

/// Move `state` to `next`, reporting transitions the task lifecycle forbids
fn enter(state: &mut TaskState, next: TaskState, address: &AudioAddress) {
    let from = *state;
    if !state.advance(next) {
        tracing::warn!(
            %address,
            from = ?from,
            to = ?next,
            "Ignoring illegal task state transition"
        );
    }
}
