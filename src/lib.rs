//! # wbw-audio-dl
//!
//! Concurrent downloader for word-by-word recitation audio.
//!
//! Every word of a chapter lives at its own URL, addressed by
//! (chapter, verse, word). This crate enumerates those addresses from a
//! catalog, fetches them with bounded parallelism, retries transient
//! failures with exponential backoff, reports progress to a listener, and
//! packs each chapter into a zip archive with a manifest describing the
//! outcome of every word.
//!
//! ## Design Philosophy
//!
//! - **Library-first** - No CLI or UI; the demo under `demos/` shows wiring
//! - **Sensible defaults** - Five workers, three retries, 30 second timeouts
//! - **Partial failure is normal** - A missing word never aborts the chapter
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use wbw_audio_dl::{ChapterDownloader, Config, ProgressUpdate, StaticCatalog};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = StaticCatalog::from_path("catalog.json".as_ref())?;
//!     let downloader = ChapterDownloader::new(Config::default(), Arc::new(catalog))?
//!         .with_listener(Arc::new(|update: &ProgressUpdate| {
//!             println!("{:5.1}% {}", update.percent, update.message);
//!         }));
//!
//!     // Ctrl+C stops admitting new words; finished words are still archived
//!     wbw_audio_dl::cancel_on_signal(downloader.cancellation_token());
//!
//!     let report = downloader.download_chapter(1).await?;
//!     println!("{} -> {}", report.stats, report.archive_path.display());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Address enumeration, URL templating and on-disk layout
pub mod address;
/// Manifest building and archive assembly
pub mod archive;
/// Chapter and verse metadata
pub mod catalog;
/// Configuration types
pub mod config;
/// Chapter download orchestration, worker pool and fetch worker
pub mod downloader;
/// Error types
pub mod error;
/// Progress aggregation and listener dispatch
pub mod progress;
/// Retry logic with exponential backoff
pub mod retry;
/// Run statistics and formatting
pub mod stats;
/// Core types
pub mod types;

pub use address::{AddressPlan, AddressRange, ChapterLayout, SourceTemplate};
pub use archive::{ArchiveAssembler, Manifest, ManifestEntry};
pub use catalog::{CatalogProvider, ChapterInfo, StaticCatalog};
pub use config::{ArchiveConfig, Config, DownloadConfig, RetryConfig};
pub use downloader::{AudioSource, ChapterDownloader, ChapterReport, HttpAudioSource};
pub use error::{ArchiveError, CatalogError, Error, ErrorKind, FetchError, Result};
pub use progress::{NoopListener, ProgressListener, ProgressSnapshot, ProgressUpdate};
pub use stats::DownloadStats;
pub use types::{AudioAddress, DownloadResult, Outcome};

use tokio_util::sync::CancellationToken;

/// Cancel `token` when the process receives SIGTERM or SIGINT (Ctrl+C)
///
/// Spawns a background task. The task also exits quietly if the token is
/// cancelled by something else first.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use wbw_audio_dl::{ChapterDownloader, Config, StaticCatalog, cancel_on_signal};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let downloader = ChapterDownloader::new(Config::default(), Arc::new(StaticCatalog::new()))?;
/// cancel_on_signal(downloader.cancellation_token());
/// # Ok(())
/// # }
/// ```
pub fn cancel_on_signal(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = wait_for_signal() => {
                tracing::info!("Cancelling downloads after signal");
                token.cancel();
            }
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register signal handlers, using ctrl_c fallback");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            // Never cancel on a broken listener
            std::future::pending::<()>().await;
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn signal_watcher_exits_when_token_cancelled_elsewhere() {
        let token = CancellationToken::new();
        let watcher = cancel_on_signal(token.clone());

        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), watcher)
            .await
            .expect("watcher should exit promptly")
            .unwrap();
    }
}
