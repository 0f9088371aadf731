//! Chapter download orchestration.
//!
//! The [`ChapterDownloader`] ties the pieces together for one chapter:
//! - [`AddressPlan`] enumerates the words to fetch
//! - [`pool`] admits tasks under the concurrency cap
//! - [`fetch`] runs each task through attempts, timeouts and backoff
//! - [`ProgressAggregator`] owns the counters and notifies the listener
//! - [`archive`](crate::archive) packs the results once every task resolved

pub mod fetch;
pub mod pool;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::address::{AddressPlan, AddressRange, ChapterLayout, SourceTemplate};
use crate::archive::{ArchiveAssembler, Manifest, build_manifest};
use crate::catalog::{CatalogProvider, ChapterInfo};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::progress::{NoopListener, ProgressAggregator, ProgressListener};
use crate::stats::DownloadStats;
use crate::types::DownloadTask;

pub use fetch::{AudioSource, FetchWorker, HttpAudioSource};
pub use pool::{PoolSummary, WorkerPool};

/// Name of the file written and removed to check the staging directory
const WRITE_PROBE_NAME: &str = ".write-probe";

/// Everything a finished chapter run produced
#[derive(Clone, Debug)]
pub struct ChapterReport {
    /// The chapter that was downloaded
    pub chapter: ChapterInfo,
    /// The written zip archive
    pub archive_path: PathBuf,
    /// The manifest next to the archive, if enabled
    pub manifest_path: Option<PathBuf>,
    /// Per-address outcomes, sorted by address
    pub manifest: Manifest,
    /// Counts, bytes and timing
    pub stats: DownloadStats,
}

/// Downloads word audio one chapter at a time
///
/// Cancellation is sticky: once [`cancel`](Self::cancel) has been called,
/// the current run and every later run resolve their pending tasks as
/// cancelled. Create a new downloader to start over.
pub struct ChapterDownloader {
    config: Arc<Config>,
    catalog: Arc<dyn CatalogProvider>,
    source: Arc<dyn AudioSource>,
    listener: Arc<dyn ProgressListener>,
    template: SourceTemplate,
    cancel: CancellationToken,
}

impl ChapterDownloader {
    /// Validate `config` and build a downloader with the HTTP audio source
    pub fn new(config: Config, catalog: Arc<dyn CatalogProvider>) -> Result<Self> {
        config.validate()?;
        let source = Arc::new(HttpAudioSource::new(&config.download.user_agent)?);
        let template = SourceTemplate::new(
            config.download.base_url.clone(),
            config.download.file_extension.clone(),
        );

        Ok(Self {
            config: Arc::new(config),
            catalog,
            source,
            listener: Arc::new(NoopListener),
            template,
            cancel: CancellationToken::new(),
        })
    }

    /// Replace the audio source
    pub fn with_source(mut self, source: Arc<dyn AudioSource>) -> Self {
        self.source = source;
        self
    }

    /// Register a progress listener
    pub fn with_listener(mut self, listener: Arc<dyn ProgressListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Chapters known to the catalog
    pub fn chapters(&self) -> Vec<ChapterInfo> {
        self.catalog.list_chapters()
    }

    /// Stop admitting tasks; in-flight attempts finish, the rest resolve as cancelled
    pub fn cancel(&self) {
        tracing::info!("Cancellation requested");
        self.cancel.cancel();
    }

    /// Token that cancels this downloader when fired
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Download every word of a chapter and pack it into an archive
    pub async fn download_chapter(&self, chapter_id: u16) -> Result<ChapterReport> {
        self.download_chapter_range(chapter_id, AddressRange::full())
            .await
    }

    /// Download the words of a chapter selected by `range`
    ///
    /// Catalog and destination problems fail before anything is fetched.
    /// Individual word failures never fail the call; they are recorded in
    /// the manifest.
    pub async fn download_chapter_range(
        &self,
        chapter_id: u16,
        range: AddressRange,
    ) -> Result<ChapterReport> {
        let plan = AddressPlan::for_range(self.catalog.as_ref(), chapter_id, &range)?;
        let chapter = plan.chapter().clone();
        let layout = ChapterLayout::new(&self.config.download.download_dir, &chapter);
        let total = plan.total();

        prepare_staging_dir(layout.staging_dir()).await?;

        tracing::info!(
            chapter = chapter.id,
            name = %chapter.name_translated,
            total,
            concurrency = self.config.download.concurrency,
            "Starting chapter download"
        );

        let aggregator = ProgressAggregator::spawn(chapter.id, total, self.listener.clone());
        let worker = FetchWorker::new(
            self.source.clone(),
            self.config.retry.clone(),
            self.config.download.timeout,
            self.cancel.clone(),
        );
        let pool = WorkerPool::new(self.config.download.concurrency, self.cancel.clone());

        let tasks = plan.iter().map(|address| {
            let file_name = self.template.file_name(&address);
            DownloadTask::new(
                address,
                self.template.url(&address),
                layout.file_path(&file_name),
            )
        });
        let summary = pool.run(tasks, &worker, aggregator.sender()).await;

        // Completion barrier: every result is in and the listener saw 100%
        let aggregated = aggregator.finish().await?;
        let stats = DownloadStats::from_state(&aggregated.state, Instant::now());
        tracing::debug!(
            chapter = chapter.id,
            dispatched = summary.dispatched,
            skipped = summary.skipped,
            "pool drained"
        );

        let manifest = build_manifest(
            &chapter,
            &self.config.download.base_url,
            total,
            &aggregated.results,
        )?;
        let output = ArchiveAssembler::new(self.config.archive.clone())
            .finalize(&layout, &manifest)
            .await?;

        tracing::info!(
            chapter = chapter.id,
            archive = ?output.archive_path,
            %stats,
            "Chapter download finished"
        );

        Ok(ChapterReport {
            chapter,
            archive_path: output.archive_path,
            manifest_path: output.manifest_path,
            manifest,
            stats,
        })
    }
}

/// Create the staging directory and prove it is writable
async fn prepare_staging_dir(dir: &Path) -> Result<()> {
    let destination_error = |source: std::io::Error| Error::Destination {
        path: dir.to_path_buf(),
        source,
    };

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(destination_error)?;

    let probe = dir.join(WRITE_PROBE_NAME);
    tokio::fs::write(&probe, b"")
        .await
        .map_err(destination_error)?;
    tokio::fs::remove_file(&probe)
        .await
        .map_err(destination_error)?;

    tracing::debug!(?dir, "staging directory ready");
    Ok(())
}
