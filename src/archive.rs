//! Manifest and archive assembly
//!
//! Runs after the completion barrier. [`build_manifest`] turns the unordered
//! results into an address-sorted [`Manifest`]; [`ArchiveAssembler`] writes the
//! successful files plus the manifest into one zip per chapter, optionally
//! writes the manifest next to the archive, and removes the loose files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::address::ChapterLayout;
use crate::catalog::ChapterInfo;
use crate::config::ArchiveConfig;
use crate::error::{ArchiveError, ErrorKind};
use crate::types::{AudioAddress, DownloadResult, Outcome};

/// One manifest line, one per planned address
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Chapter number
    pub chapter: u16,
    /// Verse number
    pub verse: u16,
    /// Word position
    pub word: u16,
    /// Terminal outcome
    pub status: Outcome,
    /// Entry name inside the archive (successes only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
    /// File size in bytes (successes only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Attempts made
    pub attempts: u32,
    /// Failure class (failures only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Failure detail (failures only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ManifestEntry {
    /// Address of the entry
    pub fn address(&self) -> AudioAddress {
        AudioAddress::new(self.chapter, self.verse, self.word)
    }

    fn from_result(result: &DownloadResult) -> Self {
        let succeeded = result.outcome == Outcome::Succeeded;
        Self {
            chapter: result.address.chapter,
            verse: result.address.verse,
            word: result.address.word,
            status: result.outcome,
            relative_path: result
                .path
                .as_deref()
                .and_then(Path::file_name)
                .map(|name| name.to_string_lossy().into_owned())
                .filter(|_| succeeded),
            size: succeeded.then_some(result.bytes),
            attempts: result.attempts,
            error_kind: result.error.as_ref().map(|e| e.kind),
            error_message: result.error.as_ref().map(|e| e.message.clone()),
        }
    }
}

/// Description of one chapter run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Chapter number
    pub chapter_id: u16,
    /// Chapter name used for the folder and archive names
    pub chapter_name: String,
    /// When the manifest was built
    pub generated_at: DateTime<Utc>,
    /// Base URL the files were fetched from
    pub source: String,
    /// Planned task count
    pub total: usize,
    /// Entries with status `succeeded`
    pub succeeded: usize,
    /// Entries with status `failed`
    pub failed: usize,
    /// Entries with status `cancelled`
    pub cancelled: usize,
    /// One entry per address, ascending
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Entries that produced a file
    pub fn successes(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries
            .iter()
            .filter(|e| e.status == Outcome::Succeeded)
    }

    /// Entries that failed, with their error details
    pub fn failures(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(|e| e.status == Outcome::Failed)
    }
}

/// Build the address-sorted manifest for a finished run
///
/// Fails if the number of results differs from `total` or if an address
/// appears twice.
pub fn build_manifest(
    chapter: &ChapterInfo,
    source: &str,
    total: usize,
    results: &[DownloadResult],
) -> Result<Manifest, ArchiveError> {
    if results.len() != total {
        return Err(ArchiveError::ResultCountMismatch {
            expected: total,
            actual: results.len(),
        });
    }

    let mut seen = HashSet::with_capacity(results.len());
    for result in results {
        if !seen.insert(result.address) {
            return Err(ArchiveError::DuplicateAddress {
                address: result.address,
            });
        }
    }

    let mut entries: Vec<ManifestEntry> = results.iter().map(ManifestEntry::from_result).collect();
    entries.sort_by_key(ManifestEntry::address);

    let count = |status: Outcome| entries.iter().filter(|e| e.status == status).count();

    Ok(Manifest {
        chapter_id: chapter.id,
        chapter_name: chapter.name_translated.clone(),
        generated_at: Utc::now(),
        source: source.to_string(),
        total,
        succeeded: count(Outcome::Succeeded),
        failed: count(Outcome::Failed),
        cancelled: count(Outcome::Cancelled),
        entries,
    })
}

/// A file to pack: where it is now and what it is called in the archive
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveFile {
    /// Path on disk
    pub source: PathBuf,
    /// Entry name inside the archive
    pub name: String,
}

/// What the assembler produced
#[derive(Clone, Debug)]
pub struct ArchiveOutput {
    /// The written zip
    pub archive_path: PathBuf,
    /// The adjacent manifest, if enabled
    pub manifest_path: Option<PathBuf>,
    /// Audio files packed (excluding the manifest)
    pub files_archived: usize,
}

/// Writes chapter archives
#[derive(Clone, Debug, Default)]
pub struct ArchiveAssembler {
    config: ArchiveConfig,
}

impl ArchiveAssembler {
    /// Assembler with the given options
    pub fn new(config: ArchiveConfig) -> Self {
        Self { config }
    }

    /// Pack a finished chapter: archive, optional adjacent manifest, optional cleanup
    pub async fn finalize(
        &self,
        layout: &ChapterLayout,
        manifest: &Manifest,
    ) -> Result<ArchiveOutput, ArchiveError> {
        let files: Vec<ArchiveFile> = manifest
            .successes()
            .filter_map(|entry| entry.relative_path.as_ref())
            .map(|name| ArchiveFile {
                source: layout.file_path(name),
                name: name.clone(),
            })
            .collect();

        let archive_path = self
            .assemble(layout.archive_path(), files.clone(), manifest)
            .await?;

        let manifest_path = if self.config.write_adjacent_manifest {
            let path = layout.adjacent_manifest_path();
            write_manifest_file(&path, manifest).await?;
            Some(path)
        } else {
            None
        };

        if self.config.cleanup_loose_files {
            cleanup_loose_files(layout.staging_dir(), &files).await;
        }

        Ok(ArchiveOutput {
            archive_path,
            manifest_path,
            files_archived: files.len(),
        })
    }

    /// Write `files` plus the manifest into a Deflate zip at `archive_path`
    ///
    /// The zip is written to a temporary sibling and renamed into place, so a
    /// failed run never leaves a truncated archive under the final name.
    pub async fn assemble(
        &self,
        archive_path: &Path,
        files: Vec<ArchiveFile>,
        manifest: &Manifest,
    ) -> Result<PathBuf, ArchiveError> {
        let manifest_json = serde_json::to_vec_pretty(manifest)
            .map_err(|e| ArchiveError::Io(std::io::Error::other(e)))?;
        let manifest_name = self.config.manifest_name.clone();
        let final_path = archive_path.to_path_buf();
        let file_count = files.len();

        debug!(
            archive = ?final_path,
            files = file_count,
            "writing chapter archive"
        );

        let target = final_path.clone();
        tokio::task::spawn_blocking(move || {
            write_zip(&target, &files, &manifest_name, &manifest_json)
        })
        .await
        .map_err(|e| ArchiveError::Task(e.to_string()))??;

        info!(
            archive = ?final_path,
            files = file_count,
            "Chapter archive written"
        );
        Ok(final_path)
    }
}

fn temp_archive_path(archive_path: &Path) -> PathBuf {
    let mut name = archive_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    archive_path.with_file_name(name)
}

fn write_zip(
    archive_path: &Path,
    files: &[ArchiveFile],
    manifest_name: &str,
    manifest_json: &[u8],
) -> Result<(), ArchiveError> {
    let temp_path = temp_archive_path(archive_path);

    let written = (|| -> Result<(), ArchiveError> {
        let file = std::fs::File::create(&temp_path)?;
        let mut writer = zip::ZipWriter::new(std::io::BufWriter::new(file));
        let options = zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        for entry in files {
            writer.start_file(entry.name.as_str(), options)?;
            let mut source = std::fs::File::open(&entry.source)?;
            std::io::copy(&mut source, &mut writer)?;
        }

        writer.start_file(manifest_name, options)?;
        writer.write_all(manifest_json)?;

        let mut inner = writer.finish()?;
        inner.flush()?;
        Ok(())
    })();

    match written {
        Ok(()) => {
            std::fs::rename(&temp_path, archive_path)?;
            Ok(())
        }
        Err(e) => {
            if let Err(remove_err) = std::fs::remove_file(&temp_path) {
                debug!(path = ?temp_path, error = %remove_err, "no partial archive to remove");
            }
            Err(e)
        }
    }
}

async fn write_manifest_file(path: &Path, manifest: &Manifest) -> Result<(), ArchiveError> {
    let json = serde_json::to_vec_pretty(manifest)
        .map_err(|e| ArchiveError::Io(std::io::Error::other(e)))?;
    tokio::fs::write(path, json).await?;
    debug!(?path, "manifest written next to archive");
    Ok(())
}

/// Remove archived loose files and the staging directory
///
/// Errors are logged as warnings but don't fail the run; the archive is
/// already complete at this point. The directory is only removed when empty.
async fn cleanup_loose_files(staging_dir: &Path, files: &[ArchiveFile]) {
    use tokio::fs;

    let mut deleted_files = 0;
    for file in files {
        match fs::remove_file(&file.source).await {
            Ok(()) => deleted_files += 1,
            Err(e) => {
                warn!(file = ?file.source, error = %e, "failed to delete archived file");
            }
        }
    }

    match fs::remove_dir(staging_dir).await {
        Ok(()) => {
            debug!(?staging_dir, deleted_files, "staging directory removed");
        }
        Err(e) => {
            debug!(
                ?staging_dir,
                deleted_files,
                error = %e,
                "staging directory left in place"
            );
        }
    }
}
