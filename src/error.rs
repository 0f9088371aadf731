//! Error types for wbw-audio-dl
//!
//! This module separates errors by blast radius:
//! - [`Error`] - batch-level failures that abort a chapter and surface to the caller
//! - [`CatalogError`] - missing or inconsistent chapter/verse metadata
//! - [`ArchiveError`] - manifest and archive assembly failures
//! - [`FetchError`] - per-task fetch failures, classified by [`ErrorKind`]
//!
//! Per-task failures never become an [`Error`]; they are recorded in the
//! chapter's results and manifest instead.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::types::AudioAddress;

/// Result type alias for wbw-audio-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for wbw-audio-dl
///
/// Every variant aborts the whole chapter run. They are raised before any
/// task is dispatched (configuration, catalog, destination) or after the
/// completion barrier (archive assembly).
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "concurrency")
        key: Option<String>,
    },

    /// Catalog metadata is missing or inconsistent
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// The destination directory cannot be created or written
    #[error("destination {} is not writable: {source}", path.display())]
    Destination {
        /// The directory that failed the writability probe
        path: PathBuf,
        /// The underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// Manifest or archive assembly failed
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client construction or transport error outside a task
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A background task (pool, aggregator, dispatcher) panicked
    #[error("background task failed: {0}")]
    Task(String),
}

impl Error {
    /// Machine-readable error code, stable across releases
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Catalog(e) => match e {
                CatalogError::ChapterNotFound { .. } => "chapter_not_found",
                CatalogError::MissingVerse { .. } => "missing_verse",
                CatalogError::NoVerses { .. } => "no_verses",
                CatalogError::InvalidRange { .. } => "invalid_range",
                CatalogError::InvalidRecord { .. } => "invalid_catalog_record",
                CatalogError::Read { .. } => "catalog_read_failed",
                CatalogError::Parse(_) => "catalog_parse_failed",
            },
            Error::Destination { .. } => "destination_unwritable",
            Error::Archive(e) => match e {
                ArchiveError::ResultCountMismatch { .. } => "result_count_mismatch",
                ArchiveError::DuplicateAddress { .. } => "duplicate_address",
                ArchiveError::Zip(_) => "zip_error",
                ArchiveError::Io(_) => "archive_io_error",
                ArchiveError::Task(_) => "archive_task_failed",
            },
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Task(_) => "task_failed",
        }
    }
}

/// Catalog errors
///
/// All of these are fatal to the batch and are raised before dispatch.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The chapter is not listed by the catalog
    #[error("chapter {chapter} not found in catalog")]
    ChapterNotFound {
        /// The requested chapter id
        chapter: u16,
    },

    /// A verse inside the chapter has no word count
    #[error("chapter {chapter} has no word count for verse {verse}")]
    MissingVerse {
        /// The chapter being enumerated
        chapter: u16,
        /// The verse without metadata
        verse: u16,
    },

    /// The chapter lists zero verses
    #[error("chapter {chapter} has no verses")]
    NoVerses {
        /// The chapter being enumerated
        chapter: u16,
    },

    /// An address range does not fit the chapter
    #[error("invalid range for chapter {chapter}: {reason}")]
    InvalidRange {
        /// The chapter being enumerated
        chapter: u16,
        /// Why the range was rejected
        reason: String,
    },

    /// A catalog record is malformed
    #[error("invalid catalog record for chapter {chapter}: {reason}")]
    InvalidRecord {
        /// The chapter id of the offending record
        chapter: u16,
        /// What is wrong with the record
        reason: String,
    },

    /// The catalog file could not be read
    #[error("failed to read catalog {}: {source}", path.display())]
    Read {
        /// The catalog file path
        path: PathBuf,
        /// The underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// The catalog JSON could not be parsed
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Archive assembly errors
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The number of results does not match the planned task count
    #[error("expected {expected} results, got {actual}")]
    ResultCountMismatch {
        /// Planned task count
        expected: usize,
        /// Results actually collected
        actual: usize,
    },

    /// The same address was resolved more than once
    #[error("address {address} resolved more than once")]
    DuplicateAddress {
        /// The duplicated address
        address: AudioAddress,
    },

    /// Zip writer error
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// I/O error while reading sources or writing the archive
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking archive task panicked or was cancelled
    #[error("archive task failed: {0}")]
    Task(String),
}

/// Classification of a single fetch failure
///
/// Serialized into the manifest, so the representation is part of the output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The attempt exceeded the per-attempt timeout
    Timeout,
    /// The server answered with a non-200 status
    HttpStatus(u16),
    /// Connection refused/reset or the body stream broke
    Connection,
    /// Writing the destination file failed
    Io,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::HttpStatus(code) => write!(f, "HTTP {code}"),
            ErrorKind::Connection => write!(f, "connection error"),
            ErrorKind::Io => write!(f, "I/O error"),
        }
    }
}

/// A single failed fetch attempt
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    /// Failure class, drives the retry decision
    pub kind: ErrorKind,
    /// Human-readable detail for logs and the manifest
    pub message: String,
}

impl FetchError {
    /// Create a fetch error of the given kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The server answered with `code`
    pub fn status(code: u16) -> Self {
        let reason = reqwest::StatusCode::from_u16(code)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("unexpected status");
        Self::new(ErrorKind::HttpStatus(code), reason)
    }

    /// The attempt timed out
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// The connection failed or broke mid-transfer
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::timeout(e.to_string())
        } else if let Some(status) = e.status() {
            FetchError::new(ErrorKind::HttpStatus(status.as_u16()), e.to_string())
        } else {
            FetchError::connection(e.to_string())
        }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        FetchError::new(ErrorKind::Io, e.to_string())
    }
}
