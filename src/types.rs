//! Core types for wbw-audio-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::FetchError;

/// Three-level address of a single audio file
///
/// Ordering is lexicographic over (chapter, verse, word), which is also the
/// dispatch order and the manifest order.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct AudioAddress {
    /// Chapter number (1-based)
    pub chapter: u16,
    /// Verse number within the chapter (1-based)
    pub verse: u16,
    /// Word position within the verse (1-based)
    pub word: u16,
}

impl AudioAddress {
    /// Create a new address
    pub fn new(chapter: u16, verse: u16, word: u16) -> Self {
        Self {
            chapter,
            verse,
            word,
        }
    }

    /// Zero-padded file stem, e.g. `001_002_003`
    pub fn stem(&self) -> String {
        format!("{:03}_{:03}_{:03}", self.chapter, self.verse, self.word)
    }
}

impl std::fmt::Display for AudioAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:03}_{:03}_{:03}", self.chapter, self.verse, self.word)
    }
}

/// A unit of work handed to the fetch worker
#[derive(Clone, Debug)]
pub struct DownloadTask {
    /// Address being fetched
    pub address: AudioAddress,
    /// Fully rendered source URL
    pub url: String,
    /// Final path of the audio file
    pub destination: PathBuf,
    /// Attempts made so far
    pub attempts: u32,
}

impl DownloadTask {
    /// Create a task that has not been attempted yet
    pub fn new(address: AudioAddress, url: String, destination: PathBuf) -> Self {
        Self {
            address,
            url,
            destination,
            attempts: 0,
        }
    }
}

/// Terminal outcome of a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The file was written to its destination
    Succeeded,
    /// Retry budget exhausted or a non-retryable error
    Failed,
    /// The task was never started or was abandoned during backoff
    Cancelled,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Succeeded => write!(f, "succeeded"),
            Outcome::Failed => write!(f, "failed"),
            Outcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Lifecycle of a single task
///
/// `Pending -> InFlight -> {Succeeded | Retrying -> InFlight | Failed}`, with
/// `Cancelled` reachable from `Pending` or `Retrying`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// Not yet admitted by the pool
    Pending,
    /// An attempt is on the wire
    InFlight,
    /// Waiting out a backoff delay before the next attempt
    Retrying,
    /// Terminal: file written
    Succeeded,
    /// Terminal: gave up
    Failed,
    /// Terminal: abandoned
    Cancelled,
}

impl TaskState {
    /// Whether the state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Whether `next` is a legal transition from this state
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, InFlight)
                | (Pending, Cancelled)
                | (InFlight, Succeeded)
                | (InFlight, Retrying)
                | (InFlight, Failed)
                | (Retrying, InFlight)
                | (Retrying, Cancelled)
        )
    }

    /// Move to `next` if the transition is legal
    ///
    /// Returns `false` and stays put otherwise.
    pub fn advance(&mut self, next: TaskState) -> bool {
        if self.can_transition_to(next) {
            *self = next;
            true
        } else {
            false
        }
    }
}

/// Result of one task, produced exactly once per address
#[derive(Clone, Debug)]
pub struct DownloadResult {
    /// Address the result belongs to
    pub address: AudioAddress,
    /// Terminal outcome
    pub outcome: Outcome,
    /// Bytes written (zero unless succeeded)
    pub bytes: u64,
    /// Wall time from first attempt to terminal state
    pub duration: Duration,
    /// Attempts made (zero for tasks cancelled before dispatch)
    pub attempts: u32,
    /// Final path on success
    pub path: Option<PathBuf>,
    /// Last error for failed tasks
    pub error: Option<FetchError>,
}

impl DownloadResult {
    /// A successful fetch
    pub fn succeeded(
        address: AudioAddress,
        path: PathBuf,
        bytes: u64,
        attempts: u32,
        duration: Duration,
    ) -> Self {
        Self {
            address,
            outcome: Outcome::Succeeded,
            bytes,
            duration,
            attempts,
            path: Some(path),
            error: None,
        }
    }

    /// A task that gave up with `error`
    pub fn failed(
        address: AudioAddress,
        error: FetchError,
        attempts: u32,
        duration: Duration,
    ) -> Self {
        Self {
            address,
            outcome: Outcome::Failed,
            bytes: 0,
            duration,
            attempts,
            path: None,
            error: Some(error),
        }
    }

    /// A task abandoned because the batch was cancelled
    pub fn cancelled(address: AudioAddress, attempts: u32, duration: Duration) -> Self {
        Self {
            address,
            outcome: Outcome::Cancelled,
            bytes: 0,
            duration,
            attempts,
            path: None,
            error: None,
        }
    }
}
