//! Configuration types for wbw-audio-dl

use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Download behavior configuration (source, destination, concurrency, timeouts)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Base URL of the audio source (default: "https://audios.quranwbw.com/words")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Audio file extension without the dot (default: "mp3")
    #[serde(default = "default_file_extension")]
    pub file_extension: String,

    /// Destination directory for staging folders and archives (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Maximum fetches in flight at once (default: 5)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Timeout for a single attempt, not for the whole task (default: 30 seconds)
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// User agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            file_extension: default_file_extension(),
            download_dir: default_download_dir(),
            concurrency: default_concurrency(),
            timeout: default_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Retry configuration for transient failures
///
/// The delay before retry `n` (1-based) is `initial_delay * backoff_multiplier^(n-1)`,
/// capped at `max_delay`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry (default: 500 milliseconds)
    #[serde(default = "default_initial_delay", with = "millis_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 10 seconds)
    #[serde(default = "default_max_delay", with = "millis_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// Archive assembly configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Remove the loose audio files once the archive is written (default: true)
    #[serde(default = "default_true")]
    pub cleanup_loose_files: bool,

    /// Also write the manifest next to the archive (default: false)
    #[serde(default)]
    pub write_adjacent_manifest: bool,

    /// Name of the manifest inside the archive (default: "manifest.json")
    #[serde(default = "default_manifest_name")]
    pub manifest_name: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            cleanup_loose_files: true,
            write_adjacent_manifest: false,
            manifest_name: default_manifest_name(),
        }
    }
}

/// Main configuration for [`ChapterDownloader`](crate::ChapterDownloader)
///
/// Every field has a default, so an empty JSON object is a valid configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Source, destination, concurrency and timeout settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Retry and backoff settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Archive assembly settings
    #[serde(default)]
    pub archive: ArchiveConfig,
}

impl Config {
    /// Load a configuration from a JSON file and validate it
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Destination directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }

    /// Check settings that would otherwise fail deep inside a run
    pub fn validate(&self) -> Result<()> {
        if self.download.concurrency == 0 {
            return Err(config_error("concurrency must be at least 1", "concurrency"));
        }
        if self.download.timeout.is_zero() {
            return Err(config_error("timeout must be greater than zero", "timeout"));
        }
        // Stored as whole seconds
        if self.download.timeout.subsec_nanos() != 0 {
            return Err(config_error(
                "timeout must be a whole number of seconds",
                "timeout",
            ));
        }
        if self.download.file_extension.is_empty()
            || self.download.file_extension.contains(['.', '/', '\\'])
        {
            return Err(config_error(
                "file_extension must be a bare extension such as \"mp3\"",
                "file_extension",
            ));
        }
        let base = url::Url::parse(&self.download.base_url).map_err(|e| {
            config_error(format!("base_url is not a valid URL: {e}"), "base_url")
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(config_error(
                format!("base_url scheme must be http or https, got {}", base.scheme()),
                "base_url",
            ));
        }
        if self.retry.backoff_multiplier < 1.0 || !self.retry.backoff_multiplier.is_finite() {
            return Err(config_error(
                "backoff_multiplier must be a finite number >= 1.0",
                "backoff_multiplier",
            ));
        }
        if self.retry.max_delay < self.retry.initial_delay {
            return Err(config_error(
                "max_delay must not be smaller than initial_delay",
                "max_delay",
            ));
        }
        let manifest_name = self.archive.manifest_name.as_str();
        if Path::new(manifest_name).file_name() != Some(OsStr::new(manifest_name))
            || manifest_name.contains('\\')
        {
            return Err(config_error(
                "manifest_name must be a plain file name",
                "manifest_name",
            ));
        }
        Ok(())
    }
}

fn config_error(message: impl Into<String>, key: &str) -> Error {
    Error::Config {
        message: message.into(),
        key: Some(key.to_string()),
    }
}

// Default value functions
fn default_base_url() -> String {
    "https://audios.quranwbw.com/words".to_string()
}

fn default_file_extension() -> String {
    "mp3".to_string()
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_concurrency() -> usize {
    5
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_manifest_name() -> String {
    "manifest.json".to_string()
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds, for backoff delays)
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
