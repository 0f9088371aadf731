//! Common test utilities for wbw-audio-dl HTTP tests

#![allow(dead_code)]

use std::io::Read;
use std::path::Path;
use std::time::Duration;
use wbw_audio_dl::{Config, Manifest};

/// Catalog with two small chapters, one using explicit word counts and one
/// using the even-distribution fallback
pub const CATALOG_JSON: &str = r#"[
    { "id": 1, "name_en": "Al-Fatihah", "name_ar": "الفاتحة",
      "ayah_range": [1, 2], "verse_word_counts": { "1": 2, "2": 1 } },
    { "id": 108, "name_en": "Al-Kawthar", "name_ar": "الكوثر",
      "ayah_range": [1, 3], "word_range": [1, 10] }
]"#;

/// Config pointing at a mock server with fast retries
pub fn http_config(server_uri: &str, download_dir: &Path) -> Config {
    let mut config = Config::default();
    config.download.base_url = format!("{server_uri}/words");
    config.download.download_dir = download_dir.to_path_buf();
    config.download.timeout = Duration::from_secs(5);
    config.retry.initial_delay = Duration::from_millis(1);
    config.retry.max_delay = Duration::from_millis(5);
    config
}

/// Sorted entry names of a zip archive
pub fn archive_names(path: &Path) -> Vec<String> {
    let file = std::fs::File::open(path).expect("archive exists");
    let archive = zip::ZipArchive::new(file).expect("archive is a valid zip");
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    names
}

/// Raw bytes of one archive entry
pub fn archive_entry(path: &Path, name: &str) -> Vec<u8> {
    let file = std::fs::File::open(path).expect("archive exists");
    let mut archive = zip::ZipArchive::new(file).expect("archive is a valid zip");
    let mut entry = archive.by_name(name).expect("entry exists");
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes).expect("entry is readable");
    bytes
}

/// The manifest packed inside an archive
pub fn packed_manifest(path: &Path) -> Manifest {
    serde_json::from_slice(&archive_entry(path, "manifest.json")).expect("manifest parses")
}
