//! End-to-end chapter downloads against a mock HTTP audio store
//!
//! These tests exercise the real reqwest-backed audio source, the worker
//! pool, retries, and archive assembly together.

mod common;

use common::{CATALOG_JSON, archive_entry, archive_names, http_config, packed_manifest};
use std::sync::{Arc, Mutex};
use wbw_audio_dl::{
    ChapterDownloader, Config, ErrorKind, Outcome, ProgressUpdate, StaticCatalog,
};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn serve_all_words(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/words/\d+/\d{3}_\d{3}_\d{3}\.mp3$"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ID3 word audio".to_vec()))
        .mount(server)
        .await;
}

fn catalog() -> Arc<StaticCatalog> {
    Arc::new(StaticCatalog::from_json_str(CATALOG_JSON).unwrap())
}

#[tokio::test]
async fn downloads_chapter_over_http_into_archive() {
    let server = MockServer::start().await;
    serve_all_words(&server).await;
    let dir = tempfile::tempdir().unwrap();

    let updates = Arc::new(Mutex::new(Vec::<ProgressUpdate>::new()));
    let sink = updates.clone();
    let downloader = ChapterDownloader::new(http_config(&server.uri(), dir.path()), catalog())
        .unwrap()
        .with_listener(Arc::new(move |update: &ProgressUpdate| {
            sink.lock().unwrap().push(update.clone());
        }));

    let report = downloader.download_chapter(1).await.unwrap();

    assert_eq!(report.stats.succeeded, 3);
    assert_eq!(report.stats.total_bytes, 3 * 14);
    assert_eq!(
        archive_names(&report.archive_path),
        vec![
            "001_001_001.mp3",
            "001_001_002.mp3",
            "001_002_001.mp3",
            "manifest.json"
        ]
    );
    assert_eq!(
        archive_entry(&report.archive_path, "001_002_001.mp3"),
        b"ID3 word audio"
    );

    let requests = server.received_requests().await.unwrap();
    let mut paths: Vec<String> = requests.iter().map(|r| r.url.path().to_string()).collect();
    paths.sort();
    assert_eq!(
        paths,
        vec![
            "/words/1/001_001_001.mp3",
            "/words/1/001_001_002.mp3",
            "/words/1/001_002_001.mp3",
        ]
    );

    let last = updates.lock().unwrap().last().cloned().unwrap();
    assert_eq!(last.percent, 100.0);
    assert_eq!(last.completed, 3);
}

#[tokio::test]
async fn missing_words_are_recorded_not_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/words/1/001_001_002.mp3"))
        .respond_with(ResponseTemplate::new(404))
        .with_priority(1)
        .mount(&server)
        .await;
    serve_all_words(&server).await;
    let dir = tempfile::tempdir().unwrap();

    let downloader =
        ChapterDownloader::new(http_config(&server.uri(), dir.path()), catalog()).unwrap();
    let report = downloader.download_chapter(1).await.unwrap();

    assert_eq!(report.stats.succeeded, 2);
    assert_eq!(report.stats.failed, 1);

    let manifest = packed_manifest(&report.archive_path);
    assert_eq!(manifest.entries.len(), 3);
    let missing = &manifest.entries[1];
    assert_eq!(missing.status, Outcome::Failed);
    assert_eq!(missing.attempts, 1, "404 is never retried");
    assert_eq!(missing.error_kind, Some(ErrorKind::HttpStatus(404)));
    assert_eq!(
        archive_names(&report.archive_path).len(),
        3,
        "two words plus the manifest"
    );
}

#[tokio::test]
async fn server_errors_are_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/words/1/001_001_001.mp3"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    serve_all_words(&server).await;
    let dir = tempfile::tempdir().unwrap();

    let mut config = http_config(&server.uri(), dir.path());
    config.retry.max_retries = 3;
    let downloader = ChapterDownloader::new(config, catalog()).unwrap();

    let report = downloader.download_chapter(1).await.unwrap();

    let first = &report.manifest.entries[0];
    assert_eq!(first.status, Outcome::Succeeded);
    assert_eq!(first.attempts, 3);

    let hits = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/words/1/001_001_001.mp3")
        .count();
    assert_eq!(hits, 3);
}

#[tokio::test]
async fn file_based_config_and_catalog_drive_a_run() {
    let server = MockServer::start().await;
    serve_all_words(&server).await;
    let dir = tempfile::tempdir().unwrap();

    let catalog_path = dir.path().join("catalog.json");
    std::fs::write(&catalog_path, CATALOG_JSON).unwrap();
    let config_path = dir.path().join("config.json");
    let downloads = dir.path().join("out");
    std::fs::write(
        &config_path,
        serde_json::json!({
            "download": {
                "base_url": format!("{}/words", server.uri()),
                "download_dir": downloads,
                "concurrency": 2
            },
            "archive": { "write_adjacent_manifest": true }
        })
        .to_string(),
    )
    .unwrap();

    let config = Config::from_json_file(&config_path).unwrap();
    let catalog = StaticCatalog::from_path(&catalog_path).unwrap();
    let downloader = ChapterDownloader::new(config, Arc::new(catalog)).unwrap();

    // 10 words over 3 verses: 3, 3, 4
    let report = downloader.download_chapter(108).await.unwrap();

    assert_eq!(report.stats.total_requested, 10);
    assert_eq!(report.archive_path, downloads.join("108_Al_Kawthar.zip"));
    assert_eq!(
        report.manifest_path.as_deref(),
        Some(downloads.join("108_Al_Kawthar.manifest.json").as_path())
    );
    assert_eq!(report.manifest.entries.last().unwrap().verse, 3);
    assert_eq!(report.manifest.entries.last().unwrap().word, 4);
    assert!(!downloads.join("108_Al_Kawthar").exists());
}
