//! Fetch one chapter and pack it into a zip archive
//!
//! This example demonstrates the core functionality of wbw-audio-dl:
//! - Loading a chapter catalog
//! - Configuring concurrency, retries and the destination directory
//! - Reporting progress through a listener
//! - Cancelling cleanly on Ctrl+C
//!
//! ```bash
//! cargo run --example fetch_chapter -- 108
//! cargo run --example fetch_chapter -- 1 demos/catalog.json config.json
//! RUST_LOG=wbw_audio_dl=debug cargo run --example fetch_chapter -- 112
//! ```

use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use wbw_audio_dl::{
    CatalogProvider, ChapterDownloader, Config, ProgressUpdate, StaticCatalog, cancel_on_signal,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let chapter: u16 = args.next().as_deref().unwrap_or("108").parse()?;
    let catalog_path = args
        .next()
        .unwrap_or_else(|| concat!(env!("CARGO_MANIFEST_DIR"), "/demos/catalog.json").to_string());
    let config = match args.next() {
        Some(path) => Config::from_json_file(Path::new(&path))?,
        None => Config::default(),
    };

    let catalog = StaticCatalog::from_path(Path::new(&catalog_path))?;
    for info in catalog.list_chapters() {
        println!(
            "{:03} {} ({}) - {} verses",
            info.id, info.name_translated, info.name_native, info.verse_count
        );
    }

    let downloader = ChapterDownloader::new(config, Arc::new(catalog))?.with_listener(Arc::new(
        |update: &ProgressUpdate| {
            println!(
                "[{:5.1}%] {}/{} {}",
                update.percent, update.completed, update.total, update.message
            );
        },
    ));
    cancel_on_signal(downloader.cancellation_token());

    let report = downloader.download_chapter(chapter).await?;

    println!();
    println!("Chapter {:03} {}", report.chapter.id, report.chapter.name_translated);
    println!("  {}", report.stats);
    println!("  archive: {}", report.archive_path.display());
    for failure in report.manifest.failures() {
        println!(
            "  failed {}: {}",
            failure.address(),
            failure.error_message.as_deref().unwrap_or("unknown error")
        );
    }

    Ok(())
}
