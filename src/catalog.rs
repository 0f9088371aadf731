//! Chapter and verse metadata
//!
//! A [`CatalogProvider`] answers two questions: which chapters exist, and how
//! many words each verse of a chapter has. [`StaticCatalog`] is the built-in
//! implementation, loaded once from a JSON array.
//!
//! Records look like this:
//!
//! ```json
//! [
//!   { "id": 1, "name_en": "Al-Fatihah", "name_ar": "الفاتحة",
//!     "ayah_range": [1, 7], "word_range": [1, 29] },
//!   { "id": 108, "name_en": "Al-Kawthar", "name_ar": "الكوثر",
//!     "ayah_range": [1, 3], "verse_word_counts": { "1": 4, "2": 3, "3": 4 } }
//! ]
//! ```
//!
//! When a record has no explicit `verse_word_counts`, the word total from
//! `word_range` is spread evenly over the verses and the remainder goes to the
//! last verse.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::CatalogError;

/// Descriptive metadata for one chapter
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterInfo {
    /// Chapter number (1-based)
    pub id: u16,
    /// Name in Arabic script
    pub name_native: String,
    /// Transliterated or translated name, used for folder and archive names
    pub name_translated: String,
    /// Number of verses; verses are numbered `1..=verse_count`
    pub verse_count: u16,
}

/// Source of chapter and verse metadata
pub trait CatalogProvider: Send + Sync {
    /// All chapters, ordered by id
    fn list_chapters(&self) -> Vec<ChapterInfo>;

    /// Word count per verse for `chapter`
    fn verse_word_counts(&self, chapter: u16) -> Result<BTreeMap<u16, u16>, CatalogError>;

    /// Look up a single chapter
    fn chapter(&self, id: u16) -> Result<ChapterInfo, CatalogError> {
        self.list_chapters()
            .into_iter()
            .find(|c| c.id == id)
            .ok_or(CatalogError::ChapterNotFound { chapter: id })
    }
}

/// On-disk record format
#[derive(Debug, Deserialize)]
struct CatalogRecord {
    #[serde(alias = "surah_id")]
    id: u16,
    #[serde(alias = "name_en")]
    name_translated: String,
    #[serde(alias = "name_ar", default)]
    name_native: String,
    ayah_range: (u16, u16),
    #[serde(default)]
    word_range: Option<(u32, u32)>,
    #[serde(default)]
    verse_word_counts: Option<BTreeMap<u16, u16>>,
}

impl CatalogRecord {
    fn into_entry(self) -> Result<(ChapterInfo, BTreeMap<u16, u16>), CatalogError> {
        let chapter = self.id;
        let invalid = |reason: &str| CatalogError::InvalidRecord {
            chapter,
            reason: reason.to_string(),
        };

        let (first_verse, last_verse) = self.ayah_range;
        if first_verse != 1 || last_verse == 0 {
            return Err(invalid("ayah_range must start at 1 and be non-empty"));
        }

        let counts = match (self.verse_word_counts, self.word_range) {
            (Some(explicit), _) => explicit,
            (None, Some(words)) => even_distribution(last_verse, words)
                .ok_or_else(|| invalid("word_range is inverted or too large"))?,
            (None, None) => {
                return Err(invalid(
                    "record needs either verse_word_counts or word_range",
                ));
            }
        };

        let info = ChapterInfo {
            id: chapter,
            name_native: self.name_native,
            name_translated: self.name_translated,
            verse_count: last_verse,
        };
        Ok((info, counts))
    }
}

/// Spread `word_range` over `verse_count` verses, remainder on the last verse
fn even_distribution(verse_count: u16, (first, last): (u32, u32)) -> Option<BTreeMap<u16, u16>> {
    if last < first {
        return None;
    }
    let total_words = last - first + 1;
    let verses = u32::from(verse_count);
    let per_verse = total_words / verses;
    let last_verse_words = total_words - per_verse * (verses - 1);

    let per_verse = u16::try_from(per_verse).ok()?;
    let last_verse_words = u16::try_from(last_verse_words).ok()?;

    Some(
        (1..=verse_count)
            .map(|verse| {
                let words = if verse == verse_count {
                    last_verse_words
                } else {
                    per_verse
                };
                (verse, words)
            })
            .collect(),
    )
}

/// Catalog held entirely in memory
#[derive(Clone, Debug, Default)]
pub struct StaticCatalog {
    chapters: BTreeMap<u16, (ChapterInfo, BTreeMap<u16, u16>)>,
}

impl StaticCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chapter with explicit per-verse word counts
    pub fn with_chapter(mut self, info: ChapterInfo, counts: BTreeMap<u16, u16>) -> Self {
        self.chapters.insert(info.id, (info, counts));
        self
    }

    /// Parse a JSON array of chapter records
    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let records: Vec<CatalogRecord> = serde_json::from_str(json)?;
        let mut chapters = BTreeMap::new();

        for record in records {
            let id = record.id;
            let entry = record.into_entry()?;
            if chapters.insert(id, entry).is_some() {
                return Err(CatalogError::InvalidRecord {
                    chapter: id,
                    reason: "duplicate chapter id".to_string(),
                });
            }
        }

        tracing::debug!(chapters = chapters.len(), "catalog loaded");
        Ok(Self { chapters })
    }

    /// Read and parse a JSON catalog file
    pub fn from_path(path: &Path) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Number of chapters
    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    /// Whether the catalog has no chapters
    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }
}

impl CatalogProvider for StaticCatalog {
    fn list_chapters(&self) -> Vec<ChapterInfo> {
        self.chapters.values().map(|(info, _)| info.clone()).collect()
    }

    fn verse_word_counts(&self, chapter: u16) -> Result<BTreeMap<u16, u16>, CatalogError> {
        self.chapters
            .get(&chapter)
            .map(|(_, counts)| counts.clone())
            .ok_or(CatalogError::ChapterNotFound { chapter })
    }

    fn chapter(&self, id: u16) -> Result<ChapterInfo, CatalogError> {
        self.chapters
            .get(&id)
            .map(|(info, _)| info.clone())
            .ok_or(CatalogError::ChapterNotFound { chapter: id })
    }
}
