//! Address enumeration and path templating
//!
//! [`AddressPlan`] turns catalog metadata into the ordered set of
//! [`AudioAddress`]es for one chapter. [`SourceTemplate`] renders the remote
//! URL for an address and [`ChapterLayout`] decides where things land on disk.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::catalog::{CatalogProvider, ChapterInfo};
use crate::error::CatalogError;
use crate::types::AudioAddress;

/// Sub-selection of a chapter
///
/// `start_word` only applies to `start_verse` and `end_word` only to
/// `end_verse`; verses in between are always taken whole. Unset bounds mean
/// "from the first" / "to the last".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AddressRange {
    /// First verse to include
    pub start_verse: Option<u16>,
    /// Last verse to include
    pub end_verse: Option<u16>,
    /// First word of `start_verse`
    pub start_word: Option<u16>,
    /// Last word of `end_verse`
    pub end_word: Option<u16>,
}

impl AddressRange {
    /// The whole chapter
    pub fn full() -> Self {
        Self::default()
    }

    /// Verses `start..=end`, all words
    pub fn verses(start: u16, end: u16) -> Self {
        Self {
            start_verse: Some(start),
            end_verse: Some(end),
            ..Self::default()
        }
    }

    /// Start at `word` within the start verse
    pub fn from_word(mut self, word: u16) -> Self {
        self.start_word = Some(word);
        self
    }

    /// Stop at `word` within the end verse
    pub fn to_word(mut self, word: u16) -> Self {
        self.end_word = Some(word);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct VerseSpan {
    verse: u16,
    first_word: u16,
    last_word: u16,
}

impl VerseSpan {
    fn len(&self) -> usize {
        if self.last_word < self.first_word {
            0
        } else {
            usize::from(self.last_word - self.first_word) + 1
        }
    }
}

/// Ordered, finite set of addresses for one chapter
///
/// [`iter`](Self::iter) can be called any number of times and always yields
/// the same sequence in ascending (chapter, verse, word) order.
#[derive(Clone, Debug)]
pub struct AddressPlan {
    chapter: ChapterInfo,
    spans: Vec<VerseSpan>,
    total: usize,
}

impl AddressPlan {
    /// Plan every word of `chapter_id`
    pub fn for_chapter(
        catalog: &dyn CatalogProvider,
        chapter_id: u16,
    ) -> Result<Self, CatalogError> {
        Self::for_range(catalog, chapter_id, &AddressRange::full())
    }

    /// Plan the words of `chapter_id` selected by `range`
    pub fn for_range(
        catalog: &dyn CatalogProvider,
        chapter_id: u16,
        range: &AddressRange,
    ) -> Result<Self, CatalogError> {
        let chapter = catalog.chapter(chapter_id)?;
        if chapter.verse_count == 0 {
            return Err(CatalogError::NoVerses {
                chapter: chapter_id,
            });
        }

        let counts = catalog.verse_word_counts(chapter_id)?;
        let mut word_counts = Vec::with_capacity(usize::from(chapter.verse_count));
        for verse in 1..=chapter.verse_count {
            let words = counts.get(&verse).ok_or(CatalogError::MissingVerse {
                chapter: chapter_id,
                verse,
            })?;
            word_counts.push(*words);
        }

        let invalid = |reason: String| CatalogError::InvalidRange {
            chapter: chapter_id,
            reason,
        };

        let start_verse = range.start_verse.unwrap_or(1);
        let end_verse = range.end_verse.unwrap_or(chapter.verse_count);
        if start_verse == 0 || end_verse > chapter.verse_count || start_verse > end_verse {
            return Err(invalid(format!(
                "verses {start_verse}..={end_verse} outside 1..={}",
                chapter.verse_count
            )));
        }

        let words_in = |verse: u16| word_counts[usize::from(verse - 1)];

        if let Some(word) = range.start_word {
            if word == 0 || word > words_in(start_verse) {
                return Err(invalid(format!(
                    "start word {word} outside verse {start_verse} (1..={})",
                    words_in(start_verse)
                )));
            }
        }
        if let Some(word) = range.end_word {
            if word == 0 || word > words_in(end_verse) {
                return Err(invalid(format!(
                    "end word {word} outside verse {end_verse} (1..={})",
                    words_in(end_verse)
                )));
            }
        }
        if let (Some(first), Some(last)) = (range.start_word, range.end_word) {
            if start_verse == end_verse && first > last {
                return Err(invalid(format!(
                    "start word {first} is after end word {last}"
                )));
            }
        }

        let spans: Vec<VerseSpan> = (start_verse..=end_verse)
            .map(|verse| VerseSpan {
                verse,
                first_word: match range.start_word {
                    Some(word) if verse == start_verse => word,
                    _ => 1,
                },
                last_word: match range.end_word {
                    Some(word) if verse == end_verse => word,
                    _ => words_in(verse),
                },
            })
            .collect();
        let total = spans.iter().map(VerseSpan::len).sum();

        tracing::debug!(
            chapter = chapter_id,
            start_verse,
            end_verse,
            total,
            "address plan built"
        );

        Ok(Self {
            chapter,
            spans,
            total,
        })
    }

    /// Chapter metadata the plan was built from
    pub fn chapter(&self) -> &ChapterInfo {
        &self.chapter
    }

    /// Number of addresses the plan yields
    pub fn total(&self) -> usize {
        self.total
    }

    /// Addresses in ascending order
    pub fn iter(&self) -> impl Iterator<Item = AudioAddress> + '_ {
        let chapter = self.chapter.id;
        self.spans.iter().flat_map(move |span| {
            (span.first_word..=span.last_word)
                .map(move |word| AudioAddress::new(chapter, span.verse, word))
        })
    }
}

/// Remote URL template
///
/// Renders `{base}/{chapter}/{chapter:03}_{verse:03}_{word:03}.{ext}`.
#[derive(Clone, Debug)]
pub struct SourceTemplate {
    base: String,
    extension: String,
}

impl SourceTemplate {
    /// Template rooted at `base` producing files with `extension`
    pub fn new(base: impl Into<String>, extension: impl Into<String>) -> Self {
        let base: String = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
            extension: extension.into(),
        }
    }

    /// Source URL for `address`
    pub fn url(&self, address: &AudioAddress) -> String {
        format!(
            "{}/{}/{}.{}",
            self.base,
            address.chapter,
            address.stem(),
            self.extension
        )
    }

    /// File name used on disk and inside the archive
    pub fn file_name(&self, address: &AudioAddress) -> String {
        format!("{}.{}", address.stem(), self.extension)
    }
}

#[allow(clippy::expect_used)]
static SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s\-]+").expect("separator pattern is a valid literal"));

#[allow(clippy::expect_used)]
static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_]").expect("disallowed pattern is a valid literal"));

/// Folder-safe chapter name, e.g. `001_Al_Fatihah`
///
/// Whitespace and dashes become `_`; anything else outside ASCII
/// alphanumerics is dropped.
pub fn chapter_folder_name(chapter: &ChapterInfo) -> String {
    let separated = SEPARATORS.replace_all(chapter.name_translated.trim(), "_");
    let cleaned = DISALLOWED.replace_all(&separated, "");
    if cleaned.is_empty() {
        format!("{:03}", chapter.id)
    } else {
        format!("{:03}_{}", chapter.id, cleaned)
    }
}

/// Where a chapter's files land on disk
#[derive(Clone, Debug)]
pub struct ChapterLayout {
    folder_name: String,
    staging_dir: PathBuf,
    archive_path: PathBuf,
}

impl ChapterLayout {
    /// Layout for `chapter` under `download_dir`
    pub fn new(download_dir: &Path, chapter: &ChapterInfo) -> Self {
        let folder_name = chapter_folder_name(chapter);
        Self {
            staging_dir: download_dir.join(&folder_name),
            archive_path: download_dir.join(format!("{folder_name}.zip")),
            folder_name,
        }
    }

    /// `{chapter:03}_{Name}`
    pub fn folder_name(&self) -> &str {
        &self.folder_name
    }

    /// Directory holding the loose audio files
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Final archive path
    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Manifest written next to the archive
    pub fn adjacent_manifest_path(&self) -> PathBuf {
        self.staging_dir
            .with_file_name(format!("{}.manifest.json", self.folder_name))
    }

    /// Destination for one audio file
    pub fn file_path(&self, file_name: &str) -> PathBuf {
        self.staging_dir.join(file_name)
    }
}
