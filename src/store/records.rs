//! Record types held by the structured store and the scope coordinates that group them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Category of stored content. Each category lives in its own table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
  Verses,
  Alignments,
  Lexicon,
  #[serde(rename = "crossrefs")]
  CrossRefs,
  Commentary,
  Interlinear,
  Devotionals,
}

impl Category {
  pub const ALL: [Category; 7] = [
    Category::Verses,
    Category::Alignments,
    Category::Lexicon,
    Category::CrossRefs,
    Category::Commentary,
    Category::Interlinear,
    Category::Devotionals,
  ];

  /// Name used as scope key prefix and table name.
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Verses => "verses",
      Self::Alignments => "alignments",
      Self::Lexicon => "lexicon",
      Self::CrossRefs => "crossrefs",
      Self::Commentary => "commentary",
      Self::Interlinear => "interlinear",
      Self::Devotionals => "devotionals",
    }
  }

  pub fn from_prefix(prefix: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|c| c.as_str() == prefix)
  }
}

impl fmt::Display for Category {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Logical coordinates of one scope: the unit that is saved, checked and counted together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "lowercase")]
pub enum Coordinates {
  Verses {
    translation: String,
    book: String,
    chapter: u32,
  },
  Alignments {
    translation: String,
    book: String,
    chapter: u32,
  },
  /// The whole lexicon when `strong_number` is `None`, otherwise a single entry.
  Lexicon { strong_number: Option<String> },
  #[serde(rename = "crossrefs")]
  CrossRefs { book: String, chapter: u32 },
  /// Every source for the chapter when `source` is `None`.
  Commentary {
    book: String,
    chapter: u32,
    source: Option<String>,
  },
  Interlinear { book: String, chapter: u32 },
  /// One calendar day, keyed "MM-DD".
  Devotionals { date: String },
}

impl Coordinates {
  pub fn verses(translation: &str, book: &str, chapter: u32) -> Self {
    Self::Verses {
      translation: translation.to_string(),
      book: book.to_string(),
      chapter,
    }
  }

  pub fn crossrefs(book: &str, chapter: u32) -> Self {
    Self::CrossRefs {
      book: book.to_string(),
      chapter,
    }
  }

  pub fn interlinear(book: &str, chapter: u32) -> Self {
    Self::Interlinear {
      book: book.to_string(),
      chapter,
    }
  }

  pub fn commentary(book: &str, chapter: u32, source: Option<&str>) -> Self {
    Self::Commentary {
      book: book.to_string(),
      chapter,
      source: source.map(String::from),
    }
  }

  pub fn category(&self) -> Category {
    match self {
      Self::Verses { .. } => Category::Verses,
      Self::Alignments { .. } => Category::Alignments,
      Self::Lexicon { .. } => Category::Lexicon,
      Self::CrossRefs { .. } => Category::CrossRefs,
      Self::Commentary { .. } => Category::Commentary,
      Self::Interlinear { .. } => Category::Interlinear,
      Self::Devotionals { .. } => Category::Devotionals,
    }
  }

  /// Key of this scope in the completeness registry, e.g. "verses:BSB:John:3".
  pub fn scope_key(&self) -> String {
    match self {
      Self::Verses {
        translation,
        book,
        chapter,
      } => format!("verses:{translation}:{book}:{chapter}"),
      Self::Alignments {
        translation,
        book,
        chapter,
      } => format!("alignments:{translation}:{book}:{chapter}"),
      Self::Lexicon {
        strong_number: None,
      } => "lexicon".to_string(),
      Self::Lexicon {
        strong_number: Some(n),
      } => format!("lexicon:{n}"),
      Self::CrossRefs { book, chapter } => format!("crossrefs:{book}:{chapter}"),
      Self::Commentary {
        book,
        chapter,
        source: None,
      } => format!("commentary:{book}:{chapter}"),
      Self::Commentary {
        book,
        chapter,
        source: Some(source),
      } => format!("commentary:{book}:{chapter}:{source}"),
      Self::Interlinear { book, chapter } => format!("interlinear:{book}:{chapter}"),
      Self::Devotionals { date } => format!("devotionals:{date}"),
    }
  }

  /// Whether `record` belongs to this scope.
  pub fn contains(&self, record: &StoreRecord) -> bool {
    let cols = record.index_columns();
    match self {
      Self::Verses {
        translation,
        book,
        chapter,
      }
      | Self::Alignments {
        translation,
        book,
        chapter,
      } => {
        record.category() == self.category()
          && cols.translation == Some(translation.as_str())
          && cols.book == Some(book.as_str())
          && cols.chapter == Some(*chapter)
      }
      Self::Lexicon { strong_number } => match (record, strong_number) {
        (StoreRecord::Lexicon(_), None) => true,
        (StoreRecord::Lexicon(entry), Some(n)) => &entry.strong_number == n,
        _ => false,
      },
      Self::CrossRefs { book, chapter } | Self::Interlinear { book, chapter } => {
        record.category() == self.category()
          && cols.book == Some(book.as_str())
          && cols.chapter == Some(*chapter)
      }
      Self::Commentary {
        book,
        chapter,
        source,
      } => {
        record.category() == Category::Commentary
          && cols.book == Some(book.as_str())
          && cols.chapter == Some(*chapter)
          && source.as_deref().map_or(true, |s| cols.source == Some(s))
      }
      Self::Devotionals { date } => {
        record.category() == Category::Devotionals && cols.day == Some(date.as_str())
      }
    }
  }
}

impl fmt::Display for Coordinates {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.scope_key())
  }
}

/// Inclusive verse range used to post-filter a chapter scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerseRange {
  pub start: u32,
  pub end: u32,
}

impl VerseRange {
  pub fn new(start: u32, end: Option<u32>) -> Self {
    Self {
      start,
      end: end.unwrap_or(start),
    }
  }

  pub fn single(verse: u32) -> Self {
    Self::new(verse, None)
  }

  fn contains(&self, verse: u32) -> bool {
    verse >= self.start && verse <= self.end
  }

  fn overlaps(&self, start: u32, end: u32) -> bool {
    start <= self.end && end >= self.start
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerseRecord {
  pub translation: String,
  pub book: String,
  pub chapter: u32,
  pub verse: u32,
  pub text: String,
}

/// Word alignment between a translation and the original text. Fields beyond the
/// coordinates are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentRecord {
  pub translation: String,
  pub book: String,
  pub chapter: u32,
  pub verse: u32,
  pub position: u32,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LexiconEntry {
  pub strong_number: String,
  pub original: Option<String>,
  pub transliteration: Option<String>,
  pub pronunciation: Option<String>,
  pub definition: Option<String>,
  pub extended_definition: Option<String>,
  pub derivation: Option<String>,
  pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossRefRecord {
  pub book: String,
  pub chapter: u32,
  pub source_verse: u32,
  pub target_book: String,
  pub target_chapter: u32,
  pub target_verse: u32,
  #[serde(default)]
  pub relationship_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentaryRecord {
  pub source: String,
  pub book: String,
  pub chapter: u32,
  pub reference_start: u32,
  #[serde(default)]
  pub reference_end: Option<u32>,
  pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterlinearWordRecord {
  pub book: String,
  pub chapter: u32,
  pub verse: u32,
  pub position: u32,
  #[serde(default)]
  pub original_text: Option<String>,
  #[serde(default)]
  pub strong_number: Option<String>,
  #[serde(default)]
  pub parsing: Option<String>,
  #[serde(default)]
  pub translation: Option<String>,
  #[serde(default)]
  pub lexeme: Option<String>,
  #[serde(default)]
  pub transliteration: Option<String>,
  #[serde(default)]
  pub definition: Option<String>,
  #[serde(default)]
  pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevotionalRecord {
  pub date: String,
  pub source: String,
  #[serde(default)]
  pub title: Option<String>,
  pub content: String,
  #[serde(default)]
  pub scripture_refs: Option<Value>,
}

/// Any record the structured store can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "lowercase")]
pub enum StoreRecord {
  #[serde(rename = "verses")]
  Verse(VerseRecord),
  #[serde(rename = "alignments")]
  Alignment(AlignmentRecord),
  Lexicon(LexiconEntry),
  #[serde(rename = "crossrefs")]
  CrossRef(CrossRefRecord),
  Commentary(CommentaryRecord),
  #[serde(rename = "interlinear")]
  InterlinearWord(InterlinearWordRecord),
  #[serde(rename = "devotionals")]
  Devotional(DevotionalRecord),
}

/// Indexed column values of a record; `None` where the category has no such column.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IndexColumns<'a> {
  pub translation: Option<&'a str>,
  pub book: Option<&'a str>,
  pub chapter: Option<u32>,
  pub verse: Option<u32>,
  pub source: Option<&'a str>,
  pub day: Option<&'a str>,
}

impl StoreRecord {
  pub fn category(&self) -> Category {
    match self {
      Self::Verse(_) => Category::Verses,
      Self::Alignment(_) => Category::Alignments,
      Self::Lexicon(_) => Category::Lexicon,
      Self::CrossRef(_) => Category::CrossRefs,
      Self::Commentary(_) => Category::Commentary,
      Self::InterlinearWord(_) => Category::Interlinear,
      Self::Devotional(_) => Category::Devotionals,
    }
  }

  /// Deterministic composite key; saving a record with the same key overwrites it.
  pub fn key(&self) -> String {
    match self {
      Self::Verse(v) => format!("{}:{}:{}:{}", v.translation, v.book, v.chapter, v.verse),
      Self::Alignment(a) => format!(
        "{}:{}:{}:{}:{}",
        a.translation, a.book, a.chapter, a.verse, a.position
      ),
      Self::Lexicon(l) => l.strong_number.clone(),
      Self::CrossRef(x) => format!(
        "{}:{}:{}:{}:{}:{}",
        x.book, x.chapter, x.source_verse, x.target_book, x.target_chapter, x.target_verse
      ),
      Self::Commentary(c) => format!("{}:{}:{}:{}", c.source, c.book, c.chapter, c.reference_start),
      Self::InterlinearWord(w) => format!("{}:{}:{}:{}", w.book, w.chapter, w.verse, w.position),
      Self::Devotional(d) => format!("{}:{}", d.date, d.source),
    }
  }

  pub(crate) fn index_columns(&self) -> IndexColumns<'_> {
    match self {
      Self::Verse(v) => IndexColumns {
        translation: Some(&v.translation),
        book: Some(&v.book),
        chapter: Some(v.chapter),
        verse: Some(v.verse),
        ..Default::default()
      },
      Self::Alignment(a) => IndexColumns {
        translation: Some(&a.translation),
        book: Some(&a.book),
        chapter: Some(a.chapter),
        verse: Some(a.verse),
        ..Default::default()
      },
      Self::Lexicon(_) => IndexColumns::default(),
      Self::CrossRef(x) => IndexColumns {
        book: Some(&x.book),
        chapter: Some(x.chapter),
        verse: Some(x.source_verse),
        ..Default::default()
      },
      Self::Commentary(c) => IndexColumns {
        book: Some(&c.book),
        chapter: Some(c.chapter),
        verse: Some(c.reference_start),
        source: Some(&c.source),
        ..Default::default()
      },
      Self::InterlinearWord(w) => IndexColumns {
        book: Some(&w.book),
        chapter: Some(w.chapter),
        verse: Some(w.verse),
        ..Default::default()
      },
      Self::Devotional(d) => IndexColumns {
        source: Some(&d.source),
        day: Some(&d.date),
        ..Default::default()
      },
    }
  }

  /// Whether the record falls inside `range`. Records without a verse position always match.
  pub fn in_range(&self, range: &VerseRange) -> bool {
    match self {
      Self::Verse(v) => range.contains(v.verse),
      Self::Alignment(a) => range.contains(a.verse),
      Self::CrossRef(x) => range.contains(x.source_verse),
      Self::Commentary(c) => {
        range.overlaps(c.reference_start, c.reference_end.unwrap_or(c.reference_start))
      }
      Self::InterlinearWord(w) => range.contains(w.verse),
      Self::Lexicon(_) | Self::Devotional(_) => true,
    }
  }

  /// Serialize the category-specific payload (without the category tag).
  pub(crate) fn to_data(&self) -> serde_json::Result<String> {
    match self {
      Self::Verse(r) => serde_json::to_string(r),
      Self::Alignment(r) => serde_json::to_string(r),
      Self::Lexicon(r) => serde_json::to_string(r),
      Self::CrossRef(r) => serde_json::to_string(r),
      Self::Commentary(r) => serde_json::to_string(r),
      Self::InterlinearWord(r) => serde_json::to_string(r),
      Self::Devotional(r) => serde_json::to_string(r),
    }
  }

  /// Inverse of [`StoreRecord::to_data`] for a known category.
  pub(crate) fn from_data(category: Category, data: &str) -> serde_json::Result<Self> {
    Ok(match category {
      Category::Verses => Self::Verse(serde_json::from_str(data)?),
      Category::Alignments => Self::Alignment(serde_json::from_str(data)?),
      Category::Lexicon => Self::Lexicon(serde_json::from_str(data)?),
      Category::CrossRefs => Self::CrossRef(serde_json::from_str(data)?),
      Category::Commentary => Self::Commentary(serde_json::from_str(data)?),
      Category::Interlinear => Self::InterlinearWord(serde_json::from_str(data)?),
      Category::Devotionals => Self::Devotional(serde_json::from_str(data)?),
    })
  }
}
