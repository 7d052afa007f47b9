//! Aggregate view over the completeness registry.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use super::records::Coordinates;
use super::ScopeMeta;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TranslationStats {
  pub chapters: usize,
  pub verses: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlignmentStats {
  pub chapters: usize,
  pub words: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LexiconStats {
  /// The whole lexicon was saved as one scope
  pub cached: bool,
  /// Entry count of the whole-lexicon scope
  pub count: usize,
  /// Individually cached entries (from word lookups)
  pub entries: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChapterStats {
  pub books: usize,
  pub chapters: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
  pub verses: BTreeMap<String, TranslationStats>,
  pub alignments: BTreeMap<String, AlignmentStats>,
  pub lexicon: LexiconStats,
  pub crossrefs: ChapterStats,
  pub commentary: ChapterStats,
  pub commentary_sources: BTreeSet<String>,
  pub interlinear: ChapterStats,
  pub devotional_days: usize,
}

/// Distinct (book, chapter) pairs seen for one category.
#[derive(Default)]
struct ChapterSet(BTreeSet<(String, u32)>);

impl ChapterSet {
  fn insert(&mut self, book: &str, chapter: u32) {
    self.0.insert((book.to_string(), chapter));
  }

  fn stats(&self) -> ChapterStats {
    let books: BTreeSet<&str> = self.0.iter().map(|(b, _)| b.as_str()).collect();
    ChapterStats {
      books: books.len(),
      chapters: self.0.len(),
    }
  }
}

impl StoreStats {
  /// Bucket registry entries by category and sub-key.
  pub fn from_meta(metas: &[ScopeMeta]) -> Self {
    let mut stats = Self::default();
    let mut crossrefs = ChapterSet::default();
    let mut commentary = ChapterSet::default();
    let mut interlinear = ChapterSet::default();

    for meta in metas.iter().filter(|m| m.cached) {
      match &meta.coordinates {
        Coordinates::Verses { translation, .. } => {
          let entry = stats.verses.entry(translation.clone()).or_default();
          entry.chapters += 1;
          entry.verses += meta.count;
        }
        Coordinates::Alignments { translation, .. } => {
          let entry = stats.alignments.entry(translation.clone()).or_default();
          entry.chapters += 1;
          entry.words += meta.count;
        }
        Coordinates::Lexicon {
          strong_number: None,
        } => {
          stats.lexicon.cached = true;
          stats.lexicon.count = meta.count;
        }
        Coordinates::Lexicon {
          strong_number: Some(_),
        } => stats.lexicon.entries += 1,
        Coordinates::CrossRefs { book, chapter } => crossrefs.insert(book, *chapter),
        Coordinates::Commentary {
          book,
          chapter,
          source,
        } => {
          commentary.insert(book, *chapter);
          if let Some(source) = source {
            stats.commentary_sources.insert(source.clone());
          }
        }
        Coordinates::Interlinear { book, chapter } => interlinear.insert(book, *chapter),
        Coordinates::Devotionals { .. } => stats.devotional_days += 1,
      }
    }

    stats.crossrefs = crossrefs.stats();
    stats.commentary = commentary.stats();
    stats.interlinear = interlinear.stats();
    stats
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;

  fn meta(coordinates: Coordinates, count: usize) -> ScopeMeta {
    ScopeMeta {
      scope_key: coordinates.scope_key(),
      category: coordinates.category(),
      coordinates,
      cached: true,
      cached_at: Utc::now(),
      count,
    }
  }

  #[test]
  fn buckets_verses_per_translation() {
    let stats = StoreStats::from_meta(&[
      meta(Coordinates::verses("BSB", "John", 3), 36),
      meta(Coordinates::verses("BSB", "John", 4), 54),
      meta(Coordinates::verses("WEB", "John", 3), 36),
    ]);
    assert_eq!(
      stats.verses["BSB"],
      TranslationStats {
        chapters: 2,
        verses: 90
      }
    );
    assert_eq!(stats.verses["WEB"].chapters, 1);
  }

  #[test]
  fn commentary_chapters_are_distinct_across_sources() {
    let stats = StoreStats::from_meta(&[
      meta(Coordinates::commentary("John", 3, None), 4),
      meta(Coordinates::commentary("John", 3, Some("Henry")), 2),
      meta(Coordinates::commentary("Mark", 1, Some("Henry")), 2),
    ]);
    assert_eq!(
      stats.commentary,
      ChapterStats {
        books: 2,
        chapters: 2
      }
    );
    assert!(stats.commentary_sources.contains("Henry"));
  }

  #[test]
  fn lexicon_presence_comes_from_whole_scope() {
    let stats = StoreStats::from_meta(&[meta(
      Coordinates::Lexicon {
        strong_number: Some("G26".into()),
      },
      1,
    )]);
    assert!(!stats.lexicon.cached);
    assert_eq!(stats.lexicon.entries, 1);

    let stats = StoreStats::from_meta(&[meta(
      Coordinates::Lexicon {
        strong_number: None,
      },
      14298,
    )]);
    assert!(stats.lexicon.cached);
    assert_eq!(stats.lexicon.count, 14298);
  }
}
