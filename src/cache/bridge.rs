//! Decodes successful API payloads into structured-store scopes.
//!
//! The interceptor hands every `ok` cacheable response here. Shapes that do not map onto
//! a complete scope are ignored.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;

use crate::error::StoreError;
use crate::store::{
  AlignmentRecord, Category, Coordinates, CommentaryRecord, CrossRefRecord,
  InterlinearWordRecord, LexiconEntry, ScopeMeta, StoreRecord, StructuredStore, VerseRecord,
};

/// Translation assumed when a passage URL does not name one.
pub const DEFAULT_TRANSLATION: &str = "WEB";

/// A decoded payload addressed to one scope of the structured store.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeMessage {
  pub coordinates: Coordinates,
  pub payload: Vec<StoreRecord>,
}

impl BridgeMessage {
  pub fn category(&self) -> Category {
    self.coordinates.category()
  }

  /// Write the payload as one scope.
  pub fn apply(&self, store: &StructuredStore) -> Result<ScopeMeta, StoreError> {
    store.save_scope(&self.coordinates, &self.payload)
  }
}

/// A reference split into book, chapter and optional verse span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterRef {
  pub book: String,
  pub chapter: u32,
  pub verses: Option<(u32, Option<u32>)>,
}

impl ChapterRef {
  /// Split "<Book> <chapter>[:<verse>[-<verse>]]". Book names are taken verbatim.
  pub fn parse(reference: &str) -> Option<Self> {
    let (book, rest) = reference.trim().rsplit_once(' ')?;
    let (chapter, verses) = match rest.split_once(':') {
      Some((chapter, verses)) => (chapter, Some(verses)),
      None => (rest, None),
    };
    let chapter = chapter.parse().ok()?;
    let verses = match verses {
      None => None,
      Some(span) => {
        let (start, end) = match span.split_once('-') {
          Some((s, e)) => (s.parse().ok()?, Some(e.parse().ok()?)),
          None => (span.parse().ok()?, None),
        };
        Some((start, end))
      }
    };
    Some(Self {
      book: book.trim().to_string(),
      chapter,
      verses,
    })
  }

  pub fn is_whole_chapter(&self) -> bool {
    self.verses.is_none()
  }
}

#[derive(Deserialize)]
struct PassageBody {
  #[serde(default)]
  translation: Option<String>,
  verses: Vec<PassageVerse>,
}

#[derive(Deserialize)]
struct PassageVerse {
  book: String,
  chapter: u32,
  verse: u32,
  text: String,
}

#[derive(Deserialize)]
struct InterlinearBody {
  book: String,
  chapter: u32,
  #[serde(default)]
  verses: BTreeMap<String, Vec<InterlinearWord>>,
}

#[derive(Deserialize)]
struct InterlinearWord {
  position: u32,
  #[serde(default)]
  original_text: Option<String>,
  #[serde(default)]
  strong_number: Option<String>,
  #[serde(default)]
  parsing: Option<String>,
  #[serde(default)]
  translation: Option<String>,
  #[serde(default)]
  lexeme: Option<String>,
  #[serde(default)]
  transliteration: Option<String>,
  #[serde(default)]
  definition: Option<String>,
  #[serde(default)]
  language: Option<String>,
}

#[derive(Deserialize)]
struct CommentaryBody {
  reference: String,
  entries: Vec<CommentaryEntry>,
}

#[derive(Deserialize)]
pub(crate) struct CommentaryEntry {
  pub source: String,
  pub content: String,
  pub reference_start: u32,
  #[serde(default)]
  pub reference_end: Option<u32>,
}

#[derive(Deserialize)]
struct CrossRefBody {
  reference: String,
  cross_references: Vec<CrossRefEntry>,
}

#[derive(Deserialize)]
struct CrossRefEntry {
  #[serde(default)]
  source_verse: Option<u32>,
  target_book: String,
  target_chapter: u32,
  target_verse: u32,
  #[serde(default)]
  relationship_type: Option<String>,
}

#[derive(Deserialize)]
struct WordBody {
  word: LexiconEntry,
}

#[derive(Deserialize)]
struct AlignmentBody {
  translation: String,
  book: String,
  chapter: u32,
  alignments: Vec<serde_json::Map<String, Value>>,
}

/// Map a successful response body to the scope it completes.
pub fn decode(url: &Url, body: &[u8]) -> Option<BridgeMessage> {
  let segments: Vec<&str> = url.path_segments()?.collect();
  let result = match segments.as_slice() {
    ["api", "passage", _] => decode_passage(url, body),
    ["api", "passage", _, "interlinear"] => decode_interlinear(body),
    ["api", "passage", _, "commentary"] => decode_commentary(body),
    ["api", "passage", _, "crossrefs"] => decode_crossrefs(body),
    ["api", "word", strong] if is_strong_number(strong) => decode_word(body),
    ["api", "word-alignment", ..] => decode_alignments(body),
    _ => return None,
  };

  match result {
    Ok(message) => message,
    Err(e) => {
      debug!(url = %url, error = %e, "response not bridged: undecodable body");
      None
    }
  }
}

fn is_strong_number(s: &str) -> bool {
  let mut chars = s.chars();
  matches!(chars.next(), Some('G' | 'H'))
    && s.len() > 1
    && chars.all(|c| c.is_ascii_digit())
}

fn decode_passage(url: &Url, body: &[u8]) -> serde_json::Result<Option<BridgeMessage>> {
  let passage: PassageBody = serde_json::from_slice(body)?;
  let translation = passage
    .translation
    .or_else(|| {
      url
        .query_pairs()
        .find(|(k, _)| k == "translation")
        .map(|(_, v)| v.into_owned())
    })
    .unwrap_or_else(|| DEFAULT_TRANSLATION.to_string());

  let Some(first) = passage.verses.first() else {
    return Ok(None);
  };
  let (book, chapter) = (first.book.clone(), first.chapter);

  let payload = passage
    .verses
    .into_iter()
    .filter(|v| v.book == book && v.chapter == chapter)
    .map(|v| {
      StoreRecord::Verse(VerseRecord {
        translation: translation.clone(),
        book: v.book,
        chapter: v.chapter,
        verse: v.verse,
        text: v.text,
      })
    })
    .collect();

  Ok(Some(BridgeMessage {
    coordinates: Coordinates::Verses {
      translation,
      book,
      chapter,
    },
    payload,
  }))
}

fn decode_interlinear(body: &[u8]) -> serde_json::Result<Option<BridgeMessage>> {
  let data: InterlinearBody = serde_json::from_slice(body)?;
  let mut payload = Vec::new();
  for (verse, words) in data.verses {
    let Ok(verse) = verse.parse::<u32>() else {
      continue;
    };
    for w in words {
      payload.push(StoreRecord::InterlinearWord(InterlinearWordRecord {
        book: data.book.clone(),
        chapter: data.chapter,
        verse,
        position: w.position,
        original_text: w.original_text,
        strong_number: w.strong_number,
        parsing: w.parsing,
        translation: w.translation,
        lexeme: w.lexeme,
        transliteration: w.transliteration,
        definition: w.definition,
        language: w.language,
      }));
    }
  }
  Ok(Some(BridgeMessage {
    coordinates: Coordinates::Interlinear {
      book: data.book,
      chapter: data.chapter,
    },
    payload,
  }))
}

/// Commentary records for a chapter, optionally restricted to one source.
pub(crate) fn commentary_records(
  book: &str,
  chapter: u32,
  entries: Vec<CommentaryEntry>,
  only_source: Option<&str>,
) -> Vec<StoreRecord> {
  entries
    .into_iter()
    .filter(|e| only_source.map_or(true, |s| e.source == s))
    .map(|e| {
      StoreRecord::Commentary(CommentaryRecord {
        source: e.source,
        book: book.to_string(),
        chapter,
        reference_start: e.reference_start,
        reference_end: e.reference_end,
        content: e.content,
      })
    })
    .collect()
}

/// Parse a commentary response body into its reference and entries.
pub(crate) fn parse_commentary(body: &[u8]) -> serde_json::Result<(String, Vec<CommentaryEntry>)> {
  let data: CommentaryBody = serde_json::from_slice(body)?;
  Ok((data.reference, data.entries))
}

fn decode_commentary(body: &[u8]) -> serde_json::Result<Option<BridgeMessage>> {
  let (reference, entries) = parse_commentary(body)?;
  // A verse-range response covers only part of the chapter.
  let Some(chapter_ref) = ChapterRef::parse(&reference).filter(ChapterRef::is_whole_chapter) else {
    return Ok(None);
  };
  Ok(Some(BridgeMessage {
    payload: commentary_records(&chapter_ref.book, chapter_ref.chapter, entries, None),
    coordinates: Coordinates::commentary(&chapter_ref.book, chapter_ref.chapter, None),
  }))
}

fn decode_crossrefs(body: &[u8]) -> serde_json::Result<Option<BridgeMessage>> {
  let data: CrossRefBody = serde_json::from_slice(body)?;
  let Some(chapter_ref) = ChapterRef::parse(&data.reference).filter(ChapterRef::is_whole_chapter)
  else {
    return Ok(None);
  };

  // Without the source verse the records cannot be keyed, so the scope would be incomplete.
  if data.cross_references.iter().any(|x| x.source_verse.is_none()) {
    debug!(reference = %data.reference, "cross-references lack source_verse; not bridged");
    return Ok(None);
  }

  let payload = data
    .cross_references
    .into_iter()
    .filter_map(|x| {
      Some(StoreRecord::CrossRef(CrossRefRecord {
        book: chapter_ref.book.clone(),
        chapter: chapter_ref.chapter,
        source_verse: x.source_verse?,
        target_book: x.target_book,
        target_chapter: x.target_chapter,
        target_verse: x.target_verse,
        relationship_type: x.relationship_type,
      }))
    })
    .collect();

  Ok(Some(BridgeMessage {
    coordinates: Coordinates::crossrefs(&chapter_ref.book, chapter_ref.chapter),
    payload,
  }))
}

fn decode_word(body: &[u8]) -> serde_json::Result<Option<BridgeMessage>> {
  let data: WordBody = serde_json::from_slice(body)?;
  Ok(Some(BridgeMessage {
    coordinates: Coordinates::Lexicon {
      strong_number: Some(data.word.strong_number.clone()),
    },
    payload: vec![StoreRecord::Lexicon(data.word)],
  }))
}

fn decode_alignments(body: &[u8]) -> serde_json::Result<Option<BridgeMessage>> {
  let data: AlignmentBody = serde_json::from_slice(body)?;
  let mut payload = Vec::with_capacity(data.alignments.len());
  for mut fields in data.alignments {
    let take_u32 = |fields: &mut serde_json::Map<String, Value>, name: &str| {
      fields
        .remove(name)
        .and_then(|v| v.as_u64())
        .and_then(|n| u32::try_from(n).ok())
    };
    let (Some(verse), Some(position)) = (take_u32(&mut fields, "verse"), take_u32(&mut fields, "position"))
    else {
      continue;
    };
    for coordinate in ["translation", "book", "chapter"] {
      fields.remove(coordinate);
    }
    payload.push(StoreRecord::Alignment(AlignmentRecord {
      translation: data.translation.clone(),
      book: data.book.clone(),
      chapter: data.chapter,
      verse,
      position,
      extra: fields,
    }));
  }
  Ok(Some(BridgeMessage {
    coordinates: Coordinates::Alignments {
      translation: data.translation,
      book: data.book,
      chapter: data.chapter,
    },
    payload,
  }))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn url(path: &str) -> Url {
    Url::parse(&format!("http://localhost{path}")).unwrap()
  }

  #[test]
  fn parses_references() {
    assert_eq!(
      ChapterRef::parse("1 John 3:16-18"),
      Some(ChapterRef {
        book: "1 John".into(),
        chapter: 3,
        verses: Some((16, Some(18))),
      })
    );
    assert!(ChapterRef::parse("Song of Solomon 2").unwrap().is_whole_chapter());
    assert_eq!(ChapterRef::parse("John"), None);
    assert_eq!(ChapterRef::parse("John x:1"), None);
  }

  #[test]
  fn passage_becomes_verse_scope() {
    let body = json!({
      "reference": "John 3",
      "translation": "BSB",
      "verses": [
        {"id": 1, "book": "John", "chapter": 3, "verse": 1, "text": "Now there was", "word_ids": null},
        {"id": 2, "book": "John", "chapter": 3, "verse": 2, "text": "He came", "word_ids": null}
      ],
      "cross_references": [],
      "highlighted_verses": []
    });
    let msg = decode(&url("/api/passage/John%203?translation=BSB"), body.to_string().as_bytes())
      .unwrap();
    assert_eq!(msg.coordinates, Coordinates::verses("BSB", "John", 3));
    assert_eq!(msg.payload.len(), 2);
    assert_eq!(msg.category(), Category::Verses);
  }

  #[test]
  fn passage_translation_falls_back_to_query() {
    let body = json!({"verses": [{"book": "Ruth", "chapter": 1, "verse": 1, "text": "t"}]});
    let msg = decode(&url("/api/passage/Ruth%201?translation=KJV"), body.to_string().as_bytes())
      .unwrap();
    assert_eq!(msg.coordinates, Coordinates::verses("KJV", "Ruth", 1));
  }

  #[test]
  fn interlinear_groups_words_by_verse() {
    let body = json!({
      "reference": "John 1", "book": "John", "chapter": 1, "language": "greek",
      "verses": {
        "1": [{"position": 1, "original_text": "Ἐν", "strong_number": "G1722"},
              {"position": 2, "original_text": "ἀρχῇ", "strong_number": "G746"}],
        "2": [{"position": 1, "original_text": "οὗτος"}]
      },
      "has_interlinear": true
    });
    let msg = decode(&url("/api/passage/John%201/interlinear"), body.to_string().as_bytes())
      .unwrap();
    assert_eq!(msg.coordinates, Coordinates::interlinear("John", 1));
    let keys: Vec<String> = msg.payload.iter().map(StoreRecord::key).collect();
    assert_eq!(keys, vec!["John:1:1:1", "John:1:1:2", "John:1:2:1"]);
  }

  #[test]
  fn partial_commentary_is_not_bridged() {
    let body = json!({
      "reference": "John 3:16",
      "entries": [{"source": "Henry", "content": "c", "reference_start": 16, "reference_end": 16}]
    });
    assert!(decode(&url("/api/passage/John%203:16/commentary"), body.to_string().as_bytes()).is_none());

    let body = json!({
      "reference": "John 3",
      "entries": [{"source": "Henry", "content": "c", "reference_start": 16, "reference_end": 17}]
    });
    let msg = decode(&url("/api/passage/John%203/commentary"), body.to_string().as_bytes()).unwrap();
    assert_eq!(msg.coordinates, Coordinates::commentary("John", 3, None));
  }

  #[test]
  fn crossrefs_need_source_verse() {
    let body = json!({
      "reference": "John 3",
      "cross_references": [{"target_book": "Romans", "target_chapter": 5, "target_verse": 8}]
    });
    assert!(decode(&url("/api/passage/John%203/crossrefs"), body.to_string().as_bytes()).is_none());

    let body = json!({
      "reference": "John 3",
      "cross_references": [{"source_verse": 16, "target_book": "Romans", "target_chapter": 5, "target_verse": 8}]
    });
    let msg = decode(&url("/api/passage/John%203/crossrefs"), body.to_string().as_bytes()).unwrap();
    assert_eq!(msg.payload[0].key(), "John:3:16:Romans:5:8");
  }

  #[test]
  fn word_lookup_becomes_single_entry_scope() {
    let body = json!({
      "word": {"strong_number": "G26", "original": "ἀγάπη", "language": "greek"},
      "occurrences": [],
      "count": 0
    });
    let msg = decode(&url("/api/word/G26"), body.to_string().as_bytes()).unwrap();
    assert_eq!(msg.coordinates.scope_key(), "lexicon:G26");

    assert!(decode(&url("/api/word/love"), body.to_string().as_bytes()).is_none());
  }

  #[test]
  fn alignments_keep_extra_fields() {
    let body = json!({
      "translation": "BSB", "book": "John", "chapter": 3,
      "alignments": [{"verse": 16, "position": 4, "strong_number": "G2316", "english": "God"}]
    });
    let msg = decode(&url("/api/word-alignment/BSB/John%203"), body.to_string().as_bytes()).unwrap();
    match &msg.payload[0] {
      StoreRecord::Alignment(a) => {
        assert_eq!(a.verse, 16);
        assert_eq!(a.extra["english"], "God");
        assert!(!a.extra.contains_key("verse"));
      }
      other => panic!("unexpected record {other:?}"),
    }
  }

  #[test]
  fn other_shapes_are_ignored() {
    assert!(decode(&url("/api/verse/John%203:16"), b"{}").is_none());
    assert!(decode(&url("/api/passage/John%203"), b"not json").is_none());
  }

  #[test]
  fn apply_saves_scope() {
    let store = StructuredStore::open_in_memory().unwrap();
    let msg = BridgeMessage {
      coordinates: Coordinates::crossrefs("Jude", 1),
      payload: vec![],
    };
    msg.apply(&store).unwrap();
    assert!(store.has_scope(&Coordinates::crossrefs("Jude", 1)).unwrap());
  }
}
