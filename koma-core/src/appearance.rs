//! Tracked vocabulary and the appearances recorded for each word.
//!
//! The index is keyed by lemma (exact, case-sensitive). Appearances are
//! keyed by `(page_index, block_id)` within a lemma, which both makes
//! re-recording idempotent and yields replay order for free.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::geometry::Rect;
use crate::model::{BlockId, Page};

pub type WordId = Uuid;

static WORD_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f9d2a64-0b7e-5c41-9a8e-6d2c71f0b5e3").expect("valid namespace UUID")
});

/// Stable id for a lemma, independent of insertion order.
pub fn word_id_for_lemma(lemma: &str) -> WordId {
    Uuid::new_v5(&*WORD_NAMESPACE, lemma.as_bytes())
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("cannot track an empty lemma")]
    EmptyLemma,
    #[error("cannot add appearance for untracked lemma: {0}")]
    NotTracked(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedWord {
    pub id: WordId,
    pub lemma: String,
    pub reading: String,
    pub part_of_speech: String,
    /// Insertion sequence; larger is newer.
    pub added: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appearance {
    pub page_index: usize,
    pub block_id: BlockId,
    /// Block geometry in page pixels when the appearance was recorded.
    pub geometry: Rect,
    pub surface_text: String,
    /// Full text of the block the word was seen in.
    #[serde(default)]
    pub sentence: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackOutcome {
    Created(TrackedWord),
    AlreadyTracked(TrackedWord),
}

impl TrackOutcome {
    pub fn word(&self) -> &TrackedWord {
        match self {
            TrackOutcome::Created(word) | TrackOutcome::AlreadyTracked(word) => word,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, TrackOutcome::Created(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncReport {
    pub new_appearances: usize,
    pub lemmas_with_hits: usize,
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    word: TrackedWord,
    appearances: BTreeMap<(usize, BlockId), Appearance>,
}

/// Serializable form of the whole index.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub words: Vec<WordRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordRecord {
    pub word: TrackedWord,
    pub appearances: Vec<Appearance>,
}

#[derive(Debug, Clone, Default)]
pub struct AppearanceIndex {
    entries: BTreeMap<String, Entry>,
    next_seq: u64,
}

impl AppearanceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Idempotent upsert. Tracking an already-tracked lemma keeps the
    /// original record and still succeeds.
    pub fn track(
        &mut self,
        lemma: &str,
        reading: &str,
        part_of_speech: &str,
    ) -> Result<TrackOutcome, IndexError> {
        if lemma.is_empty() {
            return Err(IndexError::EmptyLemma);
        }
        if let Some(entry) = self.entries.get(lemma) {
            debug!(lemma, "word already tracked");
            return Ok(TrackOutcome::AlreadyTracked(entry.word.clone()));
        }

        let word = TrackedWord {
            id: word_id_for_lemma(lemma),
            lemma: lemma.to_string(),
            reading: reading.to_string(),
            part_of_speech: part_of_speech.to_string(),
            added: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(
            lemma.to_string(),
            Entry {
                word: word.clone(),
                appearances: BTreeMap::new(),
            },
        );
        debug!(lemma, "word tracked");
        Ok(TrackOutcome::Created(word))
    }

    /// Idempotent insert keyed by `(lemma, page_index, block_id)`.
    /// Returns `Ok(true)` when a new appearance was stored.
    pub fn record_appearance(
        &mut self,
        lemma: &str,
        appearance: Appearance,
    ) -> Result<bool, IndexError> {
        let entry = self
            .entries
            .get_mut(lemma)
            .ok_or_else(|| IndexError::NotTracked(lemma.to_string()))?;
        let key = (appearance.page_index, appearance.block_id);
        if entry.appearances.contains_key(&key) {
            return Ok(false);
        }
        entry.appearances.insert(key, appearance);
        Ok(true)
    }

    /// Appearances ordered by `(page_index, block_id)` ascending.
    pub fn appearances_for(&self, lemma: &str) -> Vec<Appearance> {
        self.entries
            .get(lemma)
            .map(|entry| entry.appearances.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_tracked(&self, lemma: &str) -> bool {
        self.entries.contains_key(lemma)
    }

    pub fn word(&self, lemma: &str) -> Option<&TrackedWord> {
        self.entries.get(lemma).map(|entry| &entry.word)
    }

    pub fn tracked_lemmas(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    /// Tracked words, newest first.
    pub fn list_tracked(&self) -> Vec<TrackedWord> {
        let mut words: Vec<_> = self.entries.values().map(|entry| entry.word.clone()).collect();
        words.sort_by(|a, b| b.added.cmp(&a.added));
        words
    }

    /// Scans every block of `pages` for tokens of tracked lemmas and records
    /// the appearances that are not yet known.
    pub fn sync_pages(&mut self, pages: &[Page]) -> SyncReport {
        let mut report = SyncReport::default();
        let mut hits = BTreeSet::new();

        for page in pages {
            for block in &page.blocks {
                let sentence = block.text();
                for token in &block.tokens {
                    if !self.is_tracked(&token.lemma) {
                        continue;
                    }
                    let appearance = Appearance {
                        page_index: page.index,
                        block_id: block.id,
                        geometry: block.rect,
                        surface_text: token.surface(block),
                        sentence: sentence.clone(),
                    };
                    if let Ok(true) = self.record_appearance(&token.lemma, appearance) {
                        report.new_appearances += 1;
                        hits.insert(token.lemma.clone());
                    }
                }
            }
        }

        report.lemmas_with_hits = hits.len();
        debug!(
            new_appearances = report.new_appearances,
            lemmas = report.lemmas_with_hits,
            "context sync finished"
        );
        report
    }

    pub fn snapshot(&self) -> IndexSnapshot {
        IndexSnapshot {
            words: self
                .entries
                .values()
                .map(|entry| WordRecord {
                    word: entry.word.clone(),
                    appearances: entry.appearances.values().cloned().collect(),
                })
                .collect(),
        }
    }

    pub fn from_snapshot(snapshot: IndexSnapshot) -> Self {
        let mut index = Self::new();
        for record in snapshot.words {
            let appearances = record
                .appearances
                .into_iter()
                .map(|appearance| ((appearance.page_index, appearance.block_id), appearance))
                .collect();
            index.next_seq = index.next_seq.max(record.word.added + 1);
            index.entries.insert(
                record.word.lemma.clone(),
                Entry {
                    word: record.word,
                    appearances,
                },
            );
        }
        index
    }
}
