use std::collections::BTreeMap;
use std::fs;
use std::ops::Range;
use std::path::Path;

use anyhow::{Context, Result};
use koma_core::appearance::AppearanceIndex;
use koma_core::model::{Page, PageSet};
use koma_core::protocol::{PagePayload, PageSetPayload, Sense};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DictionaryEntry {
    pub reading: String,
    pub part_of_speech: String,
    pub senses: Vec<Sense>,
}

/// Lemma to entry.
pub type Dictionary = BTreeMap<String, DictionaryEntry>;

pub fn load_dictionary(path: Option<&Path>) -> Result<Dictionary> {
    let Some(path) = path else {
        return Ok(Dictionary::new());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read dictionary {:?}", path))?;
    let dictionary: Dictionary = serde_json::from_str(&raw)
        .with_context(|| format!("failed to decode dictionary {:?}", path))?;
    info!(entries = dictionary.len(), "dictionary loaded");
    Ok(dictionary)
}

/// Every page of one volume, in reading order.
#[derive(Debug, Clone)]
pub struct Volume {
    payload: Vec<PagePayload>,
    pages: Vec<Page>,
}

impl Volume {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            fs::read_to_string(path).with_context(|| format!("failed to read volume {:?}", path))?;
        let payload: PageSetPayload = serde_json::from_str(&raw)
            .with_context(|| format!("failed to decode volume {:?}", path))?;
        let volume = Self::from_payload(payload);
        info!(pages = volume.len(), "volume loaded");
        Ok(volume)
    }

    /// Pages are renumbered by position so that page indexes match what
    /// spread navigation works with.
    pub fn from_payload(payload: PageSetPayload) -> Self {
        let mut pages = payload.pages;
        for (position, page) in pages.iter_mut().enumerate() {
            if let Some(index) = page.index.filter(|index| *index != position) {
                warn!(index, position, "page index does not match its position; renumbering");
            }
            page.index = Some(position);
        }
        let validated = PageSet::from_payload(
            PageSetPayload {
                pages: pages.clone(),
                gap: None,
            },
            0.0,
        );
        Self {
            payload: pages,
            pages: validated.pages,
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Render payload for `range`, with token tracking flags taken from
    /// `index`.
    pub fn page_set(&self, range: Range<usize>, index: &AppearanceIndex) -> PageSetPayload {
        let end = range.end.min(self.payload.len());
        let start = range.start.min(end);
        let pages = self.payload[start..end]
            .iter()
            .cloned()
            .map(|mut page| {
                for token in page.blocks.iter_mut().flat_map(|block| block.tokens.iter_mut()) {
                    token.is_tracked = index.is_tracked(&token.lemma);
                }
                page
            })
            .collect();
        PageSetPayload { pages, gap: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VOLUME: &str = r#"{
        "pages": [
            {"index": 4, "width": 800, "height": 1200, "imageRef": "001.jpg", "blocks": [
                {"id": 1, "x": 100, "y": 100, "width": 40, "height": 80, "fontSize": 20,
                 "lines": ["猫犬"],
                 "tokens": [{"start": 0, "end": 1, "lemma": "猫"}, {"start": 1, "end": 2, "lemma": "犬"}]}
            ]},
            {"width": 800, "height": 1200, "imageRef": "002.jpg"}
        ]
    }"#;

    #[test]
    fn pages_are_renumbered_by_position() {
        let volume = Volume::from_payload(serde_json::from_str(VOLUME).unwrap());
        assert_eq!(volume.len(), 2);
        let indexes: Vec<_> = volume.pages().iter().map(|page| page.index).collect();
        assert_eq!(indexes, vec![0, 1]);
    }

    #[test]
    fn page_set_reflects_tracked_words() {
        let volume = Volume::from_payload(serde_json::from_str(VOLUME).unwrap());
        let mut index = AppearanceIndex::new();
        index.track("犬", "いぬ", "noun").unwrap();

        let set = volume.page_set(0..1, &index);
        assert_eq!(set.pages.len(), 1);
        let flags: Vec<_> = set.pages[0].blocks[0]
            .tokens
            .iter()
            .map(|token| (token.lemma.as_str(), token.is_tracked))
            .collect();
        assert_eq!(flags, vec![("猫", false), ("犬", true)]);

        assert!(volume.page_set(5..7, &index).pages.is_empty());
    }

    #[test]
    fn dictionary_loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"猫": {{"reading": "ねこ", "partOfSpeech": "noun", "senses": [{{"glosses": ["cat"]}}]}}}}"#
        )
        .unwrap();
        let dictionary = load_dictionary(Some(file.path())).unwrap();
        assert_eq!(dictionary["猫"].reading, "ねこ");
        assert_eq!(dictionary["猫"].senses[0].glosses, vec!["cat"]);
        assert!(load_dictionary(None).unwrap().is_empty());
    }
}
