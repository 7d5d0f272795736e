//! Wire shapes exchanged with the host.
//!
//! Inbound commands flow host → engine, outbound requests engine → host.
//! Both are tagged by `type` so they can cross a JSON transport unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::BlockId;

/// Correlates an outbound request with its acknowledgment and with any
/// later inbound response derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    pub start: i64,
    pub end: i64,
    pub lemma: String,
    #[serde(default)]
    pub part_of_speech: String,
    #[serde(default)]
    pub is_tracked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockPayload {
    pub id: BlockId,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub font_size: Option<f32>,
    #[serde(default)]
    pub lines: Vec<String>,
    #[serde(default)]
    pub tokens: Vec<TokenPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagePayload {
    /// Volume page index; defaults to the position within the set.
    #[serde(default)]
    pub index: Option<usize>,
    pub width: f32,
    pub height: f32,
    pub image_ref: String,
    #[serde(default)]
    pub blocks: Vec<BlockPayload>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSetPayload {
    pub pages: Vec<PagePayload>,
    #[serde(default)]
    pub gap: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Sense {
    #[serde(default)]
    pub glosses: Vec<String>,
    #[serde(default)]
    pub pos: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PopupPayload {
    /// Lookup this payload answers. `None` for host-initiated popups.
    pub request_id: Option<RequestId>,
    pub lemma: String,
    /// Display form, normally the lemma.
    pub surface: String,
    pub surface_original: String,
    pub reading: String,
    pub part_of_speech: String,
    pub senses: Vec<Sense>,
    pub mouse_x: f32,
    pub mouse_y: f32,
    pub not_found: bool,
    pub is_tracked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InboundCommand {
    UpdateView(PageSetPayload),
    ShowPopup(PopupPayload),
    HidePopup,
    MarkWordTracked {
        lemma: String,
    },
    HighlightBlock {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    /// Show a recorded appearance, navigating first when its page is not displayed.
    RevealAppearance {
        page_index: usize,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Next,
    Previous,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OutboundRequest {
    WordLookup {
        lemma: String,
        surface: String,
        x: f32,
        y: f32,
        page_index: usize,
        block_id: BlockId,
    },
    Navigation {
        direction: Direction,
    },
    JumpToPage {
        page_index: usize,
    },
    BlockClicked {
        block_id: BlockId,
        page_index: usize,
    },
    TrackWord {
        lemma: String,
        reading: String,
        part_of_speech: String,
    },
    ViewWordContext {
        lemma: String,
    },
    ShowFullDefinition {
        lemma: String,
    },
}

impl OutboundRequest {
    pub fn operation(&self) -> HostOperation {
        match self {
            OutboundRequest::WordLookup { .. } => HostOperation::WordLookup,
            OutboundRequest::Navigation { .. } => HostOperation::Navigation,
            OutboundRequest::JumpToPage { .. } => HostOperation::JumpToPage,
            OutboundRequest::BlockClicked { .. } => HostOperation::BlockClicked,
            OutboundRequest::TrackWord { .. } => HostOperation::TrackWord,
            OutboundRequest::ViewWordContext { .. } => HostOperation::ViewWordContext,
            OutboundRequest::ShowFullDefinition { .. } => HostOperation::ShowFullDefinition,
        }
    }
}

/// Operations a host can expose over the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HostOperation {
    WordLookup,
    Navigation,
    JumpToPage,
    BlockClicked,
    TrackWord,
    ViewWordContext,
    ShowFullDefinition,
}

impl HostOperation {
    /// Operations without which the viewer is not interactive.
    pub const REQUIRED: [HostOperation; 5] = [
        HostOperation::WordLookup,
        HostOperation::Navigation,
        HostOperation::BlockClicked,
        HostOperation::TrackWord,
        HostOperation::ViewWordContext,
    ];

    pub const ALL: [HostOperation; 7] = [
        HostOperation::WordLookup,
        HostOperation::Navigation,
        HostOperation::JumpToPage,
        HostOperation::BlockClicked,
        HostOperation::TrackWord,
        HostOperation::ViewWordContext,
        HostOperation::ShowFullDefinition,
    ];
}

impl fmt::Display for HostOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HostOperation::WordLookup => "requestWordLookup",
            HostOperation::Navigation => "requestNavigation",
            HostOperation::JumpToPage => "requestJumpToPage",
            HostOperation::BlockClicked => "notifyBlockClicked",
            HostOperation::TrackWord => "requestTrackWord",
            HostOperation::ViewWordContext => "requestViewWordContext",
            HostOperation::ShowFullDefinition => "requestShowFullDefinition",
        };
        f.write_str(name)
    }
}

/// Transport-level acknowledgment for one outbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub id: RequestId,
    pub ok: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl Ack {
    pub fn ok(id: RequestId) -> Self {
        Self {
            id,
            ok: true,
            message: None,
        }
    }

    pub fn failed(id: RequestId, message: impl Into<String>) -> Self {
        Self {
            id,
            ok: false,
            message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_view_parses_host_json() {
        let raw = r#"{
            "type": "updateView",
            "pages": [{
                "width": 800, "height": 1200, "imageRef": "001.jpg",
                "blocks": [{
                    "id": 1, "x": 120, "y": 340, "width": 200, "height": 60,
                    "fontSize": 18, "lines": ["食べた"],
                    "tokens": [{"start": 0, "end": 3, "lemma": "食べる", "partOfSpeech": "verb", "isTracked": false}]
                }]
            }],
            "gap": 10
        }"#;

        match serde_json::from_str::<InboundCommand>(raw).unwrap() {
            InboundCommand::UpdateView(set) => {
                assert_eq!(set.gap, Some(10.0));
                let block = &set.pages[0].blocks[0];
                assert_eq!(block.font_size, Some(18.0));
                assert_eq!(block.tokens[0].lemma, "食べる");
                assert_eq!(block.tokens[0].part_of_speech, "verb");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn outbound_requests_serialize_with_camel_case_fields() {
        let request = OutboundRequest::BlockClicked {
            block_id: 4,
            page_index: 2,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["type"], "blockClicked");
        assert_eq!(json["blockId"], 4);
        assert_eq!(json["pageIndex"], 2);

        let nav = serde_json::to_value(OutboundRequest::Navigation {
            direction: Direction::Previous,
        })
        .unwrap();
        assert_eq!(nav["direction"], "previous");
    }

    #[test]
    fn popup_payload_fields_are_optional() {
        let payload: PopupPayload =
            serde_json::from_str(r#"{"lemma": "猫", "notFound": true}"#).unwrap();
        assert!(payload.not_found);
        assert!(payload.request_id.is_none());
        assert!(payload.senses.is_empty());
    }

    #[test]
    fn required_operations_exclude_optional_ones() {
        assert!(!HostOperation::REQUIRED.contains(&HostOperation::ShowFullDefinition));
        assert!(!HostOperation::REQUIRED.contains(&HostOperation::JumpToPage));
        assert_eq!(HostOperation::WordLookup.to_string(), "requestWordLookup");
    }
}
