//! Core model, layout and host protocol for the koma page viewer.

pub mod appearance;
pub mod bridge;
pub mod config;
pub mod geometry;
pub mod model;
pub mod protocol;
pub mod spread;
pub mod store;
pub mod viewport;

pub use appearance::{
    word_id_for_lemma, Appearance, AppearanceIndex, IndexError, IndexSnapshot, SyncReport,
    TrackOutcome, TrackedWord, WordId,
};
pub use bridge::{serve_host, BridgeError, Envelope, Host, HostEndpoint, HostReplies, SessionBridge};
pub use config::{ConfigError, EngineConfig, HighlightConfig, LayoutConfig, PopupConfig, ZoomConfig};
pub use geometry::{Point, Rect, Size};
pub use model::{Block, BlockId, Page, PageSet, Token};
pub use protocol::{
    Ack, Direction, HostOperation, InboundCommand, OutboundRequest, PopupPayload, RequestId, Sense,
};
pub use spread::Spread;
pub use store::{FileIndexStore, IndexStore, MemoryIndexStore};
pub use viewport::{Layout, ViewState, ViewportLayoutEngine};
