//! Visual structures for the koma viewer: token overlays, the lookup
//! popup and the appearance highlight, plus their HTML form.

pub mod highlight;
pub mod html;
pub mod overlay;
pub mod popup;

pub use highlight::{Highlight, OverlayHighlighter, Phase};
pub use overlay::{
    fit_font_size, BlockHit, BlockView, LineView, OverlayTree, PageView, Projection, Segment,
    TokenSpan, TreeHit,
};
pub use popup::{place, Affordance, PopupController, PopupState, PopupView};
