//! In-process host backing the command line viewer: dictionary lookups,
//! volume navigation and the vocabulary index.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use koma_core::appearance::AppearanceIndex;
use koma_core::bridge::{Host, HostReplies};
use koma_core::protocol::{
    Direction, HostOperation, InboundCommand, OutboundRequest, PageSetPayload, PopupPayload,
    RequestId,
};
use koma_core::spread::Spread;
use koma_core::store::IndexStore;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::volume::{Dictionary, Volume};

/// Senses shown in a lookup popup before the full definition is asked for.
const PREVIEW_SENSES: usize = 3;

struct ContextCursor {
    lemma: String,
    position: usize,
}

struct HostState {
    current: usize,
    spread: Spread,
    index: AppearanceIndex,
    /// Set while stepping through a word's appearances.
    context: Option<ContextCursor>,
}

impl HostState {
    fn spread(&self) -> Spread {
        match self.context {
            Some(_) => self.spread.context_mode(),
            None => self.spread,
        }
    }
}

pub struct VolumeHost {
    volume: Volume,
    dictionary: Dictionary,
    store: Arc<dyn IndexStore>,
    state: Mutex<HostState>,
}

impl VolumeHost {
    pub fn new(
        volume: Volume,
        dictionary: Dictionary,
        store: Arc<dyn IndexStore>,
        spread: Spread,
        page: usize,
    ) -> Result<Self> {
        if volume.is_empty() {
            bail!("volume has no pages");
        }
        let index = store.load()?.unwrap_or_default();
        let current = page.min(volume.len() - 1);
        Ok(Self {
            volume,
            dictionary,
            store,
            state: Mutex::new(HostState {
                current,
                spread,
                index,
                context: None,
            }),
        })
    }

    /// The page set at the current position.
    pub fn current_view(&self) -> PageSetPayload {
        let state = self.state.lock();
        self.view(&state)
    }

    pub fn current_page(&self) -> usize {
        self.state.lock().current
    }

    pub fn tracked_count(&self) -> usize {
        self.state.lock().index.len()
    }

    fn view(&self, state: &HostState) -> PageSetPayload {
        let range = state.spread().pages_to_render(self.volume.pages(), state.current);
        self.volume.page_set(range, &state.index)
    }

    /// Popup for `lemma` with at most `senses` senses, or all of them.
    fn popup(
        &self,
        request_id: Option<RequestId>,
        lemma: &str,
        surface: &str,
        senses: Option<usize>,
    ) -> PopupPayload {
        let is_tracked = self.state.lock().index.is_tracked(lemma);
        let Some(entry) = self.dictionary.get(lemma) else {
            return PopupPayload {
                request_id,
                lemma: lemma.to_string(),
                surface: lemma.to_string(),
                surface_original: surface.to_string(),
                not_found: true,
                is_tracked,
                ..PopupPayload::default()
            };
        };
        let shown = senses.unwrap_or(entry.senses.len());
        PopupPayload {
            request_id,
            lemma: lemma.to_string(),
            surface: lemma.to_string(),
            surface_original: surface.to_string(),
            reading: entry.reading.clone(),
            part_of_speech: entry.part_of_speech.clone(),
            senses: entry.senses.iter().take(shown).cloned().collect(),
            is_tracked,
            ..PopupPayload::default()
        }
    }

    fn navigate(&self, direction: Direction) -> PageSetPayload {
        let mut state = self.state.lock();
        state.context = None;
        let pages = self.volume.pages();
        state.current = match direction {
            Direction::Next => state.spread.next_page(pages, state.current),
            Direction::Previous => state.spread.previous_page(pages, state.current),
        };
        debug!(page = state.current, "navigated");
        self.view(&state)
    }

    fn jump(&self, page_index: usize) -> Result<PageSetPayload> {
        if page_index >= self.volume.len() {
            bail!("page {} is outside the volume", page_index);
        }
        let mut state = self.state.lock();
        state.current = state
            .spread()
            .page_for_appearance(self.volume.pages(), page_index, state.current);
        Ok(self.view(&state))
    }

    fn track(&self, lemma: &str, reading: &str, part_of_speech: &str) -> Result<()> {
        let mut state = self.state.lock();
        let outcome = state.index.track(lemma, reading, part_of_speech)?;
        if outcome.is_new() {
            let report = state.index.sync_pages(self.volume.pages());
            info!(lemma, appearances = report.new_appearances, "word tracked");
        }
        self.store.save(&state.index)
    }

    /// Next recorded appearance of `lemma`, cycling back to the first.
    fn next_appearance(&self, lemma: &str) -> Result<InboundCommand> {
        let mut state = self.state.lock();
        let appearances = state.index.appearances_for(lemma);
        if appearances.is_empty() {
            bail!("no appearances recorded for {}", lemma);
        }
        let position = match &state.context {
            Some(cursor) if cursor.lemma == lemma => (cursor.position + 1) % appearances.len(),
            _ => 0,
        };
        state.context = Some(ContextCursor {
            lemma: lemma.to_string(),
            position,
        });
        let appearance = &appearances[position];
        debug!(lemma, position, page = appearance.page_index, "revealing appearance");
        Ok(InboundCommand::RevealAppearance {
            page_index: appearance.page_index,
            x: appearance.geometry.x,
            y: appearance.geometry.y,
            width: appearance.geometry.width,
            height: appearance.geometry.height,
        })
    }
}

#[async_trait]
impl Host for VolumeHost {
    fn capabilities(&self) -> Vec<HostOperation> {
        HostOperation::ALL.to_vec()
    }

    async fn handle(
        &self,
        id: RequestId,
        request: OutboundRequest,
        replies: &HostReplies,
    ) -> Result<()> {
        match request {
            OutboundRequest::WordLookup { lemma, surface, .. } => {
                let popup = self.popup(Some(id), &lemma, &surface, Some(PREVIEW_SENSES));
                replies.send(InboundCommand::ShowPopup(popup))?;
            }
            OutboundRequest::Navigation { direction } => {
                replies.send(InboundCommand::UpdateView(self.navigate(direction)))?;
            }
            OutboundRequest::JumpToPage { page_index } => {
                replies.send(InboundCommand::UpdateView(self.jump(page_index)?))?;
            }
            OutboundRequest::BlockClicked {
                block_id,
                page_index,
            } => {
                debug!(block_id, page_index, "block clicked");
            }
            OutboundRequest::TrackWord {
                lemma,
                reading,
                part_of_speech,
            } => {
                self.track(&lemma, &reading, &part_of_speech)?;
                replies.send(InboundCommand::MarkWordTracked { lemma })?;
            }
            OutboundRequest::ViewWordContext { lemma } => {
                replies.send(self.next_appearance(&lemma)?)?;
            }
            OutboundRequest::ShowFullDefinition { lemma } => {
                let popup = self.popup(None, &lemma, &lemma, None);
                replies.send(InboundCommand::ShowPopup(popup))?;
            }
        }
        Ok(())
    }
}
