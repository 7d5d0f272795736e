//! Async loop feeding host commands, input and timer ticks into an
//! [`Engine`], one at a time.

use std::time::{Duration, Instant};

use anyhow::Result;
use koma_core::protocol::InboundCommand;
use koma_input::{InputEvent, RouteAction};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, instrument, warn};

use crate::Engine;

const DEFAULT_TICK: Duration = Duration::from_millis(50);

pub struct EngineDriver {
    engine: Engine,
    inbound: mpsc::UnboundedReceiver<InboundCommand>,
    input: mpsc::UnboundedReceiver<InputEvent>,
    tick: Duration,
}

impl EngineDriver {
    pub fn new(
        engine: Engine,
        inbound: mpsc::UnboundedReceiver<InboundCommand>,
        input: mpsc::UnboundedReceiver<InputEvent>,
    ) -> Self {
        Self {
            engine,
            inbound,
            input,
            tick: DEFAULT_TICK,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Runs until the input channel closes, calling `on_frame` after every
    /// event that changed what is on screen. Host commands are handled
    /// before input so a render is never interleaved with stale input.
    #[instrument(skip_all)]
    pub async fn run<F>(mut self, mut on_frame: F) -> Result<Engine>
    where
        F: FnMut(&Engine) -> Result<()>,
    {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut inbound_open = true;

        loop {
            let changed = tokio::select! {
                biased;
                command = self.inbound.recv(), if inbound_open => match command {
                    Some(command) => {
                        self.engine.apply(command, Instant::now())?;
                        true
                    }
                    None => {
                        warn!("host command channel closed");
                        inbound_open = false;
                        false
                    }
                },
                event = self.input.recv() => match event {
                    Some(event) => !matches!(self.engine.handle_input(event)?, RouteAction::None),
                    None => break,
                },
                _ = ticker.tick() => self.engine.tick(Instant::now()),
            };
            if changed {
                on_frame(&self.engine)?;
            }
        }

        info!("input closed; engine loop finished");
        Ok(self.engine)
    }
}
