mod boxes;
pub mod export;
mod progress;
mod route;
mod score;
mod timer;

pub use score::{validate_score, ScoreError, SubmitOutcome};

use crate::config::AppConfig;
use crate::protocol::BoxEvent;
use crate::sink::RankingSink;
use crate::timer::{Clock, SystemClock};
use crate::types::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub boxes: Arc<RwLock<HashMap<BoxId, BoxState>>>,
    /// Every box update, fanned out to connections that filter by box id
    pub broadcast: broadcast::Sender<BoxEvent>,
    pub config: Arc<AppConfig>,
    pub clock: Arc<dyn Clock>,
    pub ranking_sink: Option<Arc<dyn RankingSink>>,
}

impl AppState {
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self {
            boxes: Arc::new(RwLock::new(HashMap::new())),
            broadcast: tx,
            config: Arc::new(config),
            clock: Arc::new(SystemClock),
            ranking_sink: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ranking_sink(mut self, sink: Arc<dyn RankingSink>) -> Self {
        self.ranking_sink = Some(sink);
        self
    }

    /// Send an event to every connection of its box
    pub fn broadcast_event(&self, event: BoxEvent) {
        // No receivers connected is fine
        let _ = self.broadcast.send(event);
    }

    /// Broadcast the full state of a box after a change
    pub async fn broadcast_snapshot(&self, box_id: &BoxId) {
        if let Some(state) = self.get_box(box_id).await {
            self.broadcast_event(BoxEvent::StateSnapshot {
                box_id: box_id.clone(),
                state: Box::new(state),
            });
        }
    }

    /// Run a mutation against one box, bumping its version on success
    async fn with_box<T>(
        &self,
        box_id: &BoxId,
        f: impl FnOnce(&mut BoxState) -> Result<T, String>,
    ) -> Result<T, String> {
        let mut boxes = self.boxes.write().await;
        let state = boxes
            .get_mut(box_id)
            .ok_or_else(|| format!("Box {} not found", box_id))?;
        let result = f(state)?;
        state.version += 1;
        Ok(result)
    }

    fn preset_for(&self, state: &BoxState) -> u32 {
        state
            .timer_preset
            .unwrap_or(self.config.default_timer_seconds)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
