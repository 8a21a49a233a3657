use super::AppState;
use crate::timer::TimerState;
use crate::types::*;

impl AppState {
    /// Start the box countdown from its preset
    pub async fn start_timer(&self, box_id: &BoxId) -> Result<TimerState, String> {
        let now = self.clock.now_ms();
        self.with_box(box_id, |state| {
            let preset = self.preset_for(state);
            state.timer.start(now, preset);
            tracing::info!("Box {} timer started ({}s)", state.box_id, preset);
            Ok(state.timer)
        })
        .await
    }

    pub async fn stop_timer(&self, box_id: &BoxId) -> Result<TimerState, String> {
        let now = self.clock.now_ms();
        self.with_box(box_id, |state| {
            let remaining = state.timer.pause(now);
            tracing::info!("Box {} timer stopped at {}s", state.box_id, remaining);
            Ok(state.timer)
        })
        .await
    }

    /// Resuming at zero remaining leaves the timer untouched
    pub async fn resume_timer(&self, box_id: &BoxId) -> Result<TimerState, String> {
        let now = self.clock.now_ms();
        self.with_box(box_id, |state| {
            if !state.timer.resume(now) {
                tracing::debug!("Box {} timer resume ignored", state.box_id);
            }
            Ok(state.timer)
        })
        .await
    }

    pub async fn remaining_seconds(&self, box_id: &BoxId) -> Option<u32> {
        let now = self.clock.now_ms();
        self.boxes
            .read()
            .await
            .get(box_id)
            .map(|b| b.timer.remaining_at(now))
    }

    /// Stop every running timer that reached zero. Returns the affected boxes.
    pub async fn expire_timers(&self) -> Vec<BoxId> {
        let now = self.clock.now_ms();
        let mut expired = Vec::new();
        let mut boxes = self.boxes.write().await;
        for state in boxes.values_mut() {
            if state.timer.is_running() && state.timer.tick(now) == 0 {
                state.version += 1;
                expired.push(state.box_id.clone());
            }
        }
        expired
    }
}
