//! Contest display: a read model built from one box aggregate, and the
//! per-tab session that keeps that aggregate current from incoming events.

use crate::kv::{keys, SharedStore};
use crate::protocol::BoxEvent;
use crate::ranking::{self, StandingRow};
use crate::timer::{format_clock, spawn_ticker, TimerCoordinator, TimerState};
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// One rendered line of the ranking table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SurfaceRow {
    pub rank: usize,
    pub nume: String,
    pub club: Option<String>,
    /// Per-route score text: "Top", a number, or "-" when not climbed yet
    pub marks: Vec<String>,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SurfaceView {
    pub box_id: BoxId,
    pub categorie: String,
    /// "n/m", e.g. "2/3"
    pub route: String,
    pub climbing: Option<String>,
    pub preparing: Vec<String>,
    pub still_to_climb: Vec<String>,
    pub timer: String,
    pub remaining_seconds: u32,
    pub timer_running: bool,
    pub hold_progress: f64,
    pub holds_count: u32,
    pub standings: Vec<SurfaceRow>,
    pub finalized: bool,
    pub podium: Vec<PodiumEntry>,
}

fn format_score(score: Option<f64>, holds_count: Option<u32>) -> String {
    match score {
        None => "-".to_string(),
        Some(s) if ranking::is_top(s, holds_count) => "Top".to_string(),
        Some(s) if s.fract() == 0.0 => format!("{}", s as i64),
        Some(s) => format!("{:.1}", s),
    }
}

fn surface_row(state: &BoxState, row: StandingRow) -> SurfaceRow {
    let marks = (1..=state.routes_count)
        .map(|route| {
            let score = row.scores.get((route - 1) as usize).copied().flatten();
            format_score(score, state.holds_for_route(route))
        })
        .collect();
    SurfaceRow {
        rank: row.rank,
        nume: row.nume,
        club: row.club,
        marks,
        total: row.total,
    }
}

impl SurfaceView {
    /// Render a box as seen at `now_ms`. Competitors already marked for the
    /// current route are not shown in the queue.
    pub fn build(state: &BoxState, now_ms: i64, use_time_tiebreak: bool) -> Self {
        let unmarked = |name: &&String| {
            state
                .competitor(name)
                .map(|c| !c.marked)
                .unwrap_or(false)
        };
        let climbing = state.queue.climbing.as_ref().filter(unmarked).cloned();
        let preparing = state.queue.preparing.iter().filter(unmarked).cloned().collect();
        let still_to_climb = state.queue.remaining.iter().filter(unmarked).cloned().collect();

        let remaining_seconds = state.timer.remaining_at(now_ms);
        let standings = ranking::standings(state, use_time_tiebreak)
            .into_iter()
            .map(|row| surface_row(state, row))
            .collect();

        Self {
            box_id: state.box_id.clone(),
            categorie: state.categorie.clone(),
            route: format!("{}/{}", state.route_index, state.routes_count),
            climbing,
            preparing,
            still_to_climb,
            timer: format_clock(remaining_seconds),
            remaining_seconds,
            timer_running: state.timer.is_running(),
            hold_progress: state.hold_progress,
            holds_count: state.holds_count,
            standings,
            finalized: state.finalized,
            podium: state.podium.clone(),
        }
    }
}

/// A display or judge tab bound to one box
pub struct SurfaceSession {
    box_id: BoxId,
    store: Arc<SharedStore>,
    timer: Arc<TimerCoordinator>,
    preparing_size: usize,
    state: Option<BoxState>,
    /// Live countdown, shared with the ticker while this tab owns the clock
    countdown: Arc<Mutex<TimerState>>,
    ticker: Option<JoinHandle<()>>,
    /// Climber learned from another tab before any state arrived
    adopted_climber: Option<String>,
}

impl SurfaceSession {
    pub fn new(store: Arc<SharedStore>, timer: Arc<TimerCoordinator>) -> Self {
        Self {
            box_id: timer.box_id().clone(),
            store,
            timer,
            preparing_size: DEFAULT_PREPARING_SIZE,
            state: None,
            countdown: Arc::new(Mutex::new(TimerState::Idle)),
            ticker: None,
            adopted_climber: None,
        }
    }

    pub fn with_preparing_size(mut self, size: usize) -> Self {
        self.preparing_size = size;
        self
    }

    /// Last applied aggregate. Its timer lags the live countdown between
    /// events; use [`SurfaceSession::timer_state`] for the current value.
    pub fn state(&self) -> Option<&BoxState> {
        self.state.as_ref()
    }

    pub async fn timer_state(&self) -> TimerState {
        *self.countdown.lock().await
    }

    /// Whether this tab is driving the countdown
    pub fn is_ticking(&self) -> bool {
        self.ticker.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn climbing(&self) -> Option<&String> {
        self.state
            .as_ref()
            .and_then(|s| s.queue.climbing.as_ref())
            .or(self.adopted_climber.as_ref())
    }

    /// Apply a command issued from this tab and hand it back for dispatch.
    ///
    /// Timer commands go through the coordinator here, so only the tab that
    /// starts or resumes the clock claims tick ownership and runs the ticker.
    pub async fn command(&mut self, event: BoxEvent) -> Option<BoxEvent> {
        if event.box_id() != Some(&self.box_id) {
            return None;
        }
        match event {
            BoxEvent::StartTimer { .. }
            | BoxEvent::StopTimer { .. }
            | BoxEvent::ResumeTimer { .. } => {
                self.state.as_ref()?;
                self.drive_timer(&event).await;
            }
            _ => {
                self.apply(event.clone()).await;
            }
        }
        Some(event)
    }

    async fn drive_timer(&mut self, event: &BoxEvent) {
        let running = {
            let mut countdown = self.countdown.lock().await;
            let result = match event {
                BoxEvent::StartTimer { .. } => self.timer.start(&mut countdown).await.map(|_| true),
                BoxEvent::ResumeTimer { .. } => self.timer.resume(&mut countdown).await,
                _ => self.timer.pause(&mut countdown).await.map(|_| false),
            };
            if let Some(state) = self.state.as_mut() {
                state.timer = *countdown;
            }
            if let Err(e) = result {
                tracing::error!("Timer command for box {} not persisted: {}", self.box_id, e);
            }
            countdown.is_running()
        };

        self.stop_ticker();
        if running {
            self.ticker = Some(spawn_ticker(self.timer.clone(), self.countdown.clone()));
        }
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }

    /// Take the timer carried by the aggregate as the live countdown
    async fn adopt_box_timer(&mut self) {
        let Some(timer) = self.state.as_ref().map(|s| s.timer) else {
            return;
        };
        *self.countdown.lock().await = timer;
        if !timer.is_running() {
            self.stop_ticker();
        }
    }

    /// Follow a timer command issued by another tab without claiming the clock
    async fn follow_timer(&mut self, event: &BoxEvent) {
        if self.state.is_none() {
            return;
        }
        // Our own command echoed back by the server
        if !matches!(event, BoxEvent::StopTimer { .. })
            && self.is_ticking()
            && self.timer.is_tick_owner().await
        {
            return;
        }

        let now = self.timer.now_ms();
        let preset = self.timer.preset_seconds().await;
        let timer = {
            let mut countdown = self.countdown.lock().await;
            match event {
                BoxEvent::StartTimer { .. } => countdown.start(now, preset),
                BoxEvent::ResumeTimer { .. } => {
                    countdown.resume(now);
                }
                _ => {
                    countdown.pause(now);
                }
            }
            *countdown
        };
        if let Some(state) = self.state.as_mut() {
            state.timer = timer;
        }
        self.stop_ticker();
    }

    /// Apply one incoming event. Returns a reply to send back, if any.
    pub async fn apply(&mut self, event: BoxEvent) -> Option<BoxEvent> {
        if let Some(box_id) = event.box_id() {
            if *box_id != self.box_id {
                return None;
            }
        }

        match event {
            BoxEvent::StateSnapshot { state, .. } => {
                self.state = Some(*state);
                self.adopt_box_timer().await;
            }
            BoxEvent::InitRoute {
                route_index,
                competitors,
                holds_count,
                ..
            } => {
                let preset = self.timer.preset_seconds().await;
                let preparing_size = self.preparing_size;
                let state = self.state.as_mut()?;
                if let Err(e) =
                    state.init_route(route_index, competitors, holds_count, preset, preparing_size)
                {
                    tracing::warn!("Tab ignored INIT_ROUTE: {}", e);
                }
                self.adopt_box_timer().await;
            }
            command @ (BoxEvent::StartTimer { .. }
            | BoxEvent::StopTimer { .. }
            | BoxEvent::ResumeTimer { .. }) => {
                self.follow_timer(&command).await;
            }
            BoxEvent::ProgressUpdate { delta, .. } => {
                self.state.as_mut()?.apply_progress(delta);
            }
            BoxEvent::SubmitScore {
                competitor,
                score,
                registered_time,
                ..
            } => {
                let preset = self.timer.preset_seconds().await;
                let time = registered_time.as_ref().and_then(|t| t.seconds());
                let state = self.state.as_mut()?;
                if let Err(e) = state.record_score(&competitor, score, time, preset) {
                    tracing::warn!("Tab ignored score for {}: {}", competitor, e);
                }
                self.adopt_box_timer().await;
            }
            BoxEvent::TimerSync { remaining, .. } => {
                // The owner's own clock is authoritative for it
                if self.timer.is_tick_owner().await {
                    return None;
                }
                self.state.as_ref()?;
                let now = self.timer.now_ms();
                let timer = {
                    let mut countdown = self.countdown.lock().await;
                    *countdown = if countdown.is_running() && remaining > 0 {
                        TimerState::Running {
                            end_timestamp_ms: now + i64::from(remaining) * 1000,
                        }
                    } else {
                        TimerState::Stopped {
                            remaining_seconds: remaining,
                        }
                    };
                    *countdown
                };
                if let Some(state) = self.state.as_mut() {
                    state.timer = timer;
                }
            }
            BoxEvent::RequestActiveCompetitor { .. } => {
                let competitor = self.climbing()?.clone();
                return Some(BoxEvent::ResponseActiveCompetitor {
                    box_id: self.box_id.clone(),
                    competitor,
                    ts: chrono::Utc::now().timestamp_millis(),
                });
            }
            BoxEvent::ResponseActiveCompetitor { competitor, .. } => {
                if self.climbing().is_none() {
                    tracing::debug!("Adopting climber {} for box {}", competitor, self.box_id);
                    self.adopted_climber = Some(competitor);
                }
            }
            BoxEvent::Error { code, msg } => {
                tracing::warn!("Box {} error {}: {}", self.box_id, code, msg);
            }
            BoxEvent::RequestState { .. } | BoxEvent::Unknown => {}
        }

        self.publish_shared().await;
        None
    }

    /// Share the current climber and, once finalized, the podium with other tabs
    async fn publish_shared(&self) {
        if let Some(name) = self.climbing().cloned() {
            if let Err(e) = self
                .store
                .set(&keys::current_climber(&self.box_id), name)
                .await
            {
                tracing::warn!("Current climber not shared: {}", e);
            }
        }

        let Some(state) = self.state.as_ref().filter(|s| s.finalized) else {
            return;
        };
        match serde_json::to_string(&state.podium) {
            Ok(json) => {
                if let Err(e) = self.store.set(&keys::podium(&self.box_id), json).await {
                    tracing::warn!("Podium not shared: {}", e);
                }
            }
            Err(e) => tracing::error!("Failed to encode podium: {}", e),
        }
    }

    /// Render the current state. The shared time-tiebreak toggle wins over the box setting.
    pub async fn view(&self, now_ms: i64) -> Option<SurfaceView> {
        let mut state = self.state.clone()?;
        state.timer = *self.countdown.lock().await;
        let use_time_tiebreak = self
            .store
            .get_flag(&keys::time_tiebreak())
            .await
            .unwrap_or(state.use_time_tiebreak);
        Some(SurfaceView::build(&state, now_ms, use_time_tiebreak))
    }
}

impl Drop for SurfaceSession {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}
