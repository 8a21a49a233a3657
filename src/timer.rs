//! Countdown timer for a contest box.
//!
//! [`TimerState`] holds the pure transitions. [`TimerCoordinator`] is the
//! per-tab driver: it resolves presets, claims tick ownership in the shared
//! store and fans remaining values out to the local and network paths.
//!
//! Tick ownership is advisory. The shared store has no compare-and-swap, so
//! the last tab to write the owner key wins and every other tab stops ticking
//! the next time it checks.

use crate::kv::{keys, SharedStore, StoreError};
use crate::protocol::BoxEvent;
use crate::types::{BoxId, TabId};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

/// Frame-rate equivalent tick period
pub const TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Fallback preset when neither the box nor the global default is configured
pub const DEFAULT_PRESET_SECONDS: u32 = 300;

/// Source of wall-clock time in milliseconds since the Unix epoch
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually advanced clock for tests and replays
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TimerState {
    /// No countdown configured
    #[default]
    Idle,
    Stopped {
        remaining_seconds: u32,
    },
    Running {
        end_timestamp_ms: i64,
    },
}

fn seconds_until(end_ms: i64, now_ms: i64) -> u32 {
    let left = end_ms.saturating_sub(now_ms);
    if left <= 0 {
        return 0;
    }
    // ceil(left / 1000)
    let secs = (left + 999) / 1000;
    u32::try_from(secs).unwrap_or(u32::MAX)
}

impl TimerState {
    pub fn is_running(&self) -> bool {
        matches!(self, TimerState::Running { .. })
    }

    /// Remaining seconds as observed at `now_ms`
    pub fn remaining_at(&self, now_ms: i64) -> u32 {
        match *self {
            TimerState::Idle => 0,
            TimerState::Stopped { remaining_seconds } => remaining_seconds,
            TimerState::Running { end_timestamp_ms } => seconds_until(end_timestamp_ms, now_ms),
        }
    }

    /// Begin a fresh countdown of `duration_seconds`
    pub fn start(&mut self, now_ms: i64, duration_seconds: u32) {
        *self = TimerState::Running {
            end_timestamp_ms: now_ms + i64::from(duration_seconds) * 1000,
        };
    }

    /// Freeze the countdown, returning the remaining seconds
    pub fn pause(&mut self, now_ms: i64) -> u32 {
        let remaining = self.remaining_at(now_ms);
        if self.is_running() {
            *self = TimerState::Stopped {
                remaining_seconds: remaining,
            };
        }
        remaining
    }

    /// Continue a stopped countdown. Returns false when nothing was resumed.
    pub fn resume(&mut self, now_ms: i64) -> bool {
        match *self {
            TimerState::Stopped { remaining_seconds } if remaining_seconds > 0 => {
                *self = TimerState::Running {
                    end_timestamp_ms: now_ms + i64::from(remaining_seconds) * 1000,
                };
                true
            }
            _ => false,
        }
    }

    /// Recompute remaining time, stopping at zero
    pub fn tick(&mut self, now_ms: i64) -> u32 {
        let remaining = self.remaining_at(now_ms);
        if self.is_running() && remaining == 0 {
            *self = TimerState::Stopped {
                remaining_seconds: 0,
            };
        }
        remaining
    }

    /// Load a preset without starting it
    pub fn reset(&mut self, preset_seconds: u32) {
        *self = TimerState::Stopped {
            remaining_seconds: preset_seconds,
        };
    }
}

/// Format seconds as `m:ss` for display
pub fn format_clock(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// Parse a preset stored either as plain seconds or as `m:ss`
pub fn parse_preset(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if let Some((m, s)) = raw.split_once(':') {
        let minutes: u32 = m.trim().parse().ok()?;
        let seconds: u32 = s.trim().parse().ok()?;
        if seconds >= 60 {
            return None;
        }
        return minutes.checked_mul(60)?.checked_add(seconds);
    }
    raw.parse().ok()
}

/// Network half of the timer broadcast
pub trait TimerSink: Send + Sync {
    fn send_timer_sync(&self, event: BoxEvent);
}

/// A remaining-seconds update as seen by local observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerUpdate {
    pub remaining: u32,
    pub running: bool,
}

/// Per-tab timer driver for a single box
pub struct TimerCoordinator {
    box_id: BoxId,
    tab_id: TabId,
    store: Arc<SharedStore>,
    clock: Arc<dyn Clock>,
    network: Option<Arc<dyn TimerSink>>,
    fallback_preset: u32,
    last_sent: Mutex<Option<u32>>,
    local: broadcast::Sender<TimerUpdate>,
}

impl TimerCoordinator {
    pub fn new(
        box_id: BoxId,
        tab_id: TabId,
        store: Arc<SharedStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (local, _rx) = broadcast::channel(64);
        Self {
            box_id,
            tab_id,
            store,
            clock,
            network: None,
            fallback_preset: DEFAULT_PRESET_SECONDS,
            last_sent: Mutex::new(None),
            local,
        }
    }

    pub fn with_network(mut self, sink: Arc<dyn TimerSink>) -> Self {
        self.network = Some(sink);
        self
    }

    pub fn with_fallback_preset(mut self, seconds: u32) -> Self {
        self.fallback_preset = seconds;
        self
    }

    pub fn box_id(&self) -> &BoxId {
        &self.box_id
    }

    pub fn tab_id(&self) -> &TabId {
        &self.tab_id
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimerUpdate> {
        self.local.subscribe()
    }

    /// Box preset, then global default, then the configured fallback
    pub async fn preset_seconds(&self) -> u32 {
        for key in [keys::timer_preset(&self.box_id), keys::default_timer_preset()] {
            if let Some(raw) = self.store.get(&key).await {
                match parse_preset(&raw) {
                    Some(secs) => return secs,
                    None => tracing::warn!("Ignoring unparsable timer preset {}={}", key, raw),
                }
            }
        }
        self.fallback_preset
    }

    /// Whether this tab currently holds tick ownership for the box
    pub async fn is_tick_owner(&self) -> bool {
        self.store.get(&keys::tick_owner(&self.box_id)).await.as_deref() == Some(self.tab_id.as_str())
    }

    async fn claim_tick_ownership(&self) -> Result<(), StoreError> {
        tracing::debug!("Tab {} claims tick ownership of box {}", self.tab_id, self.box_id);
        self.store
            .set(&keys::tick_owner(&self.box_id), self.tab_id.clone())
            .await
    }

    pub async fn start(&self, timer: &mut TimerState) -> Result<u32, StoreError> {
        let preset = self.preset_seconds().await;
        timer.start(self.clock.now_ms(), preset);
        self.claim_tick_ownership().await?;
        self.publish(preset, true).await?;
        Ok(preset)
    }

    pub async fn pause(&self, timer: &mut TimerState) -> Result<u32, StoreError> {
        let remaining = timer.pause(self.clock.now_ms());
        self.publish(remaining, false).await?;
        Ok(remaining)
    }

    /// Resume at zero remaining is a no-op
    pub async fn resume(&self, timer: &mut TimerState) -> Result<bool, StoreError> {
        if !timer.resume(self.clock.now_ms()) {
            return Ok(false);
        }
        self.claim_tick_ownership().await?;
        let remaining = timer.remaining_at(self.clock.now_ms());
        self.publish(remaining, true).await?;
        Ok(true)
    }

    /// Load the preset in a stopped, ready-to-start state
    pub async fn reset(&self, timer: &mut TimerState) -> Result<u32, StoreError> {
        let preset = self.preset_seconds().await;
        timer.reset(preset);
        self.publish(preset, false).await?;
        Ok(preset)
    }

    /// Advance the clock if this tab owns it. Returns `None` when another tab owns it.
    pub async fn tick(&self, timer: &mut TimerState) -> Result<Option<u32>, StoreError> {
        if !timer.is_running() || !self.is_tick_owner().await {
            return Ok(None);
        }
        let remaining = timer.tick(self.clock.now_ms());
        self.publish(remaining, timer.is_running()).await?;
        Ok(Some(remaining))
    }

    /// Fast local path always, network path only on change
    async fn publish(&self, remaining: u32, running: bool) -> Result<(), StoreError> {
        let _ = self.local.send(TimerUpdate { remaining, running });
        self.store
            .set(&keys::current_timer(&self.box_id), remaining.to_string())
            .await?;

        let mut last_sent = self.last_sent.lock().await;
        if *last_sent != Some(remaining) {
            *last_sent = Some(remaining);
            if let Some(network) = &self.network {
                network.send_timer_sync(BoxEvent::TimerSync {
                    box_id: self.box_id.clone(),
                    remaining,
                });
            }
        }
        Ok(())
    }
}

/// Spawn the tick loop for a running timer.
///
/// The loop ends when the timer stops, when ownership moves to another tab,
/// or when the returned handle is aborted (teardown).
pub fn spawn_ticker(
    coordinator: Arc<TimerCoordinator>,
    timer: Arc<Mutex<TimerState>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let mut state = timer.lock().await;
            match coordinator.tick(&mut state).await {
                Ok(Some(_)) if state.is_running() => {}
                Ok(Some(_)) => {
                    tracing::info!("Timer for box {} reached zero", coordinator.box_id());
                    break;
                }
                Ok(None) => {
                    tracing::debug!(
                        "Tab {} stops ticking box {}",
                        coordinator.tab_id(),
                        coordinator.box_id()
                    );
                    break;
                }
                Err(e) => {
                    tracing::error!("Timer tick could not be persisted: {}", e);
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        sent: StdMutex<Vec<u32>>,
    }

    impl TimerSink for RecordingSink {
        fn send_timer_sync(&self, event: BoxEvent) {
            if let BoxEvent::TimerSync { remaining, .. } = event {
                self.sent.lock().unwrap().push(remaining);
            }
        }
    }

    fn coordinator(
        store: Arc<SharedStore>,
        clock: Arc<ManualClock>,
        tab: &str,
    ) -> TimerCoordinator {
        TimerCoordinator::new("box1".to_string(), tab.to_string(), store, clock)
    }

    #[test]
    fn test_remaining_rounds_up() {
        let timer = TimerState::Running {
            end_timestamp_ms: 10_500,
        };
        assert_eq!(timer.remaining_at(0), 11);
        assert_eq!(timer.remaining_at(10_000), 1);
        assert_eq!(timer.remaining_at(10_500), 0);
        assert_eq!(timer.remaining_at(20_000), 0);
    }

    #[test]
    fn test_tick_is_monotonic() {
        let mut timer = TimerState::Idle;
        timer.start(0, 5);
        let mut last = u32::MAX;
        for now in (0..7_000).step_by(137) {
            let remaining = timer.tick(now);
            assert!(remaining <= last);
            last = remaining;
        }
        assert_eq!(last, 0);
        assert_eq!(
            timer,
            TimerState::Stopped {
                remaining_seconds: 0
            }
        );
    }

    #[test]
    fn test_pause_resume_keeps_remaining() {
        let mut timer = TimerState::Idle;
        timer.start(1_000, 60);
        let paused = timer.pause(21_000);
        assert_eq!(paused, 40);
        assert!(timer.resume(21_000));
        assert_eq!(timer.remaining_at(21_000), 40);
    }

    #[test]
    fn test_resume_at_zero_is_noop() {
        let mut timer = TimerState::Stopped {
            remaining_seconds: 0,
        };
        assert!(!timer.resume(0));
        assert!(!timer.is_running());

        let mut idle = TimerState::Idle;
        assert!(!idle.resume(0));
        assert_eq!(idle, TimerState::Idle);
    }

    #[test]
    fn test_parse_preset() {
        assert_eq!(parse_preset("300"), Some(300));
        assert_eq!(parse_preset("4:30"), Some(270));
        assert_eq!(parse_preset("4:75"), None);
        assert_eq!(parse_preset("abc"), None);
        assert_eq!(format_clock(270), "4:30");
        assert_eq!(format_clock(5), "0:05");
    }

    #[tokio::test]
    async fn test_box_preset_overrides_global() {
        let store = Arc::new(SharedStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let coord = coordinator(store.clone(), clock, "tab-a");

        assert_eq!(coord.preset_seconds().await, DEFAULT_PRESET_SECONDS);
        store
            .set(&keys::default_timer_preset(), "240".to_string())
            .await
            .unwrap();
        assert_eq!(coord.preset_seconds().await, 240);
        store
            .set(&keys::timer_preset("box1"), "3:00".to_string())
            .await
            .unwrap();
        assert_eq!(coord.preset_seconds().await, 180);
    }

    #[tokio::test]
    async fn test_only_owner_ticks() {
        let store = Arc::new(SharedStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let tab_a = coordinator(store.clone(), clock.clone(), "tab-a");
        let tab_b = coordinator(store.clone(), clock.clone(), "tab-b");

        let mut timer_a = TimerState::Idle;
        let mut timer_b = TimerState::Idle;
        tab_a.start(&mut timer_a).await.unwrap();
        tab_b.start(&mut timer_b).await.unwrap();

        clock.advance(1_000);
        assert_eq!(tab_a.tick(&mut timer_a).await.unwrap(), None);
        assert_eq!(
            tab_b.tick(&mut timer_b).await.unwrap(),
            Some(DEFAULT_PRESET_SECONDS - 1)
        );
    }

    #[tokio::test]
    async fn test_network_sync_is_deduplicated() {
        let store = Arc::new(SharedStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let sink = Arc::new(RecordingSink::default());
        let coord = coordinator(store.clone(), clock.clone(), "tab-a")
            .with_network(sink.clone())
            .with_fallback_preset(10);
        let mut local = coord.subscribe();

        let mut timer = TimerState::Idle;
        coord.start(&mut timer).await.unwrap();
        clock.advance(100);
        coord.tick(&mut timer).await.unwrap();
        clock.advance(100);
        coord.tick(&mut timer).await.unwrap();
        clock.advance(900);
        coord.tick(&mut timer).await.unwrap();

        assert_eq!(*sink.sent.lock().unwrap(), vec![10, 9]);

        let mut local_updates = 0;
        while local.try_recv().is_ok() {
            local_updates += 1;
        }
        assert_eq!(local_updates, 4);
        assert_eq!(
            store.get(&keys::current_timer("box1")).await.as_deref(),
            Some("9")
        );
    }

    #[tokio::test]
    async fn test_ticker_stops_at_zero() {
        let store = Arc::new(SharedStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let coord = Arc::new(
            coordinator(store.clone(), clock.clone(), "tab-a").with_fallback_preset(1),
        );
        let timer = Arc::new(Mutex::new(TimerState::Idle));
        coord.start(&mut *timer.lock().await).await.unwrap();

        clock.advance(1_000);
        let handle = spawn_ticker(coord.clone(), timer.clone());
        handle.await.unwrap();

        assert_eq!(
            *timer.lock().await,
            TimerState::Stopped {
                remaining_seconds: 0
            }
        );
    }
}
