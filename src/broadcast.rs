use crate::protocol::BoxEvent;
use crate::state::AppState;
use std::sync::Arc;
use std::time::Duration;

const WATCH_INTERVAL: Duration = Duration::from_millis(250);

/// Spawn a background task that stops box timers once they reach zero
pub fn spawn_timer_watcher(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(WATCH_INTERVAL).await;
            expire_and_broadcast(&state).await;
        }
    })
}

/// One watcher pass. Returns the boxes whose timer just expired.
pub async fn expire_and_broadcast(state: &Arc<AppState>) -> Vec<String> {
    let expired = state.expire_timers().await;
    for box_id in &expired {
        tracing::info!("Box {} timer expired", box_id);
        state.broadcast_event(BoxEvent::TimerSync {
            box_id: box_id.clone(),
            remaining: 0,
        });
        state.broadcast_snapshot(box_id).await;
    }
    expired
}
