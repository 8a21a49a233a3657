//! Judge command handlers
//!
//! Each successful command is re-broadcast to the box, followed by the new
//! snapshot so late or out-of-order tabs converge on the server state.

use crate::protocol::{BoxEvent, TimeInput};
use crate::state::AppState;
use crate::types::{BoxId, Competitor};
use std::sync::Arc;

async fn fan_out(state: &Arc<AppState>, event: BoxEvent, box_id: &BoxId) {
    state.broadcast_event(event);
    state.broadcast_snapshot(box_id).await;
}

fn failed(code: &str, msg: String) -> Option<BoxEvent> {
    tracing::warn!("{}: {}", code, msg);
    Some(BoxEvent::error(code, msg))
}

pub async fn handle_init_route(
    state: &Arc<AppState>,
    box_id: BoxId,
    route_index: u32,
    competitors: Vec<Competitor>,
    holds_count: u32,
) -> Option<BoxEvent> {
    match state
        .init_route(&box_id, route_index, competitors, holds_count)
        .await
    {
        Ok(updated) => {
            let event = BoxEvent::InitRoute {
                box_id: box_id.clone(),
                route_index,
                competitors: updated.competitors,
                holds_count,
            };
            fan_out(state, event, &box_id).await;
            None
        }
        Err(e) => failed("INIT_ROUTE_FAILED", e),
    }
}

pub async fn handle_start_timer(state: &Arc<AppState>, box_id: BoxId) -> Option<BoxEvent> {
    match state.start_timer(&box_id).await {
        Ok(_) => {
            let event = BoxEvent::StartTimer {
                box_id: box_id.clone(),
            };
            fan_out(state, event, &box_id).await;
            None
        }
        Err(e) => failed("TIMER_FAILED", e),
    }
}

pub async fn handle_stop_timer(state: &Arc<AppState>, box_id: BoxId) -> Option<BoxEvent> {
    match state.stop_timer(&box_id).await {
        Ok(_) => {
            let event = BoxEvent::StopTimer {
                box_id: box_id.clone(),
            };
            fan_out(state, event, &box_id).await;
            None
        }
        Err(e) => failed("TIMER_FAILED", e),
    }
}

pub async fn handle_resume_timer(state: &Arc<AppState>, box_id: BoxId) -> Option<BoxEvent> {
    match state.resume_timer(&box_id).await {
        Ok(_) => {
            let event = BoxEvent::ResumeTimer {
                box_id: box_id.clone(),
            };
            fan_out(state, event, &box_id).await;
            None
        }
        Err(e) => failed("TIMER_FAILED", e),
    }
}

pub async fn handle_progress(
    state: &Arc<AppState>,
    box_id: BoxId,
    delta: Option<f64>,
) -> Option<BoxEvent> {
    match state.apply_progress(&box_id, delta).await {
        Ok(progress) => {
            tracing::debug!("Box {} progress {}", box_id, progress);
            let event = BoxEvent::ProgressUpdate {
                box_id: box_id.clone(),
                delta,
            };
            fan_out(state, event, &box_id).await;
            None
        }
        Err(e) => failed("PROGRESS_FAILED", e),
    }
}

pub async fn handle_submit_score(
    state: &Arc<AppState>,
    box_id: BoxId,
    competitor: String,
    score: f64,
    registered_time: Option<TimeInput>,
) -> Option<BoxEvent> {
    // An unparsable time is dropped, not rejected
    let time = registered_time.as_ref().and_then(TimeInput::seconds);
    if registered_time.is_some() && time.is_none() {
        tracing::debug!("Discarding invalid time for {} on box {}", competitor, box_id);
    }

    match state.submit_score(&box_id, &competitor, score, time).await {
        Ok(_) => {
            let event = BoxEvent::SubmitScore {
                box_id: box_id.clone(),
                competitor,
                score,
                registered_time: time.map(TimeInput::Seconds),
            };
            fan_out(state, event, &box_id).await;
            None
        }
        Err(e) => failed("INVALID_SCORE", e),
    }
}
