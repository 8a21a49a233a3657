//! WebSocket message dispatch
//!
//! Entry point for every event a tab sends. Judge commands mutate the box and
//! are fanned out to all of its connections; queries are answered directly.

use crate::protocol::BoxEvent;
use crate::state::AppState;
use std::sync::Arc;

use super::judge;

/// Handle one client event and return an optional direct reply
pub async fn handle_event(event: BoxEvent, state: &Arc<AppState>) -> Option<BoxEvent> {
    match event {
        BoxEvent::InitRoute {
            box_id,
            route_index,
            competitors,
            holds_count,
        } => judge::handle_init_route(state, box_id, route_index, competitors, holds_count).await,

        BoxEvent::StartTimer { box_id } => judge::handle_start_timer(state, box_id).await,
        BoxEvent::StopTimer { box_id } => judge::handle_stop_timer(state, box_id).await,
        BoxEvent::ResumeTimer { box_id } => judge::handle_resume_timer(state, box_id).await,

        BoxEvent::ProgressUpdate { box_id, delta } => {
            judge::handle_progress(state, box_id, delta).await
        }

        BoxEvent::SubmitScore {
            box_id,
            competitor,
            score,
            registered_time,
        } => judge::handle_submit_score(state, box_id, competitor, score, registered_time).await,

        BoxEvent::RequestState { box_id } => match state.get_box(&box_id).await {
            Some(snapshot) => Some(BoxEvent::StateSnapshot {
                box_id,
                state: Box::new(snapshot),
            }),
            None => Some(box_not_found(&box_id)),
        },

        BoxEvent::RequestActiveCompetitor { box_id } => {
            match state.active_competitor(&box_id).await {
                Some(competitor) => Some(BoxEvent::ResponseActiveCompetitor {
                    box_id,
                    competitor,
                    ts: chrono::Utc::now().timestamp_millis(),
                }),
                None => {
                    // Another tab may know; let it answer
                    state.broadcast_event(BoxEvent::RequestActiveCompetitor { box_id });
                    None
                }
            }
        }

        // Relayed only; the server clock stays authoritative for its own state
        event @ (BoxEvent::ResponseActiveCompetitor { .. } | BoxEvent::TimerSync { .. }) => {
            state.broadcast_event(event);
            None
        }

        BoxEvent::StateSnapshot { box_id, .. } => {
            tracing::warn!("Ignoring client-sent snapshot for box {}", box_id);
            None
        }

        BoxEvent::Error { code, msg } => {
            tracing::warn!("Client reported error {}: {}", code, msg);
            None
        }

        BoxEvent::Unknown => {
            tracing::debug!("Ignoring unknown event type");
            None
        }
    }
}

pub(super) fn box_not_found(box_id: &str) -> BoxEvent {
    BoxEvent::error("BOX_NOT_FOUND", format!("Box {} not found", box_id))
}
