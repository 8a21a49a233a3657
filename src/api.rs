//! HTTP API endpoints for box administration and read-only views.
//!
//! Judges drive the contest over the WebSocket; these endpoints cover setup,
//! displays that poll, and backup/restore during live events.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use crate::ranking::{self, StandingRow};
use crate::state::export::BoxesExport;
use crate::state::AppState;
use crate::surface::SurfaceView;
use crate::types::{BoxConfig, BoxId, BoxState};
use crate::ws;

/// All API and WebSocket routes, without static files or middleware layers
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/ws", get(ws::ws_handler))
        .route("/api/boxes", get(list_boxes).post(create_box))
        .route("/api/boxes/{id}", get(get_box).delete(delete_box))
        .route("/api/boxes/{id}/surface", get(surface))
        .route("/api/boxes/{id}/standings", get(standings))
        .route("/api/boxes/{id}/ranking/resubmit", post(resubmit_ranking))
        .route("/api/export", get(export_state))
        .route("/api/import", post(import_state))
        .with_state(state)
}

fn not_found(box_id: &BoxId) -> Response {
    (StatusCode::NOT_FOUND, format!("Box {} not found", box_id)).into_response()
}

/// GET /api/boxes
pub async fn list_boxes(State(state): State<Arc<AppState>>) -> Json<Vec<BoxState>> {
    Json(state.list_boxes().await)
}

/// POST /api/boxes
pub async fn create_box(
    State(state): State<Arc<AppState>>,
    Json(config): Json<BoxConfig>,
) -> Response {
    if let Err(msg) = config.validate() {
        return (StatusCode::BAD_REQUEST, msg).into_response();
    }
    let created = state.create_box(config).await;
    (StatusCode::CREATED, Json(created)).into_response()
}

/// GET /api/boxes/{id}
pub async fn get_box(State(state): State<Arc<AppState>>, Path(box_id): Path<BoxId>) -> Response {
    match state.get_box(&box_id).await {
        Some(found) => Json(found).into_response(),
        None => not_found(&box_id),
    }
}

/// DELETE /api/boxes/{id}
pub async fn delete_box(
    State(state): State<Arc<AppState>>,
    Path(box_id): Path<BoxId>,
) -> Response {
    match state.remove_box(&box_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(_) => not_found(&box_id),
    }
}

/// GET /api/boxes/{id}/surface
pub async fn surface(State(state): State<Arc<AppState>>, Path(box_id): Path<BoxId>) -> Response {
    match state.get_box(&box_id).await {
        Some(found) => {
            let view = SurfaceView::build(&found, state.clock.now_ms(), found.use_time_tiebreak);
            Json(view).into_response()
        }
        None => not_found(&box_id),
    }
}

/// GET /api/boxes/{id}/standings
pub async fn standings(
    State(state): State<Arc<AppState>>,
    Path(box_id): Path<BoxId>,
) -> Response {
    match state.get_box(&box_id).await {
        Some(found) => {
            let rows: Vec<StandingRow> = ranking::standings(&found, found.use_time_tiebreak);
            Json(rows).into_response()
        }
        None => not_found(&box_id),
    }
}

/// POST /api/boxes/{id}/ranking/resubmit
///
/// Delivers the finalized ranking again after the ranking service was unreachable.
pub async fn resubmit_ranking(
    State(state): State<Arc<AppState>>,
    Path(box_id): Path<BoxId>,
) -> Response {
    match state.resubmit_ranking(&box_id).await {
        Ok(()) => (StatusCode::OK, "Ranking submitted").into_response(),
        Err(e) => {
            tracing::error!("Ranking resubmission for box {} failed: {}", box_id, e);
            (StatusCode::BAD_REQUEST, e).into_response()
        }
    }
}

/// Export every box as JSON.
///
/// GET /api/export
pub async fn export_state(State(state): State<Arc<AppState>>) -> Json<BoxesExport> {
    Json(state.export_state().await)
}

/// Import a box snapshot.
///
/// POST /api/import
///
/// Replaces all current boxes and broadcasts fresh snapshots to connected tabs.
pub async fn import_state(
    State(state): State<Arc<AppState>>,
    Json(export): Json<BoxesExport>,
) -> Response {
    match state.import_state(export).await {
        Ok(count) => {
            for existing in state.list_boxes().await {
                state.broadcast_snapshot(&existing.box_id).await;
            }
            (StatusCode::OK, format!("Imported {} boxes", count)).into_response()
        }
        Err(e) => {
            tracing::error!("State import failed: {}", e);
            (StatusCode::BAD_REQUEST, format!("Import failed: {}", e)).into_response()
        }
    }
}
