use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Event vocabulary shared by the network channel and the cross-tab mirror
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum BoxEvent {
    /// Reset queue and timer for a new route
    InitRoute {
        box_id: BoxId,
        route_index: u32,
        competitors: Vec<Competitor>,
        holds_count: u32,
    },
    StartTimer {
        box_id: BoxId,
    },
    StopTimer {
        box_id: BoxId,
    },
    ResumeTimer {
        box_id: BoxId,
    },
    ProgressUpdate {
        box_id: BoxId,
        #[serde(default)]
        delta: Option<f64>,
    },
    SubmitScore {
        box_id: BoxId,
        competitor: String,
        score: f64,
        #[serde(default)]
        registered_time: Option<TimeInput>,
    },
    RequestActiveCompetitor {
        box_id: BoxId,
    },
    ResponseActiveCompetitor {
        box_id: BoxId,
        competitor: String,
        ts: i64,
    },
    RequestState {
        box_id: BoxId,
    },
    /// Remaining seconds from the tick owner
    TimerSync {
        box_id: BoxId,
        remaining: u32,
    },
    /// Server reply to `REQUEST_STATE` and broadcast after every change
    StateSnapshot {
        box_id: BoxId,
        state: Box<BoxState>,
    },
    Error {
        code: String,
        msg: String,
    },
    /// Any type this build does not know about
    #[serde(other)]
    Unknown,
}

impl BoxEvent {
    pub fn box_id(&self) -> Option<&BoxId> {
        match self {
            BoxEvent::InitRoute { box_id, .. }
            | BoxEvent::StartTimer { box_id }
            | BoxEvent::StopTimer { box_id }
            | BoxEvent::ResumeTimer { box_id }
            | BoxEvent::ProgressUpdate { box_id, .. }
            | BoxEvent::SubmitScore { box_id, .. }
            | BoxEvent::RequestActiveCompetitor { box_id }
            | BoxEvent::ResponseActiveCompetitor { box_id, .. }
            | BoxEvent::RequestState { box_id }
            | BoxEvent::TimerSync { box_id, .. }
            | BoxEvent::StateSnapshot { box_id, .. } => Some(box_id),
            BoxEvent::Error { .. } | BoxEvent::Unknown => None,
        }
    }

    pub fn error(code: &str, msg: impl Into<String>) -> Self {
        BoxEvent::Error {
            code: code.to_string(),
            msg: msg.into(),
        }
    }
}

/// A judge-entered completion time: a number or a numeric string
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TimeInput {
    Seconds(f64),
    Text(String),
    Other(serde_json::Value),
}

impl TimeInput {
    /// Finite, non-negative seconds, or `None` when the input is not a valid time
    pub fn seconds(&self) -> Option<f64> {
        let value = match self {
            TimeInput::Seconds(v) => *v,
            TimeInput::Text(s) => s.trim().parse::<f64>().ok()?,
            TimeInput::Other(_) => return None,
        };
        (value.is_finite() && value >= 0.0).then_some(value)
    }
}

/// Payload handed to the external ranking persistence service once per finalization
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankingPayload {
    pub categorie: String,
    pub route_count: u32,
    pub scores: ScoreTable,
    pub clubs: HashMap<String, Option<String>>,
    pub times: TimeTable,
    pub use_time_tiebreak: bool,
}

impl RankingPayload {
    pub fn from_box(state: &BoxState, use_time_tiebreak: bool) -> Self {
        let clubs = state
            .competitors
            .iter()
            .map(|c| (c.nume.clone(), c.club.clone()))
            .collect();
        Self {
            categorie: state.categorie.clone(),
            route_count: state.routes_count,
            scores: state.scores.clone(),
            clubs,
            times: state.times.clone(),
            use_time_tiebreak,
        }
    }
}
