use super::AppState;
use crate::protocol::RankingPayload;
use crate::ranking;
use crate::types::*;

/// Judge scores are entered in tenths of a hold
const SCORE_STEP: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoreError {
    #[error("Score must be a finite number")]
    NotFinite,

    #[error("Score {score} is outside 0..={max}")]
    OutOfRange { score: f64, max: u32 },

    #[error("Score {0} has more than one decimal place")]
    Granularity(f64),

    #[error("No route has been initialized")]
    NoActiveRoute,

    #[error("Competitor '{0}' is not on the roster")]
    UnknownCompetitor(String),
}

/// Reject a judge score before it becomes an event
pub fn validate_score(score: f64, holds_count: u32) -> Result<f64, ScoreError> {
    if !score.is_finite() {
        return Err(ScoreError::NotFinite);
    }
    if score < 0.0 || (holds_count > 0 && score > f64::from(holds_count)) {
        return Err(ScoreError::OutOfRange {
            score,
            max: holds_count,
        });
    }
    let steps = score / SCORE_STEP;
    if (steps - steps.round()).abs() > 1e-6 {
        return Err(ScoreError::Granularity(score));
    }
    Ok(score)
}

/// What a score submission changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubmitOutcome {
    /// The competitor was climbing and the queue moved on
    pub advanced: bool,
    /// This submission completed the final route
    pub finalized: bool,
}

fn set_route_entry(table: &mut ScoreTable, name: &str, idx: usize, value: Option<f64>) {
    let per_route = table.entry(name.to_string()).or_default();
    if per_route.len() <= idx {
        per_route.resize(idx + 1, None);
    }
    per_route[idx] = value;
}

impl BoxState {
    /// Record a judge decision and advance the queue when it concerns the climber.
    ///
    /// Late or corrected submissions for anyone else only update the tables
    /// and the completion mark.
    pub fn record_score(
        &mut self,
        competitor: &str,
        score: f64,
        registered_time: Option<f64>,
        preset_seconds: u32,
    ) -> Result<SubmitOutcome, ScoreError> {
        if self.route_index == 0 {
            return Err(ScoreError::NoActiveRoute);
        }
        let score = validate_score(score, self.holds_count)?;
        if self.competitor(competitor).is_none() {
            return Err(ScoreError::UnknownCompetitor(competitor.to_string()));
        }

        let idx = (self.route_index - 1) as usize;
        set_route_entry(&mut self.scores, competitor, idx, Some(score));
        set_route_entry(&mut self.times, competitor, idx, registered_time);
        self.hold_progress = 0.0;
        if let Some(entry) = self.competitors.iter_mut().find(|c| c.nume == competitor) {
            entry.marked = true;
        }

        let mut outcome = SubmitOutcome::default();
        if !self.queue.is_climbing(competitor) {
            return Ok(outcome);
        }

        self.queue.advance();
        self.timer.reset(preset_seconds);
        outcome.advanced = true;

        if self.route_index == self.routes_count && self.all_marked() && !self.finalized {
            self.finalized = true;
            self.podium = ranking::podium(self, self.use_time_tiebreak);
            outcome.finalized = true;
        }
        Ok(outcome)
    }
}

impl AppState {
    pub async fn submit_score(
        &self,
        box_id: &BoxId,
        competitor: &str,
        score: f64,
        registered_time: Option<f64>,
    ) -> Result<SubmitOutcome, String> {
        let (outcome, payload) = self
            .with_box(box_id, |state| {
                let preset = self.preset_for(state);
                let outcome = state
                    .record_score(competitor, score, registered_time, preset)
                    .map_err(|e| e.to_string())?;
                let payload = outcome
                    .finalized
                    .then(|| RankingPayload::from_box(state, state.use_time_tiebreak));
                Ok((outcome, payload))
            })
            .await?;

        tracing::info!(
            "Box {} score {} for {} (advanced: {}, finalized: {})",
            box_id,
            score,
            competitor,
            outcome.advanced,
            outcome.finalized
        );

        if let Some(payload) = payload {
            self.spawn_ranking_submission(box_id.clone(), payload);
        }
        Ok(outcome)
    }

    /// Fire-and-forget delivery of a finalized ranking. Failures are logged only.
    fn spawn_ranking_submission(&self, box_id: BoxId, payload: RankingPayload) {
        let Some(sink) = self.ranking_sink.clone() else {
            tracing::warn!("Box {} finalized but no ranking service is configured", box_id);
            return;
        };
        tokio::spawn(async move {
            match sink.submit(&payload).await {
                Ok(()) => tracing::info!("Ranking for box {} saved to {}", box_id, sink.name()),
                Err(e) => tracing::error!("Failed to save ranking for box {}: {}", box_id, e),
            }
        });
    }

    /// Operator re-trigger of the ranking submission for a finalized box
    pub async fn resubmit_ranking(&self, box_id: &BoxId) -> Result<(), String> {
        let state = self
            .get_box(box_id)
            .await
            .ok_or_else(|| format!("Box {} not found", box_id))?;
        if !state.finalized {
            return Err(format!("Box {} is not finalized", box_id));
        }
        let sink = self
            .ranking_sink
            .clone()
            .ok_or("No ranking service configured")?;
        let payload = RankingPayload::from_box(&state, state.use_time_tiebreak);
        sink.submit(&payload).await.map_err(|e| {
            tracing::error!("Ranking resubmission for box {} failed: {}", box_id, e);
            e.to_string()
        })?;
        tracing::info!("Ranking for box {} resubmitted", box_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::config;
    use super::*;
    use crate::sink::{RankingSink, SinkError};
    use crate::timer::TimerState;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct ChannelSink {
        tx: mpsc::UnboundedSender<RankingPayload>,
        fail: bool,
    }

    #[async_trait]
    impl RankingSink for ChannelSink {
        async fn submit(&self, payload: &RankingPayload) -> Result<(), SinkError> {
            let _ = self.tx.send(payload.clone());
            if self.fail {
                Err(SinkError::Status(500))
            } else {
                Ok(())
            }
        }

        fn name(&self) -> &str {
            "channel"
        }
    }

    fn box_on_route(route: u32, routes: u32, names: &[&str]) -> BoxState {
        let mut state = BoxState::new("b".to_string(), config(routes, names));
        state.init_route(route, Vec::new(), 20, 240, 1).unwrap();
        state
    }

    #[test]
    fn test_validate_score() {
        assert_eq!(validate_score(12.5, 20), Ok(12.5));
        assert_eq!(validate_score(20.0, 20), Ok(20.0));
        assert!(matches!(
            validate_score(21.0, 20),
            Err(ScoreError::OutOfRange { .. })
        ));
        assert!(matches!(
            validate_score(-1.0, 20),
            Err(ScoreError::OutOfRange { .. })
        ));
        assert_eq!(validate_score(3.25, 20), Err(ScoreError::Granularity(3.25)));
        assert_eq!(validate_score(f64::NAN, 20), Err(ScoreError::NotFinite));
    }

    #[test]
    fn test_record_score_advances_climber() {
        let mut state = box_with_timer_running();
        let outcome = state.record_score("A", 10.0, Some(42.0), 240).unwrap();
        assert!(outcome.advanced);
        assert!(!outcome.finalized);
        assert_eq!(state.scores["A"], vec![Some(10.0)]);
        assert_eq!(state.times["A"], vec![Some(42.0)]);
        assert_eq!(state.queue.climbing.as_deref(), Some("B"));
        assert_eq!(state.hold_progress, 0.0);
        assert!(state.competitor("A").unwrap().marked);
        assert_eq!(
            state.timer,
            TimerState::Stopped {
                remaining_seconds: 240
            }
        );
    }

    fn box_with_timer_running() -> BoxState {
        let mut state = box_on_route(1, 2, &["A", "B", "C"]);
        state.timer.start(0, 240);
        state.hold_progress = 7.0;
        state
    }

    #[test]
    fn test_late_submission_does_not_advance() {
        let mut state = box_with_timer_running();
        let outcome = state.record_score("C", 5.0, None, 240).unwrap();
        assert_eq!(outcome, SubmitOutcome::default());
        assert_eq!(state.queue.climbing.as_deref(), Some("A"));
        assert!(state.timer.is_running());
        assert!(state.competitor("C").unwrap().marked);
    }

    #[test]
    fn test_scores_stored_at_route_index() {
        let mut state = box_on_route(2, 2, &["A", "B"]);
        state.record_score("A", 4.0, None, 240).unwrap();
        assert_eq!(state.scores["A"], vec![None, Some(4.0)]);
    }

    #[test]
    fn test_rejects_unknown_and_invalid() {
        let mut state = box_on_route(1, 1, &["A"]);
        assert_eq!(
            state.record_score("Z", 4.0, None, 240),
            Err(ScoreError::UnknownCompetitor("Z".to_string()))
        );
        assert!(state.record_score("A", 4.05, None, 240).is_err());
        assert!(state.scores.is_empty());

        let mut fresh = BoxState::new("b".to_string(), config(1, &["A"]));
        assert_eq!(
            fresh.record_score("A", 1.0, None, 240),
            Err(ScoreError::NoActiveRoute)
        );
    }

    #[test]
    fn test_finalizes_only_after_everyone_on_last_route() {
        let mut state = box_on_route(1, 2, &["A", "B", "C"]);
        for name in ["A", "B", "C"] {
            let outcome = state.record_score(name, 10.0, None, 240).unwrap();
            assert!(!outcome.finalized, "route 1 must not finalize");
        }

        state.init_route(2, Vec::new(), 20, 240, 1).unwrap();
        assert!(!state.record_score("A", 12.0, None, 240).unwrap().finalized);
        assert!(!state.record_score("B", 15.0, None, 240).unwrap().finalized);
        assert!(!state.finalized);

        let outcome = state.record_score("C", 20.0, None, 240).unwrap();
        assert!(outcome.finalized);
        assert!(state.finalized);
        assert_eq!(state.podium.len(), 3);
        assert_eq!(state.podium[0].nume, "C");
    }

    #[test]
    fn test_subset_does_not_finalize() {
        let mut state = box_on_route(1, 1, &["A", "B", "C"]);
        state.record_score("A", 1.0, None, 240).unwrap();
        state.record_score("B", 2.0, None, 240).unwrap();
        // Late submission for C while A is back in the climbing slot
        state.queue = CompetitorQueue::from_order(&["A".to_string(), "B".to_string(), "C".to_string()], 1);
        let outcome = state.record_score("C", 3.0, None, 240).unwrap();
        assert!(!outcome.finalized, "late submissions never finalize");
        assert!(!state.finalized);
    }

    #[tokio::test]
    async fn test_finalization_submits_ranking() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let state = AppState::new().with_ranking_sink(Arc::new(ChannelSink { tx, fail: false }));
        let created = state.create_box(config(1, &["A", "B"])).await;
        state
            .init_route(&created.box_id, 1, Vec::new(), 20)
            .await
            .unwrap();

        state
            .submit_score(&created.box_id, "A", 10.0, Some(30.0))
            .await
            .unwrap();
        let outcome = state
            .submit_score(&created.box_id, "B", 20.0, None)
            .await
            .unwrap();
        assert!(outcome.finalized);

        let payload = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload.categorie, "Juniori");
        assert_eq!(payload.route_count, 1);
        assert_eq!(payload.scores["B"], vec![Some(20.0)]);
        assert_eq!(payload.clubs["A"].as_deref(), Some("Club A"));
        assert_eq!(payload.times["A"], vec![Some(30.0)]);
    }

    #[tokio::test]
    async fn test_failed_submission_keeps_finalized_state() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let state = AppState::new().with_ranking_sink(Arc::new(ChannelSink { tx, fail: true }));
        let created = state.create_box(config(1, &["A"])).await;
        state
            .init_route(&created.box_id, 1, Vec::new(), 20)
            .await
            .unwrap();
        state
            .submit_score(&created.box_id, "A", 5.0, None)
            .await
            .unwrap();
        rx.recv().await.unwrap();

        assert!(state.get_box(&created.box_id).await.unwrap().finalized);
        // Operator re-trigger reports the failure
        let result = state.resubmit_ranking(&created.box_id).await;
        assert!(result.unwrap_err().contains("500"));
    }

    #[tokio::test]
    async fn test_resubmit_requires_finalized() {
        let state = AppState::new();
        let created = state.create_box(config(1, &["A"])).await;
        let result = state.resubmit_ranking(&created.box_id).await;
        assert!(result.unwrap_err().contains("not finalized"));
    }
}
