use super::AppState;
use crate::types::*;

impl BoxState {
    /// Apply a hold-progress delta (default 1), capped at the route's hold count.
    ///
    /// A whole-hold step on top of a half hold drops the fraction first, so
    /// 4.5 + 1 reaches 5, while other deltas accumulate.
    pub fn apply_progress(&mut self, delta: Option<f64>) -> f64 {
        let delta = delta.filter(|d| d.is_finite()).unwrap_or(1.0);
        let next = if delta == 1.0 {
            self.hold_progress.trunc() + 1.0
        } else {
            self.hold_progress + delta
        };
        let cap = f64::from(self.holds_count);
        self.hold_progress = if self.holds_count > 0 {
            next.clamp(0.0, cap)
        } else {
            next.max(0.0)
        };
        self.hold_progress
    }
}

impl AppState {
    pub async fn apply_progress(&self, box_id: &BoxId, delta: Option<f64>) -> Result<f64, String> {
        self.with_box(box_id, |state| Ok(state.apply_progress(delta)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::config;
    use super::*;

    fn box_with_holds(holds: u32) -> BoxState {
        let mut state = BoxState::new("b".to_string(), config(1, &["A"]));
        state.init_route(1, Vec::new(), holds, 60, 1).unwrap();
        state
    }

    #[test]
    fn test_default_delta_is_one() {
        let mut state = box_with_holds(10);
        assert_eq!(state.apply_progress(None), 1.0);
        assert_eq!(state.apply_progress(None), 2.0);
    }

    #[test]
    fn test_whole_step_truncates_fraction() {
        let mut state = box_with_holds(10);
        state.apply_progress(Some(0.5));
        assert_eq!(state.hold_progress, 0.5);
        assert_eq!(state.apply_progress(Some(1.0)), 1.0);
        state.apply_progress(Some(0.5));
        assert_eq!(state.apply_progress(Some(0.5)), 2.0);
    }

    #[test]
    fn test_progress_capped_at_holds() {
        let mut state = box_with_holds(2);
        state.apply_progress(None);
        state.apply_progress(None);
        assert_eq!(state.apply_progress(None), 2.0);
        assert_eq!(state.apply_progress(Some(-5.0)), 0.0);
    }

    #[tokio::test]
    async fn test_apply_progress_on_state() {
        let state = AppState::new();
        let created = state.create_box(config(1, &["A"])).await;
        state
            .init_route(&created.box_id, 1, Vec::new(), 5)
            .await
            .unwrap();
        assert_eq!(state.apply_progress(&created.box_id, None).await, Ok(1.0));
        assert_eq!(
            state.apply_progress(&created.box_id, Some(0.5)).await,
            Ok(1.5)
        );
    }
}
