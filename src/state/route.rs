use super::AppState;
use crate::types::*;

impl BoxState {
    /// Reset queue, progress and timer for a route.
    ///
    /// An empty `competitors` list keeps the existing roster and only clears
    /// the completion marks.
    pub fn init_route(
        &mut self,
        route_index: u32,
        competitors: Vec<Competitor>,
        holds_count: u32,
        preset_seconds: u32,
        preparing_size: usize,
    ) -> Result<(), String> {
        if route_index == 0 || route_index > self.routes_count {
            return Err(format!(
                "Route {} is outside 1..={} for box {}",
                route_index, self.routes_count, self.box_id
            ));
        }

        if let Some(name) = duplicate_name(&competitors) {
            return Err(format!(
                "Competitor {} appears more than once on route {}",
                name, route_index
            ));
        }
        if !competitors.is_empty() {
            self.competitors = competitors;
        }
        for competitor in &mut self.competitors {
            competitor.marked = false;
        }

        let idx = (route_index - 1) as usize;
        if self.route_holds.len() <= idx {
            self.route_holds.resize(idx + 1, None);
        }
        self.route_holds[idx] = Some(holds_count);

        self.route_index = route_index;
        self.holds_count = holds_count;
        self.hold_progress = 0.0;

        let order: Vec<String> = self.competitors.iter().map(|c| c.nume.clone()).collect();
        self.queue = CompetitorQueue::from_order(&order, preparing_size);
        self.timer.reset(preset_seconds);
        self.finalized = false;
        self.podium.clear();
        Ok(())
    }
}

impl AppState {
    pub async fn init_route(
        &self,
        box_id: &BoxId,
        route_index: u32,
        competitors: Vec<Competitor>,
        holds_count: u32,
    ) -> Result<BoxState, String> {
        let preparing_size = self.config.preparing_size;
        let state = self
            .with_box(box_id, |state| {
                let preset = self.preset_for(state);
                state.init_route(
                    route_index,
                    competitors,
                    holds_count,
                    preset,
                    preparing_size,
                )?;
                Ok(state.clone())
            })
            .await?;
        tracing::info!(
            "Box {} initialized route {}/{} with {} holds",
            box_id,
            route_index,
            state.routes_count,
            holds_count
        );
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{config, roster};
    use super::*;
    use crate::timer::TimerState;

    #[tokio::test]
    async fn test_init_route_resets_queue_and_timer() {
        let state = AppState::new();
        let created = state.create_box(config(2, &["A", "B", "C"])).await;

        let box_state = state
            .init_route(&created.box_id, 1, Vec::new(), 25)
            .await
            .unwrap();
        assert_eq!(box_state.route_index, 1);
        assert_eq!(box_state.holds_count, 25);
        assert_eq!(box_state.queue.climbing.as_deref(), Some("A"));
        assert_eq!(box_state.queue.preparing, vec!["B".to_string()]);
        assert_eq!(box_state.queue.remaining, vec!["C".to_string()]);
        assert_eq!(
            box_state.timer,
            TimerState::Stopped {
                remaining_seconds: 240
            }
        );
        assert_eq!(box_state.holds_for_route(1), Some(25));
    }

    #[tokio::test]
    async fn test_init_route_replaces_roster() {
        let state = AppState::new();
        let created = state.create_box(config(2, &["A", "B"])).await;
        let box_state = state
            .init_route(&created.box_id, 2, roster(&["X", "Y", "Z"]), 30)
            .await
            .unwrap();
        assert_eq!(box_state.competitors.len(), 3);
        assert_eq!(box_state.queue.len(), 3);
        assert_eq!(box_state.queue.climbing.as_deref(), Some("X"));
    }

    #[tokio::test]
    async fn test_init_route_rejects_duplicate_names() {
        let state = AppState::new();
        let created = state.create_box(config(2, &["A", "B"])).await;
        let err = state
            .init_route(&created.box_id, 1, roster(&["A", "A", "B"]), 20)
            .await
            .unwrap_err();
        assert!(err.contains("Competitor A"));

        // Box is left untouched
        let unchanged = state.get_box(&created.box_id).await.unwrap();
        assert_eq!(unchanged.route_index, 0);
        assert_eq!(unchanged.competitors.len(), 2);
    }

    #[tokio::test]
    async fn test_init_route_rejects_out_of_range() {
        let state = AppState::new();
        let created = state.create_box(config(2, &["A"])).await;
        assert!(state
            .init_route(&created.box_id, 3, Vec::new(), 10)
            .await
            .is_err());
        assert!(state
            .init_route(&created.box_id, 0, Vec::new(), 10)
            .await
            .is_err());
    }

    #[test]
    fn test_init_route_clears_marks() {
        let mut box_state = BoxState::new("b".to_string(), config(2, &["A", "B"]));
        box_state.competitors[0].marked = true;
        box_state.init_route(2, Vec::new(), 10, 60, 1).unwrap();
        assert!(box_state.competitors.iter().all(|c| !c.marked));
    }
}
