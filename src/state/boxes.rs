use super::AppState;
use crate::types::*;

impl AppState {
    /// Configure a new box from the administrator's settings
    pub async fn create_box(&self, config: BoxConfig) -> BoxState {
        let box_id = ulid::Ulid::new().to_string();
        self.insert_box(box_id, config).await
    }

    /// Configure a box under a caller-chosen id, replacing any previous one
    pub async fn insert_box(&self, box_id: BoxId, mut config: BoxConfig) -> BoxState {
        config
            .use_time_tiebreak
            .get_or_insert(self.config.use_time_tiebreak);
        tracing::info!(
            "Configuring box {} ({}, {} routes, {} competitors)",
            box_id,
            config.categorie,
            config.routes_count,
            config.competitors.len()
        );
        let state = BoxState::new(box_id.clone(), config);
        self.boxes.write().await.insert(box_id, state.clone());
        state
    }

    pub async fn get_box(&self, box_id: &BoxId) -> Option<BoxState> {
        self.boxes.read().await.get(box_id).cloned()
    }

    /// All boxes, ordered by id
    pub async fn list_boxes(&self) -> Vec<BoxState> {
        let mut boxes: Vec<BoxState> = self.boxes.read().await.values().cloned().collect();
        boxes.sort_by(|a, b| a.box_id.cmp(&b.box_id));
        boxes
    }

    pub async fn remove_box(&self, box_id: &BoxId) -> Result<(), String> {
        match self.boxes.write().await.remove(box_id) {
            Some(_) => {
                tracing::info!("Removed box {}", box_id);
                Ok(())
            }
            None => Err(format!("Box {} not found", box_id)),
        }
    }

    /// Who is currently in the climbing slot
    pub async fn active_competitor(&self, box_id: &BoxId) -> Option<String> {
        self.boxes
            .read()
            .await
            .get(box_id)
            .and_then(|b| b.queue.climbing.clone())
    }

    /// Switch the secondary ranking criterion for one box
    pub async fn set_time_tiebreak(&self, box_id: &BoxId, enabled: bool) -> Result<(), String> {
        self.with_box(box_id, |state| {
            state.use_time_tiebreak = enabled;
            Ok(())
        })
        .await
    }
}
