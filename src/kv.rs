//! Persisted key-value store shared by every tab on one origin.
//!
//! Every write replaces the whole value. Readers may observe a stale or a
//! just-updated value at any time; there is no locking across tabs. Writers
//! publish a [`StoreChange`] so other tabs can react without polling.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Logical key names
pub mod keys {
    pub fn timer_preset(box_id: &str) -> String {
        format!("climbingTime-{}", box_id)
    }

    pub fn default_timer_preset() -> String {
        "climbingTime".to_string()
    }

    pub fn current_timer(box_id: &str) -> String {
        format!("timer-{}", box_id)
    }

    pub fn current_climber(box_id: &str) -> String {
        format!("currentClimber-{}", box_id)
    }

    pub fn tick_owner(box_id: &str) -> String {
        format!("tick-owner-{}", box_id)
    }

    pub fn command_mirror() -> String {
        "escalada-command".to_string()
    }

    pub fn time_tiebreak() -> String {
        "climbingTimeCriterion".to_string()
    }

    pub fn podium(box_id: &str) -> String {
        format!("podium-{}", box_id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Storage is full. Cross-tab sync silently stops working until space is freed.
    #[error("Storage quota exceeded writing '{key}' ({needed} bytes needed, quota {quota})")]
    QuotaExceeded {
        key: String,
        needed: usize,
        quota: usize,
    },

    #[error("Snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the operator needs to act (clear storage) to restore sync
    pub fn is_user_actionable(&self) -> bool {
        matches!(self, StoreError::QuotaExceeded { .. })
    }
}

/// Change notification for one key
#[derive(Debug, Clone, PartialEq)]
pub struct StoreChange {
    pub key: String,
    pub value: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreSnapshot {
    entries: HashMap<String, String>,
}

pub struct SharedStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
    changes: broadcast::Sender<StoreChange>,
    /// Maximum total bytes of keys plus values (None = unlimited)
    quota: Option<usize>,
}

impl SharedStore {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            changes: tx,
            quota: None,
        }
    }

    pub fn with_quota(quota: usize) -> Self {
        Self {
            quota: Some(quota),
            ..Self::new()
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;

        if let Some(quota) = self.quota {
            let others: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = others + key.len() + value.len();
            if needed > quota {
                tracing::error!("Storage quota exceeded writing {}", key);
                return Err(StoreError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    quota,
                });
            }
        }

        if entries.get(key) == Some(&value) {
            return Ok(());
        }
        entries.insert(key.to_string(), value.clone());
        drop(entries);

        // No subscribers is fine
        let _ = self.changes.send(StoreChange {
            key: key.to_string(),
            value: Some(value),
        });
        Ok(())
    }

    pub async fn remove(&self, key: &str) {
        let removed = self.entries.write().await.remove(key);
        if removed.is_some() {
            let _ = self.changes.send(StoreChange {
                key: key.to_string(),
                value: None,
            });
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    /// Read a boolean flag stored as "true"/"false"
    pub async fn get_flag(&self, key: &str) -> Option<bool> {
        match self.get(key).await?.trim() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        }
    }

    pub async fn save_to(&self, path: &Path) -> Result<(), StoreError> {
        let snapshot = StoreSnapshot {
            entries: self.entries.read().await.clone(),
        };
        let json = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    pub async fn load_from(path: &Path) -> Result<Self, StoreError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let snapshot: StoreSnapshot = serde_json::from_str(&raw)?;
        let store = Self::new();
        *store.entries.write().await = snapshot.entries;
        Ok(store)
    }
}

impl Default for SharedStore {
    fn default() -> Self {
        Self::new()
    }
}
