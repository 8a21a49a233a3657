//! Box state export/import for backup and restoration during live events.
//!
//! The export holds every box aggregate. Everything else (rankings, podiums,
//! surfaces) is derived from it again after an import.

use super::AppState;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Schema version for export format compatibility
/// Version 1: boxes keyed by id
/// Version 2: per-route hold counts (`route_holds`) and podium on each box
pub const EXPORT_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(
        "Export schema version {found} is newer than supported version {supported}. Please update the server."
    )]
    FutureSchema { found: u32, supported: u32 },

    #[error("Box '{key}' is stored under a different id '{inner}'")]
    MismatchedId { key: String, inner: String },

    #[error("Box '{box_id}' is on route {route_index} of {routes_count}")]
    RouteOutOfRange {
        box_id: String,
        route_index: u32,
        routes_count: u32,
    },

    #[error("Box '{box_id}' lists competitor '{nume}' more than once")]
    DuplicateCompetitor { box_id: String, nume: String },

    #[error("Box '{box_id}' queue does not match its roster")]
    QueueMismatch { box_id: String },

    #[error("Snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
}

/// A serializable snapshot of every box
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxesExport {
    pub schema_version: u32,
    /// Export timestamp (ISO8601)
    pub exported_at: String,
    pub boxes: HashMap<BoxId, BoxState>,
}

impl BoxesExport {
    pub fn new(boxes: HashMap<BoxId, BoxState>) -> Self {
        Self {
            schema_version: EXPORT_SCHEMA_VERSION,
            exported_at: chrono::Utc::now().to_rfc3339(),
            boxes,
        }
    }

    /// Validate the export before import
    pub fn validate(&self) -> Result<(), ExportError> {
        if self.schema_version > EXPORT_SCHEMA_VERSION {
            return Err(ExportError::FutureSchema {
                found: self.schema_version,
                supported: EXPORT_SCHEMA_VERSION,
            });
        }

        for (key, state) in &self.boxes {
            if *key != state.box_id {
                return Err(ExportError::MismatchedId {
                    key: key.clone(),
                    inner: state.box_id.clone(),
                });
            }
            if state.route_index > state.routes_count {
                return Err(ExportError::RouteOutOfRange {
                    box_id: key.clone(),
                    route_index: state.route_index,
                    routes_count: state.routes_count,
                });
            }
            if let Some(nume) = duplicate_name(&state.competitors) {
                return Err(ExportError::DuplicateCompetitor {
                    box_id: key.clone(),
                    nume: nume.to_string(),
                });
            }
            // Queue must partition the roster once a route is running
            if state.route_index > 0 {
                let mut queued: Vec<&String> = state.queue.iter().collect();
                let mut roster: Vec<&String> = state.competitors.iter().map(|c| &c.nume).collect();
                queued.sort();
                roster.sort();
                if queued != roster {
                    return Err(ExportError::QueueMismatch {
                        box_id: key.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub async fn save(&self, path: &Path) -> Result<(), ExportError> {
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self, ExportError> {
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

impl AppState {
    pub async fn export_state(&self) -> BoxesExport {
        BoxesExport::new(self.boxes.read().await.clone())
    }

    /// Replace every box with the export's content
    pub async fn import_state(&self, export: BoxesExport) -> Result<usize, ExportError> {
        export.validate()?;
        let count = export.boxes.len();
        *self.boxes.write().await = export.boxes;
        tracing::info!("Imported {} boxes (exported at {})", count, export.exported_at);
        Ok(count)
    }

    pub async fn save_snapshot(&self, path: &Path) -> Result<(), ExportError> {
        self.export_state().await.save(path).await
    }

    /// Restore boxes from a snapshot file, if one exists
    pub async fn load_snapshot(&self, path: &Path) -> Result<usize, ExportError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(0);
        }
        let export = BoxesExport::load(path).await?;
        self.import_state(export).await
    }
}
