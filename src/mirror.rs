//! Cross-tab command mirror over the shared store.
//!
//! A redundant path for the same event shapes the live channel carries, so
//! commands still reach other tabs on this origin while the network is down.

use crate::channel::LiveChannel;
use crate::kv::{keys, SharedStore, StoreError};
use crate::protocol::BoxEvent;
use crate::types::TabId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// What is stored under the command-mirror key (full replace per write)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MirroredCommand {
    pub event: BoxEvent,
    pub origin: TabId,
    /// Milliseconds since the epoch; makes repeated identical commands distinct writes
    pub ts: i64,
}

pub struct CommandMirror {
    store: Arc<SharedStore>,
    tab_id: TabId,
}

impl CommandMirror {
    pub fn new(store: Arc<SharedStore>, tab_id: TabId) -> Self {
        Self { store, tab_id }
    }

    pub async fn publish(&self, event: BoxEvent) -> Result<(), StoreError> {
        let command = MirroredCommand {
            event,
            origin: self.tab_id.clone(),
            ts: chrono::Utc::now().timestamp_millis(),
        };
        let json = serde_json::to_string(&command)?;
        self.store.set(&keys::command_mirror(), json).await
    }

    /// Send a command over the network when it is open and mirror it either way.
    /// Returns whether the network channel took it.
    pub async fn dispatch(&self, channel: &LiveChannel, event: BoxEvent) -> Result<bool, StoreError> {
        let sent = match channel.send(event.clone()) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Command for box {} only mirrored: {}", channel.box_id(), e);
                false
            }
        };
        self.publish(event).await?;
        Ok(sent)
    }

    /// Forward commands written by other tabs. The task ends when the receiver is dropped.
    pub fn subscribe(&self) -> (mpsc::UnboundedReceiver<BoxEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut changes = self.store.subscribe();
        let tab_id = self.tab_id.clone();
        let key = keys::command_mirror();

        let task = tokio::spawn(async move {
            loop {
                let change = match changes.recv().await {
                    Ok(change) => change,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Command mirror skipped {} changes", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                if change.key != key {
                    continue;
                }
                let Some(raw) = change.value else { continue };
                match serde_json::from_str::<MirroredCommand>(&raw) {
                    Ok(command) if command.origin == tab_id => {}
                    Ok(MirroredCommand {
                        event: BoxEvent::Unknown,
                        ..
                    }) => {}
                    Ok(command) => {
                        if tx.send(command.event).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("Discarding malformed mirrored command: {}", e),
                }
            }
        });
        (rx, task)
    }
}
