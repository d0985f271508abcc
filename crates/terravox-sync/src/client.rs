//! Sync client: applies server messages to a local store

use std::sync::Arc;

use crossbeam_channel::Receiver;
use log::debug;
use terravox::VoxelStore;

use crate::error::Result;
use crate::events::{ClientId, EventBus, SyncEvent};
use crate::protocol::SyncMessage;

pub struct SyncClient {
    id: ClientId,
    store: Arc<VoxelStore>,
    inbox: Receiver<String>,
    events: Arc<EventBus>,
}

impl SyncClient {
    pub fn new(id: ClientId, store: Arc<VoxelStore>, inbox: Receiver<String>, events: Arc<EventBus>) -> Self {
        Self { id, store, inbox, events }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn store(&self) -> &Arc<VoxelStore> {
        &self.store
    }

    /// Apply every message waiting in the inbox. Returns how many were applied.
    ///
    /// Stops at the first message that fails to decode or load; the store is
    /// left as it was before that message.
    pub fn poll(&mut self) -> Result<usize> {
        let mut applied = 0;
        while let Ok(json) = self.inbox.try_recv() {
            let modified = match SyncMessage::from_json(&json)? {
                // A full save replaces whatever this client had
                SyncMessage::FullSave(save) => self.store.load_from_save(&save, true)?,
                SyncMessage::Diffs(diffs) => self.store.load_diff_queues(&diffs)?,
            };
            applied += 1;
            if !modified.is_empty() {
                debug!("Client {} applied message touching {} voxels", self.id, modified.len());
                self.events.publish(SyncEvent::PositionsModified(modified));
            }
        }
        Ok(applied)
    }
}
