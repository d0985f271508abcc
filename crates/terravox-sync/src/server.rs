//! Sync server: owns the client list and broadcasts diffs at a fixed rate

use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use terravox::VoxelStore;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::events::{ClientId, EventBus, SyncEvent};
use crate::protocol::SyncMessage;

struct ClientHandle {
    id: ClientId,
    outbox: Sender<String>,
}

/// Server half of a sync session.
///
/// The store must track network dirtiness (multiplayer mode); every edit
/// made to it is picked up by the next broadcast.
pub struct SyncServer {
    store: Arc<VoxelStore>,
    config: SyncConfig,
    events: Arc<EventBus>,
    clients: Vec<ClientHandle>,
    next_id: ClientId,
    since_sync: f32,
}

impl SyncServer {
    pub fn new(store: Arc<VoxelStore>, config: SyncConfig, events: Arc<EventBus>) -> Result<Self> {
        config.validate()?;
        if !store.is_multiplayer() {
            return Err(SyncError::Config("sync server needs a multiplayer store".into()));
        }
        Ok(Self {
            store,
            config,
            events,
            clients: Vec::new(),
            next_id: 1,
            since_sync: 0.0,
        })
    }

    pub fn store(&self) -> &Arc<VoxelStore> {
        &self.store
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Register a client and queue the full save for it.
    ///
    /// Pending diffs are broadcast to existing clients first so the new
    /// client's save and later diffs line up.
    pub fn connect_client(&mut self) -> Result<(ClientId, Receiver<String>)> {
        self.flush()?;

        let id = self.next_id;
        self.next_id += 1;
        let (outbox, inbox) = unbounded();

        let save = self.store.collect_dirty_chunks_for_save();
        let chunks = save.chunks.len();
        // The receiver is still in hand, so this send cannot fail
        let _ = outbox.send(SyncMessage::FullSave(save).to_json()?);

        self.clients.push(ClientHandle { id, outbox });
        info!("Sync client {} connected, sent {} chunks", id, chunks);
        self.events.publish(SyncEvent::ClientConnected(id));
        Ok((id, inbox))
    }

    pub fn disconnect_client(&mut self, id: ClientId) -> Result<()> {
        let Some(index) = self.clients.iter().position(|c| c.id == id) else {
            return Err(SyncError::UnknownClient(id));
        };
        self.clients.remove(index);
        info!("Sync client {} disconnected", id);
        self.events.publish(SyncEvent::ClientDisconnected(id));
        Ok(())
    }

    /// Advance the sync clock by `dt` seconds, broadcasting when due.
    /// Returns the number of diffs sent.
    pub fn tick(&mut self, dt: f32) -> Result<usize> {
        self.since_sync += dt;
        if self.since_sync < self.config.interval() {
            return Ok(0);
        }
        self.since_sync %= self.config.interval();
        self.flush()
    }

    /// Collect and broadcast diffs now. Returns the number of diffs sent.
    pub fn flush(&mut self) -> Result<usize> {
        let diffs = self.store.collect_diff_queues();
        if diffs.is_empty() {
            return Ok(0);
        }
        let count = diffs.len();
        let json = SyncMessage::Diffs(diffs).to_json()?;
        self.broadcast(&json);
        debug!("Broadcast {} diffs to {} clients", count, self.clients.len());
        Ok(count)
    }

    fn broadcast(&mut self, json: &str) {
        let mut gone = Vec::new();
        self.clients.retain(|client| {
            let alive = client.outbox.send(json.to_string()).is_ok();
            if !alive {
                gone.push(client.id);
            }
            alive
        });
        for id in gone {
            warn!("Sync client {} dropped its connection", id);
            self.events.publish(SyncEvent::ClientDisconnected(id));
        }
    }
}
