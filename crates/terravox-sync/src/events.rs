//! Event channel between the sync session and gameplay code

use crossbeam_channel::{unbounded, Receiver, Sender};
use glam::IVec3;
use parking_lot::Mutex;

/// Identifier the server hands out on connect
pub type ClientId = u32;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    ClientConnected(ClientId),
    ClientDisconnected(ClientId),
    /// Voxels a client store changed while applying server messages
    PositionsModified(Vec<IVec3>),
}

/// Fan-out of [`SyncEvent`]s to any number of subscribers.
///
/// Subscribers whose receiver has been dropped are forgotten on the next
/// publish.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<SyncEvent>>>,
}

impl EventBus {
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: SyncEvent) {
        self.subscribers.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fan_out() {
        let bus = EventBus::default();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.publish(SyncEvent::ClientConnected(1));
        assert_eq!(a.try_recv().unwrap(), SyncEvent::ClientConnected(1));
        assert_eq!(b.try_recv().unwrap(), SyncEvent::ClientConnected(1));
    }

    #[test]
    fn test_drops_closed_subscribers() {
        let bus = EventBus::default();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        bus.publish(SyncEvent::ClientDisconnected(4));
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.len(), 1);
    }
}
