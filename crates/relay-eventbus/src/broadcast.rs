use tokio::sync::broadcast;

const BROADCAST_CAPACITY: usize = 256;

/// Fans out outgoing wire frames to every connected `/events` client via a
/// tokio broadcast channel. In practice there is usually exactly one
/// framework connection, but nothing here assumes it.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<String>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Push a serialized frame to all subscribers. Silently drops if none
    /// are connected — there is nowhere to deliver a `bot_request` while
    /// the framework side is down.
    pub fn send(&self, payload: String) {
        let _ = self.tx.send(payload);
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
