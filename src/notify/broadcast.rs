//! In-process event stream on a tokio broadcast channel.
//!
//! Sending never blocks. With no subscribers the event is simply dropped,
//! and a slow subscriber sees `Lagged` rather than holding up the engine.

use tokio::sync::broadcast;

use super::{GameEvent, Notifier};

pub struct BroadcastNotifier {
    tx: broadcast::Sender<GameEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.tx.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, event: &GameEvent) {
        let _ = self.tx.send(event.clone());
    }
}
