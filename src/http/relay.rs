//! Internal best-effort event relay (spec.md §4.4.1 step 9: "publish it to
//! the internal relay; failure logged but not surfaced"). Directly modeled
//! on the teacher's `relay.rs` `EventStore` (dedup-by-id store + broadcast
//! fan-out), stripped of the WebSocket/NIP-01 transport — nothing in this
//! repository's scope subscribes to it over the wire, so there is no
//! listener to strip down to, only the store.

use nostr::Event;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// An in-process, dedup-by-id event log with a broadcast fan-out for any
/// in-process subscriber (e.g. a future observability hook).
#[derive(Clone)]
pub struct LocalRelay {
    events: Arc<RwLock<Vec<Event>>>,
    broadcast_tx: broadcast::Sender<Event>,
}

impl LocalRelay {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1000);
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            broadcast_tx: tx,
        }
    }

    /// Best-effort publish: a full broadcast channel only drops lagging
    /// subscribers, never the caller. There is no failure mode surfaced to
    /// `Merchant::purchase_session`.
    pub async fn publish(&self, event: Event) {
        let mut events = self.events.write().await;
        if !events.iter().any(|e| e.id == event.id) {
            events.push(event.clone());
            let _ = self.broadcast_tx.send(event);
        }
    }

    pub async fn all(&self) -> Vec<Event> {
        self.events.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.broadcast_tx.subscribe()
    }
}

impl Default for LocalRelay {
    fn default() -> Self {
        Self::new()
    }
}
