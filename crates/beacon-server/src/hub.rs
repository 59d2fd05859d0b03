//! Streaming subscriber management and reload fan-out.

use std::fmt;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use beacon_core::events::{ChangeEvent, Frame};

use crate::registry::ClientKey;

/// Unique subscriber identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriberId(String);

impl SubscriberId {
    fn new() -> Self {
        Self(format!("sub_{}", Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One open streaming connection. Never mutated after creation, only removed.
struct Subscriber {
    id: SubscriberId,
    key: ClientKey,
    tx: mpsc::Sender<Frame>,
}

/// Owns the set of live streaming subscribers and fans reload events out to
/// them. Guarded by its own lock, disjoint from the connection registry's.
pub struct SubscriberHub {
    subscribers: Mutex<Vec<Subscriber>>,
    max_send_queue: usize,
}

impl SubscriberHub {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            // A subscriber's queue must at least hold the connected frame.
            max_send_queue: max_send_queue.max(1),
        }
    }

    /// Register a new subscriber for `key`. The `connected` acknowledgment
    /// is queued before the subscriber becomes visible to broadcasts, so it
    /// is always the first frame on the stream.
    pub fn subscribe(&self, key: ClientKey) -> (SubscriberId, mpsc::Receiver<Frame>) {
        let id = SubscriberId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let _ = tx.try_send(Frame::Connected);

        self.subscribers.lock().push(Subscriber {
            id: id.clone(),
            key,
            tx,
        });
        tracing::debug!(subscriber_id = %id, "Subscriber registered");
        (id, rx)
    }

    /// Remove a subscriber. Safe to call after a broadcast already pruned it.
    pub fn unsubscribe(&self, id: &SubscriberId) {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|sub| &sub.id != id);
        if subscribers.len() < before {
            tracing::debug!(subscriber_id = %id, "Subscriber removed");
        }
    }

    /// Queue a reload frame for every live subscriber. A subscriber whose
    /// receiver is gone is pruned in the same pass and never blocks delivery
    /// to the rest; a full queue drops the frame for that subscriber only.
    /// With zero subscribers this is a no-op. Returns the delivery count.
    pub fn broadcast(&self, event: &ChangeEvent) -> usize {
        let frame = Frame::Reload {
            timestamp: event.timestamp,
        };

        let mut delivered = 0;
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sub| match sub.tx.try_send(frame.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    subscriber_id = %sub.id,
                    client_key = %sub.key,
                    "Send queue full, dropping reload frame"
                );
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(subscriber_id = %sub.id, "Subscriber gone, pruning");
                false
            }
        });
        delivered
    }

    /// Number of live subscribers.
    pub fn count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
