//! Change feed manager for broadcasting collection mutations.

use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use super::types::{
    CollectionEvent, DropReason, EventSubscription, EventSubscriptionConfig, SubscriptionHandle,
    SubscriptionId,
};

/// Internal subscription state.
struct EventSubscriber {
    config: EventSubscriptionConfig,
    sender: Sender<CollectionEvent>,
}

impl EventSubscriber {
    /// Try to send an event. Returns false if buffer is full (subscriber will be dropped).
    fn try_send(&self, event: CollectionEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Check if this subscription wants an event.
    fn matches(&self, event: &CollectionEvent) -> bool {
        let filter = &self.config.filter;

        if let (Some(kinds), Some(kind)) = (&filter.kinds, event.kind()) {
            if !kinds.contains(&kind) {
                return false;
            }
        }

        if let (Some(ids), Some(id)) = (&filter.ids, event.id()) {
            if !ids.iter().any(|i| i == id) {
                return false;
            }
        }

        true
    }
}

/// Manages change feed subscriptions and broadcasts events.
pub struct EventManager {
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, EventSubscriber>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl EventManager {
    /// Create a new event manager.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a new subscription. Only mutations after this call are delivered.
    pub fn subscribe(&self, config: EventSubscriptionConfig) -> EventSubscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size.max(1));

        self.subscriptions
            .write()
            .insert(id, EventSubscriber { config, sender });

        SubscriptionHandle { id, receiver }
    }

    /// Unsubscribe and clean up.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subscriptions.write();
        if let Some(sub) = subs.remove(&id) {
            // Send dropped event (best effort)
            let _ = sub.sender.try_send(CollectionEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Whether anyone is listening. Lets callers skip building event payloads.
    pub fn has_subscribers(&self) -> bool {
        !self.subscriptions.read().is_empty()
    }

    /// Broadcast an event to matching subscriptions. Drops subscribers that fail to receive.
    pub fn broadcast(&self, event: CollectionEvent) {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if sub.matches(&event) && !sub.try_send(event.clone()) {
                    to_remove.push(*id);
                }
            }
        }

        // Remove dropped subscriptions
        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    warn!(subscription = id.0, "dropping slow change feed subscriber");
                    // Try to notify about the drop (might fail, that's ok)
                    let _ = sub.sender.try_send(CollectionEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}
