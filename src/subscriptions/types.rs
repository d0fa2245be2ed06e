//! Subscription types for latest-value streams and the change feed.

use crate::types::Document;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of buffered events per change feed subscriber.
pub const DEFAULT_BUFFER_SIZE: usize = 1000;

/// Configuration for a channel subscriber of a latest-value stream.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionConfig {
    /// Max buffered values before the subscriber is dropped.
    /// `0` means unbounded. Default: 0
    pub buffer_size: usize,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Channel end of a subscription.
///
/// Values are queued synchronously by the pushing call, so `try_recv` right
/// after a mutation observes its effect. The channel disconnects once the
/// subscriber has been dropped for overflowing a bounded buffer.
pub struct SubscriptionHandle<T> {
    pub id: SubscriptionId,
    /// Channel to receive values.
    pub receiver: crossbeam_channel::Receiver<T>,
}

impl<T> SubscriptionHandle<T> {
    /// Receive the next value (blocking).
    pub fn recv(&self) -> Result<T, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a value (non-blocking).
    pub fn try_recv(&self) -> Result<T, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Take every value queued so far.
    pub fn drain(&self) -> Vec<T> {
        self.receiver.try_iter().collect()
    }
}

/// Guard for a callback subscription. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: SubscriptionId,
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new<F>(id: SubscriptionId, detach: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            id,
            detach: Some(Box::new(detach)),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Unsubscribe now. Same as dropping the guard.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

// --- Change Feed ---

/// Kind of mutation reported by the change feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Updated,
    Patched,
    Removed,
}

/// Filter criteria for change feed subscriptions.
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    /// Only these record ids (None = all ids).
    pub ids: Option<Vec<String>>,

    /// Only these mutation kinds (None = all kinds).
    pub kinds: Option<Vec<EventKind>>,
}

impl EventFilter {
    /// Every mutation.
    pub fn all() -> Self {
        Self::default()
    }

    /// Mutations of specific records.
    pub fn ids(ids: Vec<String>) -> Self {
        Self {
            ids: Some(ids),
            ..Default::default()
        }
    }

    /// Mutations of specific kinds.
    pub fn kinds(kinds: Vec<EventKind>) -> Self {
        Self {
            kinds: Some(kinds),
            ..Default::default()
        }
    }
}

/// Configuration for a change feed subscription.
#[derive(Clone, Debug)]
pub struct EventSubscriptionConfig {
    /// Max buffered events before dropping subscriber.
    /// Default: 1000
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: EventFilter,
}

impl Default for EventSubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            filter: EventFilter::default(),
        }
    }
}

/// Events emitted by the change feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CollectionEvent {
    // --- Record Events ---
    /// A record was created (or re-created after removal).
    Created {
        collection: String,
        id: String,
        record: Document,
    },

    /// A record was replaced wholesale.
    Updated {
        collection: String,
        id: String,
        record: Document,
    },

    /// A record was shallow-merged with partial values.
    Patched {
        collection: String,
        id: String,
        record: Document,
    },

    /// A record was removed.
    Removed { collection: String, id: String },

    // --- Lifecycle Events ---
    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

impl CollectionEvent {
    /// Mutation kind, `None` for lifecycle events.
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            CollectionEvent::Created { .. } => Some(EventKind::Created),
            CollectionEvent::Updated { .. } => Some(EventKind::Updated),
            CollectionEvent::Patched { .. } => Some(EventKind::Patched),
            CollectionEvent::Removed { .. } => Some(EventKind::Removed),
            CollectionEvent::Dropped { .. } => None,
        }
    }

    /// Record id, `None` for lifecycle events.
    pub fn id(&self) -> Option<&str> {
        match self {
            CollectionEvent::Created { id, .. }
            | CollectionEvent::Updated { id, .. }
            | CollectionEvent::Patched { id, .. }
            | CollectionEvent::Removed { id, .. } => Some(id),
            CollectionEvent::Dropped { .. } => None,
        }
    }
}

/// Why a change feed subscription was dropped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Handle to a change feed subscription.
pub type EventSubscription = SubscriptionHandle<CollectionEvent>;
