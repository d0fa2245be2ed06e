//! Subscription primitives for live collection updates.
//!
//! Two kinds of subscriptions are provided:
//! - [`LatestValue`]: a replay-latest stream. New subscribers receive the
//!   current value immediately, then every pushed value in order.
//! - [`EventManager`]: a change feed of mutation events with filtering and
//!   bounded buffers that drop slow subscribers.
//!
//! All delivery is synchronous and in-process: a push has reached every
//! subscriber by the time the pushing call returns.
//!
//! # Example
//!
//! ```ignore
//! let stream = LatestValue::new(0);
//! let handle = stream.subscribe();
//! assert_eq!(handle.try_recv().unwrap(), 0);
//!
//! let _guard = stream.subscribe_with(|v| println!("now {v}"));
//! ```

mod latest;
mod manager;
mod types;

pub use latest::LatestValue;
pub use manager::EventManager;
pub use types::{
    CollectionEvent, DropReason, EventFilter, EventKind, EventSubscription,
    EventSubscriptionConfig, Subscription, SubscriptionConfig, SubscriptionHandle, SubscriptionId,
    DEFAULT_BUFFER_SIZE,
};
