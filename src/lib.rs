//! # Reactive Store
//!
//! An in-process, reactive, keyed collection store: named collections of
//! identifiable records with synchronous reads and replay-latest streams that
//! emit on every mutation.
//!
//! ## Core Concepts
//!
//! - **Records**: Serializable values carrying a string `id` field
//! - **Collections**: Per-id record streams plus an ordered list of live ids
//! - **Streams**: Latest-value holders that replay the current value on subscribe
//! - **Change feed**: Filtered, bounded per-collection mutation events
//!
//! ## Example
//!
//! ```ignore
//! use reactive_store::Store;
//! use serde_json::json;
//!
//! let store = Store::with_collections(["todos"])?;
//! let todos = store.documents("todos")?;
//!
//! // Subscribe before the record exists
//! let item = todos.get_stream("a").subscribe();
//!
//! todos.create(json!({"id": "a", "label": "Lorem", "done": false}))?;
//! todos.patch("a", json!({"done": true}))?;
//!
//! // None, then the created record, then the patched one
//! for value in item.drain() {
//!     println!("{:?}", value);
//! }
//! ```

pub mod collection;
pub mod error;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use collection::{Collection, CollectionConfig, CombinedStream};
pub use error::{Result, StoreError};
pub use store::{Store, StoreBuilder, StoreConfig};
pub use subscriptions::{
    CollectionEvent, DropReason, EventFilter, EventKind, EventManager, EventSubscription,
    EventSubscriptionConfig, LatestValue, Subscription, SubscriptionConfig, SubscriptionHandle,
    SubscriptionId,
};
pub use types::{Document, Fields, Record, ID_FIELD};
