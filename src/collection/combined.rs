//! Whole-collection stream derived from the id list and per-record streams.

use crate::subscriptions::{LatestValue, Subscription, SubscriptionConfig, SubscriptionHandle};
use crate::types::Record;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

use super::engine::CollectionInner;

type Watched<T> = Vec<(LatestValue<Option<T>>, Subscription)>;

struct Combiner<T> {
    collection: Arc<CollectionInner<T>>,
    output: LatestValue<Vec<T>>,
    /// Streams of the ids that were live at the last rebuild.
    watched: Mutex<Watched<T>>,
}

impl<T: Record> Combiner<T> {
    /// Re-watch exactly the live ids and emit.
    fn rebuild(self: &Arc<Self>) {
        {
            let mut watched = self.watched.lock();

            let ids = self.collection.ids.get();
            let streams: Vec<_> = {
                let items = self.collection.items.read();
                ids.iter().filter_map(|id| items.get(id).cloned()).collect()
            };

            let mut next = Vec::with_capacity(streams.len());
            for stream in streams {
                let weak = Arc::downgrade(self);
                let subscription = stream.on_change(move |_| {
                    if let Some(combiner) = weak.upgrade() {
                        combiner.refresh();
                    }
                });
                next.push((stream, subscription));
            }

            // Old subscriptions detach here.
            *watched = next;
            trace!(watched = watched.len(), "rebuilt combined stream");
        }

        self.refresh();
    }

    /// Emit the records of the watched streams.
    fn refresh(&self) {
        // Collected under the output lock, so the last list pushed is the
        // last one collected.
        self.output.set_with(|| collect(&self.watched.lock()));
    }
}

fn collect<T: Record>(watched: &[(LatestValue<Option<T>>, Subscription)]) -> Vec<T> {
    watched.iter().filter_map(|(stream, _)| stream.get()).collect()
}

/// Stream of every live record of a collection, in id-list order.
///
/// A fresh list is emitted when the id list changes and when any live record
/// changes. Records that are no longer live stop contributing as soon as
/// they leave the id list. Dropping the stream detaches it from the
/// collection.
pub struct CombinedStream<T> {
    combiner: Arc<Combiner<T>>,
    _ids_subscription: Subscription,
}

impl<T: Record> CombinedStream<T> {
    pub(super) fn new(collection: Arc<CollectionInner<T>>) -> Self {
        let output = LatestValue::with_config(Vec::new(), collection.config.subscription.clone());
        let combiner = Arc::new(Combiner {
            collection,
            output,
            watched: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&combiner);
        let ids_subscription = combiner.collection.ids.on_change(move |_| {
            if let Some(combiner) = weak.upgrade() {
                combiner.rebuild();
            }
        });

        // Zero live ids settles on `[]` here without waiting for any push.
        combiner.rebuild();

        Self {
            combiner,
            _ids_subscription: ids_subscription,
        }
    }

    /// Current list of live records.
    pub fn get(&self) -> Vec<T> {
        self.combiner.output.get()
    }

    /// Subscribe through a channel. The current list is queued first.
    pub fn subscribe(&self) -> SubscriptionHandle<Vec<T>> {
        self.combiner.output.subscribe()
    }

    pub fn subscribe_with_config(&self, config: &SubscriptionConfig) -> SubscriptionHandle<Vec<T>> {
        self.combiner.output.subscribe_with_config(config)
    }

    /// Subscribe with a callback, invoked now and on every emission.
    pub fn subscribe_with<F>(&self, f: F) -> Subscription
    where
        F: Fn(&Vec<T>) + Send + Sync + 'static,
    {
        self.combiner.output.subscribe_with(f)
    }

    pub fn subscriber_count(&self) -> usize {
        self.combiner.output.subscriber_count()
    }
}

#[cfg(test)]
mod tests {
    use crate::collection::Collection;
    use serde_json::{json, Value};

    fn docs() -> Collection<Value> {
        Collection::new("docs")
    }

    #[test]
    fn test_empty_emits_immediately() {
        let collection = docs();
        let all = collection.get_all_stream();
        let handle = all.subscribe();

        assert_eq!(handle.drain(), vec![Vec::<Value>::new()]);
    }

    #[test]
    fn test_emits_on_create_update_remove() {
        let collection = docs();
        let all = collection.get_all_stream();
        let handle = all.subscribe();

        collection.create(json!({"id": "a", "n": 1})).unwrap();
        collection.create(json!({"id": "b", "n": 2})).unwrap();
        collection.patch("a", json!({"n": 10})).unwrap();
        collection.remove("b").unwrap();

        assert_eq!(
            handle.drain(),
            vec![
                vec![],
                vec![json!({"id": "a", "n": 1})],
                vec![json!({"id": "a", "n": 1}), json!({"id": "b", "n": 2})],
                vec![json!({"id": "a", "n": 10}), json!({"id": "b", "n": 2})],
                vec![json!({"id": "a", "n": 10})],
            ]
        );
    }

    #[test]
    fn test_removed_record_stops_contributing() {
        let collection = docs();
        collection.create(json!({"id": "a"})).unwrap();
        let all = collection.get_all_stream();
        let handle = all.subscribe();

        collection.remove("a").unwrap();
        collection.create(json!({"id": "a", "again": true})).unwrap();

        // Each mutation is one emission; the absent push after remove is not seen.
        assert_eq!(
            handle.drain(),
            vec![
                vec![json!({"id": "a"})],
                vec![],
                vec![json!({"id": "a", "again": true})],
            ]
        );
    }

    #[test]
    fn test_drop_detaches() {
        let collection = docs();
        collection.create(json!({"id": "a"})).unwrap();
        let ids = collection.get_all_ids_stream();
        let item = collection.get_stream("a");

        let all = collection.get_all_stream();
        assert_eq!(ids.subscriber_count(), 1);
        assert_eq!(item.subscriber_count(), 1);

        drop(all);
        assert_eq!(ids.subscriber_count(), 0);
        assert_eq!(item.subscriber_count(), 0);
    }

    #[test]
    fn test_get_reflects_latest() {
        let collection = docs();
        let all = collection.get_all_stream();
        collection.create(json!({"id": "x"})).unwrap();
        assert_eq!(all.get(), vec![json!({"id": "x"})]);
    }
}
