//! The collection engine: id-keyed record streams plus the ordered live-id list.

use crate::error::{Result, StoreError};
use crate::subscriptions::{
    CollectionEvent, EventKind, EventManager, EventSubscription, EventSubscriptionConfig,
    LatestValue, SubscriptionConfig, SubscriptionId,
};
use crate::types::{fields_of, from_fields, record_id, value_fields, Fields, Record, ID_FIELD};
use parking_lot::{ReentrantMutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::combined::CombinedStream;

/// Per-collection configuration.
#[derive(Clone, Debug, Default)]
pub struct CollectionConfig {
    /// Defaults for channel subscribers of the collection's streams.
    pub subscription: SubscriptionConfig,
}

pub(super) struct CollectionInner<T> {
    name: String,
    pub(super) config: CollectionConfig,

    /// Every id ever created or requested. Entries are never removed; a
    /// removed record leaves `None` behind.
    pub(super) items: RwLock<HashMap<String, LatestValue<Option<T>>>>,

    /// Live ids in creation order.
    pub(super) ids: LatestValue<Vec<String>>,

    /// Change feed.
    events: EventManager,

    /// Serializes mutations so each one is observed as a single ordered unit.
    /// Reentrant: a subscriber callback may mutate the collection notifying it.
    write_lock: ReentrantMutex<()>,
}

/// A keyed, reactive collection of records.
///
/// Cloning yields another handle to the same collection.
///
/// Subscribers are notified synchronously inside the mutating call. A
/// callback may mutate the collection that is notifying it; the nested
/// mutation completes before the outer call continues, and a stream already
/// delivering a value hands the nested push to its subscribers right after.
pub struct Collection<T> {
    inner: Arc<CollectionInner<T>>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Record> Collection<T> {
    /// Create an empty collection.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CollectionConfig::default())
    }

    /// Create an empty collection with custom configuration.
    pub fn with_config(name: impl Into<String>, config: CollectionConfig) -> Self {
        let ids = LatestValue::with_config(Vec::new(), config.subscription.clone());
        Self {
            inner: Arc::new(CollectionInner {
                name: name.into(),
                config,
                items: RwLock::new(HashMap::new()),
                ids,
                events: EventManager::new(),
                write_lock: ReentrantMutex::new(()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    // --- Mutations ---

    /// Add a record. Its `id` must be a non-empty string that is not live.
    ///
    /// A previously removed id may be created again; it is appended to the
    /// end of the id list.
    pub fn create(&self, item: T) -> Result<T> {
        let fields = fields_of(&item)?.ok_or(StoreError::MissingId)?;
        let id = record_id(&fields).ok_or(StoreError::MissingId)?.to_string();

        let _lock = self.inner.write_lock.lock();

        let absent = {
            let mut items = self.inner.items.write();
            match items.get(&id) {
                Some(stream) if stream.with(Option::is_some) => {
                    return Err(StoreError::DuplicateId(id));
                }
                Some(stream) => Some(stream.clone()),
                None => {
                    let stream = LatestValue::with_config(
                        Some(item.clone()),
                        self.inner.config.subscription.clone(),
                    );
                    items.insert(id.clone(), stream);
                    None
                }
            }
        };

        // Push outside the map lock; subscribers may call back into reads.
        if let Some(stream) = absent {
            stream.set(Some(item.clone()));
        }

        let mut ids = self.inner.ids.get();
        ids.push(id.clone());
        self.inner.ids.set(ids);

        debug!(collection = %self.inner.name, id = %id, "record created");

        if self.inner.events.has_subscribers() {
            self.inner.events.broadcast(CollectionEvent::Created {
                collection: self.inner.name.clone(),
                id,
                record: Value::Object(fields),
            });
        }

        Ok(item)
    }

    /// Replace every field of a live record. Any `id` in `values` is ignored.
    pub fn update<V: Serialize>(&self, id: &str, values: V) -> Result<T> {
        let _lock = self.inner.write_lock.lock();
        let (stream, _) = self.live(id)?;

        let fields = value_fields(&values)?;
        self.commit(&stream, id, fields, EventKind::Updated)
    }

    /// Shallow-merge `values` into a live record. The `id` cannot be overwritten.
    pub fn patch<V: Serialize>(&self, id: &str, values: V) -> Result<T> {
        let _lock = self.inner.write_lock.lock();
        let (stream, current) = self.live(id)?;

        let mut fields = fields_of(&current)?.ok_or_else(|| {
            StoreError::Serialization(format!("stored record {} is not an object", id))
        })?;
        fields.extend(value_fields(&values)?);

        self.commit(&stream, id, fields, EventKind::Patched)
    }

    /// Remove a live record. Its stream is kept and now holds `None`.
    pub fn remove(&self, id: &str) -> Result<()> {
        let _lock = self.inner.write_lock.lock();
        let (stream, _) = self.live(id)?;

        let ids: Vec<String> = self
            .inner
            .ids
            .with(|ids| ids.iter().filter(|i| *i != id).cloned().collect());
        self.inner.ids.set(ids);
        stream.set(None);

        debug!(collection = %self.inner.name, id = %id, "record removed");

        if self.inner.events.has_subscribers() {
            self.inner.events.broadcast(CollectionEvent::Removed {
                collection: self.inner.name.clone(),
                id: id.to_string(),
            });
        }

        Ok(())
    }

    // --- Reads ---

    /// Current record for `id`. Never creates an entry.
    pub fn get(&self, id: &str) -> Option<T> {
        self.inner.items.read().get(id).and_then(|stream| stream.get())
    }

    /// Stream of the record for `id`.
    ///
    /// An unknown id gets an entry holding `None`, so a subscriber can attach
    /// before the record is created and receive it when it appears.
    pub fn get_stream(&self, id: &str) -> LatestValue<Option<T>> {
        if let Some(stream) = self.inner.items.read().get(id) {
            return stream.clone();
        }

        self.inner
            .items
            .write()
            .entry(id.to_string())
            .or_insert_with(|| LatestValue::with_config(None, self.inner.config.subscription.clone()))
            .clone()
    }

    /// Live ids in creation order.
    pub fn get_all_ids(&self) -> Vec<String> {
        self.inner.ids.get()
    }

    /// Stream of the live id list.
    pub fn get_all_ids_stream(&self) -> LatestValue<Vec<String>> {
        self.inner.ids.clone()
    }

    /// Every live record, in id-list order.
    pub fn get_all(&self) -> Vec<T> {
        let ids = self.inner.ids.get();
        let items = self.inner.items.read();
        ids.iter()
            .filter_map(|id| items.get(id).and_then(|stream| stream.get()))
            .collect()
    }

    /// Stream of every live record.
    ///
    /// Emits a fresh list whenever the id list changes or any live record
    /// changes. With no live ids it holds `[]` straight away.
    pub fn get_all_stream(&self) -> CombinedStream<T> {
        CombinedStream::new(Arc::clone(&self.inner))
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.inner.ids.with(Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `id` is live.
    pub fn contains(&self, id: &str) -> bool {
        self.inner.ids.with(|ids| ids.iter().any(|i| i == id))
    }

    // --- Change Feed ---

    /// Subscribe to mutation events from now on.
    pub fn subscribe_events(&self, config: EventSubscriptionConfig) -> EventSubscription {
        self.inner.events.subscribe(config)
    }

    pub fn unsubscribe_events(&self, id: SubscriptionId) {
        self.inner.events.unsubscribe(id)
    }

    // --- Internals ---

    /// Stream and current record of a live id.
    fn live(&self, id: &str) -> Result<(LatestValue<Option<T>>, T)> {
        let items = self.inner.items.read();
        items
            .get(id)
            .and_then(|stream| stream.get().map(|record| (stream.clone(), record)))
            .ok_or_else(|| StoreError::IdNotFound(id.to_string()))
    }

    /// Build the new record from `fields` and push it. Nothing is pushed if
    /// the fields do not make a valid `T`.
    fn commit(
        &self,
        stream: &LatestValue<Option<T>>,
        id: &str,
        mut fields: Fields,
        kind: EventKind,
    ) -> Result<T> {
        fields.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        let record: T = from_fields(fields)?;
        let event_record = if self.inner.events.has_subscribers() {
            Some(serde_json::to_value(&record)?)
        } else {
            None
        };

        stream.set(Some(record.clone()));

        debug!(collection = %self.inner.name, id = %id, kind = ?kind, "record replaced");

        if let Some(record_value) = event_record {
            let collection = self.inner.name.clone();
            let id = id.to_string();
            let event = match kind {
                EventKind::Patched => CollectionEvent::Patched {
                    collection,
                    id,
                    record: record_value,
                },
                _ => CollectionEvent::Updated {
                    collection,
                    id,
                    record: record_value,
                },
            };
            self.inner.events.broadcast(event);
        }

        Ok(record)
    }
}

impl<T> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}
