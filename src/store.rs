//! Main Store struct mapping collection names to collections.

use crate::collection::{Collection, CollectionConfig};
use crate::error::{Result, StoreError};
use crate::types::{Document, Record};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Store configuration.
#[derive(Clone, Debug, Default)]
pub struct StoreConfig {
    /// Names of the untyped collections to create, in order.
    pub collections: Vec<String>,

    /// Configuration applied to every collection.
    pub collection: CollectionConfig,
}

/// A fixed set of named collections.
///
/// Collections are created up front; each may hold its own record type.
/// Looking one up returns a cheap handle to the shared collection.
pub struct Store {
    names: Vec<String>,
    collections: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Store {
    /// Create a store of untyped collections from config.
    pub fn new(config: StoreConfig) -> Result<Self> {
        let mut builder = StoreBuilder::with_config(config.collection);
        for name in config.collections {
            builder = builder.collection::<Document>(name);
        }
        builder.build()
    }

    /// Create a store with one untyped collection per name.
    pub fn with_collections<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(StoreConfig {
            collections: names.into_iter().map(Into::into).collect(),
            ..Default::default()
        })
    }

    /// Start building a store of typed collections.
    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    /// Handle to the collection `name` holding records of type `T`.
    pub fn collection<T: Record>(&self, name: &str) -> Result<Collection<T>> {
        let entry = self
            .collections
            .get(name)
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))?;

        entry
            .downcast_ref::<Collection<T>>()
            .cloned()
            .ok_or_else(|| StoreError::CollectionTypeMismatch(name.to_string()))
    }

    /// Handle to an untyped collection.
    pub fn documents(&self, name: &str) -> Result<Collection<Document>> {
        self.collection::<Document>(name)
    }

    /// Collection names in declaration order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("collections", &self.names)
            .finish()
    }
}

/// Builder for stores whose collections hold different record types.
///
/// ```ignore
/// let store = Store::builder()
///     .collection::<Todo>("todos")
///     .collection::<User>("users")
///     .build()?;
/// let todos = store.collection::<Todo>("todos")?;
/// ```
#[derive(Default)]
pub struct StoreBuilder {
    config: CollectionConfig,
    entries: Vec<(String, Box<dyn Any + Send + Sync>)>,
}

impl StoreBuilder {
    /// Builder whose collections all use `config`.
    pub fn with_config(config: CollectionConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
        }
    }

    /// Declare a collection of `T` records.
    pub fn collection<T: Record>(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        let collection = Collection::<T>::with_config(name.clone(), self.config.clone());
        self.entries.push((name, Box::new(collection)));
        self
    }

    /// Build the store. Fails if a name was declared twice.
    pub fn build(self) -> Result<Store> {
        let mut names = Vec::with_capacity(self.entries.len());
        let mut collections = HashMap::with_capacity(self.entries.len());

        for (name, collection) in self.entries {
            if collections.contains_key(&name) {
                return Err(StoreError::CollectionExists(name));
            }
            names.push(name.clone());
            collections.insert(name, collection);
        }

        debug!(collections = ?names, "store created");

        Ok(Store { names, collections })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct User {
        id: String,
        name: String,
    }

    #[test]
    fn test_with_collections() {
        let store = Store::with_collections(["todos", "users"]).unwrap();

        assert_eq!(store.names(), &["todos".to_string(), "users".to_string()]);
        assert!(store.contains("todos"));
        assert_eq!(store.len(), 2);

        let todos = store.documents("todos").unwrap();
        assert_eq!(todos.name(), "todos");
    }

    #[test]
    fn test_handles_share_state() {
        let store = Store::with_collections(["todos"]).unwrap();

        store
            .documents("todos")
            .unwrap()
            .create(json!({"id": "a"}))
            .unwrap();

        let again = store.documents("todos").unwrap();
        assert_eq!(again.get_all_ids(), vec!["a"]);
    }

    #[test]
    fn test_duplicate_name() {
        let result = Store::with_collections(["todos", "todos"]);
        assert!(matches!(result, Err(StoreError::CollectionExists(ref n)) if n == "todos"));
    }

    #[test]
    fn test_unknown_collection() {
        let store = Store::with_collections(["todos"]).unwrap();
        assert!(matches!(
            store.documents("users"),
            Err(StoreError::CollectionNotFound(_))
        ));
    }

    #[test]
    fn test_typed_collections() {
        let store = Store::builder()
            .collection::<User>("users")
            .collection::<Document>("misc")
            .build()
            .unwrap();

        let users = store.collection::<User>("users").unwrap();
        users
            .create(User {
                id: "u1".to_string(),
                name: "Ada".to_string(),
            })
            .unwrap();
        assert_eq!(users.get("u1").unwrap().name, "Ada");

        assert!(matches!(
            store.collection::<User>("misc"),
            Err(StoreError::CollectionTypeMismatch(_))
        ));
    }

    #[test]
    fn test_empty_store() {
        let store = Store::new(StoreConfig::default()).unwrap();
        assert!(store.is_empty());
    }
}
