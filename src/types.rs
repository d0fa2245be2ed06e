//! Core types for the collection store.

use crate::error::{Result, StoreError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Name of the identity field every record carries.
pub const ID_FIELD: &str = "id";

/// Untyped record: any JSON object with a string `id`.
pub type Document = Value;

/// Top-level fields of a serialized record.
pub type Fields = serde_json::Map<String, Value>;

/// A value that can be stored in a collection.
///
/// Records are addressed by the `id` field of their serialized form. No other
/// field is interpreted by the store.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Record for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Serialize a value into its top-level fields, or `None` if it is not an object.
pub(crate) fn fields_of<V: Serialize + ?Sized>(value: &V) -> Result<Option<Fields>> {
    match serde_json::to_value(value)? {
        Value::Object(fields) => Ok(Some(fields)),
        _ => Ok(None),
    }
}

/// Extract a usable identifier. Missing, non-string and empty ids are rejected.
pub(crate) fn record_id(fields: &Fields) -> Option<&str> {
    match fields.get(ID_FIELD) {
        Some(Value::String(id)) if !id.is_empty() => Some(id),
        _ => None,
    }
}

/// Rebuild a typed record from its fields.
pub(crate) fn from_fields<T: Record>(fields: Fields) -> Result<T> {
    serde_json::from_value(Value::Object(fields))
        .map_err(|e| StoreError::Deserialization(e.to_string()))
}

/// Serialize partial values for `update`/`patch`. Anything but an object is rejected.
pub(crate) fn value_fields<V: Serialize>(values: &V) -> Result<Fields> {
    fields_of(values)?
        .ok_or_else(|| StoreError::InvalidValues("values must serialize to an object".to_string()))
}
