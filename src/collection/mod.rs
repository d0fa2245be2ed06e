//! Collections of identifiable records.
//!
//! A collection keeps one latest-value stream per record id plus a single
//! stream of the live ids in creation order:
//!
//! - An id is live iff its stream holds `Some(record)`.
//! - Streams are never discarded. Removing a record pushes `None`, so
//!   subscribers attached before or after the removal see a consistent absence.
//! - The live id list never holds duplicates. A re-created id moves to the end.

mod combined;
mod engine;

pub use combined::CombinedStream;
pub use engine::{Collection, CollectionConfig};
