//! Storage layer for Cinnabar
//! 
//! The ordered row keyspace the snapshot codecs read from and load into,
//! together with the row key/value codec that defines its on-cursor layout.

pub mod engine;
pub mod keys;

pub use engine::{RowCursor, StorageEngine};
pub use keys::{ContainerBody, RowKey, RowKind, RowValue};

/// Database index type
pub type DatabaseIndex = u32;

/// Key type for storage
pub type Key = Vec<u8>;
