//! Cinnabar library
//! 
//! The persistent snapshot engine of a Redis-compatible key/value server:
//! an ordered in-memory storage engine plus two dump-file dialects sharing
//! one streaming, checksumming codec core. The legacy dialect is
//! bit-compatible with the reference server's dump format up to file
//! version 6; the native dialect stores raw engine rows in optionally
//! Snappy-compressed chunks for fast backup and replication.

pub mod config;
pub mod error;
pub mod snapshot;
pub mod storage;

// Re-export commonly used types
pub use config::SnapshotConfig;
pub use error::{CinnabarError, Result};
pub use snapshot::{LoadIdentity, NativeDump, RedisDump};
pub use storage::StorageEngine;
