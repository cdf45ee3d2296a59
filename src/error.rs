//! Error types for Cinnabar
//! 
//! This module defines all error types used throughout the snapshot engine.
//! Snapshot failures keep the distinctions the dump formats care about
//! (format vs truncation vs checksum) so callers can decide what is fatal.

use std::fmt;
use std::io;
use std::error::Error as StdError;

/// Main error type for Cinnabar operations
#[derive(Debug)]
pub enum CinnabarError {
    /// File/IO errors (short writes, open/rename/unlink failures)
    Io(String),
    
    /// Snapshot encode/decode errors
    Snapshot(SnapshotError),
    
    /// Storage engine errors
    Storage(StorageError),
    
    /// Internal invariant violations
    Internal(String),
}

/// Snapshot-specific errors raised while saving or loading a dump file
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotError {
    /// Bad magic, unsupported version or unknown opcode/type byte
    Format(String),
    
    /// Short read inside a record
    Truncated,
    
    /// CRC-64 trailer mismatch
    ChecksumMismatch { expected: u64, actual: u64 },
    
    /// LZF or Snappy decompression failure
    Compression(String),
    
    /// A save is already running on this dump file
    SaveInProgress,
    
    /// The cooperative routine callback asked to abort, with its code
    Cancelled(i32),
}

/// Storage-related errors
#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    /// Key not found
    KeyNotFound,
    
    /// Wrong data type for operation
    WrongType,
    
    /// Row key or value bytes failed to decode
    CorruptRow(String),
    
    /// The ordered cursor broke the meta-first contract
    CursorOrder(String),
}

/// Type alias for Results throughout Cinnabar
pub type Result<T> = std::result::Result<T, CinnabarError>;

impl fmt::Display for CinnabarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CinnabarError::Io(msg) => write!(f, "I/O error: {}", msg),
            CinnabarError::Snapshot(err) => write!(f, "{}", err),
            CinnabarError::Storage(err) => write!(f, "{}", err),
            CinnabarError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::Format(msg) => write!(f, "Bad dump file: {}", msg),
            SnapshotError::Truncated => {
                write!(f, "Short read or OOM loading DB")
            }
            SnapshotError::ChecksumMismatch { expected, actual } => {
                write!(f, "Wrong dump checksum ({:016x}-{:016x})", expected, actual)
            }
            SnapshotError::Compression(msg) => write!(f, "Decompression failed: {}", msg),
            SnapshotError::SaveInProgress => {
                write!(f, "There is already a background task saving data")
            }
            SnapshotError::Cancelled(code) => {
                write!(f, "Dump routine aborted with code {}", code)
            }
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::KeyNotFound => write!(f, "Key not found"),
            StorageError::WrongType => write!(f, "Wrong data type"),
            StorageError::CorruptRow(msg) => write!(f, "Corrupt engine row: {}", msg),
            StorageError::CursorOrder(msg) => write!(f, "Cursor order violation: {}", msg),
        }
    }
}

impl StdError for CinnabarError {}

impl StdError for SnapshotError {}
impl StdError for StorageError {}

// Conversion implementations
impl From<io::Error> for CinnabarError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            CinnabarError::Snapshot(SnapshotError::Truncated)
        } else {
            CinnabarError::Io(err.to_string())
        }
    }
}

impl From<SnapshotError> for CinnabarError {
    fn from(err: SnapshotError) -> Self {
        CinnabarError::Snapshot(err)
    }
}

impl From<StorageError> for CinnabarError {
    fn from(err: StorageError) -> Self {
        CinnabarError::Storage(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SnapshotError::Truncated;
        assert_eq!(err.to_string(), "Short read or OOM loading DB");
        
        let err = SnapshotError::ChecksumMismatch { expected: 1, actual: 2 };
        assert_eq!(
            err.to_string(),
            "Wrong dump checksum (0000000000000001-0000000000000002)"
        );
    }

    #[test]
    fn test_eof_maps_to_truncated() {
        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        match CinnabarError::from(eof) {
            CinnabarError::Snapshot(SnapshotError::Truncated) => {}
            other => panic!("unexpected mapping: {:?}", other),
        }
    }
}
