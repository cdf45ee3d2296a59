//! Native dump dialect
//!
//! Stores the engine's raw `(key, value)` rows verbatim: an 8-byte
//! `ARDB0001` magic, a body of framed chunks (raw, or Snappy-compressed when
//! that actually pays), an EOF opcode and the CRC-64 trailer. Because rows
//! round-trip byte-for-byte, this is the fast path for full-database backup
//! and for shipping a database image to a replica.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use crate::config::SnapshotConfig;
use crate::error::{Result, SnapshotError};
use crate::storage::keys::{read_varint, write_varint, RowKey};
use crate::storage::{DatabaseIndex, StorageEngine};
use super::io::{DumpRoutine, SnapshotIo};
use super::DumpCore;

const NATIVE_MAGIC: &[u8] = b"ARDB";

const NATIVE_VERSION: u32 = 1;

// Chunk type bytes
const CHUNK_RAW: u8 = 1;
const CHUNK_SNAPPY: u8 = 2;
const CHUNK_EOF: u8 = 255;

/// Rows are buffered in memory and flushed as one chunk at this size.
const CHUNK_FLUSH_BYTES: usize = 1024 * 1024;

/// Who is loading the file. A replica only applies rows of the databases it
/// was configured to mirror; an empty set mirrors everything.
#[derive(Debug, Clone)]
pub enum LoadIdentity {
    /// Apply every row
    Full,
    /// Drop rows whose database id is not in the set (empty = accept all)
    ReplSync(HashSet<DatabaseIndex>),
}

impl LoadIdentity {
    fn accepts(&self, db: DatabaseIndex) -> bool {
        match self {
            LoadIdentity::Full => true,
            LoadIdentity::ReplSync(accepted) => accepted.is_empty() || accepted.contains(&db),
        }
    }
}

/// Native-dialect dump file
#[derive(Clone)]
pub struct NativeDump {
    engine: Arc<StorageEngine>,
    config: SnapshotConfig,
    core: Arc<DumpCore>,
}

impl NativeDump {
    pub fn new(engine: Arc<StorageEngine>, config: SnapshotConfig) -> Self {
        NativeDump { engine, config, core: Arc::new(DumpCore::new()) }
    }

    /// Save the full engine state to `path`, blocking the caller.
    pub fn save(&self, path: &Path, routine: Option<DumpRoutine>) -> Result<()> {
        let engine = Arc::clone(&self.engine);
        let result = self.core.save_with(path, routine, |io| do_save(io, &engine));
        if result.is_ok() {
            println!("SNAPSHOT: dump saved to {}", path.display());
        }
        result
    }

    /// Save on a detached background thread.
    pub fn bg_save(&self, path: &Path) -> Result<()> {
        if self.core.is_saving() {
            eprintln!("SNAPSHOT: there is already a background task saving data.");
            return Err(SnapshotError::SaveInProgress.into());
        }
        let dump = self.clone();
        let path = path.to_path_buf();
        thread::spawn(move || {
            println!("SNAPSHOT: background saving started");
            match dump.save(&path, None) {
                Ok(()) => println!("SNAPSHOT: background saving terminated with success"),
                Err(e) => eprintln!("SNAPSHOT: background saving error: {}", e),
            }
        });
        Ok(())
    }

    /// Load a dump file, routing every accepted row through the engine's
    /// raw-insert path.
    pub fn load(&self, path: &Path, identity: LoadIdentity, routine: Option<DumpRoutine>) -> Result<()> {
        let engine = Arc::clone(&self.engine);
        let result = self
            .core
            .load_with(path, routine, |io| do_load(io, &engine, &identity));
        match &result {
            Ok(()) => println!("SNAPSHOT: dump file load finished."),
            Err(e) => eprintln!("SNAPSHOT: failed to load dump file {}: {}", path.display(), e),
        }
        result
    }

    /// Move the current dump file to `<repl_data_dir>/<default_name>`.
    pub fn rename(&self, default_name: &str) -> Result<()> {
        self.core.rename(&self.config.repl_path(default_name))
    }

    /// Close and unlink the current dump file.
    pub fn remove(&self) -> Result<()> {
        self.core.remove()
    }

    pub fn flush(&self) -> Result<()> {
        self.core.flush()
    }

    pub fn is_saving(&self) -> bool {
        self.core.is_saving()
    }

    pub fn last_save(&self) -> Option<u64> {
        self.core.last_save()
    }
}

// ---- Saver ----

fn do_save(io: &mut SnapshotIo, engine: &StorageEngine) -> Result<()> {
    let magic = format!("ARDB{:04}", NATIVE_VERSION);
    io.write(magic.as_bytes())?;

    let mut buffer: Vec<u8> = Vec::with_capacity(CHUNK_FLUSH_BYTES + 4096);
    for (raw_key, raw_value) in engine.iter() {
        // Keep the 100 ms callback cadence even while rows only hit the
        // in-memory buffer
        io.routine_tick()?;
        write_varint(&mut buffer, raw_key.len() as u64);
        buffer.extend_from_slice(&raw_key);
        write_varint(&mut buffer, raw_value.len() as u64);
        buffer.extend_from_slice(&raw_value);
        if buffer.len() >= CHUNK_FLUSH_BYTES {
            flush_chunk(io, &mut buffer)?;
        }
    }
    flush_chunk(io, &mut buffer)?;

    io.write(&[CHUNK_EOF])?;
    let checksum = io.checksum();
    io.write(&checksum.to_le_bytes())?;
    io.flush()
}

/// Emit the buffered rows as one chunk. Snappy wins only when it saves more
/// than the 4 bytes its extra length field costs.
fn flush_chunk(io: &mut SnapshotIo, buffer: &mut Vec<u8>) -> Result<()> {
    if buffer.is_empty() {
        return Ok(());
    }
    let compressed = snap::raw::Encoder::new()
        .compress_vec(buffer)
        .map_err(|e| SnapshotError::Compression(e.to_string()))?;
    if compressed.len() > buffer.len() + 4 {
        io.write(&[CHUNK_RAW])?;
        io.write(&(buffer.len() as u32).to_le_bytes())?;
        io.write(buffer)?;
    } else {
        io.write(&[CHUNK_SNAPPY])?;
        io.write(&(buffer.len() as u32).to_le_bytes())?;
        io.write(&(compressed.len() as u32).to_le_bytes())?;
        io.write(&compressed)?;
    }
    buffer.clear();
    Ok(())
}

// ---- Loader ----

fn do_load(io: &mut SnapshotIo, engine: &StorageEngine, identity: &LoadIdentity) -> Result<()> {
    let mut magic = [0u8; 8];
    io.read_into(&mut magic, true)?;
    if &magic[0..4] != NATIVE_MAGIC {
        eprintln!(
            "SNAPSHOT: wrong signature trying to load DB from file {}",
            io.path().display()
        );
        return Err(SnapshotError::Format("bad magic".to_string()).into());
    }
    let version: u32 = std::str::from_utf8(&magic[4..8])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| SnapshotError::Format("unreadable version digits".to_string()))?;
    if !(1..=NATIVE_VERSION).contains(&version) {
        return Err(SnapshotError::Format(format!(
            "can't handle native dump version {}",
            version
        ))
        .into());
    }

    loop {
        let chunk_type = read_byte(io)?;
        if chunk_type == CHUNK_EOF {
            break;
        }
        let rows = match chunk_type {
            CHUNK_RAW => {
                let len = read_u32(io)? as usize;
                let mut buf = vec![0u8; len];
                io.read_into(&mut buf, true)?;
                buf
            }
            CHUNK_SNAPPY => {
                let raw_len = read_u32(io)? as usize;
                let compressed_len = read_u32(io)? as usize;
                let mut compressed = vec![0u8; compressed_len];
                io.read_into(&mut compressed, true)?;
                let decompressed = snap::raw::Decoder::new()
                    .decompress_vec(&compressed)
                    .map_err(|e| SnapshotError::Compression(e.to_string()))?;
                if decompressed.len() != raw_len {
                    return Err(SnapshotError::Compression(format!(
                        "chunk inflated to {} bytes, expected {}",
                        decompressed.len(),
                        raw_len
                    ))
                    .into());
                }
                decompressed
            }
            other => {
                return Err(SnapshotError::Format(format!("invalid chunk type {}", other)).into())
            }
        };
        apply_rows(engine, identity, &rows)?;
    }

    let computed = io.checksum();
    let mut trailer = [0u8; 8];
    io.read_into(&mut trailer, false)?;
    let stored = u64::from_le_bytes(trailer);
    if stored == 0 {
        println!("SNAPSHOT: dump file was saved with checksum disabled: no check performed.");
    } else if stored != computed {
        return Err(SnapshotError::ChecksumMismatch { expected: stored, actual: computed }.into());
    }
    Ok(())
}

fn apply_rows(engine: &StorageEngine, identity: &LoadIdentity, rows: &[u8]) -> Result<()> {
    let mut pos = 0usize;
    while pos < rows.len() {
        let key = read_framed(rows, &mut pos)?;
        let value = read_framed(rows, &mut pos)?;
        if let LoadIdentity::ReplSync(_) = identity {
            let db = RowKey::decode(key)?.db;
            if !identity.accepts(db) {
                continue;
            }
        }
        engine.set_raw(key, value)?;
    }
    Ok(())
}

fn read_framed<'a>(rows: &'a [u8], pos: &mut usize) -> Result<&'a [u8]> {
    let (len, used) = read_varint(&rows[*pos..])
        .ok_or_else(|| SnapshotError::Format("bad row length in chunk".to_string()))?;
    *pos += used;
    let end = pos
        .checked_add(len as usize)
        .filter(|end| *end <= rows.len())
        .ok_or_else(|| SnapshotError::Format("row overruns chunk".to_string()))?;
    let slice = &rows[*pos..end];
    *pos = end;
    Ok(slice)
}

fn read_byte(io: &mut SnapshotIo) -> Result<u8> {
    let mut buf = [0u8; 1];
    io.read_into(&mut buf, true)?;
    Ok(buf[0])
}

fn read_u32(io: &mut SnapshotIo) -> Result<u32> {
    let mut buf = [0u8; 4];
    io.read_into(&mut buf, true)?;
    Ok(u32::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_filter() {
        assert!(LoadIdentity::Full.accepts(9));
        let empty = LoadIdentity::ReplSync(HashSet::new());
        assert!(empty.accepts(3));
        let only_two: HashSet<u32> = [2].into_iter().collect();
        let filtered = LoadIdentity::ReplSync(only_two);
        assert!(filtered.accepts(2));
        assert!(!filtered.accepts(0));
    }

    #[test]
    fn test_read_framed() {
        let mut rows = Vec::new();
        write_varint(&mut rows, 3);
        rows.extend_from_slice(b"abc");
        write_varint(&mut rows, 0);
        let mut pos = 0;
        assert_eq!(read_framed(&rows, &mut pos).unwrap(), b"abc");
        assert_eq!(read_framed(&rows, &mut pos).unwrap(), b"");
        assert_eq!(pos, rows.len());
    }

    #[test]
    fn test_read_framed_rejects_overrun() {
        let mut rows = Vec::new();
        write_varint(&mut rows, 10);
        rows.extend_from_slice(b"short");
        let mut pos = 0;
        assert!(read_framed(&rows, &mut pos).is_err());
    }
}
