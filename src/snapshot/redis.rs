//! Redis-compatible dump dialect
//!
//! Reads and writes the reference server's dump format up to file version 6:
//! `REDIS` magic plus four ascii version digits, a body of opcode-punctuated
//! typed objects, and (from version 5 on) a little-endian CRC-64 trailer.
//!
//! The loader accepts everything a version ≤ 6 file can contain, including
//! the four packed container encodings. The saver always re-emits plain
//! encodings: it drives one ordered cursor over the storage engine and
//! coalesces the rows of each logical key into a single typed object.

use std::path::Path;
use std::sync::Arc;
use std::thread;

use crate::config::SnapshotConfig;
use crate::error::{CinnabarError, Result, SnapshotError, StorageError};
use crate::storage::keys::{ContainerBody, RowKey, RowKind, RowValue};
use crate::storage::{DatabaseIndex, StorageEngine};
use super::io::{DumpRoutine, SnapshotIo};
use super::packed;
use super::DumpCore;

const LEGACY_MAGIC: &[u8] = b"REDIS";

/// Highest file version this dialect reads; also the version it writes.
const LEGACY_VERSION: u32 = 6;

/// File version that introduced the CRC-64 trailer.
const CHECKSUM_MIN_VERSION: u32 = 5;

// Opcodes punctuating the body
const OP_EXPIRETIME_MS: u8 = 252;
const OP_EXPIRETIME: u8 = 253;
const OP_SELECTDB: u8 = 254;
const OP_EOF: u8 = 255;

// Plain object types
const TYPE_STRING: u8 = 0;
const TYPE_LIST: u8 = 1;
const TYPE_SET: u8 = 2;
const TYPE_ZSET: u8 = 3;
const TYPE_HASH: u8 = 4;

// Packed object types (load only)
const TYPE_HASH_ZIPMAP: u8 = 9;
const TYPE_LIST_ZIPLIST: u8 = 10;
const TYPE_SET_INTSET: u8 = 11;
const TYPE_ZSET_ZIPLIST: u8 = 12;
const TYPE_HASH_ZIPLIST: u8 = 13;

// Special string encodings selected by the top length bits
const ENC_INT8: u8 = 0;
const ENC_INT16: u8 = 1;
const ENC_INT32: u8 = 2;
const ENC_LZF: u8 = 3;

/// Result of a length read: either a plain length or the discriminator of a
/// specially encoded string.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Len {
    Plain(u32),
    Encoded(u8),
}

/// Redis-dialect dump file
///
/// Cloning shares the underlying stream and lifecycle state, which is what
/// lets a background thread run `save` on its own handle.
#[derive(Clone)]
pub struct RedisDump {
    engine: Arc<StorageEngine>,
    config: SnapshotConfig,
    core: Arc<DumpCore>,
}

impl RedisDump {
    pub fn new(engine: Arc<StorageEngine>, config: SnapshotConfig) -> Self {
        RedisDump { engine, config, core: Arc::new(DumpCore::new()) }
    }

    /// Save the full engine state to `path`, blocking the caller.
    ///
    /// Refuses with `SaveInProgress` when another save is running on this
    /// dump file. The routine callback, when given, is invoked at most once
    /// per 100 ms; a non-zero return aborts with `Cancelled` and leaves the
    /// partial file on disk.
    pub fn save(&self, path: &Path, routine: Option<DumpRoutine>) -> Result<()> {
        let engine = Arc::clone(&self.engine);
        let config = self.config.clone();
        let result = self
            .core
            .save_with(path, routine, |io| do_save(io, &engine, &config));
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

    /// Load a dump file into the engine.
    ///
    /// Each key present in the file is deleted just before it is
    /// re-inserted; keys absent from the file are left untouched. Callers
    /// that need an exact image load into a freshly opened engine.
    pub fn load(&self, path: &Path, routine: Option<DumpRoutine>) -> Result<()> {
        let engine = Arc::clone(&self.engine);
        let result = self.core.load_with(path, routine, |io| do_load(io, &engine));
        match &result {
            Ok(()) => println!("SNAPSHOT: dump file load finished."),
            Err(e) => eprintln!("SNAPSHOT: failed to load dump file {}: {}", path.display(), e),
        }
        result
    }

    /// Move the current dump file to `<repl_data_dir>/<default_name>`.
    /// A no-op when the file is already there.
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

    /// Epoch seconds of the last successful save on this handle.
    pub fn last_save(&self) -> Option<u64> {
        self.core.last_save()
    }
}

/// Cheap sniff: does the file at `path` begin with a legacy dump signature?
pub fn is_legacy_dump_file(path: &Path) -> Result<bool> {
    let mut io = SnapshotIo::new();
    io.open_read(path)?;
    let mut magic = [0u8; 9];
    match io.read_into(&mut magic, false) {
        Ok(()) => Ok(&magic[0..5] == LEGACY_MAGIC),
        Err(CinnabarError::Snapshot(SnapshotError::Truncated)) => Ok(false),
        Err(e) => Err(e),
    }
}

// ---- Loader ----

fn do_load(io: &mut SnapshotIo, engine: &StorageEngine) -> Result<()> {
    let mut magic = [0u8; 9];
    io.read_into(&mut magic, true)?;
    if &magic[0..5] != LEGACY_MAGIC {
        eprintln!(
            "SNAPSHOT: wrong signature trying to load DB from file {}",
            io.path().display()
        );
        return Err(SnapshotError::Format("bad magic".to_string()).into());
    }
    let version: u32 = std::str::from_utf8(&magic[5..9])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| SnapshotError::Format("unreadable version digits".to_string()))?;
    if !(1..=LEGACY_VERSION).contains(&version) {
        return Err(SnapshotError::Format(format!(
            "can't handle dump format version {}",
            version
        ))
        .into());
    }

    let mut current_db: DatabaseIndex = 0;
    loop {
        let mut expire_at_ms: Option<u64> = None;
        let mut opcode = read_byte(io)?;

        if opcode == OP_EXPIRETIME {
            // Seconds precision; stored as milliseconds internally
            expire_at_ms = Some(read_seconds_time(io)? * 1000);
            opcode = read_byte(io)?;
        } else if opcode == OP_EXPIRETIME_MS {
            expire_at_ms = Some(read_millis_time(io)?);
            opcode = read_byte(io)?;
        }

        if opcode == OP_EOF {
            break;
        }
        if opcode == OP_SELECTDB {
            current_db = read_plain_len(io)?;
            continue;
        }

        let key = read_string(io)?;
        engine.delete_key(current_db, &key)?;
        load_object(io, engine, current_db, &key, opcode)?;
        if let Some(at_ms) = expire_at_ms {
            engine.generic_expire(current_db, &key, at_ms)?;
        }
    }

    if version >= CHECKSUM_MIN_VERSION {
        // The trailer itself is not part of the checksum
        let computed = io.checksum();
        let mut trailer = [0u8; 8];
        io.read_into(&mut trailer, false)?;
        let stored = u64::from_le_bytes(trailer);
        if stored == 0 {
            println!("SNAPSHOT: dump file was saved with checksum disabled: no check performed.");
        } else if stored != computed {
            return Err(SnapshotError::ChecksumMismatch { expected: stored, actual: computed }.into());
        }
    }
    Ok(())
}

fn load_object(
    io: &mut SnapshotIo,
    engine: &StorageEngine,
    db: DatabaseIndex,
    key: &[u8],
    object_type: u8,
) -> Result<()> {
    match object_type {
        TYPE_STRING => {
            let value = read_string(io)?;
            engine.generic_set(db, key, &value)?;
        }
        TYPE_LIST => {
            let len = read_plain_len(io)?;
            for _ in 0..len {
                let element = read_string(io)?;
                engine.list_insert(db, key, &element)?;
            }
        }
        TYPE_SET => {
            let len = read_plain_len(io)?;
            for _ in 0..len {
                let member = read_string(io)?;
                engine.set_add(db, key, &member)?;
            }
        }
        TYPE_ZSET => {
            let len = read_plain_len(io)?;
            for _ in 0..len {
                let member = read_string(io)?;
                let score = read_double(io)?;
                engine.zset_add(db, key, &member, score)?;
            }
        }
        TYPE_HASH => {
            let len = read_plain_len(io)?;
            for _ in 0..len {
                let field = read_string(io)?;
                let value = read_string(io)?;
                engine.hash_set(db, key, &field, &value)?;
            }
        }
        TYPE_LIST_ZIPLIST => {
            let blob = read_string(io)?;
            for entry in packed::ziplist_entries(&blob)? {
                engine.list_insert(db, key, &entry.into_bytes())?;
            }
        }
        TYPE_SET_INTSET => {
            let blob = read_string(io)?;
            for value in packed::intset_entries(&blob)? {
                engine.set_add(db, key, value.to_string().as_bytes())?;
            }
        }
        TYPE_ZSET_ZIPLIST => {
            let blob = read_string(io)?;
            let entries = packed::ziplist_entries(&blob)?;
            if entries.len() % 2 != 0 {
                return Err(SnapshotError::Format("odd zset ziplist".to_string()).into());
            }
            for pair in entries.chunks(2) {
                let score = pair[1].score()?;
                engine.zset_add(db, key, &pair[0].clone().into_bytes(), score)?;
            }
        }
        TYPE_HASH_ZIPLIST => {
            let blob = read_string(io)?;
            let entries = packed::ziplist_entries(&blob)?;
            if entries.len() % 2 != 0 {
                return Err(SnapshotError::Format("odd hash ziplist".to_string()).into());
            }
            for pair in entries.chunks(2) {
                engine.hash_set(
                    db,
                    key,
                    &pair[0].clone().into_bytes(),
                    &pair[1].clone().into_bytes(),
                )?;
            }
        }
        TYPE_HASH_ZIPMAP => {
            let blob = read_string(io)?;
            for (field, value) in packed::zipmap_entries(&blob)? {
                engine.hash_set(db, key, &field, &value)?;
            }
        }
        other => {
            return Err(SnapshotError::Format(format!("unknown object type {}", other)).into())
        }
    }
    Ok(())
}

// ---- Saver ----

fn do_save(io: &mut SnapshotIo, engine: &StorageEngine, config: &SnapshotConfig) -> Result<()> {
    let magic = format!("REDIS{:04}", LEGACY_VERSION);
    io.write(magic.as_bytes())?;

    let mut saver = Saver {
        io,
        engine,
        config,
        last_db: None,
        current_key: None,
    };
    for (raw_key, raw_value) in engine.iter() {
        saver.row(&raw_key, &raw_value)?;
    }

    let io = saver.io;
    io.write(&[OP_EOF])?;
    let checksum = io.checksum();
    io.write(&checksum.to_le_bytes())?;
    io.flush()
}

struct Saver<'a> {
    io: &'a mut SnapshotIo,
    engine: &'a StorageEngine,
    config: &'a SnapshotConfig,
    last_db: Option<DatabaseIndex>,
    current_key: Option<Vec<u8>>,
}

impl<'a> Saver<'a> {
    fn row(&mut self, raw_key: &[u8], raw_value: &[u8]) -> Result<()> {
        let row = RowKey::decode(raw_key)?;
        if row.db == self.config.reserved_db {
            return Err(CinnabarError::Internal(
                "reserved database row reached the dump cursor".to_string(),
            ));
        }
        if self.last_db != Some(row.db) {
            self.io.write(&[OP_SELECTDB])?;
            write_len(self.io, row.db)?;
            self.last_db = Some(row.db);
            self.current_key = None;
        }

        match row.kind {
            RowKind::KeyMeta => self.meta_row(&row, raw_value),
            RowKind::ListElement => {
                self.enter_key(&row, TYPE_LIST)?;
                match RowValue::decode(raw_value)? {
                    RowValue::ListElement(element) => write_string(self.io, &element, self.config),
                    _ => Err(StorageError::CorruptRow("list element row".to_string()).into()),
                }
            }
            RowKind::SetElement => {
                self.enter_key(&row, TYPE_SET)?;
                write_string(self.io, &row.extra, self.config)
            }
            RowKind::ZSetScore => {
                self.enter_key(&row, TYPE_ZSET)?;
                write_string(self.io, &row.extra, self.config)?;
                match RowValue::decode(raw_value)? {
                    RowValue::ZSetScore(score) => write_double(self.io, score),
                    _ => Err(StorageError::CorruptRow("zset element row".to_string()).into()),
                }
            }
            RowKind::HashField => {
                self.enter_key(&row, TYPE_HASH)?;
                write_string(self.io, &row.extra, self.config)?;
                match RowValue::decode(raw_value)? {
                    RowValue::HashValue(value) => write_string(self.io, &value, self.config),
                    _ => Err(StorageError::CorruptRow("hash element row".to_string()).into()),
                }
            }
            // No legacy object type exists for bitsets
            RowKind::BitsetElement => Ok(()),
        }
    }

    fn meta_row(&mut self, row: &RowKey, raw_value: &[u8]) -> Result<()> {
        let value = RowValue::decode(raw_value)?;
        match value {
            RowValue::StringMeta { ttl_ms, value } => {
                self.key_header(row, ttl_ms, TYPE_STRING)?;
                write_string(self.io, &value, self.config)?;
                self.current_key = Some(row.key.clone());
            }
            RowValue::ListMeta { ttl_ms, body } => {
                if let ContainerBody::PackedList(items) = body {
                    self.key_header(row, ttl_ms, TYPE_LIST)?;
                    write_len(self.io, items.len() as u32)?;
                    for item in &items {
                        write_string(self.io, item, self.config)?;
                    }
                    self.current_key = Some(row.key.clone());
                }
                // Split lists are written from their element rows
            }
            RowValue::SetMeta { ttl_ms, body } => {
                if let ContainerBody::PackedSet(items) = body {
                    self.key_header(row, ttl_ms, TYPE_SET)?;
                    write_len(self.io, items.len() as u32)?;
                    for item in &items {
                        write_string(self.io, item, self.config)?;
                    }
                    self.current_key = Some(row.key.clone());
                }
            }
            RowValue::ZSetMeta { ttl_ms, body } => {
                if let ContainerBody::PackedZSet(items) = body {
                    self.key_header(row, ttl_ms, TYPE_ZSET)?;
                    write_len(self.io, items.len() as u32)?;
                    for (member, score) in &items {
                        write_string(self.io, member, self.config)?;
                        write_double(self.io, *score)?;
                    }
                    self.current_key = Some(row.key.clone());
                }
            }
            RowValue::HashMeta { ttl_ms, body } => {
                if let ContainerBody::PackedHash(items) = body {
                    self.key_header(row, ttl_ms, TYPE_HASH)?;
                    write_len(self.io, items.len() as u32)?;
                    for (field, value) in &items {
                        write_string(self.io, field, self.config)?;
                        write_string(self.io, value, self.config)?;
                    }
                    self.current_key = Some(row.key.clone());
                }
            }
            // Bitsets have no dump representation in this dialect
            RowValue::BitsetMeta { .. } => {}
            _ => {
                return Err(
                    StorageError::CorruptRow("element value under a meta key".to_string()).into()
                )
            }
        }
        Ok(())
    }

    /// On the first element row of a logical key, emit its TTL, type byte,
    /// name and element count.
    fn enter_key(&mut self, row: &RowKey, object_type: u8) -> Result<()> {
        if self.current_key.as_deref() == Some(row.key.as_slice()) {
            return Ok(());
        }
        let count = match object_type {
            TYPE_LIST => self.engine.list_len(row.db, &row.key)?,
            TYPE_SET => self.engine.set_len(row.db, &row.key)?,
            TYPE_ZSET => self.engine.zset_len(row.db, &row.key)?,
            _ => self.engine.hash_len(row.db, &row.key)?,
        };
        if count == 0 {
            // An element row with no live meta means the cursor broke the
            // meta-first contract
            return Err(StorageError::CursorOrder(format!(
                "element row before meta for key {:?}",
                String::from_utf8_lossy(&row.key)
            ))
            .into());
        }
        let ttl_ms = self.engine.generic_ttl(row.db, &row.key)?;
        self.key_header(row, ttl_ms, object_type)?;
        write_len(self.io, count as u32)?;
        self.current_key = Some(row.key.clone());
        Ok(())
    }

    fn key_header(&mut self, row: &RowKey, ttl_ms: u64, object_type: u8) -> Result<()> {
        if ttl_ms > 0 {
            self.io.write(&[OP_EXPIRETIME_MS])?;
            write_millis_time(self.io, ttl_ms)?;
        }
        self.io.write(&[object_type])?;
        write_string(self.io, &row.key, self.config)
    }
}

// ---- Primitive codec ----

fn read_byte(io: &mut SnapshotIo) -> Result<u8> {
    let mut buf = [0u8; 1];
    io.read_into(&mut buf, true)?;
    Ok(buf[0])
}

fn read_len(io: &mut SnapshotIo) -> Result<Len> {
    let first = read_byte(io)?;
    match first >> 6 {
        0 => Ok(Len::Plain((first & 0x3F) as u32)),
        1 => {
            let second = read_byte(io)?;
            Ok(Len::Plain((((first & 0x3F) as u32) << 8) | second as u32))
        }
        2 => {
            let mut buf = [0u8; 4];
            io.read_into(&mut buf, true)?;
            Ok(Len::Plain(u32::from_be_bytes(buf)))
        }
        _ => Ok(Len::Encoded(first & 0x3F)),
    }
}

fn read_plain_len(io: &mut SnapshotIo) -> Result<u32> {
    match read_len(io)? {
        Len::Plain(len) => Ok(len),
        Len::Encoded(tag) => {
            Err(SnapshotError::Format(format!("unexpected string encoding {}", tag)).into())
        }
    }
}

fn write_len(io: &mut SnapshotIo, len: u32) -> Result<()> {
    if len < (1 << 6) {
        io.write(&[len as u8])
    } else if len < (1 << 14) {
        io.write(&[((len >> 8) as u8) | 0x40, len as u8])
    } else {
        io.write(&[0x80])?;
        io.write(&len.to_be_bytes())
    }
}

fn read_string(io: &mut SnapshotIo) -> Result<Vec<u8>> {
    match read_len(io)? {
        Len::Encoded(tag) => match tag {
            ENC_INT8 | ENC_INT16 | ENC_INT32 => {
                // Integer-squeezed strings surface as decimal text
                Ok(read_integer(io, tag)?.to_string().into_bytes())
            }
            ENC_LZF => read_lzf_string(io),
            other => {
                Err(SnapshotError::Format(format!("unknown string encoding {}", other)).into())
            }
        },
        Len::Plain(len) => {
            let mut buf = vec![0u8; len as usize];
            if len > 0 {
                io.read_into(&mut buf, true)?;
            }
            Ok(buf)
        }
    }
}

fn read_integer(io: &mut SnapshotIo, tag: u8) -> Result<i64> {
    match tag {
        ENC_INT8 => {
            let mut buf = [0u8; 1];
            io.read_into(&mut buf, true)?;
            Ok(buf[0] as i8 as i64)
        }
        ENC_INT16 => {
            let mut buf = [0u8; 2];
            io.read_into(&mut buf, true)?;
            Ok(i16::from_le_bytes(buf) as i64)
        }
        _ => {
            let mut buf = [0u8; 4];
            io.read_into(&mut buf, true)?;
            Ok(i32::from_le_bytes(buf) as i64)
        }
    }
}

fn read_lzf_string(io: &mut SnapshotIo) -> Result<Vec<u8>> {
    let compressed_len = read_plain_len(io)? as usize;
    let raw_len = read_plain_len(io)? as usize;
    let mut compressed = vec![0u8; compressed_len];
    io.read_into(&mut compressed, true)?;
    super::lzf::decompress(&compressed, raw_len)
        .ok_or_else(|| SnapshotError::Compression("bad LZF stream".to_string()).into())
}

/// Write a string as `[len][data]`, preferring the integer-squeezed form for
/// short numeric text and the LZF form for large compressible values.
fn write_string(io: &mut SnapshotIo, s: &[u8], config: &SnapshotConfig) -> Result<()> {
    if !s.is_empty() && s.len() <= 11 {
        if let Some(encoded) = try_integer_encoding(s) {
            return io.write(&encoded);
        }
    }

    // Below ~20 bytes even pure runs don't pay for the LZF framing
    if config.compress_strings && s.len() > 20 {
        if write_lzf_string(io, s)? {
            return Ok(());
        }
    }

    write_len(io, s.len() as u32)?;
    if !s.is_empty() {
        io.write(s)?;
    }
    Ok(())
}

/// Numeric text that round-trips exactly is stored as a 1/2/4-byte
/// little-endian integer behind an encoding discriminator.
fn try_integer_encoding(s: &[u8]) -> Option<Vec<u8>> {
    let text = std::str::from_utf8(s).ok()?;
    let value: i64 = text.parse().ok()?;
    if value.to_string() != text {
        return None;
    }
    encode_integer(value)
}

fn encode_integer(value: i64) -> Option<Vec<u8>> {
    if (i8::MIN as i64..=i8::MAX as i64).contains(&value) {
        Some(vec![0xC0 | ENC_INT8, value as u8])
    } else if (i16::MIN as i64..=i16::MAX as i64).contains(&value) {
        let bytes = (value as i16).to_le_bytes();
        Some(vec![0xC0 | ENC_INT16, bytes[0], bytes[1]])
    } else if (i32::MIN as i64..=i32::MAX as i64).contains(&value) {
        let bytes = (value as i32).to_le_bytes();
        Some(vec![0xC0 | ENC_INT32, bytes[0], bytes[1], bytes[2], bytes[3]])
    } else {
        None
    }
}

/// Returns false when the data did not compress enough to be worth storing.
fn write_lzf_string(io: &mut SnapshotIo, s: &[u8]) -> Result<bool> {
    if s.len() <= 4 {
        return Ok(false);
    }
    let compressed = match super::lzf::compress(s, s.len() - 4) {
        Some(out) => out,
        None => return Ok(false),
    };
    io.write(&[0xC0 | ENC_LZF])?;
    write_len(io, compressed.len() as u32)?;
    write_len(io, s.len() as u32)?;
    io.write(&compressed)?;
    Ok(true)
}

fn read_double(io: &mut SnapshotIo) -> Result<f64> {
    let len = read_byte(io)?;
    match len {
        255 => Ok(f64::NEG_INFINITY),
        254 => Ok(f64::INFINITY),
        253 => Ok(f64::NAN),
        n => {
            let mut buf = vec![0u8; n as usize];
            io.read_into(&mut buf, true)?;
            std::str::from_utf8(&buf)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| SnapshotError::Format("unreadable double text".to_string()).into())
        }
    }
}

/// One length byte, then the textual representation: integer text for safe
/// whole numbers, 17-significant-digit text otherwise. 255/254/253 mark
/// −∞/+∞/NaN.
fn write_double(io: &mut SnapshotIo, value: f64) -> Result<()> {
    if value.is_nan() {
        return io.write(&[253]);
    }
    if value.is_infinite() {
        return io.write(&[if value < 0.0 { 255 } else { 254 }]);
    }

    // The whole-number fast path is only exact on IEEE-754 binary64
    assert_eq!(f64::MANTISSA_DIGITS, 53);
    let text = if value > -4_503_599_627_370_495.0
        && value < 4_503_599_627_370_496.0
        && value == (value as i64) as f64
    {
        (value as i64).to_string()
    } else {
        format_g17(value)
    };
    io.write(&[text.len() as u8])?;
    io.write(text.as_bytes())
}

/// `%.17g`-equivalent formatting: 17 significant digits, trailing zeros
/// stripped, exponent notation outside the fixed-point range.
fn format_g17(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    let exp_form = format!("{:.16e}", value);
    let (mantissa, exponent) = match exp_form.split_once('e') {
        Some(parts) => parts,
        None => return exp_form,
    };
    let exp: i32 = exponent.parse().unwrap_or(0);
    if !(-4..17).contains(&exp) {
        let mantissa = mantissa.trim_end_matches('0').trim_end_matches('.');
        format!("{}e{}{:02}", mantissa, if exp < 0 { '-' } else { '+' }, exp.abs())
    } else {
        let decimals = (16 - exp).max(0) as usize;
        let fixed = format!("{:.*}", decimals, value);
        if fixed.contains('.') {
            fixed.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            fixed
        }
    }
}

fn read_seconds_time(io: &mut SnapshotIo) -> Result<u64> {
    let mut buf = [0u8; 4];
    io.read_into(&mut buf, true)?;
    Ok(u32::from_le_bytes(buf) as u64)
}

fn read_millis_time(io: &mut SnapshotIo) -> Result<u64> {
    let mut buf = [0u8; 8];
    io.read_into(&mut buf, true)?;
    Ok(u64::from_le_bytes(buf))
}

fn write_millis_time(io: &mut SnapshotIo, ts: u64) -> Result<()> {
    io.write(&ts.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_then_read<W, R, T>(write: W, read: R) -> T
    where
        W: FnOnce(&mut SnapshotIo),
        R: FnOnce(&mut SnapshotIo) -> T,
    {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("codec.bin");
        let mut io = SnapshotIo::new();
        io.open_write(&path).unwrap();
        write(&mut io);
        io.close().unwrap();
        let mut io = SnapshotIo::new();
        io.open_read(&path).unwrap();
        read(&mut io)
    }

    #[test]
    fn test_len_round_trip() {
        for len in [0u32, 1, 63, 64, 16383, 16384, 1_000_000, u32::MAX] {
            let decoded = write_then_read(
                |io| write_len(io, len).unwrap(),
                |io| read_plain_len(io).unwrap(),
            );
            assert_eq!(decoded, len);
        }
    }

    #[test]
    fn test_len_wire_widths() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("len.bin");
        let mut io = SnapshotIo::new();
        io.open_write(&path).unwrap();
        write_len(&mut io, 5).unwrap();
        write_len(&mut io, 300).unwrap();
        write_len(&mut io, 70_000).unwrap();
        io.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        // 6-bit, then 14-bit big-endian, then marker + 32-bit big-endian
        assert_eq!(bytes[0], 5);
        assert_eq!(&bytes[1..3], &[0x41, 0x2C]);
        assert_eq!(bytes[3], 0x80);
        assert_eq!(&bytes[4..8], &70_000u32.to_be_bytes());
    }

    #[test]
    fn test_integer_encoding_widths() {
        assert_eq!(try_integer_encoding(b"5").unwrap(), vec![0xC0, 5]);
        assert_eq!(try_integer_encoding(b"-128").unwrap(), vec![0xC0, 0x80]);
        assert_eq!(try_integer_encoding(b"12345").unwrap(), vec![0xC1, 0x39, 0x30]);
        assert_eq!(
            try_integer_encoding(b"70000").unwrap(),
            vec![0xC2, 0x70, 0x11, 0x01, 0x00]
        );
        // Not canonical decimal text, or out of 32-bit range
        assert!(try_integer_encoding(b"007").is_none());
        assert!(try_integer_encoding(b"+7").is_none());
        assert!(try_integer_encoding(b"hello").is_none());
        assert!(try_integer_encoding(b"99999999999").is_none());
    }

    #[test]
    fn test_string_round_trip_plain_and_int() {
        let config = SnapshotConfig::default();
        for value in [&b"hello"[..], &b""[..], &b"12345"[..], &b"-42"[..], &b"70000"[..], &b"007"[..]] {
            let config = config.clone();
            let decoded = write_then_read(
                move |io| write_string(io, value, &config).unwrap(),
                |io| read_string(io).unwrap(),
            );
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn test_string_round_trip_lzf() {
        let config = SnapshotConfig::default();
        let value = vec![b'a'; 64];
        let cloned = value.clone();
        let config2 = config.clone();
        let decoded = write_then_read(
            move |io| write_string(io, &cloned, &config2).unwrap(),
            |io| read_string(io).unwrap(),
        );
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_compressible_string_picks_lzf_form() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lzf.bin");
        let mut io = SnapshotIo::new();
        io.open_write(&path).unwrap();
        write_string(&mut io, &[b'a'; 64], &SnapshotConfig::default()).unwrap();
        io.close().unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes[0], 0xC3);
    }

    #[test]
    fn test_compression_can_be_disabled() {
        let config = SnapshotConfig { compress_strings: false, ..Default::default() };
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("raw.bin");
        let mut io = SnapshotIo::new();
        io.open_write(&path).unwrap();
        write_string(&mut io, &[b'a'; 64], &config).unwrap();
        io.close().unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes[0], 0x40); // 14-bit length, not an encoding marker
    }

    #[test]
    fn test_double_round_trip() {
        for value in [0.0, 1.0, -1.0, 3.14, -2.5e-7, 1e100, 9007199254740992.0] {
            let decoded = write_then_read(
                move |io| write_double(io, value).unwrap(),
                |io| read_double(io).unwrap(),
            );
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn test_double_specials() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dbl.bin");
        let mut io = SnapshotIo::new();
        io.open_write(&path).unwrap();
        write_double(&mut io, f64::NEG_INFINITY).unwrap();
        write_double(&mut io, f64::INFINITY).unwrap();
        write_double(&mut io, f64::NAN).unwrap();
        io.close().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![255, 254, 253]);

        let mut io = SnapshotIo::new();
        io.open_read(&path).unwrap();
        assert_eq!(read_double(&mut io).unwrap(), f64::NEG_INFINITY);
        assert_eq!(read_double(&mut io).unwrap(), f64::INFINITY);
        assert!(read_double(&mut io).unwrap().is_nan());
    }

    #[test]
    fn test_format_g17() {
        assert_eq!(format_g17(0.5), "0.5");
        assert_eq!(format_g17(3.14), "3.1400000000000001");
        assert_eq!(format_g17(1e100), "1e+100");
        assert_eq!(format_g17(1.5e-7), "1.4999999999999999e-07");
        assert_eq!(format_g17(-0.25), "-0.25");
    }

    #[test]
    fn test_whole_numbers_use_integer_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("whole.bin");
        let mut io = SnapshotIo::new();
        io.open_write(&path).unwrap();
        write_double(&mut io, 42.0).unwrap();
        io.close().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![2, b'4', b'2']);
    }
}
