//! Row key/value codec for the ordered keyspace
//!
//! Every entry in the engine is one `(raw_key, raw_value)` row. The raw key
//! byte layout is chosen so that plain byte order over the encoded form gives
//! the cursor contract the savers rely on: all rows of one `(db, key)` pair
//! are contiguous and the meta row sorts first.
//!
//! Raw key layout:
//!
//! ```text
//! | db: u32 BE | key_len: u32 BE | key bytes | kind: u8 | extra bytes |
//! ```
//!
//! `extra` is the element discriminator: a `u64 BE` index for list elements,
//! the member bytes for set/zset elements, the field bytes for hash fields.

use crate::error::{Result, StorageError};

/// Kind discriminator of a row, ordered so the meta row sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RowKind {
    /// Per-key metadata (type, TTL, packed payload or element count)
    KeyMeta = 0,
    ListElement = 1,
    SetElement = 2,
    ZSetScore = 3,
    HashField = 4,
    BitsetElement = 5,
}

impl RowKind {
    fn from_u8(b: u8) -> Result<Self> {
        Ok(match b {
            0 => RowKind::KeyMeta,
            1 => RowKind::ListElement,
            2 => RowKind::SetElement,
            3 => RowKind::ZSetScore,
            4 => RowKind::HashField,
            5 => RowKind::BitsetElement,
            other => {
                return Err(StorageError::CorruptRow(format!("unknown row kind {}", other)).into())
            }
        })
    }
}

/// A decoded row key
#[derive(Debug, Clone, PartialEq)]
pub struct RowKey {
    pub db: u32,
    pub key: Vec<u8>,
    pub kind: RowKind,
    /// Element discriminator bytes (empty for meta rows)
    pub extra: Vec<u8>,
}

impl RowKey {
    pub fn meta(db: u32, key: &[u8]) -> Self {
        RowKey { db, key: key.to_vec(), kind: RowKind::KeyMeta, extra: Vec::new() }
    }

    pub fn element(db: u32, key: &[u8], kind: RowKind, extra: &[u8]) -> Self {
        RowKey { db, key: key.to_vec(), kind, extra: extra.to_vec() }
    }

    pub fn list_element(db: u32, key: &[u8], index: u64) -> Self {
        Self::element(db, key, RowKind::ListElement, &index.to_be_bytes())
    }

    /// List element index, when this is a list element row.
    pub fn list_index(&self) -> Result<u64> {
        if self.kind != RowKind::ListElement || self.extra.len() != 8 {
            return Err(StorageError::CorruptRow("not a list element row".to_string()).into());
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.extra);
        Ok(u64::from_be_bytes(buf))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9 + self.key.len() + self.extra.len());
        out.extend_from_slice(&self.db.to_be_bytes());
        out.extend_from_slice(&(self.key.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.key);
        out.push(self.kind as u8);
        out.extend_from_slice(&self.extra);
        out
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < 9 {
            return Err(StorageError::CorruptRow("row key too short".to_string()).into());
        }
        let db = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let klen = u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]) as usize;
        if raw.len() < 9 + klen {
            return Err(StorageError::CorruptRow("row key length overflow".to_string()).into());
        }
        let key = raw[8..8 + klen].to_vec();
        let kind = RowKind::from_u8(raw[8 + klen])?;
        let extra = raw[9 + klen..].to_vec();
        Ok(RowKey { db, key, kind, extra })
    }

    /// Common prefix of every row belonging to `(db, key)`.
    pub fn prefix(db: u32, key: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + key.len());
        out.extend_from_slice(&db.to_be_bytes());
        out.extend_from_slice(&(key.len() as u32).to_be_bytes());
        out.extend_from_slice(key);
        out
    }
}

/// Engine-side representation of a container.
///
/// Small containers keep their elements inline in the meta row (`Packed`);
/// large ones keep only the element count and spill elements into their own
/// rows (`Split`).
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerBody {
    Split { count: u64 },
    PackedList(Vec<Vec<u8>>),
    PackedSet(Vec<Vec<u8>>),
    PackedZSet(Vec<(Vec<u8>, f64)>),
    PackedHash(Vec<(Vec<u8>, Vec<u8>)>),
}

impl ContainerBody {
    pub fn count(&self) -> u64 {
        match self {
            ContainerBody::Split { count } => *count,
            ContainerBody::PackedList(v) => v.len() as u64,
            ContainerBody::PackedSet(v) => v.len() as u64,
            ContainerBody::PackedZSet(v) => v.len() as u64,
            ContainerBody::PackedHash(v) => v.len() as u64,
        }
    }

    pub fn is_packed(&self) -> bool {
        !matches!(self, ContainerBody::Split { .. })
    }
}

/// A decoded row value
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    /// String key: absolute expiry in ms (0 = none) and the value bytes
    StringMeta { ttl_ms: u64, value: Vec<u8> },
    ListMeta { ttl_ms: u64, body: ContainerBody },
    SetMeta { ttl_ms: u64, body: ContainerBody },
    ZSetMeta { ttl_ms: u64, body: ContainerBody },
    HashMeta { ttl_ms: u64, body: ContainerBody },
    BitsetMeta { ttl_ms: u64, body: ContainerBody },
    /// One list entry; the index lives in the row key
    ListElement(Vec<u8>),
    /// Set member rows carry the member in the row key
    SetElement,
    /// Score for the zset member named in the row key
    ZSetScore(f64),
    /// Value for the hash field named in the row key
    HashValue(Vec<u8>),
    /// Raw bitset fragment
    BitsetFragment(Vec<u8>),
}

const VAL_STRING_META: u8 = 0;
const VAL_LIST_META: u8 = 1;
const VAL_SET_META: u8 = 2;
const VAL_ZSET_META: u8 = 3;
const VAL_HASH_META: u8 = 4;
const VAL_BITSET_META: u8 = 5;
const VAL_LIST_ELEMENT: u8 = 6;
const VAL_SET_ELEMENT: u8 = 7;
const VAL_ZSET_SCORE: u8 = 8;
const VAL_HASH_VALUE: u8 = 9;
const VAL_BITSET_FRAGMENT: u8 = 10;

const BODY_SPLIT: u8 = 0;
const BODY_PACKED: u8 = 1;

impl RowValue {
    /// Absolute expiry for meta rows, 0 for element rows.
    pub fn ttl_ms(&self) -> u64 {
        match self {
            RowValue::StringMeta { ttl_ms, .. }
            | RowValue::ListMeta { ttl_ms, .. }
            | RowValue::SetMeta { ttl_ms, .. }
            | RowValue::ZSetMeta { ttl_ms, .. }
            | RowValue::HashMeta { ttl_ms, .. }
            | RowValue::BitsetMeta { ttl_ms, .. } => *ttl_ms,
            _ => 0,
        }
    }

    /// Rewrite the expiry of a meta row in place.
    pub fn set_ttl_ms(&mut self, ttl: u64) {
        match self {
            RowValue::StringMeta { ttl_ms, .. }
            | RowValue::ListMeta { ttl_ms, .. }
            | RowValue::SetMeta { ttl_ms, .. }
            | RowValue::ZSetMeta { ttl_ms, .. }
            | RowValue::HashMeta { ttl_ms, .. }
            | RowValue::BitsetMeta { ttl_ms, .. } => *ttl_ms = ttl,
            _ => {}
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            RowValue::StringMeta { ttl_ms, value } => {
                out.push(VAL_STRING_META);
                out.extend_from_slice(&ttl_ms.to_le_bytes());
                write_slice(&mut out, value);
            }
            RowValue::ListMeta { ttl_ms, body } => {
                out.push(VAL_LIST_META);
                out.extend_from_slice(&ttl_ms.to_le_bytes());
                encode_body(&mut out, body);
            }
            RowValue::SetMeta { ttl_ms, body } => {
                out.push(VAL_SET_META);
                out.extend_from_slice(&ttl_ms.to_le_bytes());
                encode_body(&mut out, body);
            }
            RowValue::ZSetMeta { ttl_ms, body } => {
                out.push(VAL_ZSET_META);
                out.extend_from_slice(&ttl_ms.to_le_bytes());
                encode_body(&mut out, body);
            }
            RowValue::HashMeta { ttl_ms, body } => {
                out.push(VAL_HASH_META);
                out.extend_from_slice(&ttl_ms.to_le_bytes());
                encode_body(&mut out, body);
            }
            RowValue::BitsetMeta { ttl_ms, body } => {
                out.push(VAL_BITSET_META);
                out.extend_from_slice(&ttl_ms.to_le_bytes());
                encode_body(&mut out, body);
            }
            RowValue::ListElement(v) => {
                out.push(VAL_LIST_ELEMENT);
                write_slice(&mut out, v);
            }
            RowValue::SetElement => out.push(VAL_SET_ELEMENT),
            RowValue::ZSetScore(score) => {
                out.push(VAL_ZSET_SCORE);
                out.extend_from_slice(&score.to_bits().to_le_bytes());
            }
            RowValue::HashValue(v) => {
                out.push(VAL_HASH_VALUE);
                write_slice(&mut out, v);
            }
            RowValue::BitsetFragment(v) => {
                out.push(VAL_BITSET_FRAGMENT);
                write_slice(&mut out, v);
            }
        }
        out
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(raw);
        let tag = cur.u8()?;
        let value = match tag {
            VAL_STRING_META => {
                let ttl_ms = cur.u64_le()?;
                let value = cur.slice()?;
                RowValue::StringMeta { ttl_ms, value }
            }
            VAL_LIST_META => RowValue::ListMeta {
                ttl_ms: cur.u64_le()?,
                body: decode_body(&mut cur, VAL_LIST_META)?,
            },
            VAL_SET_META => RowValue::SetMeta {
                ttl_ms: cur.u64_le()?,
                body: decode_body(&mut cur, VAL_SET_META)?,
            },
            VAL_ZSET_META => RowValue::ZSetMeta {
                ttl_ms: cur.u64_le()?,
                body: decode_body(&mut cur, VAL_ZSET_META)?,
            },
            VAL_HASH_META => RowValue::HashMeta {
                ttl_ms: cur.u64_le()?,
                body: decode_body(&mut cur, VAL_HASH_META)?,
            },
            VAL_BITSET_META => RowValue::BitsetMeta {
                ttl_ms: cur.u64_le()?,
                body: decode_body(&mut cur, VAL_BITSET_META)?,
            },
            VAL_LIST_ELEMENT => RowValue::ListElement(cur.slice()?),
            VAL_SET_ELEMENT => RowValue::SetElement,
            VAL_ZSET_SCORE => RowValue::ZSetScore(f64::from_bits(cur.u64_le()?)),
            VAL_HASH_VALUE => RowValue::HashValue(cur.slice()?),
            VAL_BITSET_FRAGMENT => RowValue::BitsetFragment(cur.slice()?),
            other => {
                return Err(
                    StorageError::CorruptRow(format!("unknown value tag {}", other)).into()
                )
            }
        };
        Ok(value)
    }
}

fn encode_body(out: &mut Vec<u8>, body: &ContainerBody) {
    match body {
        ContainerBody::Split { count } => {
            out.push(BODY_SPLIT);
            write_varint(out, *count);
        }
        ContainerBody::PackedList(items) => {
            out.push(BODY_PACKED);
            write_varint(out, items.len() as u64);
            for item in items {
                write_slice(out, item);
            }
        }
        ContainerBody::PackedSet(items) => {
            out.push(BODY_PACKED);
            write_varint(out, items.len() as u64);
            for item in items {
                write_slice(out, item);
            }
        }
        ContainerBody::PackedZSet(items) => {
            out.push(BODY_PACKED);
            write_varint(out, items.len() as u64);
            for (member, score) in items {
                write_slice(out, member);
                out.extend_from_slice(&score.to_bits().to_le_bytes());
            }
        }
        ContainerBody::PackedHash(items) => {
            out.push(BODY_PACKED);
            write_varint(out, items.len() as u64);
            for (field, value) in items {
                write_slice(out, field);
                write_slice(out, value);
            }
        }
    }
}

fn decode_body(cur: &mut Cursor<'_>, meta_tag: u8) -> Result<ContainerBody> {
    let enc = cur.u8()?;
    match enc {
        BODY_SPLIT => Ok(ContainerBody::Split { count: cur.varint()? }),
        BODY_PACKED => {
            let count = cur.varint()? as usize;
            match meta_tag {
                VAL_LIST_META | VAL_BITSET_META => {
                    let mut items = Vec::with_capacity(count);
                    for _ in 0..count {
                        items.push(cur.slice()?);
                    }
                    Ok(ContainerBody::PackedList(items))
                }
                VAL_SET_META => {
                    let mut items = Vec::with_capacity(count);
                    for _ in 0..count {
                        items.push(cur.slice()?);
                    }
                    Ok(ContainerBody::PackedSet(items))
                }
                VAL_ZSET_META => {
                    let mut items = Vec::with_capacity(count);
                    for _ in 0..count {
                        let member = cur.slice()?;
                        let score = f64::from_bits(cur.u64_le()?);
                        items.push((member, score));
                    }
                    Ok(ContainerBody::PackedZSet(items))
                }
                VAL_HASH_META => {
                    let mut items = Vec::with_capacity(count);
                    for _ in 0..count {
                        let field = cur.slice()?;
                        let value = cur.slice()?;
                        items.push((field, value));
                    }
                    Ok(ContainerBody::PackedHash(items))
                }
                _ => Err(StorageError::CorruptRow("packed body on non-container".to_string())
                    .into()),
            }
        }
        other => Err(StorageError::CorruptRow(format!("unknown body encoding {}", other)).into()),
    }
}

/// Append a LEB128 varint.
pub(crate) fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

/// Read a LEB128 varint from the front of `buf`, returning the value and the
/// number of bytes consumed.
pub(crate) fn read_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().enumerate() {
        if shift >= 64 {
            return None;
        }
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
    }
    None
}

fn write_slice(out: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

/// Minimal forward-only reader over a byte slice.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    fn u8(&mut self) -> Result<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| StorageError::CorruptRow("value truncated".to_string()))?;
        self.pos += 1;
        Ok(b)
    }

    fn u64_le(&mut self) -> Result<u64> {
        let end = self.pos + 8;
        if end > self.buf.len() {
            return Err(StorageError::CorruptRow("value truncated".to_string()).into());
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.buf[self.pos..end]);
        self.pos = end;
        Ok(u64::from_le_bytes(bytes))
    }

    fn varint(&mut self) -> Result<u64> {
        let (value, used) = read_varint(&self.buf[self.pos..])
            .ok_or_else(|| StorageError::CorruptRow("bad varint".to_string()))?;
        self.pos += used;
        Ok(value)
    }

    fn slice(&mut self) -> Result<Vec<u8>> {
        let len = self.varint()? as usize;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| StorageError::CorruptRow("value truncated".to_string()))?;
        let out = self.buf[self.pos..end].to_vec();
        self.pos = end;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_round_trip() {
        let key = RowKey::list_element(3, b"mylist", 42);
        let decoded = RowKey::decode(&key.encode()).unwrap();
        assert_eq!(decoded, key);
        assert_eq!(decoded.list_index().unwrap(), 42);
    }

    #[test]
    fn test_meta_sorts_before_elements() {
        let meta = RowKey::meta(0, b"k").encode();
        let element = RowKey::list_element(0, b"k", 0).encode();
        assert!(meta < element);
    }

    #[test]
    fn test_keys_group_by_database_then_key() {
        let a = RowKey::meta(0, b"zz").encode();
        let b = RowKey::meta(1, b"aa").encode();
        assert!(a < b);

        let k1_last = RowKey::element(0, b"k1", RowKind::HashField, b"\xff\xff").encode();
        let k2_meta = RowKey::meta(0, b"k2").encode();
        assert!(k1_last < k2_meta);
    }

    #[test]
    fn test_value_round_trip() {
        let values = vec![
            RowValue::StringMeta { ttl_ms: 9, value: b"hello".to_vec() },
            RowValue::ListMeta { ttl_ms: 0, body: ContainerBody::Split { count: 300 } },
            RowValue::ZSetMeta {
                ttl_ms: 1,
                body: ContainerBody::PackedZSet(vec![(b"m".to_vec(), 2.5)]),
            },
            RowValue::HashMeta {
                ttl_ms: 0,
                body: ContainerBody::PackedHash(vec![(b"f".to_vec(), b"v".to_vec())]),
            },
            RowValue::ListElement(b"item".to_vec()),
            RowValue::SetElement,
            RowValue::ZSetScore(-1.5),
            RowValue::HashValue(Vec::new()),
        ];
        for value in values {
            assert_eq!(RowValue::decode(&value.encode()).unwrap(), value);
        }
    }

    #[test]
    fn test_varint_round_trip() {
        for value in [0u64, 1, 127, 128, 16383, 16384, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            let (decoded, used) = read_varint(&buf).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(used, buf.len());
        }
    }
}
