//! In-memory ordered storage engine
//!
//! A single ordered keyspace over encoded rows (see [`super::keys`]) with the
//! typed insert/lookup operations the snapshot codecs drive. The encoding of
//! the row keys guarantees the cursor contract the savers depend on: rows are
//! ordered by database, then logical key, with the meta row first.
//!
//! Containers (lists, sets, sorted sets, hashes) start out packed inside
//! their meta row and spill into one-row-per-element form once they grow past
//! [`PACKED_MAX_ENTRIES`], so both engine-side encodings the legacy saver
//! handles occur naturally.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::error::{Result, StorageError};
use super::keys::{ContainerBody, RowKey, RowKind, RowValue};
use super::DatabaseIndex;

/// Containers larger than this spill out of the meta row.
pub const PACKED_MAX_ENTRIES: usize = 128;

/// Ordered key/value engine
pub struct StorageEngine {
    /// All rows of all logical databases, in encoded-key order
    rows: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

/// Forward cursor over a point-in-time copy of the keyspace
pub struct RowCursor {
    rows: std::vec::IntoIter<(Vec<u8>, Vec<u8>)>,
}

impl Iterator for RowCursor {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next()
    }
}

impl StorageEngine {
    /// Create a new empty engine
    pub fn new() -> Arc<Self> {
        Arc::new(StorageEngine { rows: RwLock::new(BTreeMap::new()) })
    }

    /// Ordered cursor over all rows starting at `start` (inclusive).
    ///
    /// The cursor iterates a point-in-time copy, so the caller may keep
    /// mutating the engine while draining it.
    pub fn iter_from(&self, start: &[u8]) -> RowCursor {
        let rows = self.rows.read().unwrap();
        let snapshot: Vec<(Vec<u8>, Vec<u8>)> = rows
            .range(start.to_vec()..)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        RowCursor { rows: snapshot.into_iter() }
    }

    /// Cursor over the whole keyspace.
    pub fn iter(&self) -> RowCursor {
        self.iter_from(&[])
    }

    /// Insert a pre-encoded row, bypassing the typed paths. Used by the
    /// native dialect's load.
    pub fn set_raw(&self, raw_key: &[u8], raw_value: &[u8]) -> Result<()> {
        let mut rows = self.rows.write().unwrap();
        rows.insert(raw_key.to_vec(), raw_value.to_vec());
        Ok(())
    }

    /// Set a string key, replacing any previous value of any type.
    pub fn generic_set(&self, db: DatabaseIndex, key: &[u8], value: &[u8]) -> Result<()> {
        let mut rows = self.rows.write().unwrap();
        Self::remove_key_rows(&mut rows, db, key);
        rows.insert(
            RowKey::meta(db, key).encode(),
            RowValue::StringMeta { ttl_ms: 0, value: value.to_vec() }.encode(),
        );
        Ok(())
    }

    /// Set an absolute expiry (wall-clock milliseconds) on an existing key.
    /// Returns false if the key does not exist. Past timestamps are stored
    /// as-is; the snapshot layer never filters them.
    pub fn generic_expire(&self, db: DatabaseIndex, key: &[u8], at_ms: u64) -> Result<bool> {
        let meta_key = RowKey::meta(db, key).encode();
        let mut rows = self.rows.write().unwrap();
        match rows.get(&meta_key) {
            Some(raw) => {
                let mut value = RowValue::decode(raw)?;
                value.set_ttl_ms(at_ms);
                rows.insert(meta_key, value.encode());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Absolute expiry of a key in milliseconds; 0 when the key has no TTL
    /// or does not exist.
    pub fn generic_ttl(&self, db: DatabaseIndex, key: &[u8]) -> Result<u64> {
        match self.meta(db, key)? {
            Some(value) => Ok(value.ttl_ms()),
            None => Ok(0),
        }
    }

    /// Delete a key and all of its element rows. Returns true if anything
    /// was removed.
    pub fn delete_key(&self, db: DatabaseIndex, key: &[u8]) -> Result<bool> {
        let mut rows = self.rows.write().unwrap();
        Ok(Self::remove_key_rows(&mut rows, db, key))
    }

    /// Append a value to the tail of a list.
    pub fn list_insert(&self, db: DatabaseIndex, key: &[u8], value: &[u8]) -> Result<()> {
        let meta_key = RowKey::meta(db, key).encode();
        let mut rows = self.rows.write().unwrap();
        let meta = Self::decode_meta(rows.get(&meta_key))?;
        match meta {
            None => {
                let body = ContainerBody::PackedList(vec![value.to_vec()]);
                rows.insert(meta_key, RowValue::ListMeta { ttl_ms: 0, body }.encode());
            }
            Some(RowValue::ListMeta { ttl_ms, body }) => match body {
                ContainerBody::PackedList(mut items) if items.len() < PACKED_MAX_ENTRIES => {
                    items.push(value.to_vec());
                    let body = ContainerBody::PackedList(items);
                    rows.insert(meta_key, RowValue::ListMeta { ttl_ms, body }.encode());
                }
                ContainerBody::PackedList(items) => {
                    // Spill, then append as a row
                    for (idx, item) in items.iter().enumerate() {
                        rows.insert(
                            RowKey::list_element(db, key, idx as u64).encode(),
                            RowValue::ListElement(item.clone()).encode(),
                        );
                    }
                    let next = items.len() as u64;
                    rows.insert(
                        RowKey::list_element(db, key, next).encode(),
                        RowValue::ListElement(value.to_vec()).encode(),
                    );
                    let body = ContainerBody::Split { count: next + 1 };
                    rows.insert(meta_key, RowValue::ListMeta { ttl_ms, body }.encode());
                }
                ContainerBody::Split { count } => {
                    rows.insert(
                        RowKey::list_element(db, key, count).encode(),
                        RowValue::ListElement(value.to_vec()).encode(),
                    );
                    let body = ContainerBody::Split { count: count + 1 };
                    rows.insert(meta_key, RowValue::ListMeta { ttl_ms, body }.encode());
                }
                _ => return Err(StorageError::CorruptRow("list meta body".to_string()).into()),
            },
            Some(_) => return Err(StorageError::WrongType.into()),
        }
        Ok(())
    }

    /// Number of elements in a list; 0 when absent.
    pub fn list_len(&self, db: DatabaseIndex, key: &[u8]) -> Result<u64> {
        match self.meta(db, key)? {
            Some(RowValue::ListMeta { body, .. }) => Ok(body.count()),
            Some(_) => Err(StorageError::WrongType.into()),
            None => Ok(0),
        }
    }

    /// Add a member to a set. Returns true when the member is new.
    pub fn set_add(&self, db: DatabaseIndex, key: &[u8], member: &[u8]) -> Result<bool> {
        let meta_key = RowKey::meta(db, key).encode();
        let mut rows = self.rows.write().unwrap();
        let meta = Self::decode_meta(rows.get(&meta_key))?;
        match meta {
            None => {
                let body = ContainerBody::PackedSet(vec![member.to_vec()]);
                rows.insert(meta_key, RowValue::SetMeta { ttl_ms: 0, body }.encode());
                Ok(true)
            }
            Some(RowValue::SetMeta { ttl_ms, body }) => match body {
                ContainerBody::PackedSet(mut items) => {
                    match items.binary_search_by(|m| m.as_slice().cmp(member)) {
                        Ok(_) => Ok(false),
                        Err(pos) if items.len() < PACKED_MAX_ENTRIES => {
                            items.insert(pos, member.to_vec());
                            let body = ContainerBody::PackedSet(items);
                            rows.insert(meta_key, RowValue::SetMeta { ttl_ms, body }.encode());
                            Ok(true)
                        }
                        Err(_) => {
                            for item in &items {
                                rows.insert(
                                    RowKey::element(db, key, RowKind::SetElement, item).encode(),
                                    RowValue::SetElement.encode(),
                                );
                            }
                            rows.insert(
                                RowKey::element(db, key, RowKind::SetElement, member).encode(),
                                RowValue::SetElement.encode(),
                            );
                            let body = ContainerBody::Split { count: items.len() as u64 + 1 };
                            rows.insert(meta_key, RowValue::SetMeta { ttl_ms, body }.encode());
                            Ok(true)
                        }
                    }
                }
                ContainerBody::Split { count } => {
                    let element_key = RowKey::element(db, key, RowKind::SetElement, member).encode();
                    if rows.contains_key(&element_key) {
                        return Ok(false);
                    }
                    rows.insert(element_key, RowValue::SetElement.encode());
                    let body = ContainerBody::Split { count: count + 1 };
                    rows.insert(meta_key, RowValue::SetMeta { ttl_ms, body }.encode());
                    Ok(true)
                }
                _ => Err(StorageError::CorruptRow("set meta body".to_string()).into()),
            },
            Some(_) => Err(StorageError::WrongType.into()),
        }
    }

    /// Number of members in a set; 0 when absent.
    pub fn set_len(&self, db: DatabaseIndex, key: &[u8]) -> Result<u64> {
        match self.meta(db, key)? {
            Some(RowValue::SetMeta { body, .. }) => Ok(body.count()),
            Some(_) => Err(StorageError::WrongType.into()),
            None => Ok(0),
        }
    }

    /// Add a member with a score to a sorted set. Returns true when the
    /// member is new (score updates return false).
    pub fn zset_add(&self, db: DatabaseIndex, key: &[u8], member: &[u8], score: f64) -> Result<bool> {
        let meta_key = RowKey::meta(db, key).encode();
        let mut rows = self.rows.write().unwrap();
        let meta = Self::decode_meta(rows.get(&meta_key))?;
        match meta {
            None => {
                let body = ContainerBody::PackedZSet(vec![(member.to_vec(), score)]);
                rows.insert(meta_key, RowValue::ZSetMeta { ttl_ms: 0, body }.encode());
                Ok(true)
            }
            Some(RowValue::ZSetMeta { ttl_ms, body }) => match body {
                ContainerBody::PackedZSet(mut items) => {
                    match items.binary_search_by(|(m, _)| m.as_slice().cmp(member)) {
                        Ok(pos) => {
                            items[pos].1 = score;
                            let body = ContainerBody::PackedZSet(items);
                            rows.insert(meta_key, RowValue::ZSetMeta { ttl_ms, body }.encode());
                            Ok(false)
                        }
                        Err(pos) if items.len() < PACKED_MAX_ENTRIES => {
                            items.insert(pos, (member.to_vec(), score));
                            let body = ContainerBody::PackedZSet(items);
                            rows.insert(meta_key, RowValue::ZSetMeta { ttl_ms, body }.encode());
                            Ok(true)
                        }
                        Err(_) => {
                            for (m, s) in &items {
                                rows.insert(
                                    RowKey::element(db, key, RowKind::ZSetScore, m).encode(),
                                    RowValue::ZSetScore(*s).encode(),
                                );
                            }
                            rows.insert(
                                RowKey::element(db, key, RowKind::ZSetScore, member).encode(),
                                RowValue::ZSetScore(score).encode(),
                            );
                            let body = ContainerBody::Split { count: items.len() as u64 + 1 };
                            rows.insert(meta_key, RowValue::ZSetMeta { ttl_ms, body }.encode());
                            Ok(true)
                        }
                    }
                }
                ContainerBody::Split { count } => {
                    let element_key = RowKey::element(db, key, RowKind::ZSetScore, member).encode();
                    let is_new = !rows.contains_key(&element_key);
                    rows.insert(element_key, RowValue::ZSetScore(score).encode());
                    if is_new {
                        let body = ContainerBody::Split { count: count + 1 };
                        rows.insert(meta_key, RowValue::ZSetMeta { ttl_ms, body }.encode());
                    }
                    Ok(is_new)
                }
                _ => Err(StorageError::CorruptRow("zset meta body".to_string()).into()),
            },
            Some(_) => Err(StorageError::WrongType.into()),
        }
    }

    /// Number of members in a sorted set; 0 when absent.
    pub fn zset_len(&self, db: DatabaseIndex, key: &[u8]) -> Result<u64> {
        match self.meta(db, key)? {
            Some(RowValue::ZSetMeta { body, .. }) => Ok(body.count()),
            Some(_) => Err(StorageError::WrongType.into()),
            None => Ok(0),
        }
    }

    /// Set a hash field. Returns true when the field is new.
    pub fn hash_set(&self, db: DatabaseIndex, key: &[u8], field: &[u8], value: &[u8]) -> Result<bool> {
        let meta_key = RowKey::meta(db, key).encode();
        let mut rows = self.rows.write().unwrap();
        let meta = Self::decode_meta(rows.get(&meta_key))?;
        match meta {
            None => {
                let body = ContainerBody::PackedHash(vec![(field.to_vec(), value.to_vec())]);
                rows.insert(meta_key, RowValue::HashMeta { ttl_ms: 0, body }.encode());
                Ok(true)
            }
            Some(RowValue::HashMeta { ttl_ms, body }) => match body {
                ContainerBody::PackedHash(mut items) => {
                    match items.binary_search_by(|(f, _)| f.as_slice().cmp(field)) {
                        Ok(pos) => {
                            items[pos].1 = value.to_vec();
                            let body = ContainerBody::PackedHash(items);
                            rows.insert(meta_key, RowValue::HashMeta { ttl_ms, body }.encode());
                            Ok(false)
                        }
                        Err(pos) if items.len() < PACKED_MAX_ENTRIES => {
                            items.insert(pos, (field.to_vec(), value.to_vec()));
                            let body = ContainerBody::PackedHash(items);
                            rows.insert(meta_key, RowValue::HashMeta { ttl_ms, body }.encode());
                            Ok(true)
                        }
                        Err(_) => {
                            for (f, v) in &items {
                                rows.insert(
                                    RowKey::element(db, key, RowKind::HashField, f).encode(),
                                    RowValue::HashValue(v.clone()).encode(),
                                );
                            }
                            rows.insert(
                                RowKey::element(db, key, RowKind::HashField, field).encode(),
                                RowValue::HashValue(value.to_vec()).encode(),
                            );
                            let body = ContainerBody::Split { count: items.len() as u64 + 1 };
                            rows.insert(meta_key, RowValue::HashMeta { ttl_ms, body }.encode());
                            Ok(true)
                        }
                    }
                }
                ContainerBody::Split { count } => {
                    let element_key = RowKey::element(db, key, RowKind::HashField, field).encode();
                    let is_new = !rows.contains_key(&element_key);
                    rows.insert(element_key, RowValue::HashValue(value.to_vec()).encode());
                    if is_new {
                        let body = ContainerBody::Split { count: count + 1 };
                        rows.insert(meta_key, RowValue::HashMeta { ttl_ms, body }.encode());
                    }
                    Ok(is_new)
                }
                _ => Err(StorageError::CorruptRow("hash meta body".to_string()).into()),
            },
            Some(_) => Err(StorageError::WrongType.into()),
        }
    }

    /// Number of fields in a hash; 0 when absent.
    pub fn hash_len(&self, db: DatabaseIndex, key: &[u8]) -> Result<u64> {
        match self.meta(db, key)? {
            Some(RowValue::HashMeta { body, .. }) => Ok(body.count()),
            Some(_) => Err(StorageError::WrongType.into()),
            None => Ok(0),
        }
    }

    // ---- Read accessors ----

    /// Get a string value.
    pub fn get_string(&self, db: DatabaseIndex, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.meta(db, key)? {
            Some(RowValue::StringMeta { value, .. }) => Ok(Some(value)),
            Some(_) => Err(StorageError::WrongType.into()),
            None => Ok(None),
        }
    }

    /// All elements of a list, in list order.
    pub fn list_range(&self, db: DatabaseIndex, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        match self.meta(db, key)? {
            Some(RowValue::ListMeta { body: ContainerBody::PackedList(items), .. }) => Ok(items),
            Some(RowValue::ListMeta { body: ContainerBody::Split { .. }, .. }) => {
                let mut out = Vec::new();
                for (raw_key, raw_value) in self.key_rows(db, key) {
                    let decoded = RowKey::decode(&raw_key)?;
                    if decoded.kind == RowKind::ListElement {
                        if let RowValue::ListElement(v) = RowValue::decode(&raw_value)? {
                            out.push(v);
                        }
                    }
                }
                Ok(out)
            }
            Some(_) => Err(StorageError::WrongType.into()),
            None => Ok(Vec::new()),
        }
    }

    /// All members of a set, in byte order.
    pub fn set_members(&self, db: DatabaseIndex, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        match self.meta(db, key)? {
            Some(RowValue::SetMeta { body: ContainerBody::PackedSet(items), .. }) => Ok(items),
            Some(RowValue::SetMeta { body: ContainerBody::Split { .. }, .. }) => {
                let mut out = Vec::new();
                for (raw_key, _) in self.key_rows(db, key) {
                    let decoded = RowKey::decode(&raw_key)?;
                    if decoded.kind == RowKind::SetElement {
                        out.push(decoded.extra);
                    }
                }
                Ok(out)
            }
            Some(_) => Err(StorageError::WrongType.into()),
            None => Ok(Vec::new()),
        }
    }

    /// Score of a sorted-set member.
    pub fn zset_score(&self, db: DatabaseIndex, key: &[u8], member: &[u8]) -> Result<Option<f64>> {
        match self.meta(db, key)? {
            Some(RowValue::ZSetMeta { body: ContainerBody::PackedZSet(items), .. }) => {
                Ok(items.iter().find(|(m, _)| m == member).map(|(_, s)| *s))
            }
            Some(RowValue::ZSetMeta { body: ContainerBody::Split { .. }, .. }) => {
                let element_key = RowKey::element(db, key, RowKind::ZSetScore, member).encode();
                let rows = self.rows.read().unwrap();
                match rows.get(&element_key) {
                    Some(raw) => match RowValue::decode(raw)? {
                        RowValue::ZSetScore(score) => Ok(Some(score)),
                        _ => Err(StorageError::CorruptRow("zset element row".to_string()).into()),
                    },
                    None => Ok(None),
                }
            }
            Some(_) => Err(StorageError::WrongType.into()),
            None => Ok(None),
        }
    }

    /// Value of a hash field.
    pub fn hash_get(&self, db: DatabaseIndex, key: &[u8], field: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.meta(db, key)? {
            Some(RowValue::HashMeta { body: ContainerBody::PackedHash(items), .. }) => {
                Ok(items.iter().find(|(f, _)| f == field).map(|(_, v)| v.clone()))
            }
            Some(RowValue::HashMeta { body: ContainerBody::Split { .. }, .. }) => {
                let element_key = RowKey::element(db, key, RowKind::HashField, field).encode();
                let rows = self.rows.read().unwrap();
                match rows.get(&element_key) {
                    Some(raw) => match RowValue::decode(raw)? {
                        RowValue::HashValue(v) => Ok(Some(v)),
                        _ => Err(StorageError::CorruptRow("hash element row".to_string()).into()),
                    },
                    None => Ok(None),
                }
            }
            Some(_) => Err(StorageError::WrongType.into()),
            None => Ok(None),
        }
    }

    /// Number of logical keys in one database.
    pub fn key_count(&self, db: DatabaseIndex) -> usize {
        let rows = self.rows.read().unwrap();
        rows.range(db.to_be_bytes().to_vec()..)
            .take_while(|(k, _)| k.starts_with(&db.to_be_bytes()))
            .filter(|(k, _)| matches!(RowKey::decode(k), Ok(d) if d.kind == RowKind::KeyMeta))
            .count()
    }

    /// All rows, for state comparison in tests.
    pub fn all_rows(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let rows = self.rows.read().unwrap();
        rows.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    // ---- Internals ----

    fn meta(&self, db: DatabaseIndex, key: &[u8]) -> Result<Option<RowValue>> {
        let meta_key = RowKey::meta(db, key).encode();
        let rows = self.rows.read().unwrap();
        Self::decode_meta(rows.get(&meta_key))
    }

    fn decode_meta(raw: Option<&Vec<u8>>) -> Result<Option<RowValue>> {
        match raw {
            Some(bytes) => Ok(Some(RowValue::decode(bytes)?)),
            None => Ok(None),
        }
    }

    fn key_rows(&self, db: DatabaseIndex, key: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let prefix = RowKey::prefix(db, key);
        let rows = self.rows.read().unwrap();
        rows.range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn remove_key_rows(rows: &mut BTreeMap<Vec<u8>, Vec<u8>>, db: DatabaseIndex, key: &[u8]) -> bool {
        let prefix = RowKey::prefix(db, key);
        let doomed: Vec<Vec<u8>> = rows
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect();
        let removed = !doomed.is_empty();
        for k in doomed {
            rows.remove(&k);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_set_get_ttl() {
        let engine = StorageEngine::new();
        engine.generic_set(0, b"k", b"hello").unwrap();
        assert_eq!(engine.get_string(0, b"k").unwrap(), Some(b"hello".to_vec()));
        assert_eq!(engine.generic_ttl(0, b"k").unwrap(), 0);

        assert!(engine.generic_expire(0, b"k", 1_700_000_000_000).unwrap());
        assert_eq!(engine.generic_ttl(0, b"k").unwrap(), 1_700_000_000_000);
        assert!(!engine.generic_expire(0, b"missing", 1).unwrap());
    }

    #[test]
    fn test_list_packed_and_spill() {
        let engine = StorageEngine::new();
        let n = PACKED_MAX_ENTRIES + 10;
        for i in 0..n {
            engine.list_insert(0, b"l", format!("item-{:04}", i).as_bytes()).unwrap();
        }
        assert_eq!(engine.list_len(0, b"l").unwrap(), n as u64);
        let range = engine.list_range(0, b"l").unwrap();
        assert_eq!(range.len(), n);
        assert_eq!(range[0], b"item-0000".to_vec());
        assert_eq!(range[n - 1], format!("item-{:04}", n - 1).into_bytes());
    }

    #[test]
    fn test_set_dedup_across_spill() {
        let engine = StorageEngine::new();
        for i in 0..PACKED_MAX_ENTRIES + 5 {
            assert!(engine.set_add(0, b"s", format!("m{}", i).as_bytes()).unwrap());
        }
        assert!(!engine.set_add(0, b"s", b"m3").unwrap());
        assert!(!engine.set_add(0, b"s", b"m130").unwrap());
        assert_eq!(engine.set_len(0, b"s").unwrap(), (PACKED_MAX_ENTRIES + 5) as u64);
    }

    #[test]
    fn test_zset_score_update() {
        let engine = StorageEngine::new();
        assert!(engine.zset_add(0, b"z", b"m", 1.0).unwrap());
        assert!(!engine.zset_add(0, b"z", b"m", 2.5).unwrap());
        assert_eq!(engine.zset_score(0, b"z", b"m").unwrap(), Some(2.5));
        assert_eq!(engine.zset_len(0, b"z").unwrap(), 1);
    }

    #[test]
    fn test_hash_fields() {
        let engine = StorageEngine::new();
        assert!(engine.hash_set(0, b"h", b"f1", b"v1").unwrap());
        assert!(!engine.hash_set(0, b"h", b"f1", b"v2").unwrap());
        assert_eq!(engine.hash_get(0, b"h", b"f1").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(engine.hash_len(0, b"h").unwrap(), 1);
    }

    #[test]
    fn test_delete_removes_all_rows() {
        let engine = StorageEngine::new();
        for i in 0..PACKED_MAX_ENTRIES + 5 {
            engine.list_insert(0, b"l", format!("{}", i).as_bytes()).unwrap();
        }
        assert!(engine.delete_key(0, b"l").unwrap());
        assert_eq!(engine.list_len(0, b"l").unwrap(), 0);
        assert!(engine.all_rows().is_empty());
    }

    #[test]
    fn test_cursor_groups_rows() {
        let engine = StorageEngine::new();
        engine.generic_set(1, b"b", b"x").unwrap();
        engine.generic_set(0, b"a", b"y").unwrap();
        let dbs: Vec<u32> = engine
            .iter()
            .map(|(k, _)| RowKey::decode(&k).unwrap().db)
            .collect();
        assert_eq!(dbs, vec![0, 1]);
    }

    #[test]
    fn test_wrong_type_is_reported() {
        let engine = StorageEngine::new();
        engine.generic_set(0, b"k", b"v").unwrap();
        assert!(engine.list_insert(0, b"k", b"x").is_err());
    }
}
