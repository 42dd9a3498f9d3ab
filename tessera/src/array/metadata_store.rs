//! The typed key-value metadata store embedded in an array.
//!
//! Metadata is persisted as immutable *metadata blocks* under `<array>/__meta/`.
//! Each block holds the puts and deletes (tombstones) of one write session in the order they were made.
//! A reader folds the blocks visible in its timestamp window in precedence order.
//! A block's existence is its commit; a consolidated block is preceded by its consolidation list `<array>/__meta/<name>.vac`.

use std::collections::{BTreeMap, BTreeSet};

use bytes::{Buf, BufMut, BytesMut};

use tessera_storage::{
    Bytes, ListableStorageTraits, ReadableStorageTraits, StorageError, StoreKey,
    WritableStorageTraits,
};

use super::{
    ArrayError, ArrayUri, Datatype, TimestampedName,
    array_uri::ItemKey,
    timeline::{Timeline, decode_consolidation_list, encode_consolidation_list},
};

const METADATA_MAGIC: &[u8; 4] = b"TSMD";
const METADATA_FORMAT_VERSION: u8 = 1;

/// A typed metadata value: `value_num` elements of a [`Datatype`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetadataValue {
    datatype: Datatype,
    value_num: u32,
    value: Bytes,
}

impl MetadataValue {
    /// Create a new metadata value.
    ///
    /// # Errors
    /// Returns [`ArrayError::InvalidArgument`] if `value_num` is zero or `value` is not `value_num * datatype.size()` bytes.
    pub fn new(
        datatype: Datatype,
        value_num: u32,
        value: impl Into<Bytes>,
    ) -> Result<Self, ArrayError> {
        let value = value.into();
        if value_num == 0 {
            return Err(ArrayError::InvalidArgument(
                "metadata values must have at least one element".to_string(),
            ));
        }
        let expected = value_num as usize * datatype.size();
        if value.len() != expected {
            return Err(ArrayError::InvalidArgument(format!(
                "metadata value of {value_num} {datatype} element(s) must be {expected} bytes, got {}",
                value.len()
            )));
        }
        Ok(Self {
            datatype,
            value_num,
            value,
        })
    }

    /// The data type.
    #[must_use]
    pub const fn datatype(&self) -> Datatype {
        self.datatype
    }

    /// The number of elements.
    #[must_use]
    pub const fn value_num(&self) -> u32 {
        self.value_num
    }

    /// The value bytes.
    #[must_use]
    pub const fn value(&self) -> &Bytes {
        &self.value
    }
}

/// One entry of a metadata block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum MetadataRecord {
    Put(String, MetadataValue),
    Delete(String),
}

impl MetadataRecord {
    fn key(&self) -> &str {
        match self {
            Self::Put(key, _) | Self::Delete(key) => key,
        }
    }
}

/// Encode a metadata block.
///
/// Layout (little endian): magic `TSMD`, `u8` format version, `u32` entry count, then per entry
/// `u32` key length, the key, `u8` deleted flag, `u8` data type tag, `u32` value count and the value bytes.
/// Tombstones have a zero tag and value count.
pub(crate) fn encode_block(records: &[MetadataRecord]) -> Result<Bytes, StorageError> {
    let too_large = |what: &str| StorageError::Other(format!("metadata {what} exceeds u32::MAX"));
    let mut bytes = BytesMut::new();
    bytes.put_slice(METADATA_MAGIC);
    bytes.put_u8(METADATA_FORMAT_VERSION);
    bytes.put_u32_le(u32::try_from(records.len()).map_err(|_| too_large("entry count"))?);
    for record in records {
        let key = record.key();
        bytes.put_u32_le(u32::try_from(key.len()).map_err(|_| too_large("key"))?);
        bytes.put_slice(key.as_bytes());
        match record {
            MetadataRecord::Put(_, value) => {
                bytes.put_u8(0);
                bytes.put_u8(value.datatype.tag());
                bytes.put_u32_le(value.value_num);
                bytes.put_slice(&value.value);
            }
            MetadataRecord::Delete(_) => {
                bytes.put_u8(1);
                bytes.put_u8(0);
                bytes.put_u32_le(0);
            }
        }
    }
    Ok(bytes.freeze())
}

/// Decode the metadata block stored at `key`.
pub(crate) fn decode_block(
    key: &StoreKey,
    mut bytes: Bytes,
) -> Result<Vec<MetadataRecord>, StorageError> {
    let corrupt = |reason: String| StorageError::InvalidMetadata(key.clone(), reason);
    if bytes.remaining() < METADATA_MAGIC.len() + 5 || &bytes[..4] != METADATA_MAGIC {
        return Err(corrupt("not a metadata block".to_string()));
    }
    bytes.advance(METADATA_MAGIC.len());
    let version = bytes.get_u8();
    if version != METADATA_FORMAT_VERSION {
        return Err(corrupt(format!("unsupported format version {version}")));
    }
    let count = bytes.get_u32_le();
    let mut records = Vec::new();
    for _ in 0..count {
        if bytes.remaining() < 4 {
            return Err(corrupt("truncated entry".to_string()));
        }
        let key_length = bytes.get_u32_le() as usize;
        if bytes.remaining() < key_length.saturating_add(6) {
            return Err(corrupt("truncated entry key".to_string()));
        }
        let entry_key = String::from_utf8(bytes.split_to(key_length).to_vec())
            .map_err(|err| corrupt(err.to_string()))?;
        if entry_key.is_empty() {
            return Err(corrupt("empty key".to_string()));
        }
        let deleted = bytes.get_u8();
        let tag = bytes.get_u8();
        let value_num = bytes.get_u32_le();
        match deleted {
            1 if tag == 0 && value_num == 0 => records.push(MetadataRecord::Delete(entry_key)),
            0 => {
                let datatype = Datatype::from_tag(tag)
                    .ok_or_else(|| corrupt(format!("unknown data type tag {tag}")))?;
                let length = (value_num as usize).saturating_mul(datatype.size());
                if bytes.remaining() < length {
                    return Err(corrupt(format!("truncated value of {entry_key:?}")));
                }
                let value = MetadataValue::new(datatype, value_num, bytes.split_to(length))
                    .map_err(|err| corrupt(err.to_string()))?;
                records.push(MetadataRecord::Put(entry_key, value));
            }
            _ => return Err(corrupt(format!("invalid entry flags for {entry_key:?}"))),
        }
    }
    if bytes.has_remaining() {
        return Err(corrupt("trailing bytes".to_string()));
    }
    Ok(records)
}

/// The metadata of an open array.
///
/// Live entries are kept in insertion order.
/// A put of an existing key replaces its value in place; a delete removes the key from the order immediately.
/// Writes are also recorded as pending records, flushed as one metadata block per write session.
#[derive(Clone, Debug, Default)]
pub struct MetadataStore {
    entries: Vec<(String, MetadataValue)>,
    pending: Vec<MetadataRecord>,
}

impl MetadataStore {
    /// Fold metadata blocks in precedence order.
    pub(crate) fn from_records(blocks: impl IntoIterator<Item = Vec<MetadataRecord>>) -> Self {
        let mut store = Self::default();
        for record in blocks.into_iter().flatten() {
            store.apply(record);
        }
        store
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }

    fn apply(&mut self, record: MetadataRecord) {
        match record {
            MetadataRecord::Put(key, value) => match self.position(&key) {
                Some(index) => self.entries[index].1 = value,
                None => self.entries.push((key, value)),
            },
            MetadataRecord::Delete(key) => {
                if let Some(index) = self.position(&key) {
                    self.entries.remove(index);
                }
            }
        }
    }

    /// Put `value` at `key`, replacing any existing value.
    ///
    /// # Errors
    /// Returns [`ArrayError::InvalidArgument`] if `key` is empty.
    pub fn put(&mut self, key: &str, value: MetadataValue) -> Result<(), ArrayError> {
        if key.is_empty() {
            return Err(ArrayError::InvalidArgument(
                "metadata keys must not be empty".to_string(),
            ));
        }
        let record = MetadataRecord::Put(key.to_string(), value);
        self.apply(record.clone());
        self.pending.push(record);
        Ok(())
    }

    /// Get the value at `key`.
    ///
    /// # Errors
    /// Returns [`ArrayError::KeyNotFound`] if `key` is absent.
    pub fn get(&self, key: &str) -> Result<&MetadataValue, ArrayError> {
        self.entries
            .iter()
            .find_map(|(k, value)| (k == key).then_some(value))
            .ok_or_else(|| ArrayError::KeyNotFound(key.to_string()))
    }

    /// Get the key and value at `index` in insertion order.
    ///
    /// # Errors
    /// Returns [`ArrayError::IndexOutOfRange`] if `index >= self.count()`.
    pub fn get_by_index(&self, index: u64) -> Result<(&str, &MetadataValue), ArrayError> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.entries.get(i))
            .map(|(key, value)| (key.as_str(), value))
            .ok_or(ArrayError::IndexOutOfRange {
                index,
                count: self.count(),
            })
    }

    /// Returns the data type of the value at `key`, or [`None`] if `key` is absent.
    #[must_use]
    pub fn has(&self, key: &str) -> Option<Datatype> {
        self.get(key).ok().map(MetadataValue::datatype)
    }

    /// Delete the value at `key`.
    ///
    /// Deleting an absent key is a no-op.
    pub fn delete(&mut self, key: &str) {
        if self.position(key).is_some() {
            let record = MetadataRecord::Delete(key.to_string());
            self.apply(record.clone());
            self.pending.push(record);
        }
    }

    /// The number of live entries.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Iterate over the live entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Returns true if there are unflushed writes.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Write the pending records as a new metadata block named `name`.
    ///
    /// The pending records are kept if the write fails.
    pub(crate) fn flush<TStorage: ?Sized + WritableStorageTraits>(
        &mut self,
        storage: &TStorage,
        uri: &ArrayUri,
        name: &TimestampedName,
    ) -> Result<(), StorageError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        store_block(storage, uri, name, &self.pending, &[])?;
        log::debug!(
            "flushed {} metadata record(s) of array {uri} to {name}",
            self.pending.len()
        );
        self.pending.clear();
        Ok(())
    }
}

/// Fold the records of consecutive metadata blocks into the records of one consolidated block.
///
/// Tombstones are kept unless `drop_tombstones`, which is only valid when no block precedes the folded ones.
/// A key deleted and put again keeps its tombstone, so it still moves to the end of the enumeration order of readers.
pub(crate) fn fold_records(
    blocks: impl IntoIterator<Item = Vec<MetadataRecord>>,
    drop_tombstones: bool,
) -> Vec<MetadataRecord> {
    let mut live: Vec<(String, MetadataValue)> = Vec::new();
    let mut deleted: BTreeSet<String> = BTreeSet::new();
    for record in blocks.into_iter().flatten() {
        match record {
            MetadataRecord::Put(key, value) => {
                match live.iter().position(|(k, _)| *k == key) {
                    Some(index) => live[index].1 = value,
                    None => live.push((key, value)),
                }
            }
            MetadataRecord::Delete(key) => {
                live.retain(|(k, _)| *k != key);
                deleted.insert(key);
            }
        }
    }
    let tombstones = if drop_tombstones {
        Vec::new()
    } else {
        deleted.into_iter().map(MetadataRecord::Delete).collect()
    };
    tombstones
        .into_iter()
        .chain(
            live.into_iter()
                .map(|(key, value)| MetadataRecord::Put(key, value)),
        )
        .collect()
}

/// Write a metadata block, preceded by its consolidation list if it supersedes other blocks.
pub(crate) fn store_block<TStorage: ?Sized + WritableStorageTraits>(
    storage: &TStorage,
    uri: &ArrayUri,
    name: &TimestampedName,
    records: &[MetadataRecord],
    supersedes: &[TimestampedName],
) -> Result<(), StorageError> {
    let block = encode_block(records)?;
    if !supersedes.is_empty() {
        storage.set(
            &uri.metadata_vacuum_key(name)?,
            encode_consolidation_list(supersedes),
        )?;
    }
    storage.set(&uri.metadata_key(name)?, block)
}

/// Retrieve the records of a metadata block, or [`None`] if it does not exist.
pub(crate) fn retrieve_block<TStorage: ?Sized + ReadableStorageTraits>(
    storage: &TStorage,
    uri: &ArrayUri,
    name: &TimestampedName,
) -> Result<Option<Vec<MetadataRecord>>, StorageError> {
    let key = uri.metadata_key(name)?;
    storage
        .get(&key)?
        .map(|bytes| decode_block(&key, bytes))
        .transpose()
}

/// Erase a metadata block and its consolidation list, block first.
pub(crate) fn erase_block<TStorage: ?Sized + WritableStorageTraits>(
    storage: &TStorage,
    uri: &ArrayUri,
    name: &TimestampedName,
) -> Result<(), StorageError> {
    storage.erase(&uri.metadata_key(name)?)?;
    storage.erase(&uri.metadata_vacuum_key(name)?)
}

/// List the metadata blocks of an array.
///
/// Orphaned consolidation lists and unrecognised keys are ignored with a warning.
pub(crate) fn list_metadata_blocks<
    TStorage: ?Sized + ReadableStorageTraits + ListableStorageTraits,
>(
    storage: &TStorage,
    uri: &ArrayUri,
) -> Result<Timeline, StorageError> {
    let mut blocks = BTreeSet::new();
    let mut lists = Vec::new();
    for key in storage.list_prefix(&uri.metadata_prefix())? {
        match ItemKey::parse(key.name(), false) {
            Some(ItemKey::Item(name)) => {
                blocks.insert(name);
            }
            Some(ItemKey::VacuumList(name)) => lists.push((name, key)),
            None => log::warn!("ignoring unrecognised key {key} in array {uri}"),
        }
    }

    let mut consolidation_lists = BTreeMap::new();
    for (name, key) in lists {
        if !blocks.contains(&name) {
            log::warn!("ignoring consolidation list {key} without a committed metadata block");
            continue;
        }
        if let Some(bytes) = storage.get(&key)? {
            consolidation_lists.insert(name, decode_consolidation_list(&key, &bytes)?);
        }
    }
    Ok(Timeline::new(blocks, consolidation_lists))
}

#[cfg(test)]
mod tests {
    use tessera_storage::store::MemoryStore;

    use super::*;

    fn int32(value: i32) -> MetadataValue {
        MetadataValue::new(Datatype::Int32, 1, value.to_le_bytes().to_vec()).unwrap()
    }

    #[test]
    fn metadata_value_validate() {
        assert!(MetadataValue::new(Datatype::Int32, 0, Bytes::new()).is_err());
        assert!(MetadataValue::new(Datatype::Int32, 2, vec![0u8; 4]).is_err());
        let value = MetadataValue::new(Datatype::Float64, 2, vec![0u8; 16]).unwrap();
        assert_eq!(value.value_num(), 2);
        assert_eq!(value.datatype(), Datatype::Float64);
    }

    #[test]
    fn metadata_block_codec() {
        let key = StoreKey::new("a/__meta/x").unwrap();
        let records = vec![
            MetadataRecord::Put("k1".to_string(), int32(42)),
            MetadataRecord::Delete("k2".to_string()),
            MetadataRecord::Put(
                "name".to_string(),
                MetadataValue::new(Datatype::StringUtf8, 5, "hello").unwrap(),
            ),
        ];
        let bytes = encode_block(&records).unwrap();
        assert_eq!(&bytes[..4], b"TSMD");
        assert_eq!(decode_block(&key, bytes.clone()).unwrap(), records);

        let corrupt = |bytes: Bytes| {
            matches!(
                decode_block(&key, bytes),
                Err(StorageError::InvalidMetadata(..))
            )
        };
        assert!(corrupt(bytes.slice(..bytes.len() - 1)));
        assert!(corrupt(Bytes::from_static(b"TSMD")));
        assert!(corrupt(Bytes::from_static(b"XXXX\x01\0\0\0\0")));
        let mut bad_tag = bytes.to_vec();
        bad_tag[4 + 1 + 4 + 4 + 2 + 1] = 99; // data type tag of the first entry
        assert!(corrupt(Bytes::from(bad_tag)));
    }

    #[test]
    fn metadata_store_order() {
        let mut store = MetadataStore::default();
        store.put("a", int32(1)).unwrap();
        store.put("b", int32(2)).unwrap();
        store.put("c", int32(3)).unwrap();
        store.put("a", int32(4)).unwrap();
        store.delete("b");
        store.delete("missing");
        assert!(store.put("", int32(0)).is_err());

        assert_eq!(store.count(), 2);
        let (key, value) = store.get_by_index(0).unwrap();
        assert_eq!((key, value), ("a", &int32(4)));
        assert_eq!(store.get_by_index(1).unwrap().0, "c");
        assert!(matches!(
            store.get_by_index(2),
            Err(ArrayError::IndexOutOfRange { index: 2, count: 2 })
        ));
        assert!(matches!(store.get("b"), Err(ArrayError::KeyNotFound(_))));
        assert_eq!(store.has("c"), Some(Datatype::Int32));
        assert_eq!(store.has("b"), None);

        // folding the pending records reproduces the same state
        let reloaded = MetadataStore::from_records([store.pending.clone()]);
        assert_eq!(
            reloaded.iter().collect::<Vec<_>>(),
            store.iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn metadata_fold_records() {
        let blocks = vec![
            vec![
                MetadataRecord::Put("a".to_string(), int32(1)),
                MetadataRecord::Put("b".to_string(), int32(2)),
            ],
            vec![
                MetadataRecord::Delete("a".to_string()),
                MetadataRecord::Put("b".to_string(), int32(3)),
            ],
        ];
        assert_eq!(
            fold_records(blocks.clone(), false),
            vec![
                MetadataRecord::Delete("a".to_string()),
                MetadataRecord::Put("b".to_string(), int32(3)),
            ]
        );
        assert_eq!(
            fold_records(blocks, true),
            vec![MetadataRecord::Put("b".to_string(), int32(3))]
        );

        let blocks = vec![
            vec![MetadataRecord::Put("a".to_string(), int32(1))],
            vec![
                MetadataRecord::Delete("k".to_string()),
                MetadataRecord::Put("k".to_string(), int32(2)),
            ],
        ];
        assert_eq!(
            fold_records(blocks.clone(), false),
            vec![
                MetadataRecord::Delete("k".to_string()),
                MetadataRecord::Put("a".to_string(), int32(1)),
                MetadataRecord::Put("k".to_string(), int32(2)),
            ]
        );
        assert_eq!(fold_records(blocks, true).len(), 2);
    }

    #[test]
    fn metadata_flush_and_list() {
        let storage = MemoryStore::new();
        let uri = ArrayUri::new("a").unwrap();
        let mut store = MetadataStore::default();
        store.put("k", int32(1)).unwrap();
        let name = TimestampedName::new(5, 5);
        store.flush(&storage, &uri, &name).unwrap();
        assert!(!store.has_pending());

        let timeline = list_metadata_blocks(&storage, &uri).unwrap();
        assert_eq!(timeline.current(), vec![name]);
        let records = retrieve_block(&storage, &uri, &name).unwrap().unwrap();
        assert_eq!(
            MetadataStore::from_records([records]).get("k").unwrap(),
            &int32(1)
        );

        erase_block(&storage, &uri, &name).unwrap();
        assert!(list_metadata_blocks(&storage, &uri)
            .unwrap()
            .current()
            .is_empty());
    }
}
