//! Fragments: immutable, timestamped lists of cells.
//!
//! A fragment `<name>` of an array is stored as
//!  - `<array>/__fragments/<name>`: the encoded cells,
//!  - `<array>/__commits/<name>.vac`: the names of the fragments it supersedes (consolidated fragments only), and
//!  - `<array>/__commits/<name>.wrt`: the commit marker.
//!
//! The keys are written in that order, so a fragment is visible only once all of its parts are present.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use bytes::{Buf, BufMut, BytesMut};

use tessera_storage::{
    Bytes, ListableStorageTraits, ReadableStorageTraits, StorageError, StoreKey,
    WritableStorageTraits,
};

use super::{
    ArrayUri, TimestampedName,
    array_uri::ItemKey,
    timeline::{Timeline, decode_consolidation_list, encode_consolidation_list},
};

/// Cells keyed by their coordinates.
pub type Cells = BTreeMap<Vec<u64>, Bytes>;

const FRAGMENT_MAGIC: &[u8; 4] = b"TSFR";
const FRAGMENT_FORMAT_VERSION: u8 = 1;

/// Encode cells.
///
/// Layout (little endian): magic `TSFR`, `u8` format version, `u32` cell count, then per cell
/// `u32` dimensionality, the `u64` coordinates, `u32` value length and the value bytes.
pub(crate) fn encode_cells(cells: &Cells) -> Result<Bytes, StorageError> {
    let too_large = |what: &str| StorageError::Other(format!("fragment {what} exceeds u32::MAX"));
    let mut bytes = BytesMut::new();
    bytes.put_slice(FRAGMENT_MAGIC);
    bytes.put_u8(FRAGMENT_FORMAT_VERSION);
    bytes.put_u32_le(u32::try_from(cells.len()).map_err(|_| too_large("cell count"))?);
    for (coordinates, value) in cells {
        bytes.put_u32_le(
            u32::try_from(coordinates.len()).map_err(|_| too_large("dimensionality"))?,
        );
        for &coordinate in coordinates {
            bytes.put_u64_le(coordinate);
        }
        bytes.put_u32_le(u32::try_from(value.len()).map_err(|_| too_large("cell value"))?);
        bytes.put_slice(value);
    }
    Ok(bytes.freeze())
}

/// Decode the cells of the fragment stored at `key`.
pub(crate) fn decode_cells(key: &StoreKey, mut bytes: Bytes) -> Result<Cells, StorageError> {
    let corrupt = |reason: &str| StorageError::InvalidMetadata(key.clone(), reason.to_string());
    if bytes.remaining() < FRAGMENT_MAGIC.len() + 5 || &bytes[..4] != FRAGMENT_MAGIC {
        return Err(corrupt("not a fragment"));
    }
    bytes.advance(FRAGMENT_MAGIC.len());
    let version = bytes.get_u8();
    if version != FRAGMENT_FORMAT_VERSION {
        return Err(corrupt("unsupported fragment format version"));
    }
    let count = bytes.get_u32_le();
    let mut cells = Cells::new();
    for _ in 0..count {
        if bytes.remaining() < 4 {
            return Err(corrupt("truncated cell"));
        }
        let ndim = bytes.get_u32_le() as usize;
        if bytes.remaining() < ndim.saturating_mul(8).saturating_add(4) {
            return Err(corrupt("truncated cell coordinates"));
        }
        let coordinates: Vec<u64> = (0..ndim).map(|_| bytes.get_u64_le()).collect();
        let length = bytes.get_u32_le() as usize;
        if bytes.remaining() < length {
            return Err(corrupt("truncated cell value"));
        }
        cells.insert(coordinates, bytes.split_to(length));
    }
    if bytes.has_remaining() {
        return Err(corrupt("trailing bytes"));
    }
    Ok(cells)
}

/// Write a fragment and commit it.
///
/// `supersedes` lists the fragments merged into a consolidated fragment.
pub(crate) fn store_fragment<TStorage: ?Sized + WritableStorageTraits>(
    storage: &TStorage,
    uri: &ArrayUri,
    name: &TimestampedName,
    cells: &Cells,
    supersedes: &[TimestampedName],
) -> Result<(), StorageError> {
    storage.set(&uri.fragment_key(name)?, encode_cells(cells)?)?;
    if !supersedes.is_empty() {
        storage.set(
            &uri.fragment_vacuum_key(name)?,
            encode_consolidation_list(supersedes),
        )?;
    }
    storage.set(&uri.fragment_commit_key(name)?, Bytes::new())?;
    log::debug!("committed fragment {name} of array {uri}");
    Ok(())
}

/// Retrieve the cells of a fragment, or [`None`] if it does not exist.
pub(crate) fn retrieve_fragment<TStorage: ?Sized + ReadableStorageTraits>(
    storage: &TStorage,
    uri: &ArrayUri,
    name: &TimestampedName,
) -> Result<Option<Cells>, StorageError> {
    let key = uri.fragment_key(name)?;
    storage
        .get(&key)?
        .map(|bytes| decode_cells(&key, bytes))
        .transpose()
}

/// The size in bytes of the encoded cells of a fragment.
pub(crate) fn fragment_size<TStorage: ?Sized + ReadableStorageTraits>(
    storage: &TStorage,
    uri: &ArrayUri,
    name: &TimestampedName,
) -> Result<u64, StorageError> {
    Ok(storage.size_key(&uri.fragment_key(name)?)?.unwrap_or_default())
}

/// Erase every part of a fragment, commit marker first.
pub(crate) fn erase_fragment<TStorage: ?Sized + WritableStorageTraits>(
    storage: &TStorage,
    uri: &ArrayUri,
    name: &TimestampedName,
) -> Result<(), StorageError> {
    storage.erase(&uri.fragment_commit_key(name)?)?;
    storage.erase(&uri.fragment_key(name)?)?;
    storage.erase(&uri.fragment_vacuum_key(name)?)
}

/// List the committed fragments of an array.
///
/// Uncommitted fragments are ignored.
/// Orphaned commit markers and consolidation lists are ignored with a warning.
pub(crate) fn list_fragments<TStorage: ?Sized + ReadableStorageTraits + ListableStorageTraits>(
    storage: &TStorage,
    uri: &ArrayUri,
) -> Result<Timeline, StorageError> {
    let data: HashSet<TimestampedName> = storage
        .list_prefix(&uri.fragments_prefix())?
        .iter()
        .filter_map(|key| key.name().parse().ok())
        .collect();

    let mut committed = BTreeSet::new();
    let mut lists = Vec::new();
    for key in storage.list_prefix(&uri.commits_prefix())? {
        match ItemKey::parse(key.name(), true) {
            Some(ItemKey::Item(name)) => {
                if data.contains(&name) {
                    committed.insert(name);
                } else {
                    log::warn!("ignoring commit marker {key} without fragment data");
                }
            }
            Some(ItemKey::VacuumList(name)) => lists.push((name, key)),
            None => log::warn!("ignoring unrecognised key {key} in array {uri}"),
        }
    }

    let mut consolidation_lists = BTreeMap::new();
    for (name, key) in lists {
        if !committed.contains(&name) {
            log::warn!("ignoring consolidation list {key} without a committed fragment");
            continue;
        }
        if let Some(bytes) = storage.get(&key)? {
            consolidation_lists.insert(name, decode_consolidation_list(&key, &bytes)?);
        }
    }

    let uncommitted = data.iter().filter(|name| !committed.contains(*name)).count();
    if uncommitted > 0 {
        log::debug!("array {uri} has {uncommitted} uncommitted fragment(s)");
    }
    Ok(Timeline::new(committed, consolidation_lists))
}
