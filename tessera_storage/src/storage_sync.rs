use auto_impl::auto_impl;

use super::{
    Bytes, MaybeBytes, StorageError, StoreKey, StoreKeys, StoreKeysPrefixes, StorePrefix,
};

/// Reading values from a store.
#[auto_impl(Arc)]
pub trait ReadableStorageTraits: Send + Sync {
    /// Read the whole value at `key`, or [`None`] if there is none.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    fn get(&self, key: &StoreKey) -> Result<MaybeBytes, StorageError>;

    /// The size in bytes of the value at `key`, or [`None`] if there is none.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError>;

    /// Returns true if there is a value at `key`.
    ///
    /// Used to probe commit markers and schema documents without reading them.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    fn exists(&self, key: &StoreKey) -> Result<bool, StorageError> {
        Ok(self.size_key(key)?.is_some())
    }
}

/// Listing the keys of a store.
///
/// The order of listed keys is unspecified.
/// Arrays sort what they list, so a store need not.
#[auto_impl(Arc)]
pub trait ListableStorageTraits: Send + Sync {
    /// Every key in the store.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    fn list(&self) -> Result<StoreKeys, StorageError>;

    /// Every key under `prefix`, at any depth.
    ///
    /// Fragments, commit markers and metadata blocks are found this way.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    fn list_prefix(&self, prefix: &StorePrefix) -> Result<StoreKeys, StorageError>;

    /// The keys and prefixes directly under `prefix`.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    fn list_dir(&self, prefix: &StorePrefix) -> Result<StoreKeysPrefixes, StorageError>;

    /// The total size in bytes of the values under `prefix`.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    fn size_prefix(&self, prefix: &StorePrefix) -> Result<u64, StorageError>;

    /// The total size in bytes of the store.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    fn size(&self) -> Result<u64, StorageError> {
        self.size_prefix(&StorePrefix::root())
    }
}

/// Writing and erasing values in a store.
///
/// A successful [`set`](WritableStorageTraits::set) replaces the value at a key as a whole.
/// Concurrent readers observe either the previous value or the new value, never a partially written one.
/// Commit markers rely on this: a fragment is committed exactly when its marker exists.
#[auto_impl(Arc)]
pub trait WritableStorageTraits: Send + Sync {
    /// Store `value` at `key`, replacing any existing value.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if the value cannot be stored.
    fn set(&self, key: &StoreKey, value: Bytes) -> Result<(), StorageError>;

    /// Erase the value at `key`.
    ///
    /// Erasing a missing key succeeds, so an interrupted vacuum can be repeated.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    fn erase(&self, key: &StoreKey) -> Result<(), StorageError>;

    /// Erase the values at `keys`.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    fn erase_values(&self, keys: &[StoreKey]) -> Result<(), StorageError> {
        keys.iter().try_for_each(|key| self.erase(key))
    }

    /// Erase every value under `prefix`, such as a whole array.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    fn erase_prefix(&self, prefix: &StorePrefix) -> Result<(), StorageError>;
}

/// A store that supports every array operation.
pub trait ReadableWritableListableStorageTraits:
    ReadableStorageTraits + WritableStorageTraits + ListableStorageTraits
{
}

impl<T> ReadableWritableListableStorageTraits for T where
    T: ReadableStorageTraits + WritableStorageTraits + ListableStorageTraits
{
}
