//! The storage API for the [`tessera`](https://docs.rs/tessera/latest/tessera/index.html) crate.
//!
//! A store is a flat, URI-addressed key-value space used to persist array schemas, fragments, commit markers and metadata blocks.
//! For example: a filesystem directory, an in-memory map, or an object store bucket.
//! `tessera` only issues logical operations against a store (write a value, list a prefix, erase a key) and never depends on backend-specific paths.
//!
//! This crate includes an in-memory store implementation ([`store::MemoryStore`]).
//! A filesystem store is provided by the `tessera_filesystem` crate.
//!
//! ## Licence
//! `tessera_storage` is licensed under either of
//! - the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> or
//! - the MIT license <http://opensource.org/licenses/MIT>, at your option.
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod storage_sync;
pub mod store;
mod store_key;
mod store_prefix;


use std::sync::Arc;

use thiserror::Error;

pub use store_key::{StoreKey, StoreKeyError, StoreKeys};
pub use store_prefix::{StorePrefix, StorePrefixError, StorePrefixes};

pub use self::storage_sync::{
    ListableStorageTraits, ReadableStorageTraits, ReadableWritableListableStorageTraits,
    WritableStorageTraits,
};

/// A shared handle to a store, as held by a `tessera` context.
pub type ReadableWritableListableStorage = Arc<dyn ReadableWritableListableStorageTraits>;

/// Store values. Cloning is cheap and never copies the value.
pub type Bytes = bytes::Bytes;

/// A value read from a store, or [`None`] if the key has no value.
pub type MaybeBytes = Option<Bytes>;

/// The keys and prefixes directly under a prefix, as returned by [`ListableStorageTraits::list_dir`].
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct StoreKeysPrefixes {
    keys: StoreKeys,
    prefixes: StorePrefixes,
}

impl StoreKeysPrefixes {
    /// Create a listing of `keys` and `prefixes`.
    #[must_use]
    pub fn new(keys: StoreKeys, prefixes: StorePrefixes) -> Self {
        Self { keys, prefixes }
    }

    /// The keys.
    #[must_use]
    pub const fn keys(&self) -> &StoreKeys {
        &self.keys
    }

    /// The child prefixes.
    #[must_use]
    pub const fn prefixes(&self) -> &StorePrefixes {
        &self.prefixes
    }
}

/// A storage error.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The store was opened read only.
    #[error("the store is read only")]
    ReadOnly,
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] Arc<std::io::Error>),
    /// A schema document, fragment, metadata block or consolidation list could not be decoded.
    #[error("invalid data at {0}: {1}")]
    InvalidMetadata(StoreKey, String),
    /// There is no array schema under the prefix.
    #[error("no array schema under {0}")]
    MissingMetadata(StorePrefix),
    /// An invalid store prefix.
    #[error("invalid store prefix {0}")]
    StorePrefixError(#[from] StorePrefixError),
    /// An invalid store key.
    #[error("invalid store key {0}")]
    InvalidStoreKey(#[from] StoreKeyError),
    /// Any other error.
    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::IOError(Arc::new(err))
    }
}

impl From<&str> for StorageError {
    fn from(err: &str) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<String> for StorageError {
    fn from(err: String) -> Self {
        Self::Other(err)
    }
}
