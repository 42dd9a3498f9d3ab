use thiserror::Error;

use tessera_storage::{StorageError, StoreKeyError, StorePrefixError};

use super::{ArrayUriError, TimestampedNameError};
use crate::config::ConfigError;

/// Array errors.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ArrayError {
    /// The operation is not valid in the current open/closed state of the array.
    #[error("invalid array state: {_0}")]
    InvalidState(String),
    /// The query type of the array does not permit the operation.
    #[error("{_0}")]
    Permission(String),
    /// A metadata key was not found.
    #[error("metadata key {_0:?} not found")]
    KeyNotFound(String),
    /// A metadata index is out of range.
    #[error("metadata index {index} is out of range for {count} entries")]
    IndexOutOfRange {
        /// The requested index.
        index: u64,
        /// The number of metadata entries.
        count: u64,
    },
    /// A named fragment is not a current fragment of the array.
    #[error("fragment {_0} not found")]
    FragmentNotFound(String),
    /// A store error.
    #[error(transparent)]
    StorageError(#[from] StorageError),
    /// An unsafe overlap between a vacuum and a consolidation or open array.
    #[error("concurrent modification: {_0}")]
    ConcurrentModification(String),
    /// The encryption type or key does not match the array.
    #[error("encryption error: {_0}")]
    Encryption(String),
    /// An invalid argument.
    #[error("invalid argument: {_0}")]
    InvalidArgument(String),
    /// An invalid configuration option.
    #[error(transparent)]
    ConfigError(#[from] ConfigError),
}

impl From<StoreKeyError> for ArrayError {
    fn from(err: StoreKeyError) -> Self {
        Self::StorageError(err.into())
    }
}

impl From<StorePrefixError> for ArrayError {
    fn from(err: StorePrefixError) -> Self {
        Self::StorageError(err.into())
    }
}

impl From<ArrayUriError> for ArrayError {
    fn from(err: ArrayUriError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

impl From<TimestampedNameError> for ArrayError {
    fn from(err: TimestampedNameError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}
