use derive_more::{Display, From};
use thiserror::Error;

use crate::{StoreKey, StoreKeyError};

/// A store prefix.
///
/// A prefix is either empty (the store root) or a valid [`StoreKey`] followed by a trailing `/`.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Display)]
pub struct StorePrefix(String);

/// A list of [`StorePrefix`].
pub type StorePrefixes = Vec<StorePrefix>;

/// An invalid store prefix.
#[derive(Debug, Clone, Error, From)]
#[error("invalid store prefix {0}")]
pub struct StorePrefixError(String);

impl StorePrefix {
    /// Create a new store prefix from `prefix`.
    ///
    /// # Errors
    /// Returns [`StorePrefixError`] if `prefix` is not valid according to [`StorePrefix::validate`].
    pub fn new(prefix: impl Into<String>) -> Result<Self, StorePrefixError> {
        let prefix: String = prefix.into();
        if Self::validate(&prefix) {
            Ok(Self(prefix))
        } else {
            Err(StorePrefixError(prefix))
        }
    }

    /// Create a new store prefix from `prefix` without validation.
    ///
    /// # Safety
    /// `prefix` is not validated, so this can result in an invalid store prefix.
    #[must_use]
    pub unsafe fn new_unchecked(prefix: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        debug_assert!(Self::validate(&prefix));
        Self(prefix)
    }

    /// The root prefix.
    #[must_use]
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Extracts a string slice of the underlying prefix [String].
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validates a prefix.
    #[must_use]
    pub fn validate(prefix: &str) -> bool {
        prefix.is_empty()
            || prefix
                .strip_suffix('/')
                .is_some_and(StoreKey::validate)
    }

    /// Return the [`StoreKey`] of `name` directly under this prefix.
    ///
    /// # Errors
    /// Returns [`StoreKeyError`] if the resulting key is invalid (e.g. `name` is empty or contains `..`).
    pub fn key(&self, name: &str) -> Result<StoreKey, StoreKeyError> {
        StoreKey::new(format!("{}{name}", self.0))
    }

    /// Return the child prefix `name/` under this prefix.
    ///
    /// # Errors
    /// Returns [`StorePrefixError`] if the resulting prefix is invalid.
    pub fn child(&self, name: &str) -> Result<StorePrefix, StorePrefixError> {
        StorePrefix::new(format!("{}{name}/", self.0))
    }
}

impl TryFrom<&str> for StorePrefix {
    type Error = StorePrefixError;

    fn try_from(prefix: &str) -> Result<Self, Self::Error> {
        Self::new(prefix)
    }
}

impl From<StoreKeyError> for StorePrefixError {
    fn from(err: StoreKeyError) -> Self {
        Self(err.to_string())
    }
}
