use derive_more::{Display, From};
use thiserror::Error;

use crate::StorePrefix;

/// A store key.
///
/// A key is a `/` separated path relative to the store root, e.g. `arrays/a/__fragments/__1_1_<uuid>`.
/// It must not be empty, start or end with `/`, contain empty path components, or contain `.` / `..` components.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Display)]
pub struct StoreKey(String);

/// A list of [`StoreKey`].
pub type StoreKeys = Vec<StoreKey>;

/// An invalid store key.
#[derive(Debug, Clone, Error, From)]
#[error("invalid store key {0}")]
pub struct StoreKeyError(String);

impl StoreKey {
    /// Create a new store key from `key`.
    ///
    /// # Errors
    /// Returns [`StoreKeyError`] if `key` is not valid according to [`StoreKey::validate`].
    pub fn new(key: impl Into<String>) -> Result<Self, StoreKeyError> {
        let key: String = key.into();
        if Self::validate(&key) {
            Ok(Self(key))
        } else {
            Err(StoreKeyError(key))
        }
    }

    /// Create a new store key from `key` without validation.
    ///
    /// # Safety
    /// `key` is not validated, so this can result in an invalid store key.
    #[must_use]
    pub unsafe fn new_unchecked(key: impl Into<String>) -> Self {
        let key: String = key.into();
        debug_assert!(Self::validate(&key));
        Self(key)
    }

    /// Extracts a string slice of the underlying key [String].
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validates a key.
    #[must_use]
    pub fn validate(key: &str) -> bool {
        !key.is_empty()
            && key
                .split('/')
                .all(|component| !component.is_empty() && component != "." && component != "..")
    }

    /// Returns true if the key has prefix `prefix`.
    #[must_use]
    pub fn has_prefix(&self, prefix: &StorePrefix) -> bool {
        self.0.starts_with(prefix.as_str())
    }

    /// Returns the final component of the key.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Returns the parent [`StorePrefix`] of the key.
    #[must_use]
    pub fn parent(&self) -> StorePrefix {
        match self.0.rsplit_once('/') {
            // SAFETY: a prefix of a valid key followed by `/` is a valid prefix.
            Some((parent, _)) => unsafe { StorePrefix::new_unchecked(format!("{parent}/")) },
            None => StorePrefix::root(),
        }
    }

    /// Returns the key as a [`StorePrefix`] (the key with a trailing `/`).
    #[must_use]
    pub fn to_prefix(&self) -> StorePrefix {
        // SAFETY: a valid key followed by `/` is a valid prefix.
        unsafe { StorePrefix::new_unchecked(format!("{}/", self.0)) }
    }
}

impl TryFrom<&str> for StoreKey {
    type Error = StoreKeyError;

    fn try_from(key: &str) -> Result<Self, Self::Error> {
        Self::new(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_key() {
        assert!(StoreKey::new("a").is_ok());
        assert!(StoreKey::new("a/b/c.json").is_ok());
        assert!(StoreKey::new("").is_err());
        assert!(StoreKey::new("/a").is_err());
        assert!(StoreKey::new("a/").is_err());
        assert!(StoreKey::new("a//b").is_err());
        assert!(StoreKey::new("a/../b").is_err());

        let key = StoreKey::new("a/b/c").unwrap();
        assert_eq!(key.name(), "c");
        assert_eq!(key.parent(), StorePrefix::new("a/b/").unwrap());
        assert_eq!(key.to_prefix(), StorePrefix::new("a/b/c/").unwrap());
        assert!(key.has_prefix(&StorePrefix::new("a/").unwrap()));
        assert!(!key.has_prefix(&StorePrefix::new("b/").unwrap()));
        assert_eq!(StoreKey::new("c").unwrap().parent(), StorePrefix::root());
    }
}
