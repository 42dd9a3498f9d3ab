use derive_more::Display;
use thiserror::Error;

use tessera_storage::{StoreKey, StoreKeyError, StorePrefix};

use super::TimestampedName;

/// The location of an array within a store.
///
/// An array URI is a `/` separated path from the store root, e.g. `/group/array`.
/// A leading `/` is optional and trailing `/` characters are ignored, so `group/array/` and `/group/array` are the same array.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Display)]
#[display("{path}")]
pub struct ArrayUri {
    path: String,
    prefix: StorePrefix,
}

/// An invalid array URI.
#[derive(Clone, Debug, Error)]
#[error("invalid array uri {0:?}")]
pub struct ArrayUriError(String);

const SCHEMA_KEY: &str = "__schema.json";
const FRAGMENTS_DIR: &str = "__fragments";
const COMMITS_DIR: &str = "__commits";
const METADATA_DIR: &str = "__meta";
const COMMIT_SUFFIX: &str = ".wrt";
const VACUUM_SUFFIX: &str = ".vac";

impl ArrayUri {
    /// Create a new array URI from `uri`.
    ///
    /// # Errors
    /// Returns [`ArrayUriError`] if `uri` has empty, `.` or `..` path components.
    pub fn new(uri: &str) -> Result<Self, ArrayUriError> {
        let trimmed = uri.trim_start_matches('/').trim_end_matches('/');
        if trimmed.is_empty() {
            return Ok(Self {
                path: "/".to_string(),
                prefix: StorePrefix::root(),
            });
        }
        let prefix = StorePrefix::new(format!("{trimmed}/"))
            .map_err(|_| ArrayUriError(uri.to_string()))?;
        Ok(Self {
            path: format!("/{trimmed}"),
            prefix,
        })
    }

    /// The normalised path of the array, e.g. `/group/array`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// The store prefix holding all keys of the array.
    #[must_use]
    pub fn prefix(&self) -> &StorePrefix {
        &self.prefix
    }

    pub(crate) fn schema_key(&self) -> Result<StoreKey, StoreKeyError> {
        self.prefix.key(SCHEMA_KEY)
    }

    pub(crate) fn fragments_prefix(&self) -> StorePrefix {
        self.child(FRAGMENTS_DIR)
    }

    pub(crate) fn commits_prefix(&self) -> StorePrefix {
        self.child(COMMITS_DIR)
    }

    pub(crate) fn metadata_prefix(&self) -> StorePrefix {
        self.child(METADATA_DIR)
    }

    pub(crate) fn fragment_key(&self, name: &TimestampedName) -> Result<StoreKey, StoreKeyError> {
        self.fragments_prefix().key(&name.to_string())
    }

    pub(crate) fn fragment_commit_key(
        &self,
        name: &TimestampedName,
    ) -> Result<StoreKey, StoreKeyError> {
        self.commits_prefix()
            .key(&format!("{name}{COMMIT_SUFFIX}"))
    }

    pub(crate) fn fragment_vacuum_key(
        &self,
        name: &TimestampedName,
    ) -> Result<StoreKey, StoreKeyError> {
        self.commits_prefix()
            .key(&format!("{name}{VACUUM_SUFFIX}"))
    }

    pub(crate) fn metadata_key(&self, name: &TimestampedName) -> Result<StoreKey, StoreKeyError> {
        self.metadata_prefix().key(&name.to_string())
    }

    pub(crate) fn metadata_vacuum_key(
        &self,
        name: &TimestampedName,
    ) -> Result<StoreKey, StoreKeyError> {
        self.metadata_prefix()
            .key(&format!("{name}{VACUUM_SUFFIX}"))
    }

    fn child(&self, name: &str) -> StorePrefix {
        // SAFETY: the array prefix is valid and `name` is a valid path component.
        unsafe { StorePrefix::new_unchecked(format!("{}{name}/", self.prefix.as_str())) }
    }
}

/// The role of a key under an array's commit or metadata directory.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ItemKey {
    /// A fragment commit marker or a metadata block.
    Item(TimestampedName),
    /// The consolidation list of a consolidated fragment or metadata block.
    VacuumList(TimestampedName),
}

impl ItemKey {
    /// Classify the final component `name` of a key under `__commits/` (`commit_suffix` is `.wrt`) or `__meta/` (no suffix).
    pub(crate) fn parse(name: &str, commit_suffix: bool) -> Option<Self> {
        if let Some(name) = name.strip_suffix(VACUUM_SUFFIX) {
            return name.parse().ok().map(Self::VacuumList);
        }
        let name = if commit_suffix {
            name.strip_suffix(COMMIT_SUFFIX)?
        } else {
            name
        };
        name.parse().ok().map(Self::Item)
    }
}

impl TryFrom<&str> for ArrayUri {
    type Error = ArrayUriError;

    fn try_from(uri: &str) -> Result<Self, Self::Error> {
        Self::new(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_uri_normalise() {
        let uri = ArrayUri::new("group/array/").unwrap();
        assert_eq!(uri, ArrayUri::new("/group/array").unwrap());
        assert_eq!(uri.as_str(), "/group/array");
        assert_eq!(uri.prefix().as_str(), "group/array/");
        assert_eq!(
            uri.schema_key().unwrap().as_str(),
            "group/array/__schema.json"
        );

        let root = ArrayUri::new("/").unwrap();
        assert_eq!(root.as_str(), "/");
        assert_eq!(root.commits_prefix().as_str(), "__commits/");

        assert!(ArrayUri::new("a//b").is_err());
        assert!(ArrayUri::new("a/../b").is_err());
    }

    #[test]
    fn item_key_parse() {
        let name = TimestampedName::new(1, 2);
        assert_eq!(
            ItemKey::parse(&format!("{name}.wrt"), true),
            Some(ItemKey::Item(name))
        );
        assert_eq!(
            ItemKey::parse(&format!("{name}.vac"), true),
            Some(ItemKey::VacuumList(name))
        );
        assert_eq!(ItemKey::parse(&name.to_string(), true), None);
        assert_eq!(
            ItemKey::parse(&name.to_string(), false),
            Some(ItemKey::Item(name))
        );
        assert_eq!(ItemKey::parse("notes.txt", false), None);
    }
}
