//! Committed timestamped items and the consolidation lists that supersede them.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tessera_storage::{Bytes, StorageError, StoreKey};

use super::TimestampedName;

/// The committed fragments (or metadata blocks) of an array.
///
/// A consolidated item owns a *consolidation list* naming the items it supersedes.
/// An item is visible in a timestamp window if it lies within the window and is not listed by any consolidated item that also lies within the window.
/// Consolidated items cover the timestamps of their inputs, so a window that excludes a consolidated item still sees its inputs until they are vacuumed.
#[derive(Clone, Debug, Default)]
pub(crate) struct Timeline {
    items: BTreeSet<TimestampedName>,
    consolidation_lists: BTreeMap<TimestampedName, Vec<TimestampedName>>,
}

impl Timeline {
    pub(crate) fn new(
        items: BTreeSet<TimestampedName>,
        consolidation_lists: BTreeMap<TimestampedName, Vec<TimestampedName>>,
    ) -> Self {
        Self {
            items,
            consolidation_lists,
        }
    }

    /// All committed items in precedence order.
    pub(crate) fn items(&self) -> impl Iterator<Item = &TimestampedName> {
        self.items.iter()
    }

    /// Items merged from inputs with different timestamps, in precedence order.
    ///
    /// These remain identifiable after vacuum removes their consolidation lists.
    pub(crate) fn merged(&self) -> impl Iterator<Item = &TimestampedName> {
        self.items
            .iter()
            .filter(|name| name.timestamp_start() < name.timestamp_end())
    }

    /// Consolidated items within `[start, end]` and the items they supersede.
    pub(crate) fn consolidation_lists(
        &self,
        start: u64,
        end: u64,
    ) -> impl Iterator<Item = (&TimestampedName, &Vec<TimestampedName>)> {
        self.consolidation_lists
            .iter()
            .filter(move |(name, _)| name.within(start, end))
    }

    /// The items superseded by a consolidated item within `[start, end]`.
    pub(crate) fn superseded(&self, start: u64, end: u64) -> HashSet<TimestampedName> {
        self.consolidation_lists(start, end)
            .flat_map(|(_, inputs)| inputs.iter().copied())
            .collect()
    }

    /// The items visible in `[start, end]`, in precedence order.
    pub(crate) fn visible(&self, start: u64, end: u64) -> Vec<TimestampedName> {
        let superseded = self.superseded(start, end);
        self.items
            .iter()
            .filter(|name| name.within(start, end) && !superseded.contains(name))
            .copied()
            .collect()
    }

    /// The items visible to a reader with an unbounded window, in precedence order.
    pub(crate) fn current(&self) -> Vec<TimestampedName> {
        self.visible(0, u64::MAX)
    }
}

/// Encode a consolidation list: one name per line.
pub(crate) fn encode_consolidation_list(inputs: &[TimestampedName]) -> Bytes {
    let mut list = String::new();
    for input in inputs {
        list.push_str(&input.to_string());
        list.push('\n');
    }
    Bytes::from(list)
}

/// Decode a consolidation list stored at `key`.
pub(crate) fn decode_consolidation_list(
    key: &StoreKey,
    bytes: &[u8],
) -> Result<Vec<TimestampedName>, StorageError> {
    let list = std::str::from_utf8(bytes)
        .map_err(|err| StorageError::InvalidMetadata(key.clone(), err.to_string()))?;
    list.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            line.trim()
                .parse()
                .map_err(|err: super::TimestampedNameError| {
                    StorageError::InvalidMetadata(key.clone(), err.to_string())
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeline_visibility() {
        let a = TimestampedName::new(1, 1);
        let b = TimestampedName::new(2, 2);
        let c = TimestampedName::new(3, 3);
        let merged = TimestampedName::new(1, 2);
        let timeline = Timeline::new(
            [a, b, c, merged].into_iter().collect(),
            [(merged, vec![a, b])].into_iter().collect(),
        );
        assert_eq!(timeline.current(), vec![merged, c]);
        // the consolidated fragment is outside the window, so its inputs remain visible
        assert_eq!(timeline.visible(2, 3), vec![b, c]);
        assert_eq!(timeline.visible(0, 1), vec![a]);
        assert_eq!(timeline.superseded(0, 3), [a, b].into_iter().collect());
        assert_eq!(timeline.merged().collect::<Vec<_>>(), vec![&merged]);
    }

    #[test]
    fn consolidation_list_codec() {
        let key = StoreKey::new("a/__commits/x.vac").unwrap();
        let inputs = vec![TimestampedName::new(1, 1), TimestampedName::new(2, 2)];
        let bytes = encode_consolidation_list(&inputs);
        assert_eq!(decode_consolidation_list(&key, &bytes).unwrap(), inputs);
        assert!(matches!(
            decode_consolidation_list(&key, b"garbage\n"),
            Err(StorageError::InvalidMetadata(..))
        ));
    }
}
