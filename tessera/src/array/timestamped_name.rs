use std::{cmp::Ordering, fmt, str::FromStr};

use thiserror::Error;
use uuid::Uuid;

/// The name of a fragment or metadata block: `__<t1>_<t2>_<uuid>`.
///
/// `t1` and `t2` are the first and last write timestamps covered by the item, in milliseconds since the Unix epoch.
/// A newly written item has `t1 == t2`; a consolidated item covers the timestamps of its inputs.
///
/// Names are ordered by precedence: ascending `(t2, uuid)`.
/// Where items overlap, the later one in this order wins.
/// The `uuid` is a version 7 UUID, so items written later within the same millisecond sort later.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimestampedName {
    timestamp_start: u64,
    timestamp_end: u64,
    uuid: Uuid,
}

/// An invalid [`TimestampedName`].
#[derive(Clone, Debug, Error)]
#[error("invalid fragment or metadata block name {0:?}")]
pub struct TimestampedNameError(String);

impl TimestampedName {
    /// Create a new name covering `[timestamp_start, timestamp_end]` with a fresh UUID.
    ///
    /// The timestamps are swapped if `timestamp_start > timestamp_end`.
    #[must_use]
    pub fn new(timestamp_start: u64, timestamp_end: u64) -> Self {
        Self {
            timestamp_start: timestamp_start.min(timestamp_end),
            timestamp_end: timestamp_start.max(timestamp_end),
            uuid: Uuid::now_v7(),
        }
    }

    /// The first timestamp covered by the item.
    #[must_use]
    pub const fn timestamp_start(&self) -> u64 {
        self.timestamp_start
    }

    /// The last timestamp covered by the item.
    #[must_use]
    pub const fn timestamp_end(&self) -> u64 {
        self.timestamp_end
    }

    /// The UUID of the item.
    #[must_use]
    pub const fn uuid(&self) -> &Uuid {
        &self.uuid
    }

    /// Returns true if the item lies entirely within the inclusive window `[start, end]`.
    #[must_use]
    pub const fn within(&self, start: u64, end: u64) -> bool {
        start <= self.timestamp_start && self.timestamp_end <= end
    }
}

impl Ord for TimestampedName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp_end
            .cmp(&other.timestamp_end)
            .then_with(|| self.uuid.cmp(&other.uuid))
            .then_with(|| self.timestamp_start.cmp(&other.timestamp_start))
    }
}

impl PartialOrd for TimestampedName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TimestampedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "__{}_{}_{}",
            self.timestamp_start,
            self.timestamp_end,
            self.uuid.simple()
        )
    }
}

impl FromStr for TimestampedName {
    type Err = TimestampedNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || TimestampedNameError(s.to_string());
        let mut parts = s.strip_prefix("__").ok_or_else(err)?.splitn(3, '_');
        let (Some(t1), Some(t2), Some(uuid)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(err());
        };
        let timestamp_start = t1.parse::<u64>().map_err(|_| err())?;
        let timestamp_end = t2.parse::<u64>().map_err(|_| err())?;
        let uuid = Uuid::try_parse(uuid).map_err(|_| err())?;
        if timestamp_start > timestamp_end {
            return Err(err());
        }
        Ok(Self {
            timestamp_start,
            timestamp_end,
            uuid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamped_name_parse() {
        let name = TimestampedName::new(5, 9);
        let parsed: TimestampedName = name.to_string().parse().unwrap();
        assert_eq!(parsed, name);
        assert!(name.to_string().starts_with("__5_9_"));

        assert!("5_9_0190a0a0a0a07000800000000000000".parse::<TimestampedName>().is_err());
        assert!("__9_5_0190a0a0a0a070008000000000000000".parse::<TimestampedName>().is_err());
        assert!("__a_5_0190a0a0a0a070008000000000000000".parse::<TimestampedName>().is_err());
        assert!("__1_5_not-a-uuid".parse::<TimestampedName>().is_err());
        assert!("__1_5".parse::<TimestampedName>().is_err());
    }

    #[test]
    fn timestamped_name_order() {
        let a = TimestampedName::new(1, 10);
        let b = TimestampedName::new(5, 5);
        let c = TimestampedName::new(5, 5);
        assert!(b < a);
        assert!(b < c); // same end timestamp, later uuid
        assert!(a.within(1, 10));
        assert!(!a.within(2, 10));
        assert!(!a.within(1, 9));
    }
}
