//! `tessera` configuration.
//!
//! A [`Config`] is a map from option names to string values.
//! A [`Context`](crate::context::Context) holds the default configuration, and an [`Array`](crate::array::Array) handle may carry an override that is overlaid on top of it.
//! Unrecognised options pass through untouched.
//!
//! ## Consolidation
//! | Option | Values | Default |
//! |---|---|---|
//! | [`sm.consolidation.mode`](CONSOLIDATION_MODE) | `fragments`, `array_meta` | `fragments` |
//! | [`sm.consolidation.steps`](CONSOLIDATION_STEPS) | `u32` | [`u32::MAX`] |
//! | [`sm.consolidation.step_min_frags`](CONSOLIDATION_STEP_MIN_FRAGS) | `u32` (at least 2) | 2 |
//! | [`sm.consolidation.step_max_frags`](CONSOLIDATION_STEP_MAX_FRAGS) | `u32` (at least 2) | [`u32::MAX`] |
//! | [`sm.consolidation.step_size_ratio`](CONSOLIDATION_STEP_SIZE_RATIO) | `f64` in `[0, 1]` | 0 |
//! | [`sm.consolidation.timestamp_start`](CONSOLIDATION_TIMESTAMP_START) | `u64` | 0 |
//! | [`sm.consolidation.timestamp_end`](CONSOLIDATION_TIMESTAMP_END) | `u64` | [`u64::MAX`] |
//!
//! ## Vacuum
//! | Option | Values | Default |
//! |---|---|---|
//! | [`sm.vacuum.mode`](VACUUM_MODE) | `fragments`, `array_meta`, `all` | `all` |
//! | [`sm.vacuum.timestamp_start`](VACUUM_TIMESTAMP_START) | `u64` | 0 |
//! | [`sm.vacuum.timestamp_end`](VACUUM_TIMESTAMP_END) | `u64` | [`u64::MAX`] |

use std::{collections::BTreeMap, str::FromStr};

use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What [`consolidate`](crate::consolidation::consolidate) merges.
pub const CONSOLIDATION_MODE: &str = "sm.consolidation.mode";
/// The maximum number of consolidation steps.
pub const CONSOLIDATION_STEPS: &str = "sm.consolidation.steps";
/// The minimum number of fragments merged in one step.
pub const CONSOLIDATION_STEP_MIN_FRAGS: &str = "sm.consolidation.step_min_frags";
/// The maximum number of fragments merged in one step.
pub const CONSOLIDATION_STEP_MAX_FRAGS: &str = "sm.consolidation.step_max_frags";
/// The minimum size ratio of adjacent fragments merged in one step.
pub const CONSOLIDATION_STEP_SIZE_RATIO: &str = "sm.consolidation.step_size_ratio";
/// The start of the consolidation timestamp window.
pub const CONSOLIDATION_TIMESTAMP_START: &str = "sm.consolidation.timestamp_start";
/// The end of the consolidation timestamp window.
pub const CONSOLIDATION_TIMESTAMP_END: &str = "sm.consolidation.timestamp_end";
/// What [`vacuum`](crate::vacuum::vacuum) deletes.
pub const VACUUM_MODE: &str = "sm.vacuum.mode";
/// The start of the vacuum timestamp window.
pub const VACUUM_TIMESTAMP_START: &str = "sm.vacuum.timestamp_start";
/// The end of the vacuum timestamp window.
pub const VACUUM_TIMESTAMP_END: &str = "sm.vacuum.timestamp_end";

/// A configuration option error.
#[derive(Clone, Debug, Error)]
#[error("invalid value {value:?} for configuration option {key}: {reason}")]
pub struct ConfigError {
    key: String,
    value: String,
    reason: String,
}

impl ConfigError {
    /// Create a new configuration option error.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Return the option name.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// The consolidation mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display)]
pub enum ConsolidationMode {
    /// Consolidate fragments.
    #[default]
    #[display("fragments")]
    Fragments,
    /// Consolidate metadata blocks.
    #[display("array_meta")]
    ArrayMeta,
}

impl FromStr for ConsolidationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fragments" => Ok(Self::Fragments),
            "array_meta" => Ok(Self::ArrayMeta),
            _ => Err("expected fragments or array_meta".to_string()),
        }
    }
}

/// The vacuum mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display)]
pub enum VacuumMode {
    /// Vacuum superseded fragments.
    #[display("fragments")]
    Fragments,
    /// Vacuum superseded metadata blocks.
    #[display("array_meta")]
    ArrayMeta,
    /// Vacuum superseded fragments and metadata blocks.
    #[default]
    #[display("all")]
    All,
}

impl VacuumMode {
    /// Returns true if fragments are vacuumed.
    #[must_use]
    pub fn fragments(self) -> bool {
        matches!(self, Self::Fragments | Self::All)
    }

    /// Returns true if metadata blocks are vacuumed.
    #[must_use]
    pub fn array_meta(self) -> bool {
        matches!(self, Self::ArrayMeta | Self::All)
    }
}

impl FromStr for VacuumMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fragments" => Ok(Self::Fragments),
            "array_meta" => Ok(Self::ArrayMeta),
            "all" => Ok(Self::All),
            _ => Err("expected fragments, array_meta, or all".to_string()),
        }
    }
}

/// The fragment consolidation policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConsolidationPolicy {
    /// The maximum number of consolidation steps.
    pub steps: u32,
    /// The minimum number of fragments merged in one step.
    pub step_min_frags: u32,
    /// The maximum number of fragments merged in one step.
    pub step_max_frags: u32,
    /// The minimum ratio `smaller / larger` of the sizes of adjacent fragments merged in one step.
    pub step_size_ratio: f64,
}

impl Default for ConsolidationPolicy {
    fn default() -> Self {
        Self {
            steps: u32::MAX,
            step_min_frags: 2,
            step_max_frags: u32::MAX,
            step_size_ratio: 0.0,
        }
    }
}

/// A `tessera` configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    options: BTreeMap<String, String>,
}

impl Config {
    /// Create an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the option `key` to `value`.
    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        self.options.insert(key.into(), value.to_string());
        self
    }

    /// Set the option `key` to `value`, consuming and returning the configuration.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    /// Remove the option `key`.
    pub fn unset(&mut self, key: &str) -> &mut Self {
        self.options.remove(key);
        self
    }

    /// Get the raw value of the option `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Iterate over the options in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.options.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Return this configuration with the options of `overrides` taking precedence.
    #[must_use]
    pub fn overlay(&self, overrides: &Config) -> Config {
        let mut options = self.options.clone();
        options.extend(overrides.options.clone());
        Config { options }
    }

    /// Get the option `key` parsed as `T`, or `default` if it is not set.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the option is set and cannot be parsed.
    pub fn get_parsed<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(value) => value
                .trim()
                .parse::<T>()
                .map_err(|err| ConfigError::new(key, value, err.to_string())),
            None => Ok(default),
        }
    }

    /// The consolidation mode.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if [`CONSOLIDATION_MODE`] is invalid.
    pub fn consolidation_mode(&self) -> Result<ConsolidationMode, ConfigError> {
        self.get_parsed(CONSOLIDATION_MODE, ConsolidationMode::default())
    }

    /// The fragment consolidation policy.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if a policy option is invalid.
    pub fn consolidation_policy(&self) -> Result<ConsolidationPolicy, ConfigError> {
        let default = ConsolidationPolicy::default();
        let policy = ConsolidationPolicy {
            steps: self.get_parsed(CONSOLIDATION_STEPS, default.steps)?,
            step_min_frags: self.get_parsed(CONSOLIDATION_STEP_MIN_FRAGS, default.step_min_frags)?,
            step_max_frags: self.get_parsed(CONSOLIDATION_STEP_MAX_FRAGS, default.step_max_frags)?,
            step_size_ratio: self
                .get_parsed(CONSOLIDATION_STEP_SIZE_RATIO, default.step_size_ratio)?,
        };
        let invalid = |key: &str, reason: &str| {
            ConfigError::new(key, self.get(key).unwrap_or_default(), reason)
        };
        if policy.step_min_frags < 2 {
            return Err(invalid(CONSOLIDATION_STEP_MIN_FRAGS, "must be at least 2"));
        }
        if policy.step_max_frags < policy.step_min_frags {
            return Err(invalid(
                CONSOLIDATION_STEP_MAX_FRAGS,
                "must not be less than sm.consolidation.step_min_frags",
            ));
        }
        if !(0.0..=1.0).contains(&policy.step_size_ratio) {
            return Err(invalid(CONSOLIDATION_STEP_SIZE_RATIO, "must be in [0, 1]"));
        }
        Ok(policy)
    }

    /// The consolidation timestamp window `(start, end)`.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if a timestamp is invalid or start exceeds end.
    pub fn consolidation_timestamps(&self) -> Result<(u64, u64), ConfigError> {
        self.timestamps(CONSOLIDATION_TIMESTAMP_START, CONSOLIDATION_TIMESTAMP_END)
    }

    /// The vacuum mode.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if [`VACUUM_MODE`] is invalid.
    pub fn vacuum_mode(&self) -> Result<VacuumMode, ConfigError> {
        self.get_parsed(VACUUM_MODE, VacuumMode::default())
    }

    /// The vacuum timestamp window `(start, end)`.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if a timestamp is invalid or start exceeds end.
    pub fn vacuum_timestamps(&self) -> Result<(u64, u64), ConfigError> {
        self.timestamps(VACUUM_TIMESTAMP_START, VACUUM_TIMESTAMP_END)
    }

    fn timestamps(&self, start_key: &str, end_key: &str) -> Result<(u64, u64), ConfigError> {
        let start = self.get_parsed(start_key, 0u64)?;
        let end = self.get_parsed(end_key, u64::MAX)?;
        if start > end {
            return Err(ConfigError::new(
                start_key,
                start.to_string(),
                format!("must not exceed {end_key} ({end})"),
            ));
        }
        Ok((start, end))
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for Config {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut config = Config::new();
        for (key, value) in iter {
            config.set(key, value);
        }
        config
    }
}
