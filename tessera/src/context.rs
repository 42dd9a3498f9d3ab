//! The runtime context shared by arrays.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use tessera_storage::ReadableWritableListableStorage;

use crate::{activity::ActivityRegistry, config::Config};

/// A source of timestamps in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// The current timestamp.
    fn now(&self) -> u64;
}

/// The system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |duration| {
                u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
            })
    }
}

/// A manually advanced clock for deterministic timestamps.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a new manual clock at `now`.
    #[must_use]
    pub fn new(now: u64) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    /// Set the current timestamp.
    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Advance the current timestamp by `milliseconds`.
    pub fn advance(&self, milliseconds: u64) {
        self.now.fetch_add(milliseconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// A `tessera` context: storage, default configuration and clock.
///
/// A context is shared between arrays with an [`Arc`].
/// Arrays keep their context alive for their own lifetime.
/// The context also tracks the arrays opened through it and the consolidations and vacuums running on them,
/// so that a vacuum never deletes fragments or metadata blocks referenced by an open array of the same context.
pub struct Context {
    storage: ReadableWritableListableStorage,
    config: Config,
    clock: Arc<dyn Clock>,
    activity: ActivityRegistry,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Create a new context with the default configuration and the system clock.
    #[must_use]
    pub fn new(storage: ReadableWritableListableStorage) -> Self {
        Self {
            storage,
            config: Config::default(),
            clock: Arc::new(SystemClock),
            activity: ActivityRegistry::default(),
        }
    }

    /// Replace the default configuration.
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The storage.
    #[must_use]
    pub fn storage(&self) -> &ReadableWritableListableStorage {
        &self.storage
    }

    /// The default configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The default configuration overlaid with `overrides`.
    #[must_use]
    pub fn effective_config(&self, overrides: Option<&Config>) -> Config {
        match overrides {
            Some(overrides) => self.config.overlay(overrides),
            None => self.config.clone(),
        }
    }

    /// The current timestamp in milliseconds.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub(crate) fn activity(&self) -> &ActivityRegistry {
        &self.activity
    }
}
