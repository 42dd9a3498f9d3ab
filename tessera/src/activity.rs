//! Tracking of open arrays, consolidations and vacuums within a [`Context`](crate::context::Context).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::array::{ArrayError, ArrayUri, TimestampedName};

/// The fragments and metadata blocks referenced by an open array.
#[derive(Clone, Debug, Default)]
pub(crate) struct ViewReferences {
    pub(crate) fragments: HashSet<TimestampedName>,
    pub(crate) metadata: HashSet<TimestampedName>,
}

#[derive(Debug, Default)]
struct ArrayActivity {
    views: HashMap<u64, ViewReferences>,
    consolidations: usize,
    vacuuming: bool,
}

impl ArrayActivity {
    fn is_idle(&self) -> bool {
        self.views.is_empty() && self.consolidations == 0 && !self.vacuuming
    }
}

#[derive(Debug, Default)]
struct Activities {
    arrays: HashMap<ArrayUri, ArrayActivity>,
    /// Completed vacuums of any array in the context.
    vacuums: u64,
}

impl Activities {
    /// Remove the entry of `uri` if nothing refers to it.
    fn prune(&mut self, uri: &ArrayUri) {
        if self.arrays.get(uri).is_some_and(ArrayActivity::is_idle) {
            self.arrays.remove(uri);
        }
    }
}

/// The per-array activity of a context.
///
/// Arrays without activity have no entry.
#[derive(Debug, Default)]
pub(crate) struct ActivityRegistry {
    activities: Mutex<Activities>,
    next_view_id: AtomicU64,
}

impl ActivityRegistry {
    pub(crate) fn new_view_id(&self) -> u64 {
        self.next_view_id.fetch_add(1, Ordering::Relaxed)
    }

    /// The number of completed vacuums in the context.
    ///
    /// The count never decreases, so it stays valid across pruned entries.
    pub(crate) fn vacuum_generation(&self) -> u64 {
        self.activities.lock().vacuums
    }

    /// Register the references of an open array.
    ///
    /// Returns false without registering if a vacuum is running or has completed since `generation` was read,
    /// in which case the references may be stale and the caller should list the array again.
    pub(crate) fn register_view(
        &self,
        uri: &ArrayUri,
        view_id: u64,
        references: ViewReferences,
        generation: u64,
    ) -> bool {
        let mut activities = self.activities.lock();
        if activities.vacuums != generation
            || activities
                .arrays
                .get(uri)
                .is_some_and(|activity| activity.vacuuming)
        {
            return false;
        }
        activities
            .arrays
            .entry(uri.clone())
            .or_default()
            .views
            .insert(view_id, references);
        true
    }

    pub(crate) fn deregister_view(&self, uri: &ArrayUri, view_id: u64) {
        let mut activities = self.activities.lock();
        if let Some(activity) = activities.arrays.get_mut(uri) {
            activity.views.remove(&view_id);
        }
        activities.prune(uri);
    }

    /// The number of arrays open on `uri`.
    pub(crate) fn open_views(&self, uri: &ArrayUri) -> usize {
        self.activities
            .lock()
            .arrays
            .get(uri)
            .map_or(0, |activity| activity.views.len())
    }

    /// Mark a consolidation of `uri` as running until the guard is dropped.
    pub(crate) fn begin_consolidation(
        &self,
        uri: &ArrayUri,
    ) -> Result<ConsolidationGuard<'_>, ArrayError> {
        let mut activities = self.activities.lock();
        let activity = activities.arrays.entry(uri.clone()).or_default();
        if activity.vacuuming {
            return Err(ArrayError::ConcurrentModification(format!(
                "cannot consolidate array {uri} while it is being vacuumed"
            )));
        }
        activity.consolidations += 1;
        Ok(ConsolidationGuard {
            registry: self,
            uri: uri.clone(),
        })
    }

    /// Mark a vacuum of `uri` as running until the guard is dropped.
    pub(crate) fn begin_vacuum(&self, uri: &ArrayUri) -> Result<VacuumGuard<'_>, ArrayError> {
        let mut activities = self.activities.lock();
        let activity = activities.arrays.entry(uri.clone()).or_default();
        if activity.consolidations > 0 {
            return Err(ArrayError::ConcurrentModification(format!(
                "cannot vacuum array {uri} while it is being consolidated"
            )));
        }
        if activity.vacuuming {
            return Err(ArrayError::ConcurrentModification(format!(
                "array {uri} is already being vacuumed"
            )));
        }
        activity.vacuuming = true;
        Ok(VacuumGuard {
            registry: self,
            uri: uri.clone(),
        })
    }
}

/// A running consolidation.
#[derive(Debug)]
pub(crate) struct ConsolidationGuard<'a> {
    registry: &'a ActivityRegistry,
    uri: ArrayUri,
}

impl Drop for ConsolidationGuard<'_> {
    fn drop(&mut self) {
        let mut activities = self.registry.activities.lock();
        if let Some(activity) = activities.arrays.get_mut(&self.uri) {
            activity.consolidations = activity.consolidations.saturating_sub(1);
        }
        activities.prune(&self.uri);
    }
}

/// A running vacuum.
///
/// Arrays cannot be opened on the vacuumed URI while the guard is alive.
#[derive(Debug)]
pub(crate) struct VacuumGuard<'a> {
    registry: &'a ActivityRegistry,
    uri: ArrayUri,
}

impl VacuumGuard<'_> {
    /// Check that no open array references a fragment or metadata block about to be deleted.
    pub(crate) fn check_targets(
        &self,
        fragments: &HashSet<TimestampedName>,
        metadata: &HashSet<TimestampedName>,
    ) -> Result<(), ArrayError> {
        let activities = self.registry.activities.lock();
        let Some(activity) = activities.arrays.get(&self.uri) else {
            return Ok(());
        };
        for references in activity.views.values() {
            if let Some(name) = references.fragments.intersection(fragments).next() {
                return Err(ArrayError::ConcurrentModification(format!(
                    "cannot vacuum fragment {name} of array {} referenced by an open array",
                    self.uri
                )));
            }
            if let Some(name) = references.metadata.intersection(metadata).next() {
                return Err(ArrayError::ConcurrentModification(format!(
                    "cannot vacuum metadata block {name} of array {} referenced by an open array",
                    self.uri
                )));
            }
        }
        Ok(())
    }
}

impl Drop for VacuumGuard<'_> {
    fn drop(&mut self) {
        let mut activities = self.registry.activities.lock();
        if let Some(activity) = activities.arrays.get_mut(&self.uri) {
            activity.vacuuming = false;
        }
        activities.vacuums += 1;
        activities.prune(&self.uri);
    }
}
