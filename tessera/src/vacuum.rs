//! Vacuuming: deleting fragments and metadata blocks superseded by consolidation.

use std::collections::{BTreeSet, HashSet};

use tessera_storage::WritableStorageTraits;

use crate::{
    array::{
        ArrayError, ArrayUri, TimestampedName, fragment, metadata_store, schema, timeline::Timeline,
    },
    config::Config,
    context::Context,
};

/// The items deleted by a vacuum.
#[derive(Debug, Default)]
struct VacuumPlan {
    /// Consolidated items within the vacuum window.
    consolidated: Vec<TimestampedName>,
    /// The items they supersede, in precedence order.
    targets: BTreeSet<TimestampedName>,
}

impl VacuumPlan {
    fn new(timeline: &Timeline, start: u64, end: u64) -> Self {
        let mut plan = Self::default();
        for (name, inputs) in timeline.consolidation_lists(start, end) {
            plan.consolidated.push(*name);
            plan.targets.extend(inputs.iter().copied());
        }
        plan
    }

    fn targets(&self) -> HashSet<TimestampedName> {
        self.targets.iter().copied().collect()
    }
}

/// Vacuum the array at `uri`.
///
/// Deletes the fragments and metadata blocks superseded by a consolidated fragment or block within the vacuum window
/// ([`sm.vacuum.timestamp_start`](crate::config::VACUUM_TIMESTAMP_START), [`sm.vacuum.timestamp_end`](crate::config::VACUUM_TIMESTAMP_END)),
/// then the consolidation lists of the consolidated fragments and blocks.
/// [`sm.vacuum.mode`](crate::config::VACUUM_MODE) selects whether fragments, metadata blocks, or both are vacuumed.
/// `config` is overlaid on the context configuration.
///
/// Items are deleted in precedence order, so an interrupted vacuum leaves the array readable with the same content.
/// Vacuuming an array without consolidated items is a no-op.
///
/// # Errors
/// Returns an [`ArrayError`] if
///  - the configuration is invalid ([`ArrayError::ConfigError`]) or the vacuum window is empty ([`ArrayError::InvalidArgument`]),
///  - the array does not exist ([`ArrayError::StorageError`]),
///  - the array is being consolidated or vacuumed in `ctx`, or an array open in `ctx` sees an item to be deleted ([`ArrayError::ConcurrentModification`]), or
///  - there is an underlying store error.
///
/// Nothing is deleted if the array is being modified concurrently.
pub fn vacuum(ctx: &Context, uri: &str, config: Option<&Config>) -> Result<(), ArrayError> {
    let uri = ArrayUri::new(uri)?;
    let config = ctx.effective_config(config);
    let mode = config.vacuum_mode()?;
    let (start, end) = config.vacuum_timestamps()?;
    if start > end {
        return Err(ArrayError::InvalidArgument(format!(
            "the vacuum window start {start} exceeds the end {end}"
        )));
    }

    let storage = ctx.storage();
    schema::retrieve_encryption_type(&**storage, &uri)?;
    let guard = ctx.activity().begin_vacuum(&uri)?;

    let fragments = if mode.fragments() {
        VacuumPlan::new(&fragment::list_fragments(&**storage, &uri)?, start, end)
    } else {
        VacuumPlan::default()
    };
    let metadata = if mode.array_meta() {
        VacuumPlan::new(
            &metadata_store::list_metadata_blocks(&**storage, &uri)?,
            start,
            end,
        )
    } else {
        VacuumPlan::default()
    };
    guard.check_targets(&fragments.targets(), &metadata.targets())?;

    for name in &fragments.targets {
        fragment::erase_fragment(&**storage, &uri, name)?;
    }
    for name in &fragments.consolidated {
        storage.erase(&uri.fragment_vacuum_key(name)?)?;
    }
    for name in &metadata.targets {
        metadata_store::erase_block(&**storage, &uri, name)?;
    }
    for name in &metadata.consolidated {
        storage.erase(&uri.metadata_vacuum_key(name)?)?;
    }

    log::debug!(
        "vacuumed {} fragment(s) and {} metadata block(s) of array {uri}",
        fragments.targets.len(),
        metadata.targets.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn vacuum_plan_window() {
        let a = TimestampedName::new(1, 1);
        let b = TimestampedName::new(2, 2);
        let ab = TimestampedName::new(1, 2);
        let c = TimestampedName::new(5, 5);
        let d = TimestampedName::new(6, 6);
        let cd = TimestampedName::new(5, 6);
        let timeline = Timeline::new(
            [a, b, ab, c, d, cd].into_iter().collect(),
            BTreeMap::from([(ab, vec![a, b]), (cd, vec![c, d])]),
        );

        let plan = VacuumPlan::new(&timeline, 0, u64::MAX);
        assert_eq!(plan.consolidated, vec![ab, cd]);
        assert_eq!(plan.targets, [a, b, c, d].into_iter().collect());

        let plan = VacuumPlan::new(&timeline, 0, 4);
        assert_eq!(plan.consolidated, vec![ab]);
        assert_eq!(plan.targets(), [a, b].into_iter().collect());

        assert!(VacuumPlan::new(&timeline, 3, 4).targets.is_empty());
    }
}
