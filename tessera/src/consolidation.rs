//! Fragment and metadata consolidation.
//!
//! Consolidation merges runs of fragments (or metadata blocks) into one new fragment (or block) that supersedes them.
//! The inputs are never deleted: readers keep seeing the same content, and the inputs stay visible to windows that exclude the merged item.
//! Superseded items are deleted by [`vacuum`](crate::vacuum::vacuum).
//!
//! A merged item takes the smallest start timestamp and the largest end timestamp of its inputs.
//! Only runs that are contiguous in precedence order are merged, and a run never ends inside a group of items sharing an end timestamp,
//! so the merged item occupies the exact precedence position of its inputs.

use std::collections::BTreeSet;

use itertools::Itertools;

use crate::{
    array::{
        ArrayError, ArrayUri, TimestampedName,
        fragment::{self, Cells},
        metadata_store, schema,
    },
    config::{Config, ConsolidationMode, ConsolidationPolicy},
    context::Context,
};

/// Options for [`consolidate_opt`].
///
/// By default, the fragments (or metadata blocks) selected by the configuration are consolidated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsolidationOptions {
    fragments: Option<Vec<String>>,
    timestamps: Option<(u64, u64)>,
}

impl ConsolidationOptions {
    /// Create default consolidation options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consolidate exactly the named fragments.
    ///
    /// See [`consolidate_fragments`].
    #[must_use]
    pub fn with_fragments(mut self, fragments: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.fragments = Some(fragments.into_iter().map(Into::into).collect());
        self
    }

    /// Consolidate within the timestamp window `[start, end]`.
    ///
    /// Overrides [`sm.consolidation.timestamp_start`](crate::config::CONSOLIDATION_TIMESTAMP_START) and [`sm.consolidation.timestamp_end`](crate::config::CONSOLIDATION_TIMESTAMP_END).
    #[must_use]
    pub fn with_timestamps(mut self, start: u64, end: u64) -> Self {
        self.timestamps = Some((start, end));
        self
    }

    /// The named fragments.
    #[must_use]
    pub fn fragments(&self) -> Option<&[String]> {
        self.fragments.as_deref()
    }

    /// The timestamp window.
    #[must_use]
    pub fn timestamps(&self) -> Option<(u64, u64)> {
        self.timestamps
    }
}

/// Consolidate the array at `uri` as selected by the configuration.
///
/// `config` is overlaid on the context configuration.
/// [`sm.consolidation.mode`](crate::config::CONSOLIDATION_MODE) selects whether fragments or metadata blocks are consolidated.
///
/// # Errors
/// See [`consolidate_opt`].
pub fn consolidate(ctx: &Context, uri: &str, config: Option<&Config>) -> Result<(), ArrayError> {
    consolidate_opt(ctx, uri, config, &ConsolidationOptions::default())
}

/// Consolidate the array at `uri` with `options`.
///
/// With [`ConsolidationOptions::with_fragments`], exactly the named fragments are consolidated.
/// Otherwise, [`sm.consolidation.mode`](crate::config::CONSOLIDATION_MODE) selects whether fragments or metadata blocks are consolidated
/// within the timestamp window of the options or the configuration.
///
/// Fragments are consolidated in up to [`sm.consolidation.steps`](crate::config::CONSOLIDATION_STEPS) steps.
/// Each step merges groups of contiguous fragments within the window, each group holding between
/// [`step_min_frags`](crate::config::CONSOLIDATION_STEP_MIN_FRAGS) and [`step_max_frags`](crate::config::CONSOLIDATION_STEP_MAX_FRAGS) fragments,
/// where the ratio of the sizes of adjacent fragments is at least [`step_size_ratio`](crate::config::CONSOLIDATION_STEP_SIZE_RATIO).
/// Consolidation stops early when a step merges nothing.
///
/// # Errors
/// Returns an [`ArrayError`] if
///  - the options set both fragments and timestamps, or the timestamp window is empty ([`ArrayError::InvalidArgument`]),
///  - the configuration is invalid ([`ArrayError::ConfigError`]),
///  - the array does not exist ([`ArrayError::StorageError`]),
///  - the array is being vacuumed in `ctx` ([`ArrayError::ConcurrentModification`]), or
///  - there is an underlying store error.
pub fn consolidate_opt(
    ctx: &Context,
    uri: &str,
    config: Option<&Config>,
    options: &ConsolidationOptions,
) -> Result<(), ArrayError> {
    let config = ctx.effective_config(config);
    match (&options.fragments, options.timestamps) {
        (Some(_), Some(_)) => Err(ArrayError::InvalidArgument(
            "consolidation options cannot set both fragments and timestamps".to_string(),
        )),
        (Some(fragments), None) => {
            consolidate_fragments(ctx, uri, fragments.as_slice(), Some(&config))
        }
        (None, timestamps) => {
            let uri = ArrayUri::new(uri)?;
            let (start, end) = match timestamps {
                Some(timestamps) => timestamps,
                None => config.consolidation_timestamps()?,
            };
            check_window(start, end)?;
            match config.consolidation_mode()? {
                ConsolidationMode::Fragments => {
                    consolidate_fragment_steps(ctx, &uri, &config.consolidation_policy()?, start, end)
                }
                ConsolidationMode::ArrayMeta => consolidate_metadata_window(ctx, &uri, start, end),
            }
        }
    }
}

/// Consolidate exactly the named fragments of the array at `uri`.
///
/// Fragments are named by their name or by their full store key.
/// Repeated names are ignored, and fewer than two distinct fragments is a no-op.
/// `config` is validated but the consolidation policy does not apply.
///
/// # Errors
/// Returns an [`ArrayError`] if
///  - a fragment does not exist or is superseded ([`ArrayError::FragmentNotFound`]),
///  - the fragments are not contiguous in precedence order, or a fragment sharing the end timestamp of the last one follows it ([`ArrayError::InvalidArgument`]),
///  - the array does not exist ([`ArrayError::StorageError`]),
///  - the array is being vacuumed in `ctx` ([`ArrayError::ConcurrentModification`]), or
///  - there is an underlying store error.
pub fn consolidate_fragments(
    ctx: &Context,
    uri: &str,
    fragments: &[impl AsRef<str>],
    config: Option<&Config>,
) -> Result<(), ArrayError> {
    let uri = ArrayUri::new(uri)?;
    ctx.effective_config(config).consolidation_policy()?;
    let storage = ctx.storage();
    schema::retrieve_encryption_type(&**storage, &uri)?;
    let _guard = ctx.activity().begin_consolidation(&uri)?;

    let current = fragment::list_fragments(&**storage, &uri)?.current();
    let mut positions = BTreeSet::new();
    for requested in fragments {
        let requested = requested.as_ref();
        let name = requested.rsplit('/').next().unwrap_or(requested);
        let position = name
            .parse::<TimestampedName>()
            .ok()
            .and_then(|name| current.iter().position(|current| *current == name))
            .ok_or_else(|| ArrayError::FragmentNotFound(requested.to_string()))?;
        positions.insert(position);
    }
    if positions.len() < 2 {
        log::debug!("nothing to consolidate in array {uri}");
        return Ok(());
    }

    let positions: Vec<usize> = positions.into_iter().collect();
    if positions.iter().tuple_windows().any(|(a, b)| b - a != 1) {
        return Err(ArrayError::InvalidArgument(format!(
            "cannot consolidate fragments of array {uri} that are not contiguous in precedence order"
        )));
    }
    if precedence_safe_len(&current, &positions) != positions.len() {
        return Err(ArrayError::InvalidArgument(format!(
            "cannot consolidate fragments of array {uri} followed by a fragment with the same end timestamp"
        )));
    }
    let group: Vec<TimestampedName> = positions.iter().map(|&i| current[i]).collect();
    merge_fragments(ctx, &uri, &group)?;
    Ok(())
}

/// Consolidate the metadata blocks of the array at `uri`.
///
/// The visible metadata blocks within the consolidation timestamp window of the configuration are folded into one block per contiguous run.
/// Delete tombstones are dropped from a run that starts with the first metadata block of the array and spans more than one timestamp.
/// Metadata can no longer be written before the end of such a block, see [`Array::close`](crate::array::Array::close).
///
/// # Errors
/// Returns an [`ArrayError`] if
///  - the configuration is invalid ([`ArrayError::ConfigError`]) or the timestamp window is empty ([`ArrayError::InvalidArgument`]),
///  - the array does not exist ([`ArrayError::StorageError`]),
///  - the array is being vacuumed in `ctx` ([`ArrayError::ConcurrentModification`]), or
///  - there is an underlying store error.
pub fn consolidate_metadata(
    ctx: &Context,
    uri: &str,
    config: Option<&Config>,
) -> Result<(), ArrayError> {
    let uri = ArrayUri::new(uri)?;
    let (start, end) = ctx.effective_config(config).consolidation_timestamps()?;
    check_window(start, end)?;
    consolidate_metadata_window(ctx, &uri, start, end)
}

fn check_window(start: u64, end: u64) -> Result<(), ArrayError> {
    if start > end {
        Err(ArrayError::InvalidArgument(format!(
            "the consolidation window start {start} exceeds the end {end}"
        )))
    } else {
        Ok(())
    }
}

fn consolidate_fragment_steps(
    ctx: &Context,
    uri: &ArrayUri,
    policy: &ConsolidationPolicy,
    start: u64,
    end: u64,
) -> Result<(), ArrayError> {
    let storage = ctx.storage();
    schema::retrieve_encryption_type(&**storage, uri)?;
    let _guard = ctx.activity().begin_consolidation(uri)?;

    for step in 0..policy.steps {
        let current = fragment::list_fragments(&**storage, uri)?.current();
        let sizes = current
            .iter()
            .map(|name| fragment::fragment_size(&**storage, uri, name))
            .collect::<Result<Vec<_>, _>>()?;
        let groups = select_groups(&current, &sizes, policy, start, end);
        if groups.is_empty() {
            break;
        }
        log::debug!(
            "consolidation step {step} of array {uri} merges {} group(s)",
            groups.len()
        );
        for group in groups {
            let group: Vec<TimestampedName> = group.into_iter().map(|i| current[i]).collect();
            merge_fragments(ctx, uri, &group)?;
        }
    }
    Ok(())
}

/// Merge `group` into a new fragment that supersedes it.
fn merge_fragments(
    ctx: &Context,
    uri: &ArrayUri,
    group: &[TimestampedName],
) -> Result<TimestampedName, ArrayError> {
    let storage = ctx.storage();
    let mut cells = Cells::new();
    for name in group {
        let fragment = fragment::retrieve_fragment(&**storage, uri, name)?
            .ok_or_else(|| ArrayError::FragmentNotFound(name.to_string()))?;
        cells.extend(fragment);
    }
    let merged = merged_name(group);
    fragment::store_fragment(&**storage, uri, &merged, &cells, group)?;
    log::debug!(
        "consolidated {} fragment(s) of array {uri} into {merged}",
        group.len()
    );
    Ok(merged)
}

fn merged_name(group: &[TimestampedName]) -> TimestampedName {
    let start = group
        .iter()
        .map(TimestampedName::timestamp_start)
        .min()
        .unwrap_or_default();
    let end = group
        .iter()
        .map(TimestampedName::timestamp_end)
        .max()
        .unwrap_or_default();
    TimestampedName::new(start, end)
}

/// The length of the longest prefix of `run` that can be merged without the merged item overtaking the item following `run`.
///
/// `run` holds contiguous positions in `current`.
fn precedence_safe_len(current: &[TimestampedName], run: &[usize]) -> usize {
    let Some(&last) = run.last() else {
        return 0;
    };
    match current.get(last + 1) {
        Some(next) => run
            .iter()
            .take_while(|&&i| current[i].timestamp_end() < next.timestamp_end())
            .count(),
        None => run.len(),
    }
}

/// Returns true if the sizes of adjacent fragments satisfy the size ratio.
#[allow(clippy::cast_precision_loss)]
fn size_ratio_ok(a: u64, b: u64, ratio: f64) -> bool {
    let (min, max) = if a < b { (a, b) } else { (b, a) };
    max == 0 || min as f64 / max as f64 >= ratio
}

/// Select the groups of positions in `current` merged by one consolidation step.
fn select_groups(
    current: &[TimestampedName],
    sizes: &[u64],
    policy: &ConsolidationPolicy,
    start: u64,
    end: u64,
) -> Vec<Vec<usize>> {
    let min_frags = usize::try_from(policy.step_min_frags).unwrap_or(usize::MAX);
    let max_frags = usize::try_from(policy.step_max_frags).unwrap_or(usize::MAX);
    let ratio = policy.step_size_ratio;

    let mut groups = Vec::new();
    let close = |groups: &mut Vec<Vec<usize>>, group: &mut Vec<usize>| {
        if group.len() >= min_frags {
            groups.push(std::mem::take(group));
        } else {
            group.clear();
        }
    };

    for (candidate, run) in &(0..current.len()).chunk_by(|&i| current[i].within(start, end)) {
        if !candidate {
            continue;
        }
        let run: Vec<usize> = run.collect();
        let run = &run[..precedence_safe_len(current, &run)];

        // items sharing an end timestamp are merged together or not at all
        let segments: Vec<Vec<usize>> = run
            .iter()
            .chunk_by(|&&i| current[i].timestamp_end())
            .into_iter()
            .map(|(_, segment)| segment.copied().collect())
            .collect();

        let mut group: Vec<usize> = Vec::new();
        for segment in segments {
            let mergeable = segment.len() <= max_frags
                && segment
                    .iter()
                    .tuple_windows()
                    .all(|(&a, &b)| size_ratio_ok(sizes[a], sizes[b], ratio));
            if !mergeable {
                close(&mut groups, &mut group);
                continue;
            }
            let fits = group.last().is_none_or(|&last| {
                group.len() + segment.len() <= max_frags
                    && size_ratio_ok(sizes[last], sizes[segment[0]], ratio)
            });
            if !fits {
                close(&mut groups, &mut group);
            }
            group.extend(segment);
        }
        close(&mut groups, &mut group);
    }
    groups
}

fn consolidate_metadata_window(
    ctx: &Context,
    uri: &ArrayUri,
    start: u64,
    end: u64,
) -> Result<(), ArrayError> {
    let storage = ctx.storage();
    schema::retrieve_encryption_type(&**storage, uri)?;
    let _guard = ctx.activity().begin_consolidation(uri)?;

    let current = metadata_store::list_metadata_blocks(&**storage, uri)?.current();
    let mut runs = Vec::new();
    for (candidate, run) in &(0..current.len()).chunk_by(|&i| current[i].within(start, end)) {
        if candidate {
            let run: Vec<usize> = run.collect();
            let len = precedence_safe_len(&current, &run);
            if len >= 2 {
                runs.push(run[..len].to_vec());
            }
        }
    }
    if runs.is_empty() {
        log::debug!("no metadata to consolidate in array {uri}");
    }

    for run in runs {
        let inputs: Vec<TimestampedName> = run.iter().map(|&i| current[i]).collect();
        let merged = merged_name(&inputs);
        // only blocks spanning distinct timestamps are guarded against earlier writes
        let drop_tombstones =
            run.first() == Some(&0) && merged.timestamp_start() < merged.timestamp_end();
        let mut blocks = Vec::with_capacity(inputs.len());
        for name in &inputs {
            let block = metadata_store::retrieve_block(&**storage, uri, name)?.ok_or_else(|| {
                ArrayError::ConcurrentModification(format!(
                    "metadata block {name} of array {uri} was removed during consolidation"
                ))
            })?;
            blocks.push(block);
        }
        let records = metadata_store::fold_records(blocks, drop_tombstones);
        metadata_store::store_block(&**storage, uri, &merged, &records, &inputs)?;
        log::debug!(
            "consolidated {} metadata block(s) of array {uri} into {merged}",
            inputs.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Names with the given end timestamps, in precedence order.
    fn names(ends: &[u64]) -> Vec<TimestampedName> {
        ends.iter()
            .map(|&end| TimestampedName::new(end, end))
            .collect()
    }

    fn policy() -> ConsolidationPolicy {
        ConsolidationPolicy::default()
    }

    #[test]
    fn consolidation_select_all() {
        let current = names(&[1, 2, 3, 4]);
        let sizes = [10; 4];
        assert_eq!(
            select_groups(&current, &sizes, &policy(), 0, u64::MAX),
            vec![vec![0, 1, 2, 3]]
        );
    }

    #[test]
    fn consolidation_select_window() {
        let current = names(&[1, 2, 3, 4, 5]);
        let sizes = [10; 5];
        assert_eq!(
            select_groups(&current, &sizes, &policy(), 2, 4),
            vec![vec![1, 2, 3]]
        );
        assert!(select_groups(&current, &sizes, &policy(), 2, 2).is_empty());
    }

    #[test]
    fn consolidation_select_max_frags() {
        let current = names(&[1, 2, 3, 4, 5]);
        let sizes = [10; 5];
        let policy = ConsolidationPolicy {
            step_max_frags: 2,
            ..policy()
        };
        assert_eq!(
            select_groups(&current, &sizes, &policy, 0, u64::MAX),
            vec![vec![0, 1], vec![2, 3]]
        );
    }

    #[test]
    fn consolidation_select_min_frags() {
        let current = names(&[1, 2, 3, 4, 5]);
        let sizes = [10; 5];
        let policy = ConsolidationPolicy {
            step_min_frags: 3,
            step_max_frags: 3,
            ..policy()
        };
        assert_eq!(
            select_groups(&current, &sizes, &policy, 0, u64::MAX),
            vec![vec![0, 1, 2]]
        );
    }

    #[test]
    fn consolidation_select_size_ratio() {
        let current = names(&[1, 2, 3, 4, 5]);
        let sizes = [10, 10, 1000, 10, 10];
        let policy = ConsolidationPolicy {
            step_size_ratio: 0.5,
            ..policy()
        };
        assert_eq!(
            select_groups(&current, &sizes, &policy, 0, u64::MAX),
            vec![vec![0, 1], vec![3, 4]]
        );
    }

    #[test]
    fn consolidation_select_equal_end_timestamps() {
        // a group never splits fragments with the same end timestamp
        let current = names(&[1, 2, 2, 3]);
        let sizes = [10; 4];
        let policy = ConsolidationPolicy {
            step_max_frags: 2,
            ..policy()
        };
        assert_eq!(
            select_groups(&current, &sizes, &policy, 0, u64::MAX),
            vec![vec![1, 2]]
        );

        // a run never ends before a fragment with the same end timestamp
        let mut current = names(&[1, 2]);
        current.push(TimestampedName::new(0, 2));
        assert_eq!(
            select_groups(&current, &sizes[..3], &ConsolidationPolicy::default(), 1, 2),
            Vec::<Vec<usize>>::new()
        );
    }

    #[test]
    fn consolidation_precedence_safe_len() {
        let current = names(&[1, 2, 3, 3]);
        assert_eq!(precedence_safe_len(&current, &[0, 1, 2]), 2);
        assert_eq!(precedence_safe_len(&current, &[0, 1]), 2);
        assert_eq!(precedence_safe_len(&current, &[2, 3]), 2);
        assert_eq!(precedence_safe_len(&current, &[]), 0);
    }

    #[test]
    fn consolidation_options() {
        let options = ConsolidationOptions::new().with_fragments(["a", "b"]);
        assert_eq!(options.fragments(), Some(&["a".to_string(), "b".to_string()][..]));
        assert_eq!(options.timestamps(), None);
        let options = ConsolidationOptions::new().with_timestamps(1, 2);
        assert_eq!(options.timestamps(), Some((1, 2)));
    }
}
