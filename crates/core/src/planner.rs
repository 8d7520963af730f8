//! Incremental chain planning
//!
//! Given the local snapshots (oldest first) and the names already present in
//! the remote container, compute which snapshots still have to be uploaded
//! and what each one is diffed against.

use crate::model::{LocalSnapshot, PlannedTransfer, SyncPlan};
use crate::naming::{InvalidName, SnapshotName};
use std::collections::BTreeSet;

/// Compute the ordered upload plan
///
/// - The first missing snapshot is diffed against the most recent archived
///   local snapshot, or sent whole if nothing local is archived.
/// - Every later missing snapshot is diffed against the snapshot created
///   just before it, which is either archived or uploaded earlier in the
///   same plan.
///
/// Parents are drawn from `locals` only. A snapshot deleted locally can never
/// become a parent; when that leaves no usable parent the transfer is full.
pub fn plan(
    locals: &[LocalSnapshot],
    archived: &BTreeSet<SnapshotName>,
) -> Result<SyncPlan, InvalidName> {
    let names = locals
        .iter()
        .map(LocalSnapshot::name)
        .collect::<Result<Vec<_>, _>>()?;
    let is_archived: Vec<bool> = names.iter().map(|name| archived.contains(name)).collect();

    let latest_archived = locals
        .iter()
        .zip(&is_archived)
        .rev()
        .find(|(_, archived)| **archived)
        .map(|(snapshot, _)| snapshot);

    let mut transfers = Vec::new();
    for (idx, (snapshot, name)) in locals.iter().zip(names).enumerate() {
        if is_archived[idx] {
            continue;
        }

        let parent = if transfers.is_empty() {
            latest_archived
        } else {
            idx.checked_sub(1).map(|prev| &locals[prev])
        };

        let transfer = match parent {
            Some(parent) => PlannedTransfer::incremental(snapshot.clone(), parent.clone(), name),
            None => PlannedTransfer::full(snapshot.clone(), name),
        };
        tracing::debug!(snapshot = %transfer.snapshot, kind = %transfer.kind, "planned transfer");
        transfers.push(transfer);
    }

    Ok(SyncPlan::new(transfers))
}

/// Check that every incremental transfer's parent is archived or is the
/// transfer right before it in the plan
pub fn chain_is_unbroken(plan: &SyncPlan, archived: &BTreeSet<SnapshotName>) -> bool {
    let mut previous: Option<&LocalSnapshot> = None;
    for transfer in plan {
        if let Some(parent) = &transfer.parent {
            let parent_archived = parent
                .name()
                .map(|name| archived.contains(&name))
                .unwrap_or(false);
            if !parent_archived && previous != Some(parent) {
                return false;
            }
        }
        previous = Some(&transfer.snapshot);
    }
    true
}
