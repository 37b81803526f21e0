//! Reconciliation: pull addresses that exist upstream but not locally.
//!
//! One-way only. Locally recorded addresses that upstream has not seen yet
//! are never removed here.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use spamsub_core::{Address, LastSyncMark};

use crate::error::SyncError;
use crate::mirror::Mirror;
use crate::store::RecordStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    /// Addresses imported from upstream by this pull.
    pub added: BTreeSet<Address>,
    /// Distinct addresses in the upstream artifact.
    pub remote_count: usize,
    pub synced_at: LastSyncMark,
}

/// Reset the mirror to upstream, import `remote - local` and advance the
/// sync mark, even when nothing was new.
///
/// A mirror failure aborts before the store is touched.
pub fn reconcile(
    mirror: &dyn Mirror,
    store: &mut RecordStore,
    artifact_path: &Path,
    now: DateTime<Utc>,
) -> Result<Reconciliation, SyncError> {
    let remote = fetch_upstream(mirror, artifact_path)?;
    apply_upstream(store, remote, now)
}

/// Network half of a reconciliation: reset the mirror and read the upstream
/// address set. Needs no store access.
///
/// Tokens that do not normalize (blank after trimming) are skipped.
pub fn fetch_upstream(
    mirror: &dyn Mirror,
    artifact_path: &Path,
) -> Result<BTreeSet<Address>, SyncError> {
    if let Err(err) = mirror.reset_to_upstream() {
        tracing::error!("CRITICAL: cannot reconcile, repository mirror unavailable: {err}");
        return Err(err);
    }

    let lines = mirror.read_artifact_lines(artifact_path)?;
    Ok(lines
        .iter()
        .filter_map(|token| match Address::normalize(token) {
            Ok(address) => Some(address),
            Err(e) => {
                tracing::warn!("skipping artifact token {token:?}: {e}");
                None
            }
        })
        .collect())
}

/// Store half of a reconciliation: one transaction that inserts the missing
/// addresses and advances the sync mark.
pub fn apply_upstream(
    store: &mut RecordStore,
    remote: BTreeSet<Address>,
    now: DateTime<Utc>,
) -> Result<Reconciliation, SyncError> {
    let (added, synced_at) = store.transaction(|tx| {
        let local: BTreeSet<Address> = tx.all_addresses()?.into_iter().collect();
        let added: BTreeSet<Address> = remote.difference(&local).cloned().collect();
        tx.insert_many(&added)?;
        let mark = tx.set_last_sync_mark(now)?;
        Ok((added, mark))
    })?;

    if added.is_empty() {
        tracing::debug!("reconciled: {} upstream addresses, nothing new", remote.len());
    } else {
        tracing::info!(
            "reconciled: imported {} of {} upstream addresses",
            added.len(),
            remote.len()
        );
    }

    Ok(Reconciliation {
        added,
        remote_count: remote.len(),
        synced_at,
    })
}
