//! Cleanup of integration branches left behind by failed publications.
//!
//! A push or pull-request failure intentionally keeps its branch for manual
//! inspection. These helpers list such branches by their encoded creation
//! time and delete the ones past a given age.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use spamsub_core::IntegrationBranch;

use crate::error::SyncError;
use crate::mirror::Mirror;
use crate::staleness::format_seconds;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchInfo {
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Compact age, e.g. `"2d"`.
    pub age: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub deleted: Vec<String>,
    /// Subset of `deleted` also removed from the fork remote.
    pub remote_deleted: Vec<String>,
    pub kept: Vec<String>,
    /// Branch name and the error that stopped its deletion.
    pub failed: Vec<(String, String)>,
}

/// Local integration branches, oldest first. Other branches are ignored.
pub fn list_integration_branches(
    mirror: &dyn Mirror,
    now: DateTime<Utc>,
) -> Result<Vec<BranchInfo>, SyncError> {
    let mut found: Vec<IntegrationBranch> = mirror
        .list_branches()?
        .iter()
        .filter_map(|name| IntegrationBranch::parse(name))
        .collect();
    found.sort_by_key(IntegrationBranch::created_at);

    Ok(found
        .into_iter()
        .map(|b| BranchInfo {
            age: format_seconds((now - b.created_at()).num_seconds().max(0) as u64),
            name: b.name().to_owned(),
            created_at: b.created_at(),
        })
        .collect())
}

/// Delete integration branches created more than `older_than` before `now`.
///
/// The caller must have switched away from any branch that may be pruned.
/// A branch whose local deletion fails is reported and skipped; remote
/// deletion is only attempted after the local one succeeded.
pub fn prune(
    mirror: &dyn Mirror,
    older_than: Duration,
    delete_remote: bool,
    now: DateTime<Utc>,
) -> Result<PruneReport, SyncError> {
    let mut report = PruneReport::default();
    for branch in list_integration_branches(mirror, now)? {
        if now - branch.created_at <= older_than {
            report.kept.push(branch.name);
            continue;
        }
        if let Err(e) = mirror.delete_branch(&branch.name, true) {
            tracing::warn!("could not delete {}: {e}", branch.name);
            report.failed.push((branch.name, e.to_string()));
            continue;
        }
        tracing::info!("pruned {} ({} old)", branch.name, branch.age);
        if delete_remote {
            match mirror.delete_remote_branch(&branch.name) {
                Ok(()) => report.remote_deleted.push(branch.name.clone()),
                Err(e) => {
                    tracing::warn!("could not delete remote {}: {e}", branch.name);
                    report.failed.push((branch.name.clone(), e.to_string()));
                }
            }
        }
        report.deleted.push(branch.name);
    }
    Ok(report)
}
