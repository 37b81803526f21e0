//! The sync engine: public entry point for submissions and publication.
//!
//! ## Locking
//!
//! Two mutexes, always taken in this order:
//!
//! 1. `repo_lock` serializes everything that touches the working copy
//!    (reconciliation, publication, branch cleanup).
//! 2. `store` guards the SQLite handle and is held only for the duration of
//!    a single read or transaction.
//!
//! The fast existence check in [`SyncEngine::submit`] takes only the store
//! lock, so known addresses are answered while the working copy is busy.
//!
//! ## Failure policy
//!
//! Reconciliation aborts on a mirror failure and the error reaches the
//! caller. Publication stage failures are attempt-local: they come back as
//! [`PublishOutcome::Failed`], the pending counter is left alone and the
//! changes go out with the next cycle.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use spamsub_core::{Address, Config, IntegrationBranch, LastSyncMark, PendingCounter};
use spamsub_renderer::{Document, PublicationContext, Renderer};

use crate::branches::{self, BranchInfo, PruneReport};
use crate::clock::Clock;
use crate::error::SyncError;
use crate::gate::PublicationGate;
use crate::gateway::{PullRequest, PullRequestGateway, PullRequestReceipt};
use crate::mirror::Mirror;
use crate::reconcile::{apply_upstream, fetch_upstream, Reconciliation};
use crate::staleness::{format_age, is_stale};
use crate::store::RecordStore;

/// Shown to whoever submitted an address when publication failed.
pub const RETRY_NOTICE: &str =
    "There was an error sending your updates to GitHub. We'll try again later, though, and they have been saved.";

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Artifact location relative to the repository root.
    pub artifact_path: PathBuf,
    pub trunk: String,
    /// Owner of the fork that integration branches are pushed to.
    pub fork_owner: String,
    pub github_token: Option<String>,
    pub gate: PublicationGate,
    pub sync_interval: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            artifact_path: config.artifact_path.clone(),
            trunk: config.trunk.clone(),
            fork_owner: config.fork_owner.clone(),
            github_token: config.github_token(),
            gate: PublicationGate::from_config(config),
            sync_interval: config.sync_interval(),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Where a publication attempt stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStage {
    /// The working copy could not be brought back to the upstream trunk.
    Reset,
    CreateBranch,
    WriteArtifact,
    Push,
    PullRequest,
    /// The caller's deadline expired before the cycle finished.
    Timeout,
}

impl fmt::Display for PublishStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PublishStage::Reset => "reset",
            PublishStage::CreateBranch => "create branch",
            PublishStage::WriteArtifact => "write artifact",
            PublishStage::Push => "push",
            PublishStage::PullRequest => "pull request",
            PublishStage::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PublishOutcome {
    Published {
        branch: String,
        pull_request: PullRequestReceipt,
        address_count: usize,
        /// Addresses the trunk's artifact did not list yet.
        added: Vec<Address>,
        /// Cleanup after the accepted request failed; the branch is still there.
        branch_retained: bool,
    },
    Failed {
        stage: PublishStage,
        branch: Option<String>,
        branch_retained: bool,
        reason: String,
    },
}

impl PublishOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, PublishOutcome::Published { .. })
    }

    /// Operator-facing notice for a failed attempt.
    pub fn notice(&self) -> Option<&'static str> {
        match self {
            PublishOutcome::Published { .. } => None,
            PublishOutcome::Failed { .. } => Some(RETRY_NOTICE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitOutcome {
    pub address: Address,
    pub already_known: bool,
    /// Present when this submission opened the publication gate.
    pub publication: Option<PublishOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncCheck {
    /// The last pull is recent enough; nothing was done.
    Fresh { last_sync: LastSyncMark, age: String },
    Reconciled {
        previous_age: String,
        reconciliation: Reconciliation,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub address_count: u64,
    pub pending: Option<PendingCounter>,
    pub gate_open: bool,
    pub last_sync: Option<LastSyncMark>,
    pub last_sync_age: String,
    pub sync_stale: bool,
    pub integration_branches: Vec<BranchInfo>,
    /// Set when the working copy could not be inspected.
    pub mirror_error: Option<String>,
}

// ---------------------------------------------------------------------------
// SyncEngine
// ---------------------------------------------------------------------------

pub struct SyncEngine<M, G, C> {
    mirror: M,
    gateway: G,
    clock: C,
    renderer: Renderer,
    settings: EngineSettings,
    store: Mutex<RecordStore>,
    repo_lock: Mutex<()>,
}

impl<M, G, C> SyncEngine<M, G, C>
where
    M: Mirror,
    G: PullRequestGateway,
    C: Clock,
{
    pub fn new(
        mirror: M,
        gateway: G,
        clock: C,
        store: RecordStore,
        renderer: Renderer,
        settings: EngineSettings,
    ) -> Self {
        Self {
            mirror,
            gateway,
            clock,
            renderer,
            settings,
            store: Mutex::new(store),
            repo_lock: Mutex::new(()),
        }
    }

    pub fn mirror(&self) -> &M {
        &self.mirror
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Exclusive access to the record store. Do not hold across engine calls.
    pub fn store(&self) -> MutexGuard<'_, RecordStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_repo(&self) -> MutexGuard<'_, ()> {
        self.repo_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- submission ----------------------------------------------------------

    /// Record `raw` if it is new, then publish when the gate opens.
    ///
    /// Returns `Err` only when the address is malformed, the store fails, or
    /// reconciliation cannot reach the repository. Once the address has been
    /// recorded it stays recorded whatever publication does.
    pub fn submit(&self, raw: &str) -> Result<SubmitOutcome, SyncError> {
        let address = Address::normalize(raw)?;
        let known = |address: Address| SubmitOutcome {
            address,
            already_known: true,
            publication: None,
        };

        if self.store().exists(&address)? {
            tracing::debug!("{address} already known");
            return Ok(known(address));
        }

        let _repo = self.lock_repo();
        let reconciled = self.reconcile_locked()?;
        if reconciled.added.contains(&address) {
            tracing::info!("{address} found upstream during reconciliation");
        }

        let now = self.clock.now();
        let counter = self.store().transaction(|tx| {
            if tx.exists(&address)? {
                return Ok(None);
            }
            tx.insert(&address)?;
            Ok(Some(tx.increment_pending_counter(now)?))
        })?;
        let Some(counter) = counter else {
            return Ok(known(address));
        };
        tracing::info!("recorded {address} ({} pending)", counter.count);

        let publication = if self.settings.gate.should_publish(&counter, now) {
            let outcome = self.publish_locked().unwrap_or_else(|err| {
                tracing::warn!("publication aborted before it started: {err}");
                PublishOutcome::Failed {
                    stage: PublishStage::Reset,
                    branch: None,
                    branch_retained: false,
                    reason: err.to_string(),
                }
            });
            Some(outcome)
        } else {
            None
        };

        Ok(SubmitOutcome {
            address,
            already_known: false,
            publication,
        })
    }

    // -- reconciliation ------------------------------------------------------

    /// Reconcile now, regardless of when the last pull happened.
    pub fn sync(&self) -> Result<Reconciliation, SyncError> {
        let _repo = self.lock_repo();
        self.reconcile_locked()
    }

    /// Caller holds `repo_lock`. The store lock is taken only for the final
    /// transaction, never across the fetch.
    fn reconcile_locked(&self) -> Result<Reconciliation, SyncError> {
        let remote = fetch_upstream(&self.mirror, &self.settings.artifact_path)?;
        let now = self.clock.now();
        apply_upstream(&mut self.store(), remote, now)
    }

    /// Reconcile only if the last pull is older than the sync interval.
    pub fn check_sync_staleness(&self) -> Result<SyncCheck, SyncError> {
        let now = self.clock.now();
        let mark = self.store().last_sync_mark()?;
        let age = format_age(mark.as_ref(), now);
        match mark {
            Some(last_sync) if !is_stale(Some(&last_sync), self.settings.sync_interval, now) => {
                tracing::debug!("last sync {age}, nothing to do");
                Ok(SyncCheck::Fresh { last_sync, age })
            }
            _ => {
                tracing::info!("last sync {age}, reconciling");
                let reconciliation = self.sync()?;
                Ok(SyncCheck::Reconciled {
                    previous_age: age,
                    reconciliation,
                })
            }
        }
    }

    // -- publication ---------------------------------------------------------

    /// Run one full publication cycle.
    ///
    /// `Err` means the repository could not be reset or the store failed;
    /// every later stage failure is reported in the returned outcome.
    pub fn publish(&self) -> Result<PublishOutcome, SyncError> {
        let _repo = self.lock_repo();
        self.publish_locked()
    }

    fn publish_locked(&self) -> Result<PublishOutcome, SyncError> {
        self.mirror.reset_to_upstream()?;

        let artifact_path = &self.settings.artifact_path;
        let upstream: BTreeSet<Address> = self
            .mirror
            .read_artifact_lines(artifact_path)?
            .iter()
            .filter_map(|t| Address::normalize(t).ok())
            .collect();
        let addresses = self.store().all_addresses()?;
        let added: Vec<Address> = addresses
            .iter()
            .filter(|a| !upstream.contains(a))
            .cloned()
            .collect();

        let now = self.clock.now();
        let branch = IntegrationBranch::for_time(now);
        if let Err(err) = self.mirror.create_integration_branch(&branch) {
            return Ok(self.failed(PublishStage::CreateBranch, Some(&branch), false, &err));
        }

        let ctx = PublicationContext::new(&addresses, &added, now);
        let documents = match self.render_documents(&ctx) {
            Ok(docs) => docs,
            Err(err) => return Ok(self.abandon(&branch, &err)),
        };
        if let Err(err) = self.mirror.write_artifact(artifact_path, &documents.artifact) {
            return Ok(self.abandon(&branch, &err));
        }

        if let Err(err) = self.mirror.commit_and_push(
            &branch,
            std::slice::from_ref(artifact_path),
            &documents.commit_message,
        ) {
            return Ok(self.failed(PublishStage::Push, Some(&branch), true, &err));
        }

        let request = PullRequest {
            head: format!("{}:{}", self.settings.fork_owner, branch),
            base: self.settings.trunk.clone(),
            title: documents.title,
            body: documents.body,
        };
        let receipt = match self
            .gateway
            .open_pull_request(&request, self.settings.github_token.as_deref())
        {
            Ok(receipt) => receipt,
            Err(err) => {
                return Ok(self.failed(PublishStage::PullRequest, Some(&branch), true, &err));
            }
        };

        self.store().reset_pending_counter(self.clock.now())?;

        let branch_retained = match self.discard_branch(&branch) {
            Ok(()) => false,
            Err(err) => {
                tracing::warn!("published, but could not remove {branch}: {err}");
                true
            }
        };
        tracing::info!(
            "published {} addresses ({} new) via {branch}",
            addresses.len(),
            added.len()
        );
        Ok(PublishOutcome::Published {
            branch: branch.name().to_owned(),
            pull_request: receipt,
            address_count: addresses.len(),
            added,
            branch_retained,
        })
    }

    fn render_documents(&self, ctx: &PublicationContext) -> Result<RenderedDocuments, SyncError> {
        Ok(RenderedDocuments {
            artifact: self.renderer.render(Document::Artifact, ctx)?,
            commit_message: self.renderer.render(Document::CommitMessage, ctx)?,
            title: self.renderer.render(Document::PullRequestTitle, ctx)?,
            body: self.renderer.render(Document::PullRequestBody, ctx)?,
        })
    }

    fn discard_branch(&self, branch: &IntegrationBranch) -> Result<(), SyncError> {
        self.mirror.checkout_trunk()?;
        self.mirror.delete_branch(branch.name(), true)
    }

    /// Roll back a branch that never reached the remote.
    fn abandon(&self, branch: &IntegrationBranch, err: &SyncError) -> PublishOutcome {
        let retained = match self.discard_branch(branch) {
            Ok(()) => false,
            Err(cleanup) => {
                tracing::warn!("rollback of {branch} failed: {cleanup}");
                true
            }
        };
        self.failed(PublishStage::WriteArtifact, Some(branch), retained, err)
    }

    fn failed(
        &self,
        stage: PublishStage,
        branch: Option<&IntegrationBranch>,
        branch_retained: bool,
        err: &SyncError,
    ) -> PublishOutcome {
        match (branch, branch_retained) {
            (Some(b), true) => tracing::warn!("publication failed at {stage}: {err}; {b} left in place"),
            _ => tracing::warn!("publication failed at {stage}: {err}"),
        }
        tracing::warn!("{RETRY_NOTICE}");
        PublishOutcome::Failed {
            stage,
            branch: branch.map(|b| b.name().to_owned()),
            branch_retained,
            reason: err.to_string(),
        }
    }

    // -- reporting and maintenance -------------------------------------------

    pub fn status(&self) -> Result<StatusReport, SyncError> {
        let now = self.clock.now();
        let (address_count, pending, last_sync) = {
            let store = self.store();
            (store.address_count()?, store.pending_counter()?, store.last_sync_mark()?)
        };
        let (integration_branches, mirror_error) = match self.list_branches() {
            Ok(branches) => (branches, None),
            Err(err) => (Vec::new(), Some(err.to_string())),
        };
        Ok(StatusReport {
            address_count,
            gate_open: pending.is_some_and(|c| self.settings.gate.should_publish(&c, now)),
            pending,
            last_sync_age: format_age(last_sync.as_ref(), now),
            sync_stale: is_stale(last_sync.as_ref(), self.settings.sync_interval, now),
            last_sync,
            integration_branches,
            mirror_error,
        })
    }

    pub fn list_branches(&self) -> Result<Vec<BranchInfo>, SyncError> {
        let _repo = self.lock_repo();
        branches::list_integration_branches(&self.mirror, self.clock.now())
    }

    /// Delete integration branches older than `older_than`, optionally on the
    /// fork as well. Switches to the trunk first.
    pub fn prune_branches(
        &self,
        older_than: chrono::Duration,
        delete_remote: bool,
    ) -> Result<PruneReport, SyncError> {
        let _repo = self.lock_repo();
        self.mirror.checkout_trunk()?;
        branches::prune(&self.mirror, older_than, delete_remote, self.clock.now())
    }

    /// The artifact as the next publication would write it.
    pub fn render_artifact(&self) -> Result<String, SyncError> {
        let addresses = self.store().all_addresses()?;
        Ok(self.renderer.render_artifact(&addresses, self.clock.now())?)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

struct RenderedDocuments {
    artifact: String,
    commit_message: String,
    title: String,
    body: String,
}
