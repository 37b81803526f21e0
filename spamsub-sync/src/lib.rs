//! # spamsub-sync
//!
//! Keeps the local record store and the tracked spammer artifact in step,
//! and publishes accumulated changes upstream as pull requests.
//!
//! Call [`SyncEngine::submit`] for each incoming address,
//! [`SyncEngine::check_sync_staleness`] on a schedule, and
//! [`pipeline::open_engine`] to build an engine from configuration.

pub mod branches;
pub mod clock;
pub mod engine;
pub mod error;
pub mod gate;
pub mod gateway;
pub mod mirror;
pub mod pipeline;
pub mod reconcile;
pub mod staleness;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{
    EngineSettings, PublishOutcome, PublishStage, StatusReport, SubmitOutcome, SyncCheck,
    SyncEngine, RETRY_NOTICE,
};
pub use error::SyncError;
pub use gate::PublicationGate;
pub use gateway::{GitHubGateway, PullRequest, PullRequestGateway, PullRequestReceipt};
pub use mirror::{parse_artifact_lines, GitMirror, Mirror};
pub use reconcile::{reconcile, Reconciliation};
pub use store::{RecordStore, StoreTx};
