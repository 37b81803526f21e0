//! Spamsub core library: domain types, submission validation, configuration, errors.
//!
//! Public API surface:
//! - [`types`]: normalized addresses, counters, integration branch names
//! - [`validate`]: front-end address shape check
//! - [`config`]: load / save / init of `~/.spamsub/config.yaml`
//! - [`error`]: [`ConfigError`], [`ValidationError`]

pub mod config;
pub mod error;
pub mod types;
pub mod validate;

pub use config::Config;
pub use error::{ConfigError, ValidationError};
pub use types::{Address, IntegrationBranch, LastSyncMark, PendingCounter};
pub use validate::validate_submission;
