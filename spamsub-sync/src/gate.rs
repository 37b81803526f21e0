//! Publication gate.
//!
//! Publish once enough changes have piled up, or once the oldest pending
//! change has waited long enough. Either condition alone opens the gate.

use chrono::{DateTime, Utc};

use spamsub_core::{Config, PendingCounter};

pub const DEFAULT_VOLUME_THRESHOLD: u32 = 2;
pub const DEFAULT_STALENESS_SECS: u64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicationGate {
    pub volume_threshold: u32,
    pub staleness_secs: u64,
}

impl Default for PublicationGate {
    fn default() -> Self {
        Self::new(DEFAULT_VOLUME_THRESHOLD, DEFAULT_STALENESS_SECS)
    }
}

impl PublicationGate {
    pub fn new(volume_threshold: u32, staleness_secs: u64) -> Self {
        Self {
            volume_threshold,
            staleness_secs,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.volume_threshold, config.staleness_threshold_secs)
    }

    /// `count >= volume_threshold` or `|now - reset_at| >= staleness`.
    pub fn should_publish(&self, counter: &PendingCounter, now: DateTime<Utc>) -> bool {
        if counter.count >= self.volume_threshold {
            return true;
        }
        u64::try_from(counter.elapsed(now).num_seconds())
            .is_ok_and(|elapsed| elapsed >= self.staleness_secs)
    }
}
