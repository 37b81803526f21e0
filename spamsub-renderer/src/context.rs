//! Template context: serializable rendering payload built from the address set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use spamsub_core::{types::human_timestamp, Address};

use crate::error::RenderError;

/// Everything a publication template may reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicationContext {
    /// Every known address, sorted by normalized value.
    pub addresses: Vec<String>,
    pub address_count: usize,
    /// Addresses absent from the trunk's copy of the artifact.
    pub added: Vec<String>,
    /// `%a, %d %b %Y %H:%M:%S` in UTC.
    pub generated_at: String,
    pub spamsub_version: String,
}

impl PublicationContext {
    /// Build a context; both lists are sorted and deduplicated here so callers
    /// may pass store rows in any order.
    pub fn new(addresses: &[Address], added: &[Address], now: DateTime<Utc>) -> Self {
        let addresses = sorted_strings(addresses);
        let added = sorted_strings(added);
        Self {
            address_count: addresses.len(),
            addresses,
            added,
            generated_at: human_timestamp(now),
            spamsub_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        Ok(tera::Context::from_serialize(self)?)
    }
}

fn sorted_strings(addresses: &[Address]) -> Vec<String> {
    let mut out: Vec<String> = addresses.iter().map(|a| a.as_str().to_owned()).collect();
    out.sort();
    out.dedup();
    out
}
