//! Domain types for the spammer list.
//!
//! Every address is stored in normalized form: trimmed, lower-cased and
//! prefixed by [`ADDRESS_MARKER`]. All timestamps are UTC.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Leading character of every normalized address.
pub const ADDRESS_MARKER: char = '@';

/// Prefix shared by every integration branch name.
pub const BRANCH_PREFIX: &str = "integration_";

/// `strftime` layout of the timestamp suffix in integration branch names.
pub const BRANCH_TIME_FORMAT: &str = "%Y_%b_%d_%H_%M_%S";

/// `strftime` layout used in commit messages and pull-request titles.
pub const HUMAN_TIME_FORMAT: &str = "%a, %d %b %Y %H:%M:%S";

/// Format `at` the way commit messages and pull-request titles show it.
pub fn human_timestamp(at: DateTime<Utc>) -> String {
    at.format(HUMAN_TIME_FORMAT).to_string()
}

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A normalized spammer address, e.g. `@enterprise-weasels.co.uk`.
///
/// `Example.com`, ` example.com ` and `@EXAMPLE.com` all normalize to
/// `@example.com`; two addresses are equal iff their normalized forms are.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Normalize a raw submission or artifact token.
    ///
    /// Leading markers are stripped before the single canonical marker is
    /// re-applied, so normalization is idempotent. Whitespace inside the
    /// address is rejected since the artifact is whitespace-delimited.
    pub fn normalize(raw: &str) -> Result<Self, ValidationError> {
        let bare = raw.trim().trim_start_matches(ADDRESS_MARKER).trim();
        if bare.is_empty() {
            return Err(ValidationError::Empty);
        }
        if bare.contains(char::is_whitespace) {
            return Err(ValidationError::Malformed {
                input: raw.trim().to_owned(),
            });
        }
        Ok(Self(format!("{ADDRESS_MARKER}{}", bare.to_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The address without its leading marker.
    pub fn domain(&self) -> &str {
        &self.0[ADDRESS_MARKER.len_utf8()..]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Address {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::normalize(&s)
    }
}

impl From<Address> for String {
    fn from(a: Address) -> Self {
        a.0
    }
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Changes accepted locally since the last successful publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCounter {
    pub count: u32,
    /// When the counter was last reset to zero.
    pub reset_at: DateTime<Utc>,
}

impl PendingCounter {
    /// A zeroed counter reset at `now`.
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self { count: 0, reset_at: now }
    }

    /// Absolute time between the last reset and `now`.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        abs_delta(now, self.reset_at)
    }
}

/// Time of the last completed reconciliation pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LastSyncMark {
    pub synced_at: DateTime<Utc>,
}

impl LastSyncMark {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        abs_delta(now, self.synced_at)
    }
}

fn abs_delta(a: DateTime<Utc>, b: DateTime<Utc>) -> Duration {
    let delta = a - b;
    if delta < Duration::zero() {
        -delta
    } else {
        delta
    }
}

// ---------------------------------------------------------------------------
// IntegrationBranch
// ---------------------------------------------------------------------------

/// A short-lived branch holding exactly one publication attempt.
///
/// The name encodes its creation time at second resolution, so branches left
/// behind by failed attempts can be dated and pruned later.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IntegrationBranch {
    name: String,
    created_at: DateTime<Utc>,
}

impl IntegrationBranch {
    /// Branch for a publication attempt started at `now`.
    pub fn for_time(now: DateTime<Utc>) -> Self {
        let name = format!("{BRANCH_PREFIX}{}", now.format(BRANCH_TIME_FORMAT));
        // Round-trips through the name so `created_at` drops sub-second precision.
        Self::parse(&name).unwrap_or(Self { name, created_at: now })
    }

    /// Recognise an existing branch name; `None` for anything not created by
    /// [`IntegrationBranch::for_time`].
    pub fn parse(name: &str) -> Option<Self> {
        let stamp = name.strip_prefix(BRANCH_PREFIX)?;
        let naive = NaiveDateTime::parse_from_str(stamp, BRANCH_TIME_FORMAT).ok()?;
        Some(Self {
            name: name.to_owned(),
            created_at: Utc.from_utc_datetime(&naive),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl fmt::Display for IntegrationBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Example.com")]
    #[case("example.com")]
    #[case("@example.com")]
    #[case("  @EXAMPLE.COM \n")]
    #[case("@@example.com")]
    fn normalization_collapses_case_marker_and_whitespace(#[case] raw: &str) {
        assert_eq!(Address::normalize(raw).unwrap().as_str(), "@example.com");
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = Address::normalize("NewDomain.EXAMPLE").unwrap();
        let twice = Address::normalize(once.as_str()).unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice.domain(), "newdomain.example");
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("@")]
    fn empty_addresses_are_rejected(#[case] raw: &str) {
        assert_eq!(Address::normalize(raw), Err(ValidationError::Empty));
    }

    #[rstest]
    #[case("evil.com OR")]
    #[case("@bad domain.com")]
    #[case("tab\tseparated.com")]
    fn internal_whitespace_is_rejected(#[case] raw: &str) {
        assert!(
            matches!(Address::normalize(raw), Err(ValidationError::Malformed { .. })),
            "accepted {raw:?}"
        );
    }

    #[test]
    fn addresses_order_by_normalized_value() {
        let mut v = vec![
            Address::normalize("b.com").unwrap(),
            Address::normalize("A.com").unwrap(),
        ];
        v.sort();
        assert_eq!(v[0].as_str(), "@a.com");
    }

    #[test]
    fn counter_elapsed_is_absolute() {
        let now = Utc::now();
        let ahead = PendingCounter { count: 0, reset_at: now + Duration::seconds(30) };
        assert_eq!(ahead.elapsed(now), Duration::seconds(30));
    }

    #[test]
    fn branch_name_round_trips() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let branch = IntegrationBranch::for_time(at);
        assert_eq!(branch.name(), "integration_2024_Mar_09_14_05_07");
        let parsed = IntegrationBranch::parse(branch.name()).unwrap();
        assert_eq!(parsed.created_at(), at);
    }

    #[test]
    fn foreign_branch_names_are_not_integration_branches() {
        assert!(IntegrationBranch::parse("master").is_none());
        assert!(IntegrationBranch::parse("integration_yesterday").is_none());
    }

    #[test]
    fn human_timestamp_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(human_timestamp(at), "Sat, 09 Mar 2024 14:05:07");
    }
}
