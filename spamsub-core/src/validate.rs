//! Shape check applied to submissions before they reach the sync engine.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::ValidationError;

/// Everything after the `@` of a mail address: word characters, dashes and
/// dots, ending in an alphabetic top-level label. One leading marker is allowed.
pub const SUBMISSION_PATTERN: &str = r"^@?[\w\-.]*\.[a-z]{2,63}$";

fn submission_pattern() -> Result<&'static Regex, ValidationError> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(SUBMISSION_PATTERN))
        .as_ref()
        .map_err(|e| ValidationError::Pattern(e.to_string()))
}

/// Reject submissions that are empty, carry a local part, or are not shaped
/// like a domain. The check runs on the trimmed, lower-cased input.
pub fn validate_submission(raw: &str) -> Result<(), ValidationError> {
    let candidate = raw.trim().to_lowercase();
    if candidate.is_empty() {
        return Err(ValidationError::Empty);
    }
    let without_marker = candidate.strip_prefix('@').unwrap_or(&candidate);
    if without_marker.contains('@') {
        return Err(ValidationError::LocalPart {
            input: raw.trim().to_owned(),
        });
    }
    if !submission_pattern()?.is_match(&candidate) {
        return Err(ValidationError::Malformed {
            input: raw.trim().to_owned(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("enterprise-weasels.co.uk")]
    #[case("NewDomain.EXAMPLE")]
    #[case("@example.com")]
    #[case("  mail.recruit_agency.io ")]
    fn accepts_domain_shaped_input(#[case] raw: &str) {
        assert_eq!(validate_submission(raw), Ok(()));
    }

    #[rstest]
    #[case("localhost")]
    #[case("example.c")]
    #[case("example.com/path")]
    #[case("spam me.com")]
    #[case("example.123")]
    fn rejects_non_domains(#[case] raw: &str) {
        assert!(matches!(
            validate_submission(raw),
            Err(ValidationError::Malformed { .. })
        ));
    }

    #[test]
    fn rejects_local_part() {
        let err = validate_submission("jobs@recruiter.com").unwrap_err();
        assert_eq!(
            err,
            ValidationError::LocalPart {
                input: "jobs@recruiter.com".to_string()
            }
        );
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(validate_submission("   "), Err(ValidationError::Empty));
    }
}
