//! JID validation
//!
//! Validates addresses of the form `[local@]domain[/resource]`. Session
//! endpoints are always full JIDs, so a resource is required there.

use std::fmt;

/// Maximum length of each JID part in bytes
pub const MAX_JID_PART_LENGTH: usize = 1023;

/// Characters that are not allowed in the local part
const FORBIDDEN_LOCAL_CHARS: &[char] = &['"', '&', '\'', '/', ':', '<', '>', '@'];

/// Validation error for JIDs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JidError {
    /// JID is empty
    Empty,
    /// A part exceeds the maximum length
    TooLong,
    /// Domain part is empty
    MissingDomain,
    /// Resource part is missing or empty where a full JID is required
    MissingResource,
    /// Local part is present but empty or contains forbidden characters
    InvalidLocalpart,
    /// Whitespace or control characters
    InvalidCharacters,
}

impl fmt::Display for JidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Empty => "jid is empty",
            Self::TooLong => "jid part too long",
            Self::MissingDomain => "jid has no domain",
            Self::MissingResource => "jid has no resource",
            Self::InvalidLocalpart => "jid has an invalid local part",
            Self::InvalidCharacters => "jid contains invalid characters",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for JidError {}

/// Validate a bare or full JID
///
/// Checks:
/// - Not empty
/// - No whitespace or control characters anywhere
/// - Local part, if present, is non-empty and free of `"&'/:<>@`
/// - Domain is non-empty
/// - Resource, if a `/` is present, is non-empty
/// - No part exceeds 1023 bytes
///
/// # Errors
///
/// Returns a `JidError` variant describing the validation failure.
pub fn validate_jid(jid: &str) -> Result<(), JidError> {
    if jid.is_empty() {
        return Err(JidError::Empty);
    }
    if jid.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(JidError::InvalidCharacters);
    }

    let (bare, resource) = match jid.split_once('/') {
        Some((bare, resource)) => (bare, Some(resource)),
        None => (jid, None),
    };
    let (local, domain) = match bare.split_once('@') {
        Some((local, domain)) => (Some(local), domain),
        None => (None, bare),
    };

    if let Some(local) = local {
        if local.is_empty() || local.contains(FORBIDDEN_LOCAL_CHARS) {
            return Err(JidError::InvalidLocalpart);
        }
        if local.len() > MAX_JID_PART_LENGTH {
            return Err(JidError::TooLong);
        }
    }
    if domain.is_empty() || domain.contains('@') {
        return Err(JidError::MissingDomain);
    }
    if domain.len() > MAX_JID_PART_LENGTH {
        return Err(JidError::TooLong);
    }
    if let Some(resource) = resource {
        if resource.is_empty() {
            return Err(JidError::MissingResource);
        }
        if resource.len() > MAX_JID_PART_LENGTH {
            return Err(JidError::TooLong);
        }
    }
    Ok(())
}

/// Validate a full JID (one that carries a resource)
///
/// # Errors
///
/// Returns `JidError::MissingResource` for bare JIDs, or any error
/// [`validate_jid`] reports.
pub fn validate_full_jid(jid: &str) -> Result<(), JidError> {
    validate_jid(jid)?;
    if !jid.contains('/') {
        return Err(JidError::MissingResource);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_jids() {
        assert!(validate_jid("alice@example.org").is_ok());
        assert!(validate_jid("alice@example.org/phone").is_ok());
        assert!(validate_jid("example.org").is_ok());
        assert!(validate_jid("conference.example.org/bot").is_ok());
        // Resource may contain slashes and at-signs
        assert!(validate_jid("alice@example.org/a/b@c").is_ok());
    }

    #[test]
    fn test_full_jids() {
        assert!(validate_full_jid("alice@example.org/phone").is_ok());
        assert_eq!(
            validate_full_jid("alice@example.org"),
            Err(JidError::MissingResource)
        );
    }

    #[test]
    fn test_empty() {
        assert_eq!(validate_jid(""), Err(JidError::Empty));
    }

    #[test]
    fn test_missing_parts() {
        assert_eq!(validate_jid("alice@"), Err(JidError::MissingDomain));
        assert_eq!(validate_jid("@example.org"), Err(JidError::InvalidLocalpart));
        assert_eq!(
            validate_jid("alice@example.org/"),
            Err(JidError::MissingResource)
        );
        assert_eq!(validate_jid("/res"), Err(JidError::MissingDomain));
    }

    #[test]
    fn test_invalid_characters() {
        assert_eq!(
            validate_jid("ali ce@example.org"),
            Err(JidError::InvalidCharacters)
        );
        assert_eq!(
            validate_jid("alice@example.org/ph\none"),
            Err(JidError::InvalidCharacters)
        );
        assert_eq!(
            validate_jid("a<b@example.org"),
            Err(JidError::InvalidLocalpart)
        );
        assert_eq!(validate_jid("a@b@example.org"), Err(JidError::MissingDomain));
    }

    #[test]
    fn test_too_long() {
        let long = "a".repeat(MAX_JID_PART_LENGTH + 1);
        assert_eq!(
            validate_jid(&format!("{long}@example.org")),
            Err(JidError::TooLong)
        );
        assert_eq!(
            validate_jid(&format!("alice@example.org/{long}")),
            Err(JidError::TooLong)
        );
        assert!(validate_jid(&format!("{}@example.org", "a".repeat(MAX_JID_PART_LENGTH))).is_ok());
    }
}
