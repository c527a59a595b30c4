//! Session id validation
//!
//! Session ids are opaque to the receiver, but they are echoed in every
//! message and used as map keys, so they are kept short and printable.

use std::fmt;

/// Maximum length for session ids in bytes
pub const MAX_SESSION_ID_LENGTH: usize = 64;

/// Validation error for session ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionIdError {
    /// Session id is empty
    Empty,
    /// Session id exceeds maximum length
    TooLong,
    /// Session id contains characters outside `[A-Za-z0-9._-]`
    InvalidCharacters,
}

impl fmt::Display for SessionIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Empty => "session id is empty",
            Self::TooLong => "session id too long",
            Self::InvalidCharacters => "session id contains invalid characters",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for SessionIdError {}

/// Validate a session id
///
/// Checks:
/// - Not empty
/// - At most 64 bytes
/// - Only ASCII letters, digits, `.`, `_` and `-`
///
/// # Errors
///
/// Returns a `SessionIdError` variant describing the validation failure.
pub fn validate_session_id(sid: &str) -> Result<(), SessionIdError> {
    if sid.is_empty() {
        return Err(SessionIdError::Empty);
    }
    if sid.len() > MAX_SESSION_ID_LENGTH {
        return Err(SessionIdError::TooLong);
    }
    if !sid
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(SessionIdError::InvalidCharacters);
    }
    Ok(())
}
