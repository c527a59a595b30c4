//! Content name validation

use std::fmt;

/// Maximum length for content names in characters
pub const MAX_CONTENT_NAME_LENGTH: usize = 256;

/// Validation error for content names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentNameError {
    /// Content name is empty
    Empty,
    /// Content name exceeds maximum length
    TooLong,
    /// Content name contains control characters
    InvalidCharacters,
}

impl fmt::Display for ContentNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Empty => "content name is empty",
            Self::TooLong => "content name too long",
            Self::InvalidCharacters => "content name contains invalid characters",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for ContentNameError {}

/// Validate a content name
///
/// Content names are free-form labels chosen by the content creator. They
/// must be non-empty, at most 256 characters, and free of control characters.
///
/// # Errors
///
/// Returns a `ContentNameError` variant describing the validation failure.
pub fn validate_content_name(name: &str) -> Result<(), ContentNameError> {
    if name.is_empty() {
        return Err(ContentNameError::Empty);
    }
    if name.chars().count() > MAX_CONTENT_NAME_LENGTH {
        return Err(ContentNameError::TooLong);
    }
    if name.chars().any(char::is_control) {
        return Err(ContentNameError::InvalidCharacters);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(validate_content_name("file-offer").is_ok());
        assert!(validate_content_name("a509a3f7").is_ok());
        assert!(validate_content_name("report with spaces").is_ok());
        assert!(validate_content_name("文件").is_ok());
    }

    #[test]
    fn test_empty() {
        assert_eq!(validate_content_name(""), Err(ContentNameError::Empty));
    }

    #[test]
    fn test_too_long() {
        assert_eq!(
            validate_content_name(&"n".repeat(MAX_CONTENT_NAME_LENGTH + 1)),
            Err(ContentNameError::TooLong)
        );
    }

    #[test]
    fn test_control_characters() {
        assert_eq!(
            validate_content_name("bad\0name"),
            Err(ContentNameError::InvalidCharacters)
        );
        assert_eq!(
            validate_content_name("bad\nname"),
            Err(ContentNameError::InvalidCharacters)
        );
    }
}
