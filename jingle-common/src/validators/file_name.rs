//! File name validation
//!
//! Validates the `name` of an offered file. The name is advisory metadata
//! for the receiver, so it must be a single path component.

use std::fmt;

/// Maximum length for file names in bytes
pub const MAX_FILE_NAME_LENGTH: usize = 255;

/// Validation error for file names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileNameError {
    /// File name is empty
    Empty,
    /// File name exceeds maximum length
    TooLong,
    /// File name is `.` or `..`, or contains a path separator
    PathComponent,
    /// File name contains control characters
    InvalidCharacters,
}

impl fmt::Display for FileNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Empty => "file name is empty",
            Self::TooLong => "file name too long",
            Self::PathComponent => "file name is not a single path component",
            Self::InvalidCharacters => "file name contains invalid characters",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for FileNameError {}

/// Validate an offered file name
///
/// Checks:
/// - Not empty
/// - At most 255 bytes
/// - Not `.` or `..`
/// - No `/` or `\` separators
/// - No control characters
///
/// # Errors
///
/// Returns a `FileNameError` variant describing the validation failure.
pub fn validate_file_name(name: &str) -> Result<(), FileNameError> {
    if name.is_empty() {
        return Err(FileNameError::Empty);
    }
    if name.len() > MAX_FILE_NAME_LENGTH {
        return Err(FileNameError::TooLong);
    }
    if name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(FileNameError::PathComponent);
    }
    if name.chars().any(char::is_control) {
        return Err(FileNameError::InvalidCharacters);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_file_names() {
        assert!(validate_file_name("report.pdf").is_ok());
        assert!(validate_file_name("photo 2024.jpg").is_ok());
        assert!(validate_file_name(".hidden").is_ok());
        assert!(validate_file_name("архив.zip").is_ok());
        assert!(validate_file_name(&"f".repeat(MAX_FILE_NAME_LENGTH)).is_ok());
    }

    #[test]
    fn test_empty() {
        assert_eq!(validate_file_name(""), Err(FileNameError::Empty));
    }

    #[test]
    fn test_too_long() {
        assert_eq!(
            validate_file_name(&"f".repeat(MAX_FILE_NAME_LENGTH + 1)),
            Err(FileNameError::TooLong)
        );
    }

    #[test]
    fn test_path_components() {
        assert_eq!(validate_file_name("."), Err(FileNameError::PathComponent));
        assert_eq!(validate_file_name(".."), Err(FileNameError::PathComponent));
        assert_eq!(
            validate_file_name("../etc/passwd"),
            Err(FileNameError::PathComponent)
        );
        assert_eq!(
            validate_file_name("dir\\file.txt"),
            Err(FileNameError::PathComponent)
        );
    }

    #[test]
    fn test_control_characters() {
        assert_eq!(
            validate_file_name("file\0.txt"),
            Err(FileNameError::InvalidCharacters)
        );
    }
}
