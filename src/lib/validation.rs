//! Input validation utilities for parameters and files.

use std::path::Path;

use noodles::sam::alignment::record::data::field::Tag;

use crate::errors::{FgdupError, Result};

/// Validate that a file exists.
///
/// # Arguments
/// * `path` - Path to check
/// * `description` - Human-readable description for error messages
///
/// # Errors
/// Returns an error if the file does not exist
pub fn validate_file_exists<P: AsRef<Path>>(path: P, description: &str) -> Result<()> {
    let path_ref = path.as_ref();
    if !path_ref.exists() {
        return Err(FgdupError::InvalidFileFormat {
            file_type: description.to_string(),
            path: path_ref.display().to_string(),
            reason: "File does not exist".to_string(),
        });
    }
    Ok(())
}

/// Validate that a tag string is exactly 2 characters and return its bytes.
///
/// # Errors
/// Returns an error if the tag is not exactly 2 characters
pub fn validate_tag(tag: &str, name: &str) -> Result<[u8; 2]> {
    if tag.len() != 2 {
        return Err(FgdupError::InvalidParameter {
            parameter: name.to_string(),
            reason: format!("Tag must be exactly 2 characters, got: '{tag}'"),
        });
    }
    let bytes = tag.as_bytes();
    Ok([bytes[0], bytes[1]])
}

/// Convert a validated string tag to a noodles `Tag`.
///
/// # Errors
/// Returns an error if the tag is not exactly 2 characters
pub fn string_to_tag(tag: &str, name: &str) -> Result<Tag> {
    let tag_array = validate_tag(tag, name)?;
    Ok(Tag::from(tag_array))
}

/// Convert an optional string tag to an optional noodles `Tag`.
///
/// # Errors
/// Returns an error if the tag is `Some` but not exactly 2 characters
pub fn optional_string_to_tag(tag: Option<&str>, name: &str) -> Result<Option<Tag>> {
    tag.map(|t| string_to_tag(t, name)).transpose()
}
