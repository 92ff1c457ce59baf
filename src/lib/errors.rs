//! Custom error types for fgdup operations.

use thiserror::Error;

/// Result type alias for fgdup configuration checks
pub type Result<T> = std::result::Result<T, FgdupError>;

/// Error type for fgdup operations
#[derive(Error, Debug)]
pub enum FgdupError {
    /// Invalid parameter value provided
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// The parameter name
        parameter: String,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// File format error
    #[error("Invalid {file_type} file '{path}': {reason}")]
    InvalidFileFormat {
        /// Type of file (e.g., "BAM", "SAM")
        file_type: String,
        /// Path to the file
        path: String,
        /// Explanation of the problem
        reason: String,
    },

    /// Input has a sort order the pipeline cannot traverse
    #[error("Unsupported sort order '{found}': input must be coordinate or queryname sorted")]
    UnsupportedSortOrder {
        /// The sort order found in the header (or "unknown")
        found: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_parameter() {
        let error = FgdupError::InvalidParameter {
            parameter: "barcode-tag".to_string(),
            reason: "must be 2 characters".to_string(),
        };
        let msg = format!("{error}");
        assert!(msg.contains("Invalid parameter 'barcode-tag'"));
        assert!(msg.contains("must be 2 characters"));
    }

    #[test]
    fn test_invalid_file_format() {
        let error = FgdupError::InvalidFileFormat {
            file_type: "BAM".to_string(),
            path: "/path/to/file.bam".to_string(),
            reason: "truncated file".to_string(),
        };
        let msg = format!("{error}");
        assert!(msg.contains("Invalid BAM file"));
        assert!(msg.contains("truncated file"));
    }

    #[test]
    fn test_unsupported_sort_order() {
        let error = FgdupError::UnsupportedSortOrder { found: "unsorted".to_string() };
        let msg = format!("{error}");
        assert!(msg.contains("unsorted"));
        assert!(msg.contains("coordinate or queryname"));
    }
}
