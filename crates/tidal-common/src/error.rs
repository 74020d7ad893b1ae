//! Error types for tidal.

use thiserror::Error;

/// Result type alias using TidalError.
pub type Result<T> = std::result::Result<T, TidalError>;

/// Errors that can occur in tidal operations.
///
/// Absence of a key, entry or value is never an error; lookups return `Option`.
#[derive(Debug, Error)]
pub enum TidalError {
    // Capability errors
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },
}

impl TidalError {
    /// Builds a type mismatch error from anything printable.
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mismatch_display() {
        let err = TidalError::TypeMismatch {
            expected: "record".to_string(),
            actual: "number".to_string(),
        };
        assert_eq!(err.to_string(), "Type mismatch: expected record, got number");

        let err = TidalError::type_mismatch("map outlet", "text");
        assert_eq!(err.to_string(), "Type mismatch: expected map outlet, got text");
    }

    #[test]
    fn test_unsupported_operation_display() {
        let err = TidalError::UnsupportedOperation("set on bound member total".to_string());
        assert_eq!(
            err.to_string(),
            "Unsupported operation: set on bound member total"
        );
    }

    #[test]
    fn test_config_errors_display() {
        let err = TidalError::ConfigError("page split size too small".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: page split size too small"
        );

        let err = TidalError::InvalidParameter {
            name: "page_split_size".to_string(),
            value: "2".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid parameter: page_split_size = 2");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(TidalError::UnsupportedOperation("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TidalError>();
    }
}
