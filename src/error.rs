//! Error types for the host-override crate.
//!
//! Only startup configuration can fail with an error. Everything that goes
//! wrong once requests are flowing is reported through the event channel
//! instead (see [`crate::events`]).

use thiserror::Error;

/// Main error type for the host-override crate.
#[derive(Error, Debug)]
pub enum InterceptError {
    /// Configuration file could not be found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// A line of the override file has no `=` separator.
    #[error("Couldn't find separator on line: {line}")]
    MissingSeparator { line: usize },

    /// A line of the override file has an empty key or an empty value.
    #[error("Bad format for line: {line}")]
    BadFormat { line: usize },

    /// The same key appears twice in the override file.
    #[error("Can only have unique key names: '{key}' repeated on line {line}")]
    DuplicateKey { key: String, line: usize },

    /// Settings file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    /// Settings validation failed.
    #[error("Invalid configuration: {message}")]
    ConfigValidation { message: String },

    /// The interceptor service task has stopped.
    #[error("Interceptor service is no longer running")]
    ServiceClosed,

    /// I/O error wrapper.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl InterceptError {
    /// Creates a new configuration parse error.
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
        }
    }

    /// Creates a new configuration validation error.
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Line number of the offending override file line, if any.
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::MissingSeparator { line }
            | Self::BadFormat { line }
            | Self::DuplicateKey { line, .. } => Some(*line),
            _ => None,
        }
    }
}

/// Result type alias using InterceptError.
pub type Result<T> = std::result::Result<T, InterceptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = InterceptError::ConfigNotFound {
            path: "/etc/dns.cfg".to_string(),
        };
        assert!(err.to_string().contains("/etc/dns.cfg"));

        let err = InterceptError::MissingSeparator { line: 3 };
        assert_eq!(err.to_string(), "Couldn't find separator on line: 3");

        let err = InterceptError::config_parse("invalid yaml");
        assert!(err.to_string().contains("invalid yaml"));
    }

    #[test]
    fn test_error_line() {
        assert_eq!(InterceptError::BadFormat { line: 7 }.line(), Some(7));
        let dup = InterceptError::DuplicateKey {
            key: "a.com".to_string(),
            line: 2,
        };
        assert_eq!(dup.line(), Some(2));
        assert_eq!(InterceptError::ServiceClosed.line(), None);
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: InterceptError = io_err.into();
        assert!(matches!(err, InterceptError::Io(_)));
    }
}
