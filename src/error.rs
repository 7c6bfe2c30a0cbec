use std::error::Error as StdError;
use std::time::Duration;

use crate::request::ValidationErrors;

pub type Result<T> = std::result::Result<T, ServiceError>;

type BoxError = Box<dyn StdError + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// One or more request fields are missing, mistyped or out of bounds
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationErrors),

    /// The model backend failed while serving a request
    #[error("Backend error: {message}")]
    Backend {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Building the model facade failed; the process must not serve
    #[error("Startup error: {message}")]
    Startup {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        duration: Duration,
        operation: String,
    },

    #[error("Configuration error for {parameter}: {message}")]
    Configuration {
        message: String,
        parameter: String,
    },
}

impl ServiceError {
    pub fn backend(message: impl Into<String>) -> Self {
        ServiceError::Backend {
            message: message.into(),
            source: None,
        }
    }

    pub fn backend_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        ServiceError::Backend {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn startup(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        ServiceError::Startup {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn configuration(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        ServiceError::Configuration {
            message: message.into(),
            parameter: parameter.into(),
        }
    }
}

impl From<candle_core::Error> for ServiceError {
    fn from(error: candle_core::Error) -> Self {
        ServiceError::backend_with("tensor operation failed", error)
    }
}

/// Extension trait for error handling utilities
pub trait ErrorExt {
    /// Whether a caller can succeed by resubmitting (possibly corrected) input
    fn is_recoverable(&self) -> bool;
}

impl ErrorExt for ServiceError {
    fn is_recoverable(&self) -> bool {
        match self {
            ServiceError::Validation(_)
            | ServiceError::Backend { .. }
            | ServiceError::Timeout { .. } => true,
            ServiceError::Startup { .. } | ServiceError::Configuration { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Reason;

    #[test]
    fn test_error_display() {
        let error = ServiceError::Timeout {
            duration: Duration::from_secs(2),
            operation: "generate".to_string(),
        };
        assert_eq!(error.to_string(), "Operation 'generate' timed out after 2s");

        let error = ServiceError::configuration("PORT", "not a number");
        assert_eq!(error.to_string(), "Configuration error for PORT: not a number");
    }

    #[test]
    fn test_error_recovery_classification() {
        let validation = ServiceError::from(ValidationErrors::single(
            "text",
            Reason::TooShort,
            "must have at least 1 character(s)",
        ));
        assert!(validation.is_recoverable());
        assert!(ServiceError::backend("out of memory").is_recoverable());

        let startup = ServiceError::startup("missing weights", "model.safetensors not found");
        assert!(!startup.is_recoverable());
        assert!(startup.source().is_some());
    }
}
