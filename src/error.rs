//! Error taxonomy shared by the loader, the executor and the
//! retry policy.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of an engine failure as it appears in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    VariableResolution,
    Locator,
    ElementNotFound,
    Timeout,
    AssertionFailure,
    DriverFatal,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Config => "ConfigError",
            ErrorKind::VariableResolution => "VariableResolutionError",
            ErrorKind::Locator => "LocatorError",
            ErrorKind::ElementNotFound => "ElementNotFound",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::AssertionFailure => "AssertionFailure",
            ErrorKind::DriverFatal => "DriverFatalError",
            ErrorKind::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// Errors raised while loading or executing a scenario.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("{0}")]
    Config(String),

    #[error("unresolved variable '${{{name}}}' in {field}")]
    VariableResolution { name: String, field: String },

    #[error("invalid target '{target}': {reason}")]
    Locator { target: String, reason: String },

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("{operation} timed out after {seconds:.1}s")]
    Timeout { operation: String, seconds: f64 },

    /// A timeout reported by the driver itself, with no engine-side limit.
    #[error("driver timed out: {0}")]
    DriverTimeout(String),

    #[error("{0}")]
    Assertion(String),

    #[error("driver failure: {message}")]
    DriverFatal { message: String, transient: bool },

    #[error("run cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn config(message: impl Into<String>) -> Self {
        EngineError::Config(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Config(_) => ErrorKind::Config,
            EngineError::VariableResolution { .. } => {
                ErrorKind::VariableResolution
            }
            EngineError::Locator { .. } => ErrorKind::Locator,
            EngineError::ElementNotFound(_) => ErrorKind::ElementNotFound,
            EngineError::Timeout { .. } | EngineError::DriverTimeout(_) => {
                ErrorKind::Timeout
            }
            EngineError::Assertion(_) => ErrorKind::AssertionFailure,
            EngineError::DriverFatal { .. } => ErrorKind::DriverFatal,
            EngineError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether another attempt of the same step may succeed.
    ///
    /// Assertion failures are terminal: the page answered, it just
    /// answered wrong. A driver failure is retried only when the
    /// driver reported the session as still usable.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::ElementNotFound(_)
            | EngineError::Timeout { .. }
            | EngineError::DriverTimeout(_) => true,
            EngineError::DriverFatal { transient, .. } => *transient,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(EngineError::ElementNotFound("id:x".into()).is_retryable());
        assert!(EngineError::Timeout {
            operation: "navigate".into(),
            seconds: 1.0
        }
        .is_retryable());
        assert!(EngineError::DriverFatal {
            message: "click intercepted".into(),
            transient: true
        }
        .is_retryable());
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(!EngineError::Assertion("mismatch".into()).is_retryable());
        assert!(!EngineError::DriverFatal {
            message: "session deleted".into(),
            transient: false
        }
        .is_retryable());
        assert!(!EngineError::Cancelled.is_retryable());
        assert!(!EngineError::config("bad").is_retryable());
    }

    #[test]
    fn test_variable_error_names_identifier() {
        let err = EngineError::VariableResolution {
            name: "missing".into(),
            field: "step 2 value".into(),
        };
        assert_eq!(
            err.to_string(),
            "unresolved variable '${missing}' in step 2 value"
        );
        assert_eq!(err.kind().to_string(), "VariableResolutionError");
    }
}
