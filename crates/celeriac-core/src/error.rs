//! Error types for Celeriac

use std::time::Duration;
use thiserror::Error;

/// Result type alias using Celeriac's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Celeriac operations
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level connect or authentication failure
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Broker rejected or did not confirm a publication
    #[error("publish failed: {0}")]
    PublishFailed(String),

    /// A result message exists but is not in the expected serialization format
    #[error("malformed result: {0}")]
    MalformedResult(String),

    /// Status, result or traceback requested before the result was ready
    #[error("called {0} before task was ready")]
    PrematureAccess(&'static str),

    /// Task arguments are not a recognized container shape
    #[error("invalid task arguments: {0}")]
    InvalidArguments(String),

    /// An eta/expires value is not a valid timestamp
    #[error("invalid date parameter `{field}`: {reason}")]
    InvalidDateParameter { field: String, reason: String },

    /// A callback list is not a sequence of task names
    #[error("invalid callback parameter `{field}`: {reason}")]
    InvalidCallbackParameter { field: String, reason: String },

    /// Result polling ran past its deadline
    #[error("task {task_name}({args}) did not return after {timeout:?}")]
    Timeout {
        task_name: String,
        args: String,
        timeout: Duration,
    },

    /// No usable backend could be selected
    #[error("no usable broker backend available")]
    NoBackendAvailable,

    /// Backend name is not one of the known backends
    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    /// Backend is known but not compiled into this build
    #[error("backend `{0}` is not available in this build")]
    BackendUnavailable(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Check if the whole operation may be retried by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed(_) | Error::PublishFailed(_) | Error::Timeout { .. }
        )
    }

    /// Check if this error signals misuse of the API rather than a runtime condition
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            Error::PrematureAccess(_) | Error::InvalidArguments(_)
        )
    }

    /// Check if this error was raised while choosing a backend
    pub fn is_selection_error(&self) -> bool {
        matches!(
            self,
            Error::NoBackendAvailable | Error::UnknownBackend(_) | Error::BackendUnavailable(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::ConnectionFailed("refused".into()).is_retryable());
        assert!(!Error::MalformedResult("text/plain".into()).is_retryable());
        assert!(Error::PrematureAccess("status").is_programmer_error());
        assert!(Error::NoBackendAvailable.is_selection_error());
        assert!(!Error::NoBackendAvailable.is_retryable());
    }

    #[test]
    fn test_timeout_message_names_task() {
        let err = Error::Timeout {
            task_name: "tasks.add".into(),
            args: "[2,2]".into(),
            timeout: Duration::from_secs(10),
        };
        assert_eq!(err.to_string(), "task tasks.add([2,2]) did not return after 10s");
    }
}
