//! Error types for taskmill operations.

use thiserror::Error;

/// Result type used throughout taskmill.
pub type MillResult<T> = Result<T, MillError>;

/// Main error type for taskmill operations.
#[derive(Error, Debug)]
pub enum MillError {
    /// The durable queue store cannot be reached or refused the operation
    #[error("broker unavailable: {message}")]
    BrokerUnavailable {
        /// Transport-level detail
        message: String,
    },

    /// A dequeued task has no registered handler
    #[error("no handler registered for task type '{task_type}'")]
    UnknownTaskType {
        /// The task type that wasn't found
        task_type: String,
    },

    /// A handler could not deserialize its payload
    #[error("failed to decode payload for task type '{task_type}'")]
    PayloadDecode {
        /// Task type whose payload was rejected
        task_type: String,
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },

    /// A handler's business logic reported a transient failure
    #[error("handler failed: {message}")]
    Handler {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation attempted after the service has shut down
    #[error("task service is stopped")]
    ServiceStopped,

    /// The service is already running
    #[error("task service is already running")]
    AlreadyRunning,

    /// The service is not running
    #[error("task service is not running")]
    NotRunning,

    /// Service start aborted (empty registry, broker connect failure, ...)
    #[error("startup failed: {message}")]
    Startup {
        /// Error message
        message: String,
    },

    /// Broker-internal error
    #[error("queue error: {message}")]
    Queue {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization/deserialization error outside the handler boundary
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MillError {
    /// Create a handler error from a message and an underlying error.
    pub fn handler<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Handler {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a handler error from a message alone.
    pub fn handler_msg(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
            source: None,
        }
    }

    /// Create a broker-unavailable error.
    pub fn broker_unavailable(message: impl Into<String>) -> Self {
        Self::BrokerUnavailable {
            message: message.into(),
        }
    }

    /// Create a queue error with an underlying cause.
    pub fn queue<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Queue {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a queue error from a message alone.
    pub fn queue_msg(message: impl Into<String>) -> Self {
        Self::Queue {
            message: message.into(),
            source: None,
        }
    }

    /// Create a startup error.
    pub fn startup(message: impl Into<String>) -> Self {
        Self::Startup {
            message: message.into(),
        }
    }

    /// Whether a failed delivery attempt should be handed back to the broker
    /// for another try.
    ///
    /// `UnknownTaskType` and `PayloadDecode` are permanent: the envelope is
    /// immutable, so retrying cannot change the outcome. Everything else a
    /// handler can produce is treated as transient.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::UnknownTaskType { .. } | Self::PayloadDecode { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(
            !MillError::UnknownTaskType {
                task_type: "x".to_string()
            }
            .is_retryable()
        );

        let decode_err = serde_json::from_str::<u32>("not json").unwrap_err();
        assert!(
            !MillError::PayloadDecode {
                task_type: "x".to_string(),
                source: decode_err,
            }
            .is_retryable()
        );

        assert!(MillError::handler_msg("smtp timeout").is_retryable());
        assert!(MillError::broker_unavailable("connection refused").is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = MillError::UnknownTaskType {
            task_type: "welcome_email".to_string(),
        };
        assert!(err.to_string().contains("welcome_email"));

        let err = MillError::ServiceStopped;
        assert_eq!(err.to_string(), "task service is stopped");
    }
}
