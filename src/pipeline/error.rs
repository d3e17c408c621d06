use std::time::Duration;

use crate::{model::ModelError, storage::settings_store::StoreError};

/// How a failure should be treated by whoever submitted the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input or configuration the user has to fix. Never retried.
    Validation,
    /// There is no usable profile. Never retried.
    Authentication,
    /// Worth trying again, possibly after a delay.
    Transient,
    Fatal,
}

impl ErrorClass {
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorClass::Validation => 2,
            ErrorClass::Authentication => 3,
            ErrorClass::Transient => 4,
            ErrorClass::Fatal => 1,
        }
    }
}

/// Failure of a processing request. The display text is what users get to see, the
/// underlying cause is kept for logs.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("{0}")]
    Validation(String),
    #[error("Authentication required. Please log in to continue.")]
    Unauthenticated,
    #[error("Failed to load user settings")]
    Settings(String),
    #[error("AI service configuration error. Please check your API key configuration.")]
    ModelConfiguration(String),
    #[error("AI service rate limit exceeded. Please try again in a moment.")]
    RateLimited { retry_after: Option<Duration> },
    #[error("AI service timeout. Please try again.")]
    Timeout,
    #[error("AI did not generate formatted output")]
    NoStructuredOutput(String),
    #[error("AI service is temporarily unavailable. Please try again.")]
    ModelUnavailable(String),
    #[error("An unexpected error occurred while processing your request. Please try again.")]
    Model(String),
    #[error("Request cancelled")]
    Cancelled,
}

impl ProcessingError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ProcessingError::Validation(_) => ErrorClass::Validation,
            ProcessingError::Unauthenticated => ErrorClass::Authentication,
            ProcessingError::RateLimited { .. }
            | ProcessingError::Timeout
            | ProcessingError::NoStructuredOutput(_)
            | ProcessingError::ModelUnavailable(_) => ErrorClass::Transient,
            ProcessingError::Settings(_)
            | ProcessingError::ModelConfiguration(_)
            | ProcessingError::Model(_)
            | ProcessingError::Cancelled => ErrorClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Minimum wait the service asked for before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProcessingError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Technical cause, not meant for users.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ProcessingError::Settings(v)
            | ProcessingError::ModelConfiguration(v)
            | ProcessingError::NoStructuredOutput(v)
            | ProcessingError::ModelUnavailable(v)
            | ProcessingError::Model(v) => Some(v),
            _ => None,
        }
    }
}

impl From<ModelError> for ProcessingError {
    fn from(value: ModelError) -> Self {
        match value {
            ModelError::Configuration(v) => ProcessingError::ModelConfiguration(v),
            ModelError::RateLimited { retry_after } => ProcessingError::RateLimited { retry_after },
            ModelError::Timeout => ProcessingError::Timeout,
            ModelError::Unavailable(v) => ProcessingError::ModelUnavailable(v),
            ModelError::NoStructuredOutput(v) => ProcessingError::NoStructuredOutput(v),
            ModelError::Request(v) => ProcessingError::Model(v),
        }
    }
}

impl From<StoreError> for ProcessingError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotInitialized => ProcessingError::Unauthenticated,
            StoreError::Validation(v) => ProcessingError::Validation(v),
            other => ProcessingError::Settings(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::{model::ModelError, storage::settings_store::StoreError};

    use super::{ErrorClass, ProcessingError};

    #[test]
    fn model_errors_are_classified() {
        let cases = [
            (ModelError::Configuration("no key".into()), ErrorClass::Fatal),
            (ModelError::RateLimited { retry_after: None }, ErrorClass::Transient),
            (ModelError::Timeout, ErrorClass::Transient),
            (ModelError::Unavailable("503".into()), ErrorClass::Transient),
            (ModelError::NoStructuredOutput("empty".into()), ErrorClass::Transient),
            (ModelError::Request("400".into()), ErrorClass::Fatal),
        ];
        for (error, class) in cases {
            assert_eq!(ProcessingError::from(error).class(), class);
        }
    }

    #[test]
    fn messages_hide_details() {
        let error = ProcessingError::from(ModelError::Configuration("key sk-123 rejected".into()));
        assert_eq!(
            error.to_string(),
            "AI service configuration error. Please check your API key configuration."
        );
        assert_eq!(error.detail(), Some("key sk-123 rejected"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn rate_limit_keeps_delay() {
        let error = ProcessingError::from(ModelError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        });
        assert!(error.is_retryable());
        assert_eq!(error.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(ProcessingError::Timeout.retry_after(), None);
    }

    #[test]
    fn store_errors_are_classified() {
        assert_eq!(
            ProcessingError::from(StoreError::NotInitialized).class(),
            ErrorClass::Authentication
        );
        assert_eq!(
            ProcessingError::from(StoreError::Validation("Name is required".into())).to_string(),
            "Name is required"
        );
        assert_eq!(
            ProcessingError::from(StoreError::NotFound { kind: "column", id: 3 }).class(),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn exit_codes() {
        assert_eq!(ErrorClass::Validation.exit_code(), 2);
        assert_eq!(ErrorClass::Authentication.exit_code(), 3);
        assert_eq!(ErrorClass::Transient.exit_code(), 4);
        assert_eq!(ErrorClass::Fatal.exit_code(), 1);
    }
}
