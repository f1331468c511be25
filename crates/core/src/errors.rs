use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::versioning::ResolutionError;

const UNASSIGNED_CORRELATION_ID: &str = "unassigned";

/// Stable, machine-readable failure codes. Every failure maps to exactly one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    VersionNotFound,
    VersionEnvironmentMismatch,
    NoActiveVersion,
    ProcessNotFound,
    InvalidVersionHeader,
    InputValidationFailed,
    OutputValidationFailed,
    ProviderUnavailable,
    ProviderTimeout,
    ProviderRateLimited,
    ProviderError,
    RequestCancelled,
    Unauthorized,
    ServiceUnavailable,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VersionNotFound => "VERSION_NOT_FOUND",
            Self::VersionEnvironmentMismatch => "VERSION_ENVIRONMENT_MISMATCH",
            Self::NoActiveVersion => "NO_ACTIVE_VERSION",
            Self::ProcessNotFound => "PROCESS_NOT_FOUND",
            Self::InvalidVersionHeader => "INVALID_VERSION_HEADER",
            Self::InputValidationFailed => "INPUT_VALIDATION_FAILED",
            Self::OutputValidationFailed => "OUTPUT_VALIDATION_FAILED",
            Self::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            Self::ProviderTimeout => "PROVIDER_TIMEOUT",
            Self::ProviderRateLimited => "PROVIDER_RATE_LIMITED",
            Self::ProviderError => "PROVIDER_ERROR",
            Self::RequestCancelled => "REQUEST_CANCELLED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::VersionNotFound | Self::NoActiveVersion | Self::ProcessNotFound => 404,
            Self::VersionEnvironmentMismatch | Self::InvalidVersionHeader => 400,
            Self::InputValidationFailed | Self::OutputValidationFailed => 422,
            Self::ProviderUnavailable | Self::ServiceUnavailable => 503,
            Self::ProviderTimeout => 504,
            Self::ProviderRateLimited => 429,
            Self::ProviderError | Self::RequestCancelled => 502,
            Self::Unauthorized => 401,
        }
    }

    /// Resolution and validation failures are expected answers, not incidents.
    pub fn is_operational_alert(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable
                | Self::ProviderTimeout
                | Self::ProviderRateLimited
                | Self::ProviderError
                | Self::RequestCancelled
                | Self::ServiceUnavailable
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

/// The single error shape that crosses the HTTP boundary.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("{code}: {message}")]
pub struct InterfaceError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub correlation_id: String,
}

impl InterfaceError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Value::Object(Default::default()),
            correlation_id: UNASSIGNED_CORRELATION_ID.to_owned(),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn status(&self) -> u16 {
        self.code.http_status()
    }

    pub fn body(&self) -> Value {
        json!({
            "code": self.code,
            "message": self.message,
            "details": self.details,
            "correlationId": self.correlation_id,
        })
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        InterfaceError::from(self).with_correlation_id(correlation_id)
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        // Internal detail stays in logs; callers get a user-safe sentence.
        match value {
            ApplicationError::Domain(DomainError::InvariantViolation(_)) => Self::new(
                ErrorCode::InputValidationFailed,
                "The request could not be processed. Check inputs and try again.",
            ),
            ApplicationError::Persistence(_) => Self::new(
                ErrorCode::ServiceUnavailable,
                "The service is temporarily unavailable. Please retry shortly.",
            ),
        }
    }
}

impl From<ResolutionError> for InterfaceError {
    fn from(value: ResolutionError) -> Self {
        Self::new(value.code(), value.to_string()).with_details(value.details())
    }
}
