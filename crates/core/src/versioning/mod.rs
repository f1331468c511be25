//! Which stored version answers a request, and how deprecation is reported.

pub mod deprecation;
pub mod resolver;

use serde_json::{json, Value};
use thiserror::Error;

use crate::domain::process::Environment;
use crate::errors::ErrorCode;

pub use deprecation::{
    days_until_sunset, deprecation_message, sunset_date, VersionHeaders, HEADER_DEPRECATED,
    HEADER_DEPRECATED_MESSAGE, HEADER_ENVIRONMENT, HEADER_SUNSET_DATE, HEADER_VERSION,
    HEADER_VERSION_STATUS, SUNSET_PERIOD_DAYS,
};
pub use resolver::{parse_pin_header, ResolvedVersion, VersionRequest, VersionResolver};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("version {requested} was not found")]
    VersionNotFound { requested: u32, available: Vec<u32>, environment: Environment },
    #[error(
        "version {requested} belongs to the {} environment but the request targets {}",
        version_environment.as_str(),
        request_environment.as_str()
    )]
    EnvironmentMismatch {
        requested: u32,
        version_environment: Environment,
        request_environment: Environment,
    },
    #[error("no active version is available in the {} environment", environment.as_str())]
    NoActiveVersion { environment: Environment },
    #[error("process `{process_id}` was not found")]
    ProcessNotFound { process_id: String },
    #[error("version header `{raw}` must be a positive integer")]
    InvalidVersionHeader { raw: String },
}

impl ResolutionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::VersionNotFound { .. } => ErrorCode::VersionNotFound,
            Self::EnvironmentMismatch { .. } => ErrorCode::VersionEnvironmentMismatch,
            Self::NoActiveVersion { .. } => ErrorCode::NoActiveVersion,
            Self::ProcessNotFound { .. } => ErrorCode::ProcessNotFound,
            Self::InvalidVersionHeader { .. } => ErrorCode::InvalidVersionHeader,
        }
    }

    /// Enough context for a caller to correct the request on its own.
    pub fn details(&self) -> Value {
        match self {
            Self::VersionNotFound { requested, available, environment } => json!({
                "requestedVersion": requested,
                "availableVersions": available,
                "environment": environment.as_code(),
            }),
            Self::EnvironmentMismatch { requested, version_environment, request_environment } => {
                json!({
                    "requestedVersion": requested,
                    "versionEnvironment": version_environment.as_code(),
                    "requestEnvironment": request_environment.as_code(),
                })
            }
            Self::NoActiveVersion { environment } => json!({
                "environment": environment.as_code(),
            }),
            Self::ProcessNotFound { process_id } => json!({ "processId": process_id }),
            Self::InvalidVersionHeader { raw } => json!({ "header": HEADER_VERSION, "value": raw }),
        }
    }
}
