use serde_json::json;
use synapse_core::errors::{ErrorCode, InterfaceError};
use synapse_core::schema::ValidationIssue;
use thiserror::Error;

use crate::llm::ProviderError;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum GenerationError {
    #[error("input does not match the declared input schema")]
    InputValidation { issues: Vec<ValidationIssue> },
    #[error("prompt could not be rendered: {0}")]
    PromptRender(String),
    #[error("provider `{provider}` is unavailable; retry in {retry_after_secs}s")]
    BreakerOpen { provider: String, retry_after_secs: u64 },
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("model output did not match the declared output schema after retry")]
    OutputValidation { issues: Vec<ValidationIssue> },
}

impl GenerationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InputValidation { .. } | Self::PromptRender(_) => ErrorCode::InputValidationFailed,
            Self::BreakerOpen { .. } => ErrorCode::ProviderUnavailable,
            Self::Provider(ProviderError::Timeout { .. }) => ErrorCode::ProviderTimeout,
            Self::Provider(ProviderError::RateLimited { .. }) => ErrorCode::ProviderRateLimited,
            Self::Provider(ProviderError::Cancelled) => ErrorCode::RequestCancelled,
            Self::Provider(_) => ErrorCode::ProviderError,
            Self::OutputValidation { .. } => ErrorCode::OutputValidationFailed,
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::BreakerOpen { retry_after_secs, .. } => Some(*retry_after_secs),
            Self::Provider(ProviderError::RateLimited { retry_after_secs }) => *retry_after_secs,
            _ => None,
        }
    }
}

impl From<GenerationError> for InterfaceError {
    fn from(value: GenerationError) -> Self {
        let code = value.code();
        let message = value.to_string();
        let details = match &value {
            GenerationError::InputValidation { issues }
            | GenerationError::OutputValidation { issues } => json!({ "issues": issues }),
            GenerationError::BreakerOpen { provider, retry_after_secs } => json!({
                "provider": provider,
                "retryAfterSeconds": retry_after_secs,
            }),
            GenerationError::Provider(ProviderError::RateLimited { retry_after_secs }) => {
                json!({ "retryAfterSeconds": retry_after_secs })
            }
            GenerationError::Provider(ProviderError::Http { status, .. }) => {
                json!({ "upstreamStatus": status })
            }
            GenerationError::PromptRender(_) | GenerationError::Provider(_) => json!({}),
        };
        InterfaceError::new(code, message).with_details(details)
    }
}
