use std::sync::{Arc, Mutex};

use serde::Serialize;
use synapse_core::redaction::redact_pii;
use synapse_core::schema::{ValidationIssue, ValidationOutcome};
use tracing::info;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AttemptOutcome {
    Valid,
    ParseError { message: String },
    Invalid { issues: Vec<ValidationIssue> },
}

impl From<&ValidationOutcome> for AttemptOutcome {
    fn from(outcome: &ValidationOutcome) -> Self {
        match outcome {
            ValidationOutcome::Valid(_) => Self::Valid,
            ValidationOutcome::ParseError(message) => Self::ParseError { message: message.clone() },
            ValidationOutcome::Invalid(issues) => Self::Invalid { issues: issues.clone() },
        }
    }
}

/// One provider round-trip as seen by the orchestrator. Prompts and the raw
/// response are redacted on construction, so a record never holds unscrubbed text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub correlation_id: String,
    pub attempt: u8,
    pub provider: String,
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub redacted_response: String,
    pub outcome: AttemptOutcome,
    pub latency_ms: u64,
}

impl AttemptRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        correlation_id: &str,
        attempt: u8,
        provider: &str,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        raw_response: &str,
        outcome: &ValidationOutcome,
        latency_ms: u64,
    ) -> Self {
        Self {
            correlation_id: correlation_id.to_string(),
            attempt,
            provider: provider.to_string(),
            model: model.to_string(),
            system_prompt: redact_pii(system_prompt),
            user_prompt: redact_pii(user_prompt),
            redacted_response: redact_pii(raw_response),
            outcome: AttemptOutcome::from(outcome),
            latency_ms,
        }
    }
}

pub trait AttemptLogger: Send + Sync {
    fn record(&self, record: &AttemptRecord);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAttemptLogger;

impl AttemptLogger for TracingAttemptLogger {
    fn record(&self, record: &AttemptRecord) {
        let outcome = match &record.outcome {
            AttemptOutcome::Valid => "valid",
            AttemptOutcome::ParseError { .. } => "parse_error",
            AttemptOutcome::Invalid { .. } => "invalid",
        };
        info!(
            event_name = "generation.attempt.recorded",
            correlation_id = %record.correlation_id,
            attempt = record.attempt,
            provider = %record.provider,
            model = %record.model,
            outcome,
            latency_ms = record.latency_ms,
            response = %record.redacted_response,
            "generation attempt recorded"
        );
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAttemptLogger {
    records: Arc<Mutex<Vec<AttemptRecord>>>,
}

impl InMemoryAttemptLogger {
    pub fn records(&self) -> Vec<AttemptRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AttemptLogger for InMemoryAttemptLogger {
    fn record(&self, record: &AttemptRecord) {
        match self.records.lock() {
            Ok(mut records) => records.push(record.clone()),
            Err(poisoned) => poisoned.into_inner().push(record.clone()),
        }
    }
}
