//! Request-level audit trail. One event per generation request, keyed by the
//! correlation id that also appears in logs and error bodies.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::process::{ProcessId, TenantId};
use crate::errors::ErrorCode;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Resolution,
    Generation,
    Provider,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolution => "resolution",
            Self::Generation => "generation",
            Self::Provider => "provider",
        }
    }

    /// Which stage a failed request stopped at.
    pub fn for_failure(code: ErrorCode) -> Self {
        match code {
            ErrorCode::VersionNotFound
            | ErrorCode::VersionEnvironmentMismatch
            | ErrorCode::NoActiveVersion
            | ErrorCode::ProcessNotFound
            | ErrorCode::InvalidVersionHeader => Self::Resolution,
            ErrorCode::ProviderUnavailable
            | ErrorCode::ProviderTimeout
            | ErrorCode::ProviderRateLimited
            | ErrorCode::ProviderError
            | ErrorCode::RequestCancelled => Self::Provider,
            ErrorCode::InputValidationFailed
            | ErrorCode::OutputValidationFailed
            | ErrorCode::Unauthorized
            | ErrorCode::ServiceUnavailable => Self::Generation,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    /// The caller's request was at fault (bad input, unknown version).
    Rejected,
    /// The service or an upstream provider was at fault.
    Failed,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub tenant_id: Option<TenantId>,
    pub process_id: Option<ProcessId>,
    pub correlation_id: String,
    pub event_type: String,
    pub category: AuditCategory,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        correlation_id: impl Into<String>,
        event_type: impl Into<String>,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            tenant_id: None,
            process_id: None,
            correlation_id: correlation_id.into(),
            event_type: event_type.into(),
            category,
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn for_process(mut self, tenant_id: TenantId, process_id: ProcessId) -> Self {
        self.tenant_id = Some(tenant_id);
        self.process_id = Some(process_id);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Best-effort notification; a sink must never influence the response.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Keeps every event in memory. Used by tests and local runs.
#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    fn lock(&self) -> MutexGuard<'_, Vec<AuditEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.lock().clone()
    }

    pub fn events_for(&self, correlation_id: &str) -> Vec<AuditEvent> {
        self.lock().iter().filter(|event| event.correlation_id == correlation_id).cloned().collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        self.lock().push(event);
    }
}
