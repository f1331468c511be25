use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use synapse_core::domain::process::{
    Environment, Process, ProcessConfiguration, ProcessId, ProcessVersion, ProcessVersionId,
    TenantId, VersionStatus,
};
use synapse_core::errors::DomainError;

pub mod memory;
pub mod process_version;

pub use memory::InMemoryProcessVersionRepository;
pub use process_version::SqlProcessVersionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Tenant-scoped storage for processes and their numbered versions.
///
/// Every creation path (new draft or rollback) numbers the new row after the
/// highest stored version, so numbers strictly increase and are never reused.
#[async_trait]
pub trait ProcessVersionRepository: Send + Sync {
    async fn save_process(&self, process: Process) -> Result<(), RepositoryError>;

    async fn find_process(
        &self,
        tenant_id: &TenantId,
        process_id: &ProcessId,
    ) -> Result<Option<Process>, RepositoryError>;

    /// All versions of the process across environments, ordered by number.
    /// Empty when the process does not belong to `tenant_id`.
    async fn list_versions(
        &self,
        tenant_id: &TenantId,
        process_id: &ProcessId,
    ) -> Result<Vec<ProcessVersion>, RepositoryError>;

    async fn create_version(
        &self,
        tenant_id: &TenantId,
        process_id: &ProcessId,
        environment: Environment,
        configuration: ProcessConfiguration,
        now: DateTime<Utc>,
    ) -> Result<ProcessVersion, RepositoryError>;

    /// Copies the configuration of `source_version` into a new draft.
    async fn rollback_to(
        &self,
        tenant_id: &TenantId,
        process_id: &ProcessId,
        source_version: u32,
        now: DateTime<Utc>,
    ) -> Result<ProcessVersion, RepositoryError>;

    /// Lifecycle change. Setting `Deprecated` stamps `deprecated_at` with `now`
    /// unless the version already carries a deprecation timestamp.
    async fn set_status(
        &self,
        tenant_id: &TenantId,
        version_id: &ProcessVersionId,
        status: VersionStatus,
        now: DateTime<Utc>,
    ) -> Result<ProcessVersion, RepositoryError>;
}

pub(crate) fn apply_status(
    version: &mut ProcessVersion,
    status: VersionStatus,
    now: DateTime<Utc>,
) {
    version.status = status;
    match status {
        VersionStatus::Deprecated => {
            version.deprecated_at.get_or_insert(now);
        }
        VersionStatus::Active | VersionStatus::Draft => version.deprecated_at = None,
    }
}

pub(crate) fn process_not_found(tenant_id: &TenantId, process_id: &ProcessId) -> RepositoryError {
    RepositoryError::NotFound(format!(
        "process `{}` does not exist for tenant `{}`",
        process_id.0, tenant_id.0
    ))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;
    use synapse_core::domain::process::{
        CachePolicy, GenerationParams, Process, ProcessConfiguration, ProcessId,
        PromptTemplate, TenantId,
    };
    use synapse_core::schema::SchemaNode;

    pub fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 9, 0, 0).single().expect("valid timestamp")
    }

    pub fn tenant() -> TenantId {
        TenantId("tenant-acme".to_string())
    }

    pub fn process() -> Process {
        Process {
            id: ProcessId("proc-summarise".to_string()),
            tenant_id: tenant(),
            name: "Summarise call notes".to_string(),
            created_at: at(1),
        }
    }

    pub fn configuration(goal: &str) -> ProcessConfiguration {
        ProcessConfiguration {
            prompt: PromptTemplate {
                goal: goal.to_string(),
                system_instructions: "You summarise sales calls.".to_string(),
                additional_instructions: None,
            },
            generation: GenerationParams::default(),
            input_schema: SchemaNode::from_json(&json!({
                "type": "object",
                "properties": { "notes": { "type": "string" } },
                "required": ["notes"]
            }))
            .expect("input schema"),
            output_schema: SchemaNode::from_json(&json!({
                "type": "object",
                "properties": { "summary": { "type": "string" } },
                "required": ["summary"]
            }))
            .expect("output schema"),
            cache: CachePolicy { enabled: true, ttl_secs: 300 },
        }
    }
}
