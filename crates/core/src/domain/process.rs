use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;
use crate::schema::SchemaNode;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessVersionId(pub String);

impl ProcessVersionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Environment {
    Sandbox,
    Production,
}

impl Environment {
    /// Lower-case form used in response headers and URLs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sandbox => "sandbox",
            Self::Production => "production",
        }
    }

    /// Upper-case form used in storage and error details.
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Sandbox => "SANDBOX",
            Self::Production => "PRODUCTION",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Environment {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(Self::Sandbox),
            "production" => Ok(Self::Production),
            other => Err(DomainError::InvariantViolation(format!(
                "unknown environment `{other}` (expected sandbox|production)"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionStatus {
    Draft,
    Active,
    Deprecated,
}

impl VersionStatus {
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Active => "ACTIVE",
            Self::Deprecated => "DEPRECATED",
        }
    }
}

impl std::str::FromStr for VersionStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "deprecated" => Ok(Self::Deprecated),
            other => Err(DomainError::InvariantViolation(format!(
                "unknown version status `{other}` (expected draft|active|deprecated)"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptTemplate {
    pub goal: String,
    pub system_instructions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_instructions: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self { max_output_tokens: 1024, temperature: 0.2 }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachePolicy {
    pub enabled: bool,
    pub ttl_secs: u64,
}

/// Everything a version needs to answer a request. Never mutated once stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessConfiguration {
    pub prompt: PromptTemplate,
    #[serde(default)]
    pub generation: GenerationParams,
    pub input_schema: SchemaNode,
    pub output_schema: SchemaNode,
    #[serde(default)]
    pub cache: CachePolicy,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
    pub id: ProcessId,
    pub tenant_id: TenantId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessVersion {
    pub id: ProcessVersionId,
    pub process_id: ProcessId,
    pub version: u32,
    pub environment: Environment,
    pub status: VersionStatus,
    pub deprecated_at: Option<DateTime<Utc>>,
    pub configuration: ProcessConfiguration,
    pub rolled_back_from: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl ProcessVersion {
    /// Builds the next draft for `process_id`, numbered after everything in `existing`.
    pub fn draft(
        process_id: ProcessId,
        environment: Environment,
        configuration: ProcessConfiguration,
        existing: &[ProcessVersion],
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ProcessVersionId::generate(),
            process_id,
            version: next_version_number(existing),
            environment,
            status: VersionStatus::Draft,
            deprecated_at: None,
            configuration,
            rolled_back_from: None,
            created_at: now,
        }
    }

    /// Rollback never rewinds the counter: the source configuration is copied
    /// into a brand new version and the source row is left as it was.
    pub fn rollback_from(
        source: &ProcessVersion,
        existing: &[ProcessVersion],
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if existing.iter().any(|version| version.process_id != source.process_id) {
            return Err(DomainError::InvariantViolation(format!(
                "rollback history for process `{}` contains versions of another process",
                source.process_id.0
            )));
        }
        if !existing.iter().any(|version| version.version == source.version) {
            return Err(DomainError::InvariantViolation(format!(
                "rollback source version {} is not part of the supplied history",
                source.version
            )));
        }

        Ok(Self {
            id: ProcessVersionId::generate(),
            process_id: source.process_id.clone(),
            version: next_version_number(existing),
            environment: source.environment,
            status: VersionStatus::Draft,
            deprecated_at: None,
            configuration: source.configuration.clone(),
            rolled_back_from: Some(source.version),
            created_at: now,
        })
    }

    pub fn is_deprecated(&self) -> bool {
        self.deprecated_at.is_some() || self.status == VersionStatus::Deprecated
    }
}

pub fn next_version_number(existing: &[ProcessVersion]) -> u32 {
    existing.iter().map(|version| version.version).max().unwrap_or(0).saturating_add(1)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, Utc};
    use serde_json::json;

    use super::{
        CachePolicy, Environment, GenerationParams, ProcessConfiguration, ProcessId,
        ProcessVersion, ProcessVersionId, PromptTemplate, VersionStatus,
    };
    use crate::schema::SchemaNode;

    pub fn configuration() -> ProcessConfiguration {
        ProcessConfiguration {
            prompt: PromptTemplate {
                goal: "Classify the support ticket".to_string(),
                system_instructions: "You are a precise triage assistant.".to_string(),
                additional_instructions: None,
            },
            generation: GenerationParams::default(),
            input_schema: SchemaNode::from_json(&json!({
                "type": "object",
                "properties": { "ticket": { "type": "string" } },
                "required": ["ticket"]
            }))
            .unwrap_or_else(|error| panic!("fixture input schema: {error}")),
            output_schema: SchemaNode::from_json(&json!({
                "type": "object",
                "properties": {
                    "category": { "type": "string" },
                    "urgent": { "type": "boolean" }
                },
                "required": ["category", "urgent"]
            }))
            .unwrap_or_else(|error| panic!("fixture output schema: {error}")),
            cache: CachePolicy::default(),
        }
    }

    pub fn version(
        number: u32,
        environment: Environment,
        status: VersionStatus,
        deprecated_at: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
    ) -> ProcessVersion {
        ProcessVersion {
            id: ProcessVersionId(format!("pv-{number}")),
            process_id: ProcessId("proc-triage".to_string()),
            version: number,
            environment,
            status,
            deprecated_at,
            configuration: configuration(),
            rolled_back_from: None,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::fixtures::{configuration, version};
    use super::{Environment, ProcessId, ProcessVersion, VersionStatus};

    #[test]
    fn version_numbers_strictly_increase_across_creates_and_rollbacks() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("valid date");
        let mut history: Vec<ProcessVersion> = Vec::new();

        for step in 0..3 {
            let next = ProcessVersion::draft(
                ProcessId("proc-triage".to_string()),
                Environment::Production,
                configuration(),
                &history,
                start + Duration::minutes(step),
            );
            history.push(next);
        }

        let source = history[0].clone();
        let rolled_back =
            ProcessVersion::rollback_from(&source, &history, start + Duration::hours(1))
                .expect("rollback should succeed");
        history.push(rolled_back.clone());

        let again = ProcessVersion::rollback_from(&history[1], &history, start + Duration::hours(2))
            .expect("second rollback should succeed");
        history.push(again);

        let numbers = history.iter().map(|v| v.version).collect::<Vec<_>>();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        assert!(numbers.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(rolled_back.rolled_back_from, Some(1));
        assert_eq!(rolled_back.configuration, source.configuration);
        assert_eq!(history[0], source, "rollback must leave the source version untouched");
    }

    #[test]
    fn rollback_rejects_foreign_history() {
        let now = Utc::now();
        let mut foreign = version(1, Environment::Sandbox, VersionStatus::Active, None, now);
        foreign.process_id = ProcessId("proc-other".to_string());
        let source = version(2, Environment::Sandbox, VersionStatus::Active, None, now);

        let result = ProcessVersion::rollback_from(&source, &[foreign, source.clone()], now);
        assert!(result.is_err());
    }

    #[test]
    fn environment_parses_case_insensitively() {
        assert_eq!("SANDBOX".parse::<Environment>().ok(), Some(Environment::Sandbox));
        assert_eq!(" production ".parse::<Environment>().ok(), Some(Environment::Production));
        assert!("staging".parse::<Environment>().is_err());
        assert_eq!(Environment::Production.as_code(), "PRODUCTION");
        assert_eq!(Environment::Sandbox.as_str(), "sandbox");
    }
}
