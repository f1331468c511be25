pub mod audit;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod domain;
pub mod errors;
pub mod redaction;
pub mod schema;
pub mod versioning;

pub use breaker::{
    BreakerConfig, BreakerListener, BreakerRegistry, BreakerSnapshot, BreakerTransition,
    CircuitBreaker, CircuitState,
};
pub use cache::{CacheKey, InMemoryResponseCache, ResponseCache};
pub use domain::process::{
    CachePolicy, Environment, GenerationParams, Process, ProcessConfiguration, ProcessId,
    ProcessVersion, ProcessVersionId, PromptTemplate, TenantId, VersionStatus,
};
pub use errors::{ApplicationError, DomainError, ErrorCode, InterfaceError};
pub use redaction::redact_pii;
pub use schema::{SchemaNode, SchemaValidator, ValidationIssue, ValidationOutcome};
pub use versioning::{ResolutionError, ResolvedVersion, VersionRequest, VersionResolver};
