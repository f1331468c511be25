//! Generation runtime - turns a resolved process version plus caller input
//! into schema-valid structured output.
//!
//! # Flow
//!
//! 1. **Input validation** - caller input is checked against the version's input schema
//! 2. **Prompt rendering** (`prompt`) - system/user prompts built from the template
//! 3. **Guarded call** (`guard`) - circuit breaker admission, timeout, deadline
//! 4. **Validate and retry once** (`retry`) - one corrective request, never more
//!
//! Provider failures (timeouts, rate limits, HTTP errors) are surfaced as
//! typed errors and are never retried here; only a response that fails output
//! validation earns the single retry.

pub mod attempt;
pub mod error;
pub mod guard;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod providers;
pub mod retry;

pub use error::GenerationError;
pub use guard::{GuardedClient, TracingBreakerListener};
pub use llm::{LlmClient, LlmCompletion, LlmRequest, ProviderError, ScriptedLlmClient, TokenUsage};
pub use pipeline::{GenerationMetadata, GenerationOutput, GenerationPipeline, GenerationRequest};
