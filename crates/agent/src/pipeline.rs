use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use synapse_core::domain::process::ProcessConfiguration;
use synapse_core::schema::{SchemaValidator, ValidationOutcome};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::attempt::{AttemptLogger, TracingAttemptLogger};
use crate::error::GenerationError;
use crate::guard::GuardedClient;
use crate::llm::{LlmRequest, TokenUsage};
use crate::prompt::PromptRenderer;
use crate::retry::{RetryInput, RetryOrchestrator};

pub struct GenerationRequest<'a> {
    pub correlation_id: &'a str,
    pub configuration: &'a ProcessConfiguration,
    pub input: &'a Value,
    pub deadline: Option<Instant>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationMetadata {
    pub model: String,
    pub usage: TokenUsage,
    /// Sum of the provider-reported latencies of every attempt. Validation and
    /// prompt rendering are not included.
    pub latency_ms: u64,
    pub retried: bool,
    pub cached: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GenerationOutput {
    pub data: Value,
    pub metadata: GenerationMetadata,
}

/// Input validation, prompt rendering, the guarded provider call and the
/// validate-then-retry-once loop, in that order.
#[derive(Clone)]
pub struct GenerationPipeline {
    client: GuardedClient,
    model: String,
    renderer: PromptRenderer,
    attempts: Arc<dyn AttemptLogger>,
}

impl GenerationPipeline {
    pub fn new(client: GuardedClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            renderer: PromptRenderer,
            attempts: Arc::new(TracingAttemptLogger),
        }
    }

    pub fn with_attempt_logger(mut self, attempts: Arc<dyn AttemptLogger>) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn generate(
        &self,
        request: GenerationRequest<'_>,
    ) -> Result<GenerationOutput, GenerationError> {
        let configuration = request.configuration;

        let input = match SchemaValidator::new(&configuration.input_schema)
            .validate_value(request.input)
        {
            ValidationOutcome::Valid(input) => input,
            rejected => {
                info!(
                    event_name = "generation.input.rejected",
                    correlation_id = request.correlation_id,
                    reason = %rejected.summary(),
                    "input failed schema validation"
                );
                return Err(GenerationError::InputValidation { issues: rejected.issues() });
            }
        };

        let prompt = self.renderer.render(configuration, &input)?;
        let llm_request = LlmRequest {
            model: self.model.clone(),
            system_prompt: prompt.system,
            user_prompt: prompt.user,
            max_output_tokens: configuration.generation.max_output_tokens,
            temperature: configuration.generation.temperature,
        };

        let first = self.client.complete(&llm_request, request.deadline).await?;

        let outcome = RetryOrchestrator::new(&self.client, self.attempts.as_ref())
            .run(
                RetryInput {
                    correlation_id: request.correlation_id,
                    request: &llm_request,
                    output_schema: &configuration.output_schema,
                    deadline: request.deadline,
                },
                first,
            )
            .await;

        match outcome {
            Ok(output) => {
                info!(
                    event_name = "generation.completed",
                    correlation_id = request.correlation_id,
                    provider = self.client.provider(),
                    model = %output.model,
                    retried = output.retried,
                    latency_ms = output.latency_ms,
                    "generation completed"
                );
                Ok(GenerationOutput {
                    data: output.data,
                    metadata: GenerationMetadata {
                        model: output.model,
                        usage: output.usage,
                        latency_ms: output.latency_ms,
                        retried: output.retried,
                        cached: false,
                    },
                })
            }
            Err(error) => {
                warn!(
                    event_name = "generation.failed",
                    correlation_id = request.correlation_id,
                    code = %error.code(),
                    error = %error,
                    "generation failed"
                );
                Err(error)
            }
        }
    }
}
