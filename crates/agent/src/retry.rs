//! Output validation with exactly one corrective retry.

use serde_json::Value;
use synapse_core::schema::{SchemaNode, SchemaValidator, ValidationOutcome};
use tokio::time::Instant;
use tracing::info;

use crate::attempt::{AttemptLogger, AttemptRecord};
use crate::error::GenerationError;
use crate::guard::GuardedClient;
use crate::llm::{LlmCompletion, LlmRequest, ProviderError, TokenUsage};
use crate::prompt::RenderedPrompt;

pub struct RetryInput<'a> {
    pub correlation_id: &'a str,
    pub request: &'a LlmRequest,
    pub output_schema: &'a SchemaNode,
    pub deadline: Option<Instant>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetryOutput {
    pub data: Value,
    pub model: String,
    pub usage: TokenUsage,
    pub latency_ms: u64,
    pub retried: bool,
}

pub struct RetryOrchestrator<'a> {
    client: &'a GuardedClient,
    logger: &'a dyn AttemptLogger,
}

impl<'a> RetryOrchestrator<'a> {
    pub fn new(client: &'a GuardedClient, logger: &'a dyn AttemptLogger) -> Self {
        Self { client, logger }
    }

    /// Validates `first`. On failure issues one stricter request; provider
    /// errors on that request propagate as-is and are never retried.
    pub async fn run(
        &self,
        input: RetryInput<'_>,
        first: LlmCompletion,
    ) -> Result<RetryOutput, GenerationError> {
        let validator = SchemaValidator::new(input.output_schema);

        let first_outcome = validator.validate_text(&first.text);
        self.log_attempt(&input, 1, input.request, &first, &first_outcome);
        if let ValidationOutcome::Valid(data) = first_outcome {
            return Ok(RetryOutput {
                data,
                model: first.model,
                usage: first.usage,
                latency_ms: first.latency_ms,
                retried: false,
            });
        }

        if input.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(ProviderError::Cancelled.into());
        }

        info!(
            event_name = "generation.retry.issued",
            correlation_id = input.correlation_id,
            reason = %first_outcome.summary(),
            "first response failed validation, retrying once"
        );

        let prompt = build_retry_prompt(
            &RenderedPrompt {
                system: input.request.system_prompt.clone(),
                user: input.request.user_prompt.clone(),
            },
            input.output_schema,
            &first_outcome,
        );
        let retry_request = LlmRequest {
            system_prompt: prompt.system,
            user_prompt: prompt.user,
            ..input.request.clone()
        };
        let second = self.client.complete(&retry_request, input.deadline).await?;

        let second_outcome = validator.validate_text(&second.text);
        self.log_attempt(&input, 2, &retry_request, &second, &second_outcome);

        let usage = first.usage.plus(second.usage);
        let latency_ms = first.latency_ms.saturating_add(second.latency_ms);
        match second_outcome {
            ValidationOutcome::Valid(data) => {
                Ok(RetryOutput { data, model: second.model, usage, latency_ms, retried: true })
            }
            failed => Err(GenerationError::OutputValidation { issues: failed.issues() }),
        }
    }

    fn log_attempt(
        &self,
        input: &RetryInput<'_>,
        attempt: u8,
        request: &LlmRequest,
        completion: &LlmCompletion,
        outcome: &ValidationOutcome,
    ) {
        let record = AttemptRecord::new(
            input.correlation_id,
            attempt,
            self.client.provider(),
            &completion.model,
            &request.system_prompt,
            &request.user_prompt,
            &completion.text,
            outcome,
            completion.latency_ms,
        );
        self.logger.record(&record);
    }
}

/// Stricter prompt for the single retry: original instructions, the fact
/// that the last answer failed, the schema, formatting rules and what was wrong.
pub fn build_retry_prompt(
    original: &RenderedPrompt,
    schema: &SchemaNode,
    failure: &ValidationOutcome,
) -> RenderedPrompt {
    let problems = match failure {
        ValidationOutcome::Valid(_) => String::new(),
        ValidationOutcome::ParseError(message) => format!("- {message}"),
        ValidationOutcome::Invalid(issues) => issues
            .iter()
            .map(|issue| format!("- {}: {}", issue.path, issue.message))
            .collect::<Vec<_>>()
            .join("\n"),
    };

    let system = format!(
        "{original}\n\n\
         IMPORTANT: your previous response could not be accepted because it did not match \
         the required output schema.\n\n\
         Required schema:\n{schema}\n\n\
         Formatting rules:\n\
         - Respond with only valid JSON.\n\
         - Do not wrap the JSON in markdown code fences.\n\
         - Do not add any text before or after the JSON.\n\n\
         Problems with the previous response:\n{problems}",
        original = original.system,
        schema = schema.describe(),
    );

    RenderedPrompt { system, user: original.user.clone() }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use synapse_core::breaker::{BreakerConfig, CircuitBreaker};
    use synapse_core::schema::{SchemaNode, ValidationIssue, ValidationOutcome};

    use super::{build_retry_prompt, RetryInput, RetryOrchestrator};
    use crate::attempt::InMemoryAttemptLogger;
    use crate::error::GenerationError;
    use crate::guard::GuardedClient;
    use crate::llm::{LlmRequest, ProviderError, ScriptedLlmClient};
    use crate::prompt::RenderedPrompt;

    fn schema() -> SchemaNode {
        SchemaNode::from_json(&json!({
            "type": "object",
            "properties": {
                "category": { "type": "string" },
                "urgent": { "type": "boolean" }
            },
            "required": ["category", "urgent"]
        }))
        .expect("schema")
    }

    fn request() -> LlmRequest {
        LlmRequest {
            model: "scripted-model".to_string(),
            system_prompt: "Classify.".to_string(),
            user_prompt: "Input: {}".to_string(),
            max_output_tokens: 128,
            temperature: 0.0,
        }
    }

    fn guarded(client: Arc<ScriptedLlmClient>) -> GuardedClient {
        GuardedClient::new(
            client,
            Arc::new(CircuitBreaker::new("scripted", BreakerConfig::default())),
        )
    }

    #[tokio::test]
    async fn valid_first_response_makes_no_further_calls() {
        let client = Arc::new(ScriptedLlmClient::replying("scripted", &[]));
        let guarded = guarded(client.clone());
        let logger = InMemoryAttemptLogger::default();
        let schema = schema();
        let request = request();

        let output = RetryOrchestrator::new(&guarded, &logger)
            .run(
                RetryInput {
                    correlation_id: "req-1",
                    request: &request,
                    output_schema: &schema,
                    deadline: None,
                },
                ScriptedLlmClient::completion(r#"{"category": "billing", "urgent": "false"}"#),
            )
            .await
            .expect("valid output");

        assert!(!output.retried);
        assert_eq!(output.data, json!({"category": "billing", "urgent": false}));
        assert_eq!(client.calls(), 0);
        assert_eq!(logger.records().len(), 1);
    }

    #[tokio::test]
    async fn invalid_first_response_is_retried_exactly_once() {
        let client = Arc::new(ScriptedLlmClient::replying(
            "scripted",
            &[r#"{"category": "outage", "urgent": true}"#],
        ));
        let guarded = guarded(client.clone());
        let logger = InMemoryAttemptLogger::default();
        let schema = schema();
        let request = request();

        let output = RetryOrchestrator::new(&guarded, &logger)
            .run(
                RetryInput {
                    correlation_id: "req-2",
                    request: &request,
                    output_schema: &schema,
                    deadline: None,
                },
                ScriptedLlmClient::completion("Sure! The category is outage."),
            )
            .await
            .expect("retry should succeed");

        assert!(output.retried);
        assert_eq!(client.calls(), 1);
        assert_eq!(output.usage.input_tokens, 20);
        assert_eq!(output.usage.output_tokens, 10);

        let retry_prompt = &client.requests()[0].system_prompt;
        assert!(retry_prompt.starts_with("Classify."));
        assert!(retry_prompt.contains("Do not wrap the JSON in markdown code fences."));
        assert!(retry_prompt.contains("response is not valid JSON"));

        let attempts = logger.records().iter().map(|record| record.attempt).collect::<Vec<_>>();
        assert_eq!(attempts, vec![1, 2]);
    }

    #[tokio::test]
    async fn second_failure_is_terminal_with_final_issues() {
        let client = Arc::new(ScriptedLlmClient::replying(
            "scripted",
            &[r#"{"category": "outage"}"#, r#"{"category": "never used", "urgent": true}"#],
        ));
        let guarded = guarded(client.clone());
        let logger = InMemoryAttemptLogger::default();
        let schema = schema();
        let request = request();

        let error = RetryOrchestrator::new(&guarded, &logger)
            .run(
                RetryInput {
                    correlation_id: "req-3",
                    request: &request,
                    output_schema: &schema,
                    deadline: None,
                },
                ScriptedLlmClient::completion(r#"{"urgent": "maybe"}"#),
            )
            .await
            .expect_err("terminal failure");

        assert_eq!(
            error,
            GenerationError::OutputValidation {
                issues: vec![ValidationIssue {
                    path: "urgent".to_string(),
                    message: "Required".to_string(),
                }],
            }
        );
        assert_eq!(client.calls(), 1, "at most one retry");
    }

    #[tokio::test]
    async fn logged_attempts_never_carry_pii_from_prompts_or_responses() {
        let client = Arc::new(ScriptedLlmClient::replying(
            "scripted",
            &[r#"{"category": "billing for jane.doe@example.com", "urgent": true}"#],
        ));
        let guarded = guarded(client.clone());
        let logger = InMemoryAttemptLogger::default();
        let schema = schema();
        let request = LlmRequest {
            user_prompt: "Input: {\"email\": \"jane.doe@example.com\", \"ssn\": \"123-45-6789\"}"
                .to_string(),
            ..request()
        };

        let output = RetryOrchestrator::new(&guarded, &logger)
            .run(
                RetryInput {
                    correlation_id: "req-pii",
                    request: &request,
                    output_schema: &schema,
                    deadline: None,
                },
                ScriptedLlmClient::completion(r#"{"category": "ssn 123-45-6789 on file"}"#),
            )
            .await
            .expect("retry succeeds");
        assert!(output.retried);

        let records = logger.records();
        assert_eq!(records.len(), 2);
        for record in &records {
            for text in [&record.system_prompt, &record.user_prompt, &record.redacted_response] {
                assert!(!text.contains("jane.doe@example.com"), "email leaked: {text}");
                assert!(!text.contains("123-45-6789"), "ssn leaked: {text}");
            }
        }
        assert!(records[0].user_prompt.contains("[REDACTED_EMAIL]"));
        assert!(records[0].redacted_response.contains("[REDACTED_SSN]"));
        assert!(records[1].redacted_response.contains("[REDACTED_EMAIL]"));
    }

    #[tokio::test]
    async fn provider_error_on_retry_propagates_without_another_attempt() {
        let client = Arc::new(ScriptedLlmClient::new(
            "scripted",
            vec![Err(ProviderError::RateLimited { retry_after_secs: Some(3) })],
        ));
        let guarded = guarded(client.clone());
        let logger = InMemoryAttemptLogger::default();
        let schema = schema();
        let request = request();

        let error = RetryOrchestrator::new(&guarded, &logger)
            .run(
                RetryInput {
                    correlation_id: "req-4",
                    request: &request,
                    output_schema: &schema,
                    deadline: None,
                },
                ScriptedLlmClient::completion("not json"),
            )
            .await
            .expect_err("rate limited");

        assert_eq!(
            error,
            GenerationError::Provider(ProviderError::RateLimited { retry_after_secs: Some(3) })
        );
        assert_eq!(client.calls(), 1);
        assert_eq!(logger.records().len(), 1);
    }

    #[tokio::test]
    async fn expired_deadline_skips_the_retry() {
        let client = Arc::new(ScriptedLlmClient::replying("scripted", &["{}"]));
        let guarded = guarded(client.clone());
        let logger = InMemoryAttemptLogger::default();
        let schema = schema();
        let request = request();

        let error = RetryOrchestrator::new(&guarded, &logger)
            .run(
                RetryInput {
                    correlation_id: "req-5",
                    request: &request,
                    output_schema: &schema,
                    deadline: Some(tokio::time::Instant::now()),
                },
                ScriptedLlmClient::completion("not json"),
            )
            .await
            .expect_err("cancelled");

        assert_eq!(error, GenerationError::Provider(ProviderError::Cancelled));
        assert_eq!(client.calls(), 0);
    }

    #[test]
    fn retry_prompt_lists_each_issue() {
        let prompt = build_retry_prompt(
            &RenderedPrompt { system: "Base".to_string(), user: "Input".to_string() },
            &schema(),
            &ValidationOutcome::Invalid(vec![
                ValidationIssue { path: "category".to_string(), message: "Required".to_string() },
                ValidationIssue {
                    path: "urgent".to_string(),
                    message: "Expected boolean, received number".to_string(),
                },
            ]),
        );

        assert!(prompt.system.contains("- category: Required"));
        assert!(prompt.system.contains("- urgent: Expected boolean, received number"));
        assert!(prompt.system.contains("Respond with only valid JSON."));
        assert_eq!(prompt.user, "Input");
    }
}
