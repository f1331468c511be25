use std::sync::Arc;
use std::time::Duration;

use synapse_core::breaker::{BreakerListener, BreakerTransition, CircuitBreaker, CircuitState};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::GenerationError;
use crate::llm::{LlmClient, LlmCompletion, LlmRequest, ProviderError};

pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Every provider call goes through here: breaker admission, a per-call
/// timeout, the caller's deadline, and outcome bookkeeping on the breaker.
#[derive(Clone)]
pub struct GuardedClient {
    client: Arc<dyn LlmClient>,
    breaker: Arc<CircuitBreaker>,
    timeout: Duration,
}

impl GuardedClient {
    pub fn new(client: Arc<dyn LlmClient>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { client, breaker, timeout: DEFAULT_PROVIDER_TIMEOUT }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn provider(&self) -> &str {
        self.client.name()
    }

    pub async fn complete(
        &self,
        request: &LlmRequest,
        deadline: Option<Instant>,
    ) -> Result<LlmCompletion, GenerationError> {
        let remaining = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(ProviderError::Cancelled.into());
                }
                Some(remaining)
            }
            None => None,
        };

        if !self.breaker.can_request() {
            let retry_after_secs = self
                .breaker
                .retry_after_seconds()
                .unwrap_or(self.breaker.config().cooldown_secs)
                .max(1);
            warn!(
                event_name = "provider.breaker.rejected",
                provider = self.provider(),
                retry_after_secs,
                "provider call rejected by open circuit"
            );
            return Err(GenerationError::BreakerOpen {
                provider: self.provider().to_string(),
                retry_after_secs,
            });
        }

        // The caller's deadline cuts the call short as a cancellation, not a timeout.
        let (budget, cut_by_deadline) = match remaining {
            Some(remaining) if remaining < self.timeout => (remaining, true),
            _ => (self.timeout, false),
        };

        let outcome = match tokio::time::timeout(budget, self.client.complete(request)).await {
            Ok(result) => result,
            Err(_) if cut_by_deadline => Err(ProviderError::Cancelled),
            Err(_) => Err(ProviderError::Timeout {
                timeout_ms: u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        match outcome {
            Ok(completion) => {
                self.breaker.record_success();
                debug!(
                    event_name = "provider.call.succeeded",
                    provider = self.provider(),
                    latency_ms = completion.latency_ms,
                    "provider call succeeded"
                );
                Ok(completion)
            }
            Err(error) => {
                if error.counts_against_breaker() {
                    self.breaker.record_failure();
                }
                warn!(
                    event_name = "provider.call.failed",
                    provider = self.provider(),
                    error = %error,
                    "provider call failed"
                );
                Err(error.into())
            }
        }
    }
}

/// Emits one structured event per breaker state change.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingBreakerListener;

impl BreakerListener for TracingBreakerListener {
    fn on_transition(&self, transition: &BreakerTransition) {
        let open_until = transition.open_until.map(|at| at.to_rfc3339());
        if transition.to == CircuitState::Open {
            warn!(
                event_name = "breaker.state_changed",
                provider = %transition.provider,
                from = transition.from.as_str(),
                to = transition.to.as_str(),
                failure_count = transition.failure_count,
                open_until = open_until.as_deref().unwrap_or(""),
                "circuit opened"
            );
        } else {
            info!(
                event_name = "breaker.state_changed",
                provider = %transition.provider,
                from = transition.from.as_str(),
                to = transition.to.as_str(),
                failure_count = transition.failure_count,
                "circuit state changed"
            );
        }
    }
}
