use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq)]
pub struct LlmRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self { input_tokens, output_tokens }
    }

    pub fn plus(self, other: TokenUsage) -> Self {
        Self {
            input_tokens: self.input_tokens.saturating_add(other.input_tokens),
            output_tokens: self.output_tokens.saturating_add(other.output_tokens),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LlmCompletion {
    pub text: String,
    pub model: String,
    pub usage: TokenUsage,
    pub latency_ms: u64,
}

/// Typed provider failures. None of these are retried by the pipeline.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider call timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    #[error("provider rate limited the request")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("request was cancelled before the provider answered")]
    Cancelled,
    #[error("provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("provider transport failure: {0}")]
    Transport(String),
    #[error("provider response could not be decoded: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Cancellation says nothing about provider health.
    pub fn counts_against_breaker(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &LlmRequest) -> Result<LlmCompletion, ProviderError>;
}

/// In-process client that replays a fixed script of outcomes. Used by tests
/// and by local smoke runs without network access.
pub struct ScriptedLlmClient {
    name: String,
    script: Mutex<VecDeque<Result<LlmCompletion, ProviderError>>>,
    requests: Mutex<Vec<LlmRequest>>,
    calls: AtomicUsize,
}

impl ScriptedLlmClient {
    pub fn new(
        name: impl Into<String>,
        script: Vec<Result<LlmCompletion, ProviderError>>,
    ) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn replying(name: impl Into<String>, texts: &[&str]) -> Self {
        let script = texts.iter().map(|text| Ok(Self::completion(text))).collect::<Vec<_>>();
        Self::new(name, script)
    }

    pub fn completion(text: &str) -> LlmCompletion {
        LlmCompletion {
            text: text.to_string(),
            model: "scripted-model".to_string(),
            usage: TokenUsage::new(10, 5),
            latency_ms: 7,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmCompletion, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.requests.lock() {
            Ok(mut requests) => requests.push(request.clone()),
            Err(poisoned) => poisoned.into_inner().push(request.clone()),
        }
        let next = match self.script.lock() {
            Ok(mut script) => script.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        next.unwrap_or_else(|| {
            Err(ProviderError::InvalidResponse("scripted client has no more responses".to_string()))
        })
    }
}
