//! HTTP-backed LLM clients.
//!
//! OpenAI and Ollama share the chat-completions wire format; Anthropic uses
//! the Messages API. Both only send one prompt and report text, usage and
//! latency, or a typed [`ProviderError`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use synapse_core::config::{LlmConfig, LlmProvider};

use crate::llm::{LlmClient, LlmCompletion, LlmRequest, ProviderError, TokenUsage};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ERROR_BODY_LIMIT: usize = 512;

pub fn client_from_config(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, ProviderError> {
    // Outer bound only; the guarded client enforces the real per-call timeout.
    let timeout = Duration::from_secs(config.timeout_secs.saturating_mul(2).max(1));
    let http = http_client(timeout)?;

    let client: Arc<dyn LlmClient> = match config.provider {
        LlmProvider::OpenAi => Arc::new(ChatCompletionsClient {
            name: LlmProvider::OpenAi.as_str().to_string(),
            http,
            base_url: config.base_url.clone().unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            api_key: config.api_key.clone(),
            timeout,
        }),
        LlmProvider::Ollama => Arc::new(ChatCompletionsClient {
            name: LlmProvider::Ollama.as_str().to_string(),
            http,
            base_url: ollama_base_url(config.base_url.as_deref()),
            api_key: None,
            timeout,
        }),
        LlmProvider::Anthropic => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                ProviderError::Transport("anthropic provider requires an api key".to_string())
            })?;
            Arc::new(AnthropicClient {
                http,
                base_url: config
                    .base_url
                    .clone()
                    .unwrap_or_else(|| ANTHROPIC_BASE_URL.to_string()),
                api_key,
                timeout,
            })
        }
    };
    Ok(client)
}

fn http_client(timeout: Duration) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|error| ProviderError::Transport(error.to_string()))
}

fn ollama_base_url(configured: Option<&str>) -> String {
    let base = configured.unwrap_or("http://localhost:11434").trim_end_matches('/');
    if base.ends_with("/v1") {
        base.to_string()
    } else {
        format!("{base}/v1")
    }
}

pub struct ChatCompletionsClient {
    name: String,
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
    timeout: Duration,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[async_trait]
impl LlmClient for ChatCompletionsClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmCompletion, ProviderError> {
        let started = Instant::now();
        let body = ChatRequest {
            model: &request.model,
            messages: [
                ChatMessage { role: "system", content: &request.system_prompt },
                ChatMessage { role: "user", content: &request.user_prompt },
            ],
            max_tokens: request.max_output_tokens,
            temperature: request.temperature,
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut builder = self.http.post(url).json(&body);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }
        let response =
            builder.send().await.map_err(|error| transport_error(error, self.timeout))?;
        let response = ensure_success(response).await?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|error| ProviderError::InvalidResponse(error.to_string()))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("response had no choices".to_string()))?;
        let usage = parsed
            .usage
            .map(|usage| TokenUsage::new(usage.prompt_tokens, usage.completion_tokens))
            .unwrap_or_default();

        Ok(LlmCompletion {
            text,
            model: parsed.model.unwrap_or_else(|| request.model.clone()),
            usage,
            latency_ms: elapsed_ms(started),
        })
    }
}

pub struct AnthropicClient {
    http: Client,
    base_url: String,
    api_key: SecretString,
    timeout: Duration,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    model: Option<String>,
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn name(&self) -> &str {
        LlmProvider::Anthropic.as_str()
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmCompletion, ProviderError> {
        let started = Instant::now();
        let body = MessagesRequest {
            model: &request.model,
            max_tokens: request.max_output_tokens,
            temperature: request.temperature,
            system: &request.system_prompt,
            messages: [ChatMessage { role: "user", content: &request.user_prompt }],
        };

        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|error| transport_error(error, self.timeout))?;
        let response = ensure_success(response).await?;

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|error| ProviderError::InvalidResponse(error.to_string()))?;
        let text = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        let usage = parsed
            .usage
            .map(|usage| TokenUsage::new(usage.input_tokens, usage.output_tokens))
            .unwrap_or_default();

        Ok(LlmCompletion {
            text,
            model: parsed.model.unwrap_or_else(|| request.model.clone()),
            usage,
            latency_ms: elapsed_ms(started),
        })
    }
}

async fn ensure_success(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());
        return Err(ProviderError::RateLimited { retry_after_secs });
    }

    let mut message = response.text().await.unwrap_or_default();
    if message.len() > ERROR_BODY_LIMIT {
        let mut cut = ERROR_BODY_LIMIT;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }
    Err(ProviderError::Http { status: status.as_u16(), message })
}

fn transport_error(error: reqwest::Error, timeout: Duration) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    } else {
        ProviderError::Transport(error.to_string())
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
