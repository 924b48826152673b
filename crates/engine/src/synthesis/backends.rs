//! Language-model backend adapters (OpenAI chat, Ollama)

use super::{GenerationParams, LlmBackend};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use studyforge_common::config::LlmConfig;
use studyforge_common::errors::{AppError, Result};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const OLLAMA_API_BASE: &str = "http://localhost:11434";

/// OpenAI-compatible chat completions backend
pub struct OpenAiChatBackend {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl OpenAiChatBackend {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AppError::Configuration {
                message: "OpenAI LLM backend requires an API key".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            api_base: config
                .api_base
                .clone()
                .unwrap_or_else(|| OPENAI_API_BASE.to_string()),
        })
    }

    /// Map an error response to the LLM error taxonomy.
    ///
    /// 429 is split on the body: quota exhaustion is fatal, plain
    /// rate limiting is transient.
    fn classify_failure(status: reqwest::StatusCode, body: &str) -> AppError {
        let message = format!("{}: {}", status, truncate_body(body));
        match status.as_u16() {
            401 | 403 => AppError::LlmAuthError { message },
            429 => {
                if body.contains("insufficient_quota") || body.contains("quota") {
                    AppError::LlmQuotaExceeded { message }
                } else {
                    AppError::LlmRateLimited { message }
                }
            }
            _ => AppError::LlmUnavailable { message },
        }
    }
}

fn truncate_body(body: &str) -> &str {
    let end = body
        .char_indices()
        .nth(200)
        .map(|(i, _)| i)
        .unwrap_or(body.len());
    &body[..end]
}

#[async_trait]
impl LlmBackend for OpenAiChatBackend {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let request = ChatRequest {
            model: &params.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::LlmUnavailable {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_failure(status, &body));
        }

        let parsed: ChatResponse = response.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::LlmUnavailable {
                message: "Response contained no choices".to_string(),
            })?;

        Ok(choice.message.content)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Ollama backend for self-hosted models
pub struct OllamaBackend {
    client: reqwest::Client,
    api_base: String,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaBackend {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: config
                .api_base
                .clone()
                .unwrap_or_else(|| OLLAMA_API_BASE.to_string()),
        })
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let request = OllamaRequest {
            model: &params.model,
            prompt,
            stream: false,
            options: OllamaOptions {
                temperature: params.temperature,
                num_predict: params.max_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.api_base))
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::LlmUnavailable {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::LlmUnavailable {
                message: format!("{}: {}", status, truncate_body(&body)),
            });
        }

        let parsed: OllamaResponse = response.json().await?;
        Ok(parsed.response)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
