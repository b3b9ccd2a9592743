//! Chat-completion client. The orchestrator only sees the `LlmClient` trait;
//! `HttpLlmClient` speaks the provider wire formats behind it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::Semaphore;

use relay_core::config::{LlmConfig, LlmProvider};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// One fully-specified completion call. The orchestrator fills this from the
/// effective config; the client never reads agent records directly.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub history: Vec<ChatMessage>,
    pub user_text: String,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm request timed out")]
    Timeout,
    #[error("llm transport failed: {0}")]
    Http(String),
    #[error("llm provider rejected the request: {0}")]
    Provider(String),
    #[error("llm response could not be decoded: {0}")]
    Decode(String),
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError>;
}

/// HTTP client for the configured provider. Applies a per-call timeout and a
/// process-wide concurrent-request ceiling; callers over the ceiling wait.
pub struct HttpLlmClient {
    http: reqwest::Client,
    provider: LlmProvider,
    base_url: String,
    api_key: Option<SecretString>,
    request_timeout: Duration,
    permits: Arc<Semaphore>,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(config.provider).to_string());

        Self {
            http: reqwest::Client::new(),
            provider: config.provider,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_seconds),
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
        }
    }

    async fn dispatch(&self, request: &ChatRequest) -> Result<String, LlmError> {
        match self.provider {
            LlmProvider::OpenAi => self.complete_openai(request).await,
            LlmProvider::Anthropic => self.complete_anthropic(request).await,
            LlmProvider::Ollama => self.complete_ollama(request).await,
        }
    }

    async fn complete_openai(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = json!({
            "model": request.model,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "messages": wire_messages(request),
        });

        let mut builder = self.http.post(&url).json(&body);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }

        let payload = send(builder).await?;
        let response: OpenAiResponse = serde_json::from_str(&payload)
            .map_err(|error| LlmError::Decode(error.to_string()))?;
        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| LlmError::Decode("response carried no choices".to_string()))
    }

    async fn complete_anthropic(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let url = format!("{}/v1/messages", self.base_url);
        let messages: Vec<&ChatMessage> = request
            .history
            .iter()
            .filter(|message| message.role != ChatRole::System)
            .collect();
        let mut wire: Vec<serde_json::Value> = messages
            .iter()
            .map(|message| json!({ "role": message.role, "content": message.content }))
            .collect();
        wire.push(json!({ "role": "user", "content": request.user_text }));

        let body = json!({
            "model": request.model,
            "system": request.system_prompt,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "messages": wire,
        });

        let mut builder =
            self.http.post(&url).header("anthropic-version", "2023-06-01").json(&body);
        if let Some(api_key) = &self.api_key {
            builder = builder.header("x-api-key", api_key.expose_secret());
        }

        let payload = send(builder).await?;
        let response: AnthropicResponse = serde_json::from_str(&payload)
            .map_err(|error| LlmError::Decode(error.to_string()))?;
        response
            .content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or_else(|| LlmError::Decode("response carried no text block".to_string()))
    }

    async fn complete_ollama(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = json!({
            "model": request.model,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
            "messages": wire_messages(request),
        });

        let payload = send(self.http.post(&url).json(&body)).await?;
        let response: OllamaResponse = serde_json::from_str(&payload)
            .map_err(|error| LlmError::Decode(error.to_string()))?;
        Ok(response.message.content)
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| LlmError::Http("request limiter closed".to_string()))?;

        match tokio::time::timeout(self.request_timeout, self.dispatch(request)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout),
        }
    }
}

fn default_base_url(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::OpenAi => "https://api.openai.com",
        LlmProvider::Anthropic => "https://api.anthropic.com",
        LlmProvider::Ollama => "http://localhost:11434",
    }
}

fn wire_messages(request: &ChatRequest) -> Vec<serde_json::Value> {
    let mut messages = Vec::with_capacity(request.history.len() + 2);
    if !request.system_prompt.is_empty() {
        messages.push(json!({ "role": "system", "content": request.system_prompt }));
    }
    for message in &request.history {
        messages.push(json!({ "role": message.role, "content": message.content }));
    }
    messages.push(json!({ "role": "user", "content": request.user_text }));
    messages
}

async fn send(builder: reqwest::RequestBuilder) -> Result<String, LlmError> {
    let response =
        builder.send().await.map_err(|error| LlmError::Http(error.to_string()))?;
    let status = response.status();
    let payload = response.text().await.map_err(|error| LlmError::Http(error.to_string()))?;

    if !status.is_success() {
        let snippet: String = payload.chars().take(200).collect();
        return Err(LlmError::Provider(format!("status {status}: {snippet}")));
    }

    Ok(payload)
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    text: Option<String>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
}

#[derive(Deserialize)]
struct OllamaMessage {
    content: String,
}
