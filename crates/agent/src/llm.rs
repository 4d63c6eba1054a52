use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use shopper_core::config::{LlmConfig, LlmProvider};
use shopper_core::errors::CollaboratorError;
use thiserror::Error;
use tracing::{debug, warn};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";
const ERROR_BODY_CHARS: usize = 300;
const RETRY_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm provider is not configured: {0}")]
    NotConfigured(String),
    #[error("llm transport error: {0}")]
    Transport(String),
    #[error("llm provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode llm response: {0}")]
    Decode(String),
    #[error("llm returned an empty completion")]
    EmptyCompletion,
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<LlmError> for CollaboratorError {
    fn from(error: LlmError) -> Self {
        if error.is_transient() {
            return CollaboratorError::Unavailable(error.to_string());
        }
        match error {
            LlmError::Decode(_) | LlmError::EmptyCompletion => {
                CollaboratorError::Malformed(error.to_string())
            }
            other => CollaboratorError::Rejected(other.to_string()),
        }
    }
}

/// Single-shot completion: a system instruction plus one user message.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, LlmError>;
}

/// Gemini, OpenAI-compatible and Ollama chat endpoints over one reqwest client.
#[derive(Clone, Debug)]
pub struct HttpLlmClient {
    provider: LlmProvider,
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
    temperature: f64,
    max_retries: u32,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let needs_key = matches!(config.provider, LlmProvider::Gemini | LlmProvider::OpenAi);
        if needs_key && config.api_key.is_none() {
            return Err(LlmError::NotConfigured(format!(
                "llm.api_key is required for {:?}",
                config.provider
            )));
        }
        let default_base = match config.provider {
            LlmProvider::Gemini => GEMINI_BASE_URL,
            LlmProvider::OpenAi => OPENAI_BASE_URL,
            LlmProvider::Ollama => OLLAMA_BASE_URL,
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| LlmError::Transport(error.to_string()))?;

        Ok(Self {
            provider: config.provider,
            http,
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(default_base)
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            temperature: 0.2,
            max_retries: config.max_retries,
        })
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self) -> String {
        match self.provider {
            LlmProvider::Gemini => {
                format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
            }
            LlmProvider::OpenAi => format!("{}/chat/completions", self.base_url),
            LlmProvider::Ollama => format!("{}/api/chat", self.base_url),
        }
    }

    fn request(&self, system: &str, prompt: &str) -> reqwest::RequestBuilder {
        let builder = self.http.post(self.endpoint());
        match self.provider {
            LlmProvider::Gemini => {
                let body = GeminiRequest {
                    system_instruction: GeminiContent::text(None, system),
                    contents: vec![GeminiContent::text(Some("user"), prompt)],
                    generation_config: GeminiGenerationConfig { temperature: self.temperature },
                };
                let builder = builder.json(&body);
                match &self.api_key {
                    Some(key) => builder.header("x-goog-api-key", key.expose_secret()),
                    None => builder,
                }
            }
            LlmProvider::OpenAi | LlmProvider::Ollama => {
                let body = ChatRequest {
                    model: &self.model,
                    messages: vec![
                        ChatMessage { role: "system".to_string(), content: system.to_string() },
                        ChatMessage { role: "user".to_string(), content: prompt.to_string() },
                    ],
                    temperature: (self.provider == LlmProvider::OpenAi).then_some(self.temperature),
                    stream: (self.provider == LlmProvider::Ollama).then_some(false),
                    options: (self.provider == LlmProvider::Ollama)
                        .then_some(OllamaOptions { temperature: self.temperature }),
                };
                let builder = builder.json(&body);
                match &self.api_key {
                    Some(key) => builder.bearer_auth(key.expose_secret()),
                    None => builder,
                }
            }
        }
    }

    async fn attempt(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        let response = self
            .request(system, prompt)
            .send()
            .await
            .map_err(|error| LlmError::Transport(error.to_string()))?;
        let status = response.status();
        let body = response.text().await.map_err(|error| LlmError::Transport(error.to_string()))?;
        if !status.is_success() {
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: body.chars().take(ERROR_BODY_CHARS).collect(),
            });
        }
        parse_completion(self.provider, &body)
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(system, prompt).await {
                Ok(text) => {
                    debug!(
                        event_name = "llm.completed",
                        provider = ?self.provider,
                        attempt,
                        chars = text.len(),
                        "llm completion received"
                    );
                    return Ok(text);
                }
                Err(error) if error.is_transient() && attempt <= self.max_retries => {
                    warn!(
                        event_name = "llm.retry",
                        provider = ?self.provider,
                        attempt,
                        error = %error,
                        "retrying llm request"
                    );
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

pub fn parse_completion(provider: LlmProvider, body: &str) -> Result<String, LlmError> {
    let text = match provider {
        LlmProvider::Gemini => {
            let response: GeminiResponse =
                serde_json::from_str(body).map_err(|error| LlmError::Decode(error.to_string()))?;
            response
                .candidates
                .into_iter()
                .next()
                .and_then(|candidate| candidate.content)
                .map(|content| {
                    content.parts.into_iter().map(|part| part.text).collect::<Vec<_>>().join("")
                })
        }
        LlmProvider::OpenAi => {
            let response: ChatCompletionResponse =
                serde_json::from_str(body).map_err(|error| LlmError::Decode(error.to_string()))?;
            response.choices.into_iter().next().map(|choice| choice.message.content)
        }
        LlmProvider::Ollama => {
            let response: OllamaResponse =
                serde_json::from_str(body).map_err(|error| LlmError::Decode(error.to_string()))?;
            response.message.map(|message| message.content)
        }
    };

    match text {
        Some(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
        _ => Err(LlmError::EmptyCompletion),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    system_instruction: GeminiContent,
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

impl GeminiContent {
    fn text(role: Option<&str>, text: &str) -> Self {
        Self { role: role.map(str::to_string), parts: vec![GeminiPart { text: text.to_string() }] }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: Option<ChatMessage>,
}
