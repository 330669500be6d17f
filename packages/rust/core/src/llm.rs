//! Chat-completion client.
//!
//! [`ChatModel`] is the seam every LLM-backed stage talks through. Provider
//! responses are validated into the fixed [`ChatCompletion`] schema at this
//! boundary so nothing downstream depends on a provider's wire format.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use grantbot_shared::{ApiKey, GrantBotError, LlmSettings, Result};

/// How much of an error body is kept in error messages.
const ERROR_BODY_PREVIEW_CHARS: usize = 500;

// ---------------------------------------------------------------------------
// Request / response schema
// ---------------------------------------------------------------------------

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// One chat-completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    /// Output hit `max_tokens` and is probably cut short.
    Length,
    ContentFilter,
    Other(String),
}

impl From<&str> for FinishReason {
    fn from(s: &str) -> Self {
        match s {
            "stop" => Self::Stop,
            "length" => Self::Length,
            "content_filter" => Self::ContentFilter,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A validated model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCompletion {
    pub role: Role,
    pub content: String,
    pub finish_reason: FinishReason,
}

/// Anything that can answer a [`ChatRequest`].
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion>;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible provider
// ---------------------------------------------------------------------------

/// Client for OpenAI-compatible `/chat/completions` endpoints.
pub struct OpenAiChat {
    client: Client,
    endpoint: String,
    api_key: ApiKey,
    model: String,
}

impl OpenAiChat {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| GrantBotError::Network(format!("failed to build LLM HTTP client: {e}")))?;

        let endpoint = format!(
            "{}/chat/completions",
            settings.base_url.as_str().trim_end_matches('/')
        );

        Ok(Self {
            client,
            endpoint,
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
        })
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ChatModel for OpenAiChat {
    #[instrument(skip_all, fields(model = %self.model, messages = request.messages.len()))]
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion> {
        let body = WireRequest {
            model: &self.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| GrantBotError::Llm(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(GrantBotError::Llm(format!(
                "provider returned {status}: {}",
                preview(&text)
            )));
        }

        let wire: WireResponse = resp
            .json()
            .await
            .map_err(|e| GrantBotError::Llm(format!("malformed provider response: {e}")))?;

        let completion = validate(wire)?;
        debug!(
            chars = completion.content.len(),
            finish_reason = ?completion.finish_reason,
            "chat completion received"
        );
        if completion.finish_reason == FinishReason::Length {
            warn!("completion stopped at max_tokens; output may be truncated");
        }

        Ok(completion)
    }
}

/// Check the provider envelope and lift the first choice into [`ChatCompletion`].
fn validate(wire: WireResponse) -> Result<ChatCompletion> {
    let choice = wire
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| GrantBotError::Llm("malformed provider response: no choices".into()))?;

    let content = choice.message.content.ok_or_else(|| {
        GrantBotError::Llm("malformed provider response: message has no content".into())
    })?;

    Ok(ChatCompletion {
        role: choice.message.role.unwrap_or(Role::Assistant),
        content,
        finish_reason: choice
            .finish_reason
            .as_deref()
            .map(FinishReason::from)
            .unwrap_or(FinishReason::Stop),
    })
}

fn preview(text: &str) -> String {
    if text.chars().count() <= ERROR_BODY_PREVIEW_CHARS {
        text.to_string()
    } else {
        let cut: String = text.chars().take(ERROR_BODY_PREVIEW_CHARS).collect();
        format!("{cut}…")
    }
}
