//! Test doubles shared by the core unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use url::Url;

use grantbot_shared::{ApiKey, AppConfig, GrantBotError, Result, RuntimeConfig};

use crate::llm::{ChatCompletion, ChatModel, ChatRequest, FinishReason, Role};

/// A [`ChatModel`] that replays canned replies in order and records requests.
///
/// `Err(msg)` entries fail the call with `GrantBotError::Llm(msg)`.
pub(crate) struct ScriptedChat {
    replies: Mutex<VecDeque<std::result::Result<String, String>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChat {
    pub(crate) fn new<I>(replies: I) -> Self
    where
        I: IntoIterator<Item = std::result::Result<&'static str, &'static str>>,
    {
        Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(String::from).map_err(String::from))
                    .collect(),
            ),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A chat that must never be called; any call fails.
    pub(crate) fn unreachable() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion> {
        self.requests.lock().unwrap().push(request.clone());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(content)) => Ok(ChatCompletion {
                role: Role::Assistant,
                content,
                finish_reason: FinishReason::Stop,
            }),
            Some(Err(msg)) => Err(GrantBotError::Llm(msg)),
            None => Err(GrantBotError::Llm("scripted chat has no more replies".into())),
        }
    }
}

/// Default runtime config pointed at `urls`, with short timeouts.
pub(crate) fn runtime_config(urls: Vec<Url>) -> RuntimeConfig {
    let mut app = AppConfig::default();
    app.fetch.urls = urls.iter().map(Url::to_string).collect();
    app.fetch.timeout_secs = 5;
    RuntimeConfig::with_api_key(&app, ApiKey::new("sk-test")).expect("valid test config")
}
