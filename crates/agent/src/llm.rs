use std::collections::VecDeque;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use hearth_core::ToolManifestEntry;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Request(String),
    #[error("model endpoint returned status {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("model reply could not be decoded: {0}")]
    Decode(String),
    #[error("model invocation timed out after {timeout_secs}s")]
    TimedOut { timeout_secs: u64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// Everything handed to the model for one invocation: the conversation so far
/// plus the manifest of callable tools.
#[derive(Clone, Debug)]
pub struct ModelRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolManifestEntry>,
}

/// A tool call exactly as the model emitted it. The name may be an alias and
/// the arguments may not even be valid JSON; the parse step sorts that out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawToolCall {
    pub name: String,
    pub arguments: String,
}

impl RawToolCall {
    pub fn new(name: impl Into<String>, arguments: &Value) -> Self {
        Self { name: name.into(), arguments: arguments.to_string() }
    }

    pub fn raw(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self { name: name.into(), arguments: arguments.into() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModelReply {
    pub text: Option<String>,
    pub calls: Vec<RawToolCall>,
}

impl ModelReply {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), calls: Vec::new() }
    }

    pub fn calls_only(calls: Vec<RawToolCall>) -> Self {
        Self { text: None, calls }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// The language model as a black box. Implementations may fail or time out;
/// the orchestrator turns either into an aborted turn.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn invoke(&self, request: &ModelRequest) -> Result<ModelReply, ModelError>;
}

/// Replays a scripted sequence of replies and records every request it saw.
#[derive(Default)]
pub struct ScriptedModelClient {
    replies: Mutex<VecDeque<Result<ModelReply, ModelError>>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModelClient {
    pub fn with_replies(replies: Vec<Result<ModelReply, ModelError>>) -> Self {
        Self { replies: Mutex::new(replies.into()), requests: Mutex::new(Vec::new()) }
    }

    pub async fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn invocations(&self) -> usize {
        self.requests.lock().await.len()
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn invoke(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        self.requests.lock().await.push(request.clone());
        self.replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::Request("scripted replies exhausted".to_string())))
    }
}
