use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use hearth_core::config::ModelConfig;

use crate::llm::{ModelClient, ModelError, ModelReply, ModelRequest, RawToolCall};

const BASE_RETRY_DELAY_MS: u64 = 250;
const MAX_RETRY_DELAY_MS: u64 = 5_000;
const MAX_RETRY_JITTER_MS: u64 = 125;
const MAX_ERROR_DETAIL_CHARS: usize = 300;

/// OpenAI-style chat-completions client. Retries transient failures with
/// capped exponential backoff and a small jitter so concurrent turns do not
/// retry in lockstep.
pub struct HttpModelClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    timeout_secs: u64,
    max_retries: u32,
}

impl HttpModelClient {
    pub fn from_config(config: &ModelConfig) -> Result<Self, ModelError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| ModelError::Request(format!("failed to build http client: {error}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.name.clone(),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        })
    }

    async fn send_once(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        let payload = wire_request(&self.model, request);

        let mut pending = self.http.post(&url).json(&payload);
        if let Some(api_key) = &self.api_key {
            pending = pending.bearer_auth(api_key.expose_secret());
        }

        let response = pending.send().await.map_err(|error| {
            if error.is_timeout() {
                ModelError::TimedOut { timeout_secs: self.timeout_secs }
            } else {
                ModelError::Request(error.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                status: status.as_u16(),
                detail: truncate_detail(&detail),
            });
        }

        let wire = response
            .json::<WireReply>()
            .await
            .map_err(|error| ModelError::Decode(error.to_string()))?;
        reply_from_wire(wire)
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn invoke(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        let mut last_error = ModelError::Request("model invocation never attempted".to_string());

        for attempt in 0..=self.max_retries {
            match self.send_once(request).await {
                Ok(reply) => return Ok(reply),
                Err(error) => {
                    if !retryable(&error) || attempt >= self.max_retries {
                        return Err(error);
                    }

                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        error = %error,
                        "model invocation failed; retrying"
                    );
                    tokio::time::sleep(backoff_delay(attempt) + retry_jitter()).await;
                    last_error = error;
                }
            }
        }

        Err(last_error)
    }
}

fn retryable(error: &ModelError) -> bool {
    match error {
        ModelError::Request(_) | ModelError::TimedOut { .. } => true,
        ModelError::Status { status, .. } => *status == 429 || *status >= 500,
        ModelError::Decode(_) => false,
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.min(16);
    let multiplier = 1_u64 << exponent;
    let delay_ms = BASE_RETRY_DELAY_MS.saturating_mul(multiplier).min(MAX_RETRY_DELAY_MS);
    Duration::from_millis(delay_ms)
}

fn retry_jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..=MAX_RETRY_JITTER_MS))
}

fn truncate_detail(detail: &str) -> String {
    let trimmed = detail.trim();
    if trimmed.chars().count() <= MAX_ERROR_DETAIL_CHARS {
        return trimmed.to_string();
    }
    let mut shortened: String = trimmed.chars().take(MAX_ERROR_DETAIL_CHARS).collect();
    shortened.push_str("...");
    shortened
}

fn wire_request<'a>(model: &'a str, request: &'a ModelRequest) -> WireRequest<'a> {
    let tools = request
        .tools
        .iter()
        .map(|entry| WireTool {
            kind: "function",
            function: WireFunction {
                name: &entry.name,
                description: &entry.description,
                parameters: &entry.parameters,
            },
        })
        .collect::<Vec<_>>();

    WireRequest {
        model,
        messages: request
            .messages
            .iter()
            .map(|message| WireMessage { role: message.role.as_str(), content: &message.content })
            .collect(),
        tool_choice: if tools.is_empty() { None } else { Some("auto") },
        tools,
    }
}

fn reply_from_wire(wire: WireReply) -> Result<ModelReply, ModelError> {
    let Some(choice) = wire.choices.into_iter().next() else {
        return Err(ModelError::Decode("model reply contained no choices".to_string()));
    };

    let text = choice.message.content.filter(|content| !content.trim().is_empty());
    let calls = choice
        .message
        .tool_calls
        .into_iter()
        .map(|call| RawToolCall::raw(call.function.name, call.function.arguments))
        .collect();

    Ok(ModelReply { text, calls })
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a str>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    function: WireFunction<'a>,
}

#[derive(Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Deserialize)]
struct WireReply {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireReplyMessage,
}

#[derive(Deserialize)]
struct WireReplyMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    function: WireCallFunction,
}

#[derive(Deserialize)]
struct WireCallFunction {
    name: String,
    arguments: String,
}
