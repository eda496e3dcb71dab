use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use savor_core::config::LlmConfig;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON text as produced by the model; not guaranteed to parse.
    pub arguments: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let content = content.into();
        Self {
            role: Role::Assistant,
            content: (!content.is_empty() || tool_calls.is_empty()).then_some(content),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    fn text(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: Some(content.into()), tool_calls: Vec::new(), tool_call_id: None }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Completion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// One blocking text-completion exchange. Retries and timeouts are the
/// implementation's business; an `Err` is final for the caller.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;
}

/// Client for any `/chat/completions` endpoint speaking the OpenAI wire format
/// (OpenAI itself, Ollama's `/v1` compatibility layer, ...).
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    max_retries: u32,
    temperature: Option<f32>,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build http client for llm provider")?;

        Ok(Self {
            http,
            base_url: config.endpoint().to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_retries: config.max_retries,
            temperature: config.temperature,
        })
    }

    fn request_body(&self, request: &CompletionRequest) -> WireRequest {
        WireRequest {
            model: self.model.clone(),
            messages: request.messages.iter().map(WireMessage::from).collect(),
            tools: request.tools.iter().map(WireTool::from).collect(),
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(request);
        let mut attempt = 0;

        loop {
            let mut builder = self.http.post(&url).json(&body);
            if let Some(api_key) = &self.api_key {
                builder = builder.bearer_auth(api_key.expose_secret());
            }

            let retryable = match builder.send().await {
                Ok(response) if response.status().is_success() => {
                    let payload: WireResponse =
                        response.json().await.context("failed to decode llm response")?;
                    debug!(
                        event_name = "llm.completion.received",
                        model = %self.model,
                        attempt,
                        "completion received"
                    );
                    return payload.into_completion();
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    if !(status.is_server_error() || status.as_u16() == 429) {
                        bail!("llm request failed ({status}): {text}");
                    }
                    format!("status {status}: {text}")
                }
                Err(error) if error.is_timeout() || error.is_connect() => error.to_string(),
                Err(error) => {
                    return Err(error).context(format!("llm request to `{url}` failed"));
                }
            };

            if attempt >= self.max_retries {
                bail!("llm request failed after {} attempt(s): {retryable}", attempt + 1);
            }

            let backoff = Duration::from_millis(500 * 2u64.pow(attempt));
            warn!(
                event_name = "llm.completion.retry",
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                reason = %retryable,
                "retrying llm request"
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: Role,
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
            tool_calls: message.tool_calls.iter().map(WireToolCall::from).collect(),
            tool_call_id: message.tool_call_id.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionSpec,
}

#[derive(Debug, Serialize)]
struct WireFunctionSpec {
    name: String,
    description: String,
    parameters: Value,
}

impl From<&ToolSpec> for WireTool {
    fn from(spec: &ToolSpec) -> Self {
        Self {
            kind: "function",
            function: WireFunctionSpec {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: spec.parameters.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

impl From<&ToolCall> for WireToolCall {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            kind: function_kind(),
            function: WireFunctionCall {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

impl WireResponse {
    fn into_completion(self) -> Result<Completion> {
        let Some(choice) = self.choices.into_iter().next() else {
            bail!("llm response contained no choices");
        };

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            })
            .collect();

        Ok(Completion { content: choice.message.content, tool_calls })
    }
}
