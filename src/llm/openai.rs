//! OpenAI-compatible chat-completions client
//!
//! Uses a long-lived reqwest::Client for connection pooling.

use super::{ChatModel, ModelReply, ModelRequest};
use crate::config::AppConfig;
use crate::error::OrchestrationError;
use crate::models::{ChatMessage, Role, ToolCall};
use crate::tools::ToolDefinition;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Reusable chat-completions client (connection-pooled)
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            OrchestrationError::Config("OPENAI_API_KEY not configured".to_string())
        })?;
        Self::new(api_key, &config.base_url, &config.model, config.request_timeout)
    }

    fn build_request<'a>(&'a self, request: &ModelRequest<'a>) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: request.messages.iter().map(WireMessage::from).collect(),
            temperature: request.sampling.temperature,
            tool_choice: if request.tools.is_empty() { None } else { Some("auto") },
            tools: if request.tools.is_empty() { None } else { Some(request.tools) },
            response_format: request.sampling.json_mode.then_some(ResponseFormat {
                format_type: "json_object",
            }),
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelReply> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_request(&request);

        debug!(
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Calling chat completions"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Chat completions request failed: {}", e);
                OrchestrationError::TransportFailure(format!("request failed: {}", e))
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            OrchestrationError::TransportFailure(format!("failed to read response: {}", e))
        })?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            error!(%status, "Chat completions error response: {}", detail);
            return Err(OrchestrationError::TransportFailure(format!(
                "API error {}: {}",
                status, detail
            )));
        }

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            OrchestrationError::TransportFailure(format!("unparseable completion: {}", e))
        })?;

        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| {
                OrchestrationError::TransportFailure("no choices in completion".to_string())
            })?;

        Ok(message.into_reply())
    }
}

//
// ================= Wire Format =================
//

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: Role,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<&ChatMessage> for WireMessage {
    fn from(msg: &ChatMessage) -> Self {
        let tool_calls = if msg.tool_calls.is_empty() {
            None
        } else {
            Some(msg.tool_calls.iter().map(WireToolCall::from).collect())
        };

        Self {
            role: msg.role,
            content: msg.content.clone(),
            tool_calls,
            tool_call_id: msg.tool_call_id.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded argument object
    arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

impl From<&ToolCall> for WireToolCall {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            call_type: function_type(),
            function: WireFunctionCall {
                name: call.name.clone(),
                arguments: call.arguments.to_string(),
            },
        }
    }
}

impl WireToolCall {
    fn into_tool_call(self) -> ToolCall {
        // Null arguments fail dispatch with InvalidToolInput
        let arguments = serde_json::from_str(&self.function.arguments).unwrap_or_else(|e| {
            warn!(
                tool = %self.function.name,
                error = %e,
                arguments = %self.function.arguments,
                "Tool call arguments are not valid JSON"
            );
            Value::Null
        });

        ToolCall {
            id: self.id,
            name: self.function.name,
            arguments,
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

impl ResponseMessage {
    fn into_reply(self) -> ModelReply {
        ModelReply {
            content: self.content,
            tool_calls: self
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(WireToolCall::into_tool_call)
                .collect(),
        }
    }
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}
