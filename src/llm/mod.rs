//! Model invocation boundary
//!
//! Generator and reviewer share one request shape and differ only in their
//! conversation, declared tools and sampling settings.

pub mod offline;
pub mod openai;
pub mod scripted;

pub use offline::OfflineAnalyst;
pub use openai::OpenAiClient;
pub use scripted::ScriptedModel;

use crate::models::{ChatMessage, ToolCall};
use crate::tools::ToolDefinition;
use crate::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampling {
    pub temperature: f32,
    /// Ask the endpoint for a JSON object response.
    pub json_mode: bool,
}

impl Sampling {
    pub fn generator(temperature: f32) -> Self {
        Self {
            temperature,
            json_mode: false,
        }
    }

    pub fn reviewer(temperature: f32) -> Self {
        Self {
            temperature,
            json_mode: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub messages: &'a [ChatMessage],
    pub tools: &'a [ToolDefinition],
    pub sampling: Sampling,
}

/// Either tool calls to run, or final text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls,
        }
    }

    pub fn wants_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelReply>;
}
