//! Replays a fixed script of replies; records every request it receives.

use super::{ChatModel, ModelReply, ModelRequest, Sampling};
use crate::error::OrchestrationError;
use crate::models::{ChatMessage, ToolCall};
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<ChatMessage>,
    pub tool_names: Vec<String>,
    pub sampling: Sampling,
}

enum Step {
    Reply(ModelReply),
    Fail(String),
    Stall(Duration, ModelReply),
}

pub struct ScriptedModel {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn push(self, step: Step) -> Self {
        if let Ok(mut steps) = self.steps.lock() {
            steps.push_back(step);
        }
        self
    }

    pub fn then_text(self, content: impl Into<String>) -> Self {
        self.push(Step::Reply(ModelReply::text(content)))
    }

    /// Queue one turn requesting `(tool name, arguments)` pairs.
    pub fn then_tools(self, calls: &[(&str, Value)]) -> Self {
        let calls = calls
            .iter()
            .enumerate()
            .map(|(i, (name, arguments))| ToolCall {
                id: format!("call_{}", i),
                name: name.to_string(),
                arguments: arguments.clone(),
            })
            .collect();
        self.push(Step::Reply(ModelReply::with_tool_calls(calls)))
    }

    pub fn then_error(self, message: impl Into<String>) -> Self {
        self.push(Step::Fail(message.into()))
    }

    /// Reply only after `delay`; lets callers exercise timeouts.
    pub fn then_stall(self, delay: Duration, content: impl Into<String>) -> Self {
        self.push(Step::Stall(delay, ModelReply::text(content)))
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn remaining(&self) -> usize {
        self.steps.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelReply> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest {
                messages: request.messages.to_vec(),
                tool_names: request
                    .tools
                    .iter()
                    .map(|t| t.function.name.to_string())
                    .collect(),
                sampling: request.sampling,
            });
        }

        let step = self.steps.lock().ok().and_then(|mut s| s.pop_front());
        match step {
            Some(Step::Reply(reply)) => Ok(reply),
            Some(Step::Fail(message)) => Err(OrchestrationError::TransportFailure(message)),
            Some(Step::Stall(delay, reply)) => {
                tokio::time::sleep(delay).await;
                Ok(reply)
            }
            None => Err(OrchestrationError::TransportFailure(
                "script exhausted".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_replays_in_order_then_fails() {
        let model = ScriptedModel::new()
            .then_tools(&[("scan_controversies", json!({"ticker": "XOM"}))])
            .then_text("done");
        let messages = vec![ChatMessage::user("go")];
        let request = ModelRequest {
            messages: &messages,
            tools: &[],
            sampling: Sampling::generator(0.2),
        };

        assert!(model.complete(request).await.unwrap().wants_tools());
        assert_eq!(model.complete(request).await.unwrap().content.as_deref(), Some("done"));
        assert!(model.complete(request).await.is_err());
        assert_eq!(model.call_count(), 3);
        assert_eq!(model.remaining(), 0);
    }
}
