//! Core data models shared by the agent loops

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

//
// ================= Conversation =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry of a conversation sent to the model boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(result: &ToolResult) -> Self {
        Self {
            role: Role::Tool,
            content: Some(result.render()),
            tool_calls: Vec::new(),
            tool_call_id: Some(result.tool_call_id.clone()),
        }
    }
}

//
// ================= Tool I/O =================
//

/// A tool invocation requested by the generation agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Structured output of a tool, fed back into the conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub content: Value,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    /// Synthetic result for a call that could not be dispatched.
    pub fn error(call: &ToolCall, message: impl Into<String>) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            content: serde_json::json!({ "error": message.into() }),
            is_error: true,
        }
    }

    /// Text form handed to the model.
    pub fn render(&self) -> String {
        serde_json::to_string_pretty(&self.content).unwrap_or_else(|_| self.content.to_string())
    }
}

//
// ================= Evaluation =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerdictStatus {
    Approved,
    Revise,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationVerdict {
    pub status: VerdictStatus,
    pub feedback: String,
}

impl EvaluationVerdict {
    pub fn approved() -> Self {
        Self {
            status: VerdictStatus::Approved,
            feedback: String::new(),
        }
    }

    pub fn revise(feedback: impl Into<String>) -> Self {
        Self {
            status: VerdictStatus::Revise,
            feedback: feedback.into(),
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == VerdictStatus::Approved
    }
}

/// Terminal outcome of one Evaluator-Optimizer run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluatorStatus {
    Approved,
    MaxRevisionsReached,
    Failed,
    FailedRevision,
    Cancelled,
}

impl EvaluatorStatus {
    /// Whether the assessment may feed downstream aggregation.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            EvaluatorStatus::Approved | EvaluatorStatus::MaxRevisionsReached
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluatorStatus::Approved => "APPROVED",
            EvaluatorStatus::MaxRevisionsReached => "MAX_REVISIONS_REACHED",
            EvaluatorStatus::Failed => "FAILED",
            EvaluatorStatus::FailedRevision => "FAILED_REVISION",
            EvaluatorStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for EvaluatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

//
// ================= Trace =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEvent {
    ToolCall {
        tool: String,
        arguments: Value,
        result: String,
        ok: bool,
    },
    ModelError {
        message: String,
    },
    IterationLimit {
        max_iterations: u32,
    },
    Cancelled,
    Evaluation {
        status: VerdictStatus,
        feedback: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceEntry {
    pub revision: u32,
    pub iteration: u32,
    pub recorded_at: DateTime<Utc>,
    pub event: TraceEvent,
}

/// Append-only log of tool calls and reviewer verdicts for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Trace {
    entries: Vec<TraceEntry>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, revision: u32, iteration: u32, event: TraceEvent) {
        self.entries.push(TraceEntry {
            revision,
            iteration,
            recorded_at: Utc::now(),
            event,
        });
    }

    /// Append every entry of a later trace segment.
    pub fn append(&mut self, mut tail: Trace) {
        self.entries.append(&mut tail.entries);
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &TraceEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.event, TraceEvent::ToolCall { .. }))
    }

    pub fn evaluations(&self) -> impl Iterator<Item = &TraceEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.event, TraceEvent::Evaluation { .. }))
    }

    /// First model error recorded, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.entries.iter().find_map(|e| match &e.event {
            TraceEvent::ModelError { message } => Some(message.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_finality() {
        assert!(EvaluatorStatus::Approved.is_final());
        assert!(EvaluatorStatus::MaxRevisionsReached.is_final());
        assert!(!EvaluatorStatus::Failed.is_final());
        assert!(!EvaluatorStatus::FailedRevision.is_final());
        assert!(!EvaluatorStatus::Cancelled.is_final());
    }

    #[test]
    fn test_status_serializes_screaming_case() {
        let json = serde_json::to_string(&EvaluatorStatus::MaxRevisionsReached).unwrap();
        assert_eq!(json, "\"MAX_REVISIONS_REACHED\"");
        assert_eq!(EvaluatorStatus::FailedRevision.to_string(), "FAILED_REVISION");
    }

    #[test]
    fn test_tool_message_skips_empty_fields() {
        let msg = ChatMessage::user("hello");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"user\""));
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("tool_call_id"));
    }

    #[test]
    fn test_trace_append_keeps_order() {
        let mut first = Trace::new();
        first.record(0, 0, TraceEvent::Cancelled);

        let mut second = Trace::new();
        second.record(1, 0, TraceEvent::IterationLimit { max_iterations: 3 });
        second.record(1, 1, TraceEvent::ModelError { message: "boom".into() });

        first.append(second);
        let order: Vec<(u32, u32)> = first
            .entries()
            .iter()
            .map(|e| (e.revision, e.iteration))
            .collect();
        assert_eq!(order, vec![(0, 0), (1, 0), (1, 1)]);
        assert_eq!(first.error_message(), Some("boom"));
    }

    #[test]
    fn test_error_result_marks_call() {
        let call = ToolCall {
            id: "call_1".into(),
            name: "fetch_stock_price".into(),
            arguments: json!({"ticker": "AAPL"}),
        };
        let result = ToolResult::error(&call, "Tool 'fetch_stock_price' not found.");
        assert!(result.is_error);
        assert_eq!(result.tool_call_id, "call_1");
        assert!(result.render().contains("not found"));
    }
}
