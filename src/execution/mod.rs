//! Tool-call dispatch for one agent turn
//!
//! Deterministic: no model is involved here. Every requested call yields
//! exactly one tool message, in request order, even when dispatch fails.

use crate::error::OrchestrationError;
use crate::models::{ChatMessage, ToolCall, ToolResult, Trace, TraceEvent};
use crate::tools::ToolRegistry;
use std::time::Instant;
use tracing::{debug, warn};

/// Calls past this many in a single turn are rejected unexecuted.
const MAX_CALLS_PER_TURN: usize = 50;

/// Length of the result preview kept in the trace.
const RESULT_PREVIEW_CHARS: usize = 300;

/// Output of dispatching one turn's calls.
#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    /// One tool message per call, in dispatch order.
    pub messages: Vec<ChatMessage>,
    pub trace: Trace,
    pub failures: usize,
}

pub struct ToolExecutor {
    registry: ToolRegistry,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    /// Run every call of a turn; dispatch failures become synthetic error
    /// results so the model can correct itself on the next turn.
    pub fn dispatch_all(&self, calls: &[ToolCall], revision: u32, iteration: u32) -> DispatchOutcome {
        let mut outcome = DispatchOutcome {
            messages: Vec::with_capacity(calls.len()),
            ..Default::default()
        };

        for (index, call) in calls.iter().enumerate() {
            let start = Instant::now();

            let result = if index >= MAX_CALLS_PER_TURN {
                Err(OrchestrationError::InvalidToolInput(format!(
                    "Turn exceeds maximum allowed tool calls ({})",
                    MAX_CALLS_PER_TURN
                )))
            } else {
                self.registry.dispatch(call)
            };

            let result = match result {
                Ok(result) => result,
                Err(e) => {
                    warn!(
                        revision,
                        iteration,
                        tool = %call.name,
                        error = %e,
                        "Tool dispatch failed"
                    );
                    outcome.failures += 1;
                    ToolResult::error(call, dispatch_error_message(call, &e))
                }
            };

            debug!(
                revision,
                iteration,
                tool = %call.name,
                elapsed_us = start.elapsed().as_micros() as u64,
                "Tool call dispatched"
            );

            outcome.trace.record(
                revision,
                iteration,
                TraceEvent::ToolCall {
                    tool: call.name.clone(),
                    arguments: call.arguments.clone(),
                    result: preview(&result.render()),
                    ok: !result.is_error,
                },
            );
            outcome.messages.push(ChatMessage::tool(&result));
        }

        outcome
    }
}

fn dispatch_error_message(call: &ToolCall, error: &OrchestrationError) -> String {
    match error {
        OrchestrationError::UnknownTool(_) => format!("Tool '{}' not found.", call.name),
        other => other.to_string(),
    }
}

/// First `RESULT_PREVIEW_CHARS` characters, cut on a char boundary.
fn preview(text: &str) -> String {
    match text.char_indices().nth(RESULT_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
