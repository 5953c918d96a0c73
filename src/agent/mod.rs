//! Generation agent - the bounded tool-calling loop
//!
//! AWAIT MODEL → DISPATCH TOOLS → AWAIT MODEL ... → FINAL TEXT
//!
//! The loop never returns `Err`: transport failures, timeouts, exhaustion
//! and cancellation all surface as a terminal `GenerationStatus`.

pub mod conversation;

pub use conversation::Conversation;

use crate::config::{AppConfig, DEFAULT_MAX_ITERATIONS};
use crate::execution::ToolExecutor;
use crate::extract::{extract_structured, Extraction};
use crate::llm::{ChatModel, ModelRequest, Sampling};
use crate::models::{ChatMessage, Trace, TraceEvent};
use crate::tools::{normalize_ticker, ToolDefinition, ToolRegistry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Every generation request starts with this, followed by the ticker.
pub const REQUEST_PREFIX: &str = "Conduct a comprehensive ESG assessment of ";

pub const ITERATION_LIMIT_MESSAGE: &str =
    "Max iterations reached without generating a final JSON assessment.";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

pub const SYSTEM_PROMPT: &str = r#"You are a senior ESG analyst producing materiality-driven assessments.

Workflow:
1. Determine the company's industry and call get_sasb_materiality for it.
2. Gather evidence with get_environmental_metrics, get_governance_data,
   scan_controversies and get_peer_esg_scores.
3. Score each pillar from 0 to 100, weighting the SASB material topics most heavily.

Scoring bands:
- 80-100: leading practice, strong targets and disclosure, no high-severity controversies
- 60-79: adequate practice with identifiable gaps
- 40-59: material weaknesses or unresolved medium-severity controversies
- 0-39: severe deficiencies or ongoing high-severity controversies

Every rationale must cite specific figures from the tool results. Treat
unavailable data as a gap, never invent numbers.

When finished, reply with a single ```json block and nothing else:
{
  "company": "...",
  "ticker": "...",
  "industry": "...",
  "sasb_material_topics": ["..."],
  "environmental_score": 0,
  "environmental_rationale": "...",
  "social_score": 0,
  "social_rationale": "...",
  "governance_score": 0,
  "governance_rationale": "...",
  "composite_score": 0.0,
  "controversies_summary": "... (state the severity of each controversy)",
  "peer_comparison": "...",
  "key_risks": ["..."],
  "recommendation": "Strong ESG | Adequate ESG | ESG Concern"
}"#;

/// Opening user message; reviewer feedback is quoted on regeneration.
pub fn build_request(ticker: &str, feedback: Option<&str>) -> String {
    let mut request = format!(
        "{}{}. Use the tools to gather evidence, then return the final JSON assessment.",
        REQUEST_PREFIX,
        normalize_ticker(ticker)
    );

    if let Some(feedback) = feedback.map(str::trim).filter(|f| !f.is_empty()) {
        request.push_str("\n\nA reviewer rejected a previous attempt. Address these deficiencies:\n");
        request.push_str(feedback);
    }

    request
}

/// Ticker named by a request built with [`build_request`].
pub fn requested_ticker(request: &str) -> Option<&str> {
    request
        .strip_prefix(REQUEST_PREFIX)?
        .split(|c: char| c == '.' || c.is_whitespace())
        .next()
        .filter(|t| !t.is_empty())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    /// Model produced final text.
    Completed,
    /// Turn budget spent without final text.
    Exhausted,
    /// Transport failure or timeout.
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub status: GenerationStatus,
    /// Extracted assessment text, or the terminal error message.
    pub output: String,
    /// Parsed JSON when extraction succeeded.
    pub extraction: Option<Extraction>,
    pub iterations: u32,
    pub trace: Trace,
}

impl GenerationResult {
    pub fn is_completed(&self) -> bool {
        self.status == GenerationStatus::Completed
    }
}

pub struct EsgAgent {
    model: Arc<dyn ChatModel>,
    executor: ToolExecutor,
    tools: Vec<ToolDefinition>,
    sampling: Sampling,
    max_iterations: u32,
    timeout: Duration,
}

impl EsgAgent {
    pub fn new(model: Arc<dyn ChatModel>, registry: ToolRegistry) -> Self {
        let tools = registry.definitions();
        Self {
            model,
            executor: ToolExecutor::new(registry),
            tools,
            sampling: Sampling::generator(0.2),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_config(model: Arc<dyn ChatModel>, registry: ToolRegistry, config: &AppConfig) -> Self {
        Self::new(model, registry)
            .with_max_iterations(config.max_iterations)
            .with_temperature(config.agent_temperature)
            .with_timeout(config.request_timeout)
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.sampling = Sampling::generator(temperature);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run one fresh conversation for `ticker`.
    ///
    /// Trace entries are tagged with `revision`. The returned iteration
    /// count never exceeds the configured budget.
    pub async fn generate(
        &self,
        ticker: &str,
        feedback: Option<&str>,
        revision: u32,
        cancel: &CancellationToken,
    ) -> GenerationResult {
        let ticker = normalize_ticker(ticker);
        let mut conversation = Conversation::seed(SYSTEM_PROMPT, build_request(&ticker, feedback));
        let mut trace = Trace::new();

        info!(ticker = %ticker, revision, "Generation started");

        for iteration in 0..self.max_iterations {
            if cancel.is_cancelled() {
                info!(ticker = %ticker, revision, iteration, "Generation cancelled");
                trace.record(revision, iteration, TraceEvent::Cancelled);
                return GenerationResult {
                    status: GenerationStatus::Cancelled,
                    output: "Generation cancelled".to_string(),
                    extraction: None,
                    iterations: iteration,
                    trace,
                };
            }

            let request = ModelRequest {
                messages: conversation.messages(),
                tools: &self.tools,
                sampling: self.sampling,
            };

            debug!(ticker = %ticker, revision, iteration, messages = conversation.len(), "Invoking model");

            let reply = match tokio::time::timeout(self.timeout, self.model.complete(request)).await {
                Ok(Ok(reply)) => reply,
                Ok(Err(e)) => {
                    return self.fail(&ticker, revision, iteration, trace, e.to_string());
                }
                Err(_) => {
                    let message = format!(
                        "Model invocation timed out after {}s",
                        self.timeout.as_secs_f32()
                    );
                    return self.fail(&ticker, revision, iteration, trace, message);
                }
            };

            if reply.wants_tools() {
                let outcome = self.executor.dispatch_all(&reply.tool_calls, revision, iteration);

                debug!(
                    ticker = %ticker,
                    revision,
                    iteration,
                    calls = reply.tool_calls.len(),
                    failures = outcome.failures,
                    "Tools dispatched"
                );

                let assistant = ChatMessage::assistant(reply.content, reply.tool_calls);
                conversation.extend(std::iter::once(assistant).chain(outcome.messages));
                trace.append(outcome.trace);
                continue;
            }

            let text = reply.content.unwrap_or_default();
            let extraction = extract_structured(&text);
            if extraction.value().is_none() {
                warn!(ticker = %ticker, revision, iteration, "Final reply is not structured JSON; passing raw text on");
            }

            info!(
                ticker = %ticker,
                revision,
                iterations = iteration + 1,
                extraction = extraction.kind(),
                "Generation completed"
            );

            return GenerationResult {
                status: GenerationStatus::Completed,
                output: extraction.text().to_string(),
                extraction: Some(extraction),
                iterations: iteration + 1,
                trace,
            };
        }

        warn!(ticker = %ticker, revision, max_iterations = self.max_iterations, "Iteration budget exhausted");
        trace.record(
            revision,
            self.max_iterations,
            TraceEvent::IterationLimit {
                max_iterations: self.max_iterations,
            },
        );

        GenerationResult {
            status: GenerationStatus::Exhausted,
            output: ITERATION_LIMIT_MESSAGE.to_string(),
            extraction: None,
            iterations: self.max_iterations,
            trace,
        }
    }

    fn fail(
        &self,
        ticker: &str,
        revision: u32,
        iteration: u32,
        mut trace: Trace,
        message: String,
    ) -> GenerationResult {
        warn!(ticker = %ticker, revision, iteration, error = %message, "Model invocation failed");
        trace.record(revision, iteration, TraceEvent::ModelError { message: message.clone() });

        GenerationResult {
            status: GenerationStatus::Failed,
            output: format!("Error during generation: {}", message),
            extraction: None,
            iterations: iteration,
            trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedModel;
    use crate::models::Role;
    use serde_json::json;

    const FINAL: &str = "```json\n{\"ticker\": \"XOM\", \"environmental_score\": 20}\n```";

    fn agent(model: Arc<ScriptedModel>) -> EsgAgent {
        EsgAgent::new(model, ToolRegistry::builtin())
    }

    #[tokio::test]
    async fn test_tool_turn_then_final_answer() {
        let model = Arc::new(
            ScriptedModel::new()
                .then_tools(&[
                    ("get_sasb_materiality", json!({"industry": "Oil & Gas"})),
                    ("scan_controversies", json!({"ticker": "XOM"})),
                ])
                .then_text(FINAL),
        );

        let result = agent(model.clone())
            .generate("xom", None, 0, &CancellationToken::new())
            .await;

        assert!(result.is_completed());
        assert_eq!(result.iterations, 2);
        assert_eq!(result.output, "{\"ticker\": \"XOM\", \"environmental_score\": 20}");
        assert_eq!(result.extraction.as_ref().map(Extraction::kind), Some("fenced"));
        assert_eq!(result.trace.tool_calls().count(), 2);

        let requests = model.requests();
        assert_eq!(requests[0].tool_names.len(), 5);
        assert!(requests[0].messages[1].content.as_deref().unwrap().contains("XOM"));
        // seed + assistant + two tool results
        let second = &requests[1].messages;
        assert_eq!(second.len(), 5);
        assert_eq!(second[2].role, Role::Assistant);
        assert_eq!(second[3].tool_call_id.as_deref(), Some("call_0"));
        assert_eq!(second[4].tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn test_transport_failure_on_first_turn() {
        let model = Arc::new(ScriptedModel::new().then_error("connection reset"));
        let result = agent(model)
            .generate("XOM", None, 0, &CancellationToken::new())
            .await;

        assert_eq!(result.status, GenerationStatus::Failed);
        assert_eq!(result.iterations, 0);
        let message = result.trace.error_message().unwrap();
        assert!(message.contains("connection reset"));
    }

    #[tokio::test]
    async fn test_unknown_tool_does_not_abort() {
        let model = Arc::new(
            ScriptedModel::new()
                .then_tools(&[("get_weather", json!({"ticker": "XOM"}))])
                .then_text(FINAL),
        );
        let result = agent(model.clone())
            .generate("XOM", None, 0, &CancellationToken::new())
            .await;

        assert!(result.is_completed());
        let requests = model.requests();
        let tool_message = &requests[1].messages[3];
        assert!(tool_message.content.as_deref().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_turn_budget_is_respected() {
        let mut script = ScriptedModel::new();
        for _ in 0..10 {
            script = script.then_tools(&[("get_peer_esg_scores", json!({"ticker": "XOM"}))]);
        }
        let model = Arc::new(script);

        let result = agent(model.clone())
            .with_max_iterations(3)
            .generate("XOM", None, 0, &CancellationToken::new())
            .await;

        assert_eq!(result.status, GenerationStatus::Exhausted);
        assert_eq!(result.iterations, 3);
        assert_eq!(result.output, ITERATION_LIMIT_MESSAGE);
        assert_eq!(model.call_count(), 3);
        assert!(result
            .trace
            .entries()
            .iter()
            .any(|e| e.event == TraceEvent::IterationLimit { max_iterations: 3 }));
    }

    #[tokio::test]
    async fn test_timeout_is_a_failure() {
        let model = Arc::new(ScriptedModel::new().then_stall(Duration::from_secs(5), FINAL));
        let result = agent(model)
            .with_timeout(Duration::from_millis(20))
            .generate("XOM", None, 0, &CancellationToken::new())
            .await;

        assert_eq!(result.status, GenerationStatus::Failed);
        assert!(result.trace.error_message().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_turn() {
        let model = Arc::new(ScriptedModel::new().then_text(FINAL));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = agent(model.clone()).generate("XOM", None, 0, &cancel).await;
        assert_eq!(result.status, GenerationStatus::Cancelled);
        assert_eq!(result.iterations, 0);
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unparsed_final_text_is_still_returned() {
        let model = Arc::new(ScriptedModel::new().then_text("I am unable to finish."));
        let result = agent(model)
            .generate("XOM", None, 0, &CancellationToken::new())
            .await;

        assert!(result.is_completed());
        assert_eq!(result.output, "I am unable to finish.");
        assert_eq!(result.extraction.as_ref().map(Extraction::kind), Some("unparsed"));
    }

    #[test]
    fn test_request_quotes_feedback() {
        let request = build_request(" jnj ", Some("Governance rationale lacks figures."));
        assert!(request.starts_with("Conduct a comprehensive ESG assessment of JNJ."));
        assert!(request.contains("Governance rationale lacks figures."));
        assert_eq!(requested_ticker(&request), Some("JNJ"));
        assert!(!build_request("JNJ", Some("  ")).contains("reviewer"));
    }
}
