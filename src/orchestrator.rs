//! Evaluator-Optimizer loop
//!
//! GENERATE → REVIEW → (APPROVED | REGENERATE → REVIEW ...) → COMPLETE
//!
//! A regeneration is a fresh, independent Generation Loop run; nothing from
//! the rejected attempt is patched.

use crate::agent::{EsgAgent, GenerationStatus};
use crate::config::AppConfig;
use crate::llm::ChatModel;
use crate::models::{EvaluatorStatus, Trace, TraceEvent};
use crate::tools::{normalize_ticker, ToolRegistry};
use crate::verification::Reviewer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub ticker: String,
    /// Last good assessment text, or the failure message for `FAILED`.
    pub assessment: String,
    pub status: EvaluatorStatus,
    pub revisions: u32,
    /// Model turns spent across every generation attempt.
    pub iterations: u32,
    pub trace: Trace,
    pub elapsed_ms: u64,
}

pub struct EvaluatorOptimizer {
    agent: EsgAgent,
    reviewer: Reviewer,
}

impl EvaluatorOptimizer {
    pub fn new(agent: EsgAgent, reviewer: Reviewer) -> Self {
        Self { agent, reviewer }
    }

    /// Generator and reviewer models wired from configuration.
    pub fn from_config(
        generator: Arc<dyn ChatModel>,
        reviewer: Arc<dyn ChatModel>,
        registry: ToolRegistry,
        config: &AppConfig,
    ) -> Self {
        let agent = EsgAgent::from_config(generator, registry, config);
        let reviewer = Reviewer::new(reviewer)
            .with_temperature(config.reviewer_temperature)
            .with_timeout(config.request_timeout);
        Self::new(agent, reviewer)
    }

    /// Never returns an error; every outcome is an `EvaluatorStatus`.
    pub async fn run(
        &self,
        ticker: &str,
        max_revisions: u32,
        cancel: &CancellationToken,
    ) -> OptimizationResult {
        let ticker = normalize_ticker(ticker);
        let start = Instant::now();
        let mut trace = Trace::new();

        info!(ticker = %ticker, max_revisions, "Evaluator-optimizer started");

        let first = self.agent.generate(&ticker, None, 0, cancel).await;
        let mut iterations = first.iterations;
        trace.append(first.trace);

        let finish = |assessment: String, status: EvaluatorStatus, revisions: u32, iterations: u32, trace: Trace| {
            info!(ticker = %ticker, %status, revisions, iterations, "Evaluator-optimizer finished");
            OptimizationResult {
                ticker: ticker.clone(),
                assessment,
                status,
                revisions,
                iterations,
                trace,
                elapsed_ms: start.elapsed().as_millis() as u64,
            }
        };

        match first.status {
            GenerationStatus::Completed => {}
            GenerationStatus::Cancelled => {
                return finish(first.output, EvaluatorStatus::Cancelled, 0, iterations, trace);
            }
            GenerationStatus::Failed | GenerationStatus::Exhausted => {
                warn!(ticker = %ticker, error = %first.output, "Initial generation failed");
                return finish(first.output, EvaluatorStatus::Failed, 0, iterations, trace);
            }
        }

        let mut current = first.output;
        let mut last_iteration = first.iterations;

        for revision in 0..max_revisions {
            if cancel.is_cancelled() {
                trace.record(revision, last_iteration, TraceEvent::Cancelled);
                return finish(current, EvaluatorStatus::Cancelled, revision, iterations, trace);
            }

            let verdict = self.reviewer.evaluate(&current).await;
            trace.record(
                revision,
                last_iteration,
                TraceEvent::Evaluation {
                    status: verdict.status,
                    feedback: verdict.feedback.clone(),
                },
            );

            if verdict.is_approved() {
                return finish(current, EvaluatorStatus::Approved, revision, iterations, trace);
            }

            info!(ticker = %ticker, revision, feedback = %verdict.feedback, "Revision requested");

            let next = self
                .agent
                .generate(&ticker, Some(verdict.feedback.as_str()), revision + 1, cancel)
                .await;
            iterations += next.iterations;
            last_iteration = next.iterations;
            trace.append(next.trace);

            match next.status {
                GenerationStatus::Completed => current = next.output,
                GenerationStatus::Cancelled => {
                    return finish(current, EvaluatorStatus::Cancelled, revision + 1, iterations, trace);
                }
                GenerationStatus::Failed | GenerationStatus::Exhausted => {
                    warn!(ticker = %ticker, revision, error = %next.output, "Regeneration failed; keeping last assessment");
                    return finish(current, EvaluatorStatus::FailedRevision, revision + 1, iterations, trace);
                }
            }
        }

        finish(current, EvaluatorStatus::MaxRevisionsReached, max_revisions, iterations, trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedModel;
    use crate::models::VerdictStatus;
    use serde_json::json;

    const GOOD: &str = "```json\n{\"ticker\": \"XOM\", \"environmental_score\": 20}\n```";
    const BETTER: &str = "```json\n{\"ticker\": \"XOM\", \"environmental_score\": 25}\n```";
    const APPROVE: &str = r#"{"status": "APPROVED", "feedback": ""}"#;
    const REVISE: &str = r#"{"status": "REVISE", "feedback": "Cite governance figures."}"#;

    fn optimizer(generator: Arc<ScriptedModel>, reviewer: Arc<ScriptedModel>) -> EvaluatorOptimizer {
        EvaluatorOptimizer::new(
            EsgAgent::new(generator, ToolRegistry::builtin()),
            Reviewer::new(reviewer),
        )
    }

    #[tokio::test]
    async fn test_approved_first_time() {
        let generator = Arc::new(
            ScriptedModel::new()
                .then_tools(&[("get_governance_data", json!({"ticker": "XOM"}))])
                .then_text(GOOD),
        );
        let reviewer = Arc::new(ScriptedModel::new().then_text(APPROVE));

        let result = optimizer(generator, reviewer)
            .run("XOM", 3, &CancellationToken::new())
            .await;

        assert_eq!(result.status, EvaluatorStatus::Approved);
        assert_eq!(result.revisions, 0);
        assert_eq!(result.iterations, 2);
        assert!(result.assessment.contains("\"environmental_score\": 20"));
        assert_eq!(result.trace.evaluations().count(), 1);
    }

    #[tokio::test]
    async fn test_revision_regenerates_with_feedback() {
        let generator = Arc::new(ScriptedModel::new().then_text(GOOD).then_text(BETTER));
        let reviewer = Arc::new(ScriptedModel::new().then_text(REVISE).then_text(APPROVE));

        let result = optimizer(generator.clone(), reviewer)
            .run("XOM", 3, &CancellationToken::new())
            .await;

        assert_eq!(result.status, EvaluatorStatus::Approved);
        assert_eq!(result.revisions, 1);
        assert!(result.assessment.contains("25"));

        // Fresh conversation: system + user only, with the feedback quoted
        let requests = generator.requests();
        let regen = &requests[1].messages;
        assert_eq!(regen.len(), 2);
        assert!(regen[1].content.as_deref().unwrap().contains("Cite governance figures."));
    }

    #[tokio::test]
    async fn test_failed_generation_skips_review() {
        let generator = Arc::new(ScriptedModel::new().then_error("timeout"));
        let reviewer = Arc::new(ScriptedModel::new().then_text(APPROVE));

        let result = optimizer(generator, reviewer.clone())
            .run("XOM", 3, &CancellationToken::new())
            .await;

        assert_eq!(result.status, EvaluatorStatus::Failed);
        assert_eq!(result.revisions, 0);
        assert_eq!(reviewer.call_count(), 0);
        assert!(result.trace.error_message().is_some());
    }

    #[tokio::test]
    async fn test_failed_regeneration_keeps_last_assessment() {
        let generator = Arc::new(ScriptedModel::new().then_text(GOOD).then_error("rate limited"));
        let reviewer = Arc::new(ScriptedModel::new().then_text(REVISE));

        let result = optimizer(generator, reviewer)
            .run("XOM", 3, &CancellationToken::new())
            .await;

        assert_eq!(result.status, EvaluatorStatus::FailedRevision);
        assert_eq!(result.revisions, 1);
        assert!(result.assessment.contains("\"environmental_score\": 20"));
    }

    #[tokio::test]
    async fn test_budget_exhaustion() {
        let generator = Arc::new(
            ScriptedModel::new()
                .then_text(GOOD)
                .then_text(GOOD)
                .then_text(BETTER),
        );
        let reviewer = Arc::new(ScriptedModel::new().then_text(REVISE).then_text(REVISE));

        let result = optimizer(generator, reviewer)
            .run("XOM", 2, &CancellationToken::new())
            .await;

        assert_eq!(result.status, EvaluatorStatus::MaxRevisionsReached);
        assert_eq!(result.revisions, 2);
        assert!(result.assessment.contains("25"));
        assert_eq!(result.iterations, 3);
    }

    #[tokio::test]
    async fn test_malformed_reviewer_output_never_approves() {
        let generator = Arc::new(ScriptedModel::new().then_text(GOOD).then_text(GOOD));
        let reviewer = Arc::new(ScriptedModel::new().then_text("Looks APPROVED to me"));

        let result = optimizer(generator, reviewer)
            .run("XOM", 1, &CancellationToken::new())
            .await;

        assert_ne!(result.status, EvaluatorStatus::Approved);
        let verdicts: Vec<VerdictStatus> = result
            .trace
            .evaluations()
            .map(|e| match &e.event {
                TraceEvent::Evaluation { status, .. } => *status,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(verdicts, vec![VerdictStatus::Revise]);
    }

    #[tokio::test]
    async fn test_trace_is_ordered_by_revision() {
        let generator = Arc::new(
            ScriptedModel::new()
                .then_tools(&[("scan_controversies", json!({"ticker": "XOM"}))])
                .then_text(GOOD)
                .then_tools(&[("get_peer_esg_scores", json!({"ticker": "XOM"}))])
                .then_text(BETTER),
        );
        let reviewer = Arc::new(ScriptedModel::new().then_text(REVISE).then_text(APPROVE));

        let result = optimizer(generator, reviewer)
            .run("XOM", 3, &CancellationToken::new())
            .await;

        let keys: Vec<(u32, u32)> = result
            .trace
            .entries()
            .iter()
            .map(|e| (e.revision, e.iteration))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(keys.first(), Some(&(0, 0)));
    }

    #[tokio::test]
    async fn test_cancelled_run_is_not_reviewed() {
        let generator = Arc::new(ScriptedModel::new().then_text(GOOD));
        let reviewer = Arc::new(ScriptedModel::new().then_text(REVISE));
        let cancel = CancellationToken::new();
        let optimizer = optimizer(generator, reviewer.clone());

        cancel.cancel();
        let result = optimizer.run("XOM", 3, &cancel).await;
        assert_eq!(result.status, EvaluatorStatus::Cancelled);
        assert_eq!(reviewer.call_count(), 0);
    }
}
