//! Independent review of candidate assessments
//!
//! Two reviewers share one checklist:
//! - `Reviewer` asks a model for a verdict (fail-closed parsing)
//! - `ChecklistEngine` applies deterministic structural rules

use crate::error::OrchestrationError;
use crate::extract::extract_structured;
use crate::llm::{ChatModel, ModelRequest, Sampling};
use crate::models::{ChatMessage, EvaluationVerdict};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Reviewer user messages start with this line, then the candidate text.
pub const ASSESSMENT_HEADER: &str = "ESG assessment under review:";

pub const REVIEWER_PROMPT: &str = r#"You are an independent ESG quality reviewer. Check the assessment against every item:

1. All three pillars (environmental, social, governance) have a 0-100 score and a rationale.
2. Scores are consistent with the evidence cited in each rationale.
3. The SASB material topics are listed and addressed.
4. Controversies are summarised with their severity.
5. A peer comparison is present.
6. The output is valid JSON.
7. A composite score is present.

Respond with JSON only:
{"status": "APPROVED" | "REVISE", "feedback": "specific deficiencies to fix, empty when approved"}"#;

pub fn review_messages(assessment_text: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(REVIEWER_PROMPT),
        ChatMessage::user(format!("{}\n\n{}", ASSESSMENT_HEADER, assessment_text)),
    ]
}

/// Strict verdict parse. Anything but a well-formed APPROVED/REVISE object
/// is `MalformedReviewerOutput`.
pub fn parse_verdict(text: &str) -> Result<EvaluationVerdict, OrchestrationError> {
    let value = extract_structured(text).into_value().ok_or_else(|| {
        OrchestrationError::MalformedReviewerOutput("reviewer reply is not a JSON object".to_string())
    })?;

    let status = value
        .get("status")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_uppercase())
        .ok_or_else(|| {
            OrchestrationError::MalformedReviewerOutput("reviewer reply has no status".to_string())
        })?;

    let feedback = value
        .get("feedback")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();

    match status.as_str() {
        "APPROVED" => Ok(EvaluationVerdict::approved()),
        "REVISE" if feedback.is_empty() => Ok(EvaluationVerdict::revise(
            "Reviewer requested a revision without specific feedback.",
        )),
        "REVISE" => Ok(EvaluationVerdict::revise(feedback)),
        other => Err(OrchestrationError::MalformedReviewerOutput(format!(
            "unknown reviewer status '{}'",
            other
        ))),
    }
}

/// Lenient wrapper: malformed output forces a revision, never approval.
pub fn verdict_or_revise(text: &str) -> EvaluationVerdict {
    parse_verdict(text).unwrap_or_else(|e| {
        warn!(error = %e, "Reviewer output malformed; forcing revision");
        EvaluationVerdict::revise(format!("Evaluator output could not be parsed ({}).", e))
    })
}

/// Model-backed reviewer, run at the most deterministic sampling available.
pub struct Reviewer {
    model: Arc<dyn ChatModel>,
    sampling: Sampling,
    timeout: Duration,
}

impl Reviewer {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            sampling: Sampling::reviewer(0.0),
            timeout: Duration::from_secs(90),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.sampling = Sampling::reviewer(temperature);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Never fails; an unreachable reviewer also yields REVISE.
    pub async fn evaluate(&self, assessment_text: &str) -> EvaluationVerdict {
        let messages = review_messages(assessment_text);
        let request = ModelRequest {
            messages: &messages,
            tools: &[],
            sampling: self.sampling,
        };

        let reply = match tokio::time::timeout(self.timeout, self.model.complete(request)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!(error = %e, "Reviewer invocation failed");
                return EvaluationVerdict::revise(format!("Evaluator unavailable: {}", e));
            }
            Err(_) => {
                warn!("Reviewer invocation timed out");
                return EvaluationVerdict::revise("Evaluator timed out before returning a verdict.");
            }
        };

        let verdict = verdict_or_revise(reply.content.as_deref().unwrap_or_default());
        info!(status = ?verdict.status, "Reviewer verdict");
        verdict
    }
}

//
// ================= Structural Checklist =================
//

/// One deterministic checklist item.
pub trait ChecklistRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn verify(&self, assessment: &Value) -> CheckResult;
}

pub struct CheckResult {
    pub passed: bool,
    pub details: String,
}

impl CheckResult {
    fn pass(details: impl Into<String>) -> Self {
        Self {
            passed: true,
            details: details.into(),
        }
    }

    fn fail(details: impl Into<String>) -> Self {
        Self {
            passed: false,
            details: details.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChecklistItem {
    pub rule_name: String,
    pub passed: bool,
    pub details: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChecklistReport {
    pub passed: bool,
    pub items: Vec<ChecklistItem>,
    pub issues: Vec<String>,
}

impl ChecklistReport {
    pub fn into_verdict(self) -> EvaluationVerdict {
        if self.passed {
            EvaluationVerdict::approved()
        } else {
            EvaluationVerdict::revise(self.issues.join(" "))
        }
    }
}

pub struct ChecklistEngine {
    rules: Vec<Box<dyn ChecklistRule>>,
}

impl ChecklistEngine {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Box<dyn ChecklistRule>) {
        self.rules.push(rule);
    }

    pub fn verify(&self, assessment: &Value) -> ChecklistReport {
        let mut items = Vec::with_capacity(self.rules.len());
        let mut issues = Vec::new();

        for rule in &self.rules {
            let result = rule.verify(assessment);
            if !result.passed {
                issues.push(format!("{}: {}", rule.name(), result.details));
            }
            items.push(ChecklistItem {
                rule_name: rule.name().to_string(),
                passed: result.passed,
                details: result.details,
            });
        }

        ChecklistReport {
            passed: issues.is_empty(),
            items,
            issues,
        }
    }

    /// Check free text; output that is not a JSON object fails outright.
    pub fn verify_text(&self, text: &str) -> ChecklistReport {
        match extract_structured(text).into_value() {
            Some(value) => self.verify(&value),
            None => ChecklistReport {
                passed: false,
                items: vec![ChecklistItem {
                    rule_name: "valid_json".to_string(),
                    passed: false,
                    details: "Output is not valid JSON".to_string(),
                }],
                issues: vec!["valid_json: Output is not valid JSON; return a single JSON object.".to_string()],
            },
        }
    }
}

impl Default for ChecklistEngine {
    fn default() -> Self {
        Self::new()
    }
}

const PILLARS: [&str; 3] = ["environmental", "social", "governance"];

fn score_of(assessment: &Value, field: &str) -> Option<f64> {
    match assessment.get(field)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn non_empty_str<'a>(assessment: &'a Value, field: &str) -> Option<&'a str> {
    assessment
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Rule: every pillar carries a 0-100 score and a rationale
pub struct PillarsScoredRule;

impl ChecklistRule for PillarsScoredRule {
    fn name(&self) -> &'static str {
        "pillars_scored"
    }

    fn verify(&self, assessment: &Value) -> CheckResult {
        let missing: Vec<&str> = PILLARS
            .iter()
            .copied()
            .filter(|pillar| {
                let score = score_of(assessment, &format!("{}_score", pillar));
                let rationale = non_empty_str(assessment, &format!("{}_rationale", pillar));
                !matches!(score, Some(s) if (0.0..=100.0).contains(&s)) || rationale.is_none()
            })
            .collect();

        if missing.is_empty() {
            CheckResult::pass("All pillars scored with rationale")
        } else {
            CheckResult::fail(format!(
                "Missing or out-of-range score/rationale for: {}.",
                missing.join(", ")
            ))
        }
    }
}

/// Rule: rationales cite figures from the evidence
pub struct EvidenceCitedRule;

impl ChecklistRule for EvidenceCitedRule {
    fn name(&self) -> &'static str {
        "evidence_cited"
    }

    fn verify(&self, assessment: &Value) -> CheckResult {
        let uncited: Vec<&str> = PILLARS
            .iter()
            .copied()
            .filter(|pillar| {
                non_empty_str(assessment, &format!("{}_rationale", pillar))
                    .map(|r| !r.chars().any(|c| c.is_ascii_digit()))
                    .unwrap_or(true)
            })
            .collect();

        if uncited.is_empty() {
            CheckResult::pass("Rationales cite figures")
        } else {
            CheckResult::fail(format!(
                "Rationale cites no figures for: {}.",
                uncited.join(", ")
            ))
        }
    }
}

/// Rule: SASB material topics listed
pub struct MaterialTopicsRule;

impl ChecklistRule for MaterialTopicsRule {
    fn name(&self) -> &'static str {
        "material_topics"
    }

    fn verify(&self, assessment: &Value) -> CheckResult {
        let count = assessment
            .get("sasb_material_topics")
            .and_then(Value::as_array)
            .map(|topics| topics.iter().filter(|t| t.as_str().is_some()).count())
            .unwrap_or(0);

        if count > 0 {
            CheckResult::pass(format!("{} material topics", count))
        } else {
            CheckResult::fail("No SASB material topics listed.")
        }
    }
}

/// Rule: controversies summarised with severity
pub struct ControversySeverityRule;

impl ChecklistRule for ControversySeverityRule {
    fn name(&self) -> &'static str {
        "controversy_severity"
    }

    fn verify(&self, assessment: &Value) -> CheckResult {
        let summary = match assessment.get("controversies_summary") {
            Some(Value::String(s)) => s.to_lowercase(),
            Some(other @ (Value::Array(_) | Value::Object(_))) => other.to_string().to_lowercase(),
            _ => return CheckResult::fail("No controversies summary."),
        };

        let states_severity = ["high", "medium", "low", "severity", "no controvers", "none"]
            .iter()
            .any(|word| summary.contains(word));

        if states_severity {
            CheckResult::pass("Controversies carry severity")
        } else {
            CheckResult::fail("Controversies summary does not state severity.")
        }
    }
}

/// Rule: peer comparison present
pub struct PeerComparisonRule;

impl ChecklistRule for PeerComparisonRule {
    fn name(&self) -> &'static str {
        "peer_comparison"
    }

    fn verify(&self, assessment: &Value) -> CheckResult {
        let present = match assessment.get("peer_comparison") {
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(Value::Object(map)) => !map.is_empty(),
            Some(Value::Array(items)) => !items.is_empty(),
            _ => false,
        };

        if present {
            CheckResult::pass("Peer comparison present")
        } else {
            CheckResult::fail("No peer comparison.")
        }
    }
}

/// Rule: composite score present
pub struct CompositePresentRule;

impl ChecklistRule for CompositePresentRule {
    fn name(&self) -> &'static str {
        "composite_present"
    }

    fn verify(&self, assessment: &Value) -> CheckResult {
        match score_of(assessment, "composite_score") {
            Some(score) => CheckResult::pass(format!("Composite {}", score)),
            None => CheckResult::fail("No composite score."),
        }
    }
}

/// Checklist engine with every structural rule
pub fn create_default_checklist() -> ChecklistEngine {
    let mut engine = ChecklistEngine::new();
    engine.add_rule(Box::new(PillarsScoredRule));
    engine.add_rule(Box::new(EvidenceCitedRule));
    engine.add_rule(Box::new(MaterialTopicsRule));
    engine.add_rule(Box::new(ControversySeverityRule));
    engine.add_rule(Box::new(PeerComparisonRule));
    engine.add_rule(Box::new(CompositePresentRule));
    engine
}

//
// ================= Tests =================
//
