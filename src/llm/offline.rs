//! Deterministic analyst for running without model credentials
//!
//! Generator role: first turn requests every tool, second turn scores the
//! evidence with fixed heuristics and answers in the rubric's JSON shape.
//! Reviewer role: applies the structural checklist.

use super::{ChatModel, ModelReply, ModelRequest};
use crate::agent::requested_ticker;
use crate::error::OrchestrationError;
use crate::materiality::{categorize_topics, IndustryClassifier, StaticIndustryClassifier, TopicWeights, UNKNOWN_INDUSTRY};
use crate::models::{ChatMessage, Role, ToolCall};
use crate::tools::dataset::is_not_available;
use crate::tools::{Controversy, EsgTool, Severity};
use crate::verification::{create_default_checklist, ChecklistEngine, ASSESSMENT_HEADER};
use crate::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub struct OfflineAnalyst {
    classifier: Arc<dyn IndustryClassifier>,
    checklist: ChecklistEngine,
}

impl OfflineAnalyst {
    pub fn new(classifier: Arc<dyn IndustryClassifier>) -> Self {
        Self {
            classifier,
            checklist: create_default_checklist(),
        }
    }

    fn review(&self, messages: &[ChatMessage]) -> Result<ModelReply> {
        let text = last_user_text(messages)
            .and_then(|t| t.strip_prefix(ASSESSMENT_HEADER))
            .ok_or_else(|| {
                OrchestrationError::TransportFailure(
                    "offline analyst received a review request without an assessment".to_string(),
                )
            })?;

        let verdict = self.checklist.verify_text(text.trim()).into_verdict();
        Ok(ModelReply::text(serde_json::to_string(&verdict)?))
    }

    async fn request_tools(&self, ticker: &str) -> ModelReply {
        let industry = self
            .classifier
            .classify(ticker)
            .await
            .unwrap_or_else(|_| UNKNOWN_INDUSTRY.to_string());

        let calls = EsgTool::ALL
            .iter()
            .enumerate()
            .map(|(i, tool)| {
                let identifier = match tool {
                    EsgTool::SasbMateriality => industry.as_str(),
                    _ => ticker,
                };
                ToolCall {
                    id: format!("offline_{}", i),
                    name: tool.name().to_string(),
                    arguments: json!({ tool.argument(): identifier }),
                }
            })
            .collect();

        ModelReply::with_tool_calls(calls)
    }
}

impl Default for OfflineAnalyst {
    fn default() -> Self {
        Self::new(Arc::new(StaticIndustryClassifier::new()))
    }
}

#[async_trait]
impl ChatModel for OfflineAnalyst {
    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelReply> {
        if request.tools.is_empty() {
            return self.review(request.messages);
        }

        let ticker = request
            .messages
            .iter()
            .find(|m| m.role == Role::User)
            .and_then(|m| m.content.as_deref())
            .and_then(requested_ticker)
            .ok_or_else(|| {
                OrchestrationError::TransportFailure(
                    "offline analyst could not find a ticker in the request".to_string(),
                )
            })?;

        let evidence = Evidence::collect(request.messages);
        if evidence.is_empty() {
            debug!(ticker, "Offline analyst requesting tools");
            return Ok(self.request_tools(ticker).await);
        }

        let assessment = evidence.assess(ticker);
        let body = serde_json::to_string_pretty(&assessment)?;
        Ok(ModelReply::text(format!("```json\n{}\n```", body)))
    }
}

fn last_user_text(messages: &[ChatMessage]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .and_then(|m| m.content.as_deref())
}

/// Tool results found in the conversation, keyed by tool.
struct Evidence {
    results: HashMap<EsgTool, Value>,
}

impl Evidence {
    fn collect(messages: &[ChatMessage]) -> Self {
        let names: HashMap<&str, &str> = messages
            .iter()
            .flat_map(|m| m.tool_calls.iter())
            .map(|c| (c.id.as_str(), c.name.as_str()))
            .collect();

        let results = messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| {
                let name = names.get(m.tool_call_id.as_deref()?)?;
                let tool = EsgTool::from_name(name)?;
                let value = serde_json::from_str(m.content.as_deref()?).ok()?;
                Some((tool, value))
            })
            .collect();

        Self { results }
    }

    fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    fn get(&self, tool: EsgTool) -> Option<&Value> {
        self.results.get(&tool).filter(|v| !is_not_available(v))
    }

    fn controversies(&self) -> Vec<Controversy> {
        self.get(EsgTool::Controversies)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    fn assess(&self, ticker: &str) -> Value {
        let controversies = self.controversies();
        let topics: Vec<String> = self
            .get(EsgTool::SasbMateriality)
            .and_then(|v| v.get("material_topics"))
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        let industry = self
            .get(EsgTool::SasbMateriality)
            .and_then(|v| v.get("industry"))
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN_INDUSTRY);

        let (environmental, environmental_rationale) =
            environmental_score(self.get(EsgTool::EnvironmentalMetrics), &controversies);
        let (social, social_rationale) = social_score(&controversies);
        let (governance, governance_rationale) =
            governance_score(self.get(EsgTool::GovernanceData), &controversies);

        let composite = TopicWeights::from_counts(&categorize_topics(&topics)).composite(
            f64::from(environmental),
            f64::from(social),
            f64::from(governance),
        );

        let recommendation = if composite >= 70.0 {
            "Strong ESG"
        } else if composite >= 50.0 {
            "Adequate ESG"
        } else {
            "ESG Concern"
        };

        json!({
            "company": ticker,
            "ticker": ticker,
            "industry": industry,
            "sasb_material_topics": topics,
            "environmental_score": environmental,
            "environmental_rationale": environmental_rationale,
            "social_score": social,
            "social_rationale": social_rationale,
            "governance_score": governance,
            "governance_rationale": governance_rationale,
            "composite_score": composite,
            "controversies_summary": controversy_summary(self.results.contains_key(&EsgTool::Controversies), &controversies),
            "peer_comparison": peer_comparison(self.get(EsgTool::PeerEsgScores)),
            "key_risks": key_risks(&controversies, self.get(EsgTool::GovernanceData)),
            "recommendation": recommendation,
        })
    }
}

fn penalty(controversies: &[Controversy], kind: &str, high: f64, medium: f64, low: f64) -> (f64, usize) {
    let matching: Vec<&Controversy> = controversies
        .iter()
        .filter(|c| c.kind.eq_ignore_ascii_case(kind))
        .collect();
    let total = matching
        .iter()
        .map(|c| match c.severity {
            Severity::High => high,
            Severity::Medium => medium,
            Severity::Low => low,
        })
        .sum();
    (total, matching.len())
}

fn to_score(raw: f64) -> u32 {
    raw.round().clamp(0.0, 100.0) as u32
}

fn number(value: &Value, field: &str) -> Option<f64> {
    value.get(field).and_then(Value::as_f64)
}

fn environmental_score(data: Option<&Value>, controversies: &[Controversy]) -> (u32, String) {
    let (deduction, incidents) = penalty(controversies, "Environmental", 12.0, 6.0, 2.0);
    let Some(data) = data else {
        return (
            to_score(50.0 - deduction),
            format!(
                "Environmental data unavailable; neutral 50 less {} for {} environmental controversies.",
                deduction, incidents
            ),
        );
    };

    let renewable = number(data, "renewable_energy_pct").unwrap_or(0.0);
    let yoy = number(data, "yoy_emissions_change_pct").unwrap_or(0.0);
    let science_based = data
        .get("science_based_targets")
        .and_then(Value::as_str)
        .map(|s| s.trim_start().to_lowercase().starts_with("yes"))
        .unwrap_or(false);

    let raw = 45.0
        + renewable * 0.3
        + if science_based { 10.0 } else { 0.0 }
        + if yoy < 0.0 { (-yoy).min(10.0) } else { 0.0 }
        - deduction;

    (
        to_score(raw),
        format!(
            "Renewable energy {}%, emissions change {}% year on year, science-based targets: {}; {} environmental controversies.",
            renewable,
            yoy,
            if science_based { "yes" } else { "no" },
            incidents
        ),
    )
}

fn social_score(controversies: &[Controversy]) -> (u32, String) {
    let (deduction, incidents) = penalty(controversies, "Social", 20.0, 10.0, 4.0);
    (
        to_score(80.0 - deduction),
        format!(
            "{} social controversies on record, deducting {} points from a baseline of 80.",
            incidents, deduction
        ),
    )
}

fn governance_score(data: Option<&Value>, controversies: &[Controversy]) -> (u32, String) {
    let (deduction, incidents) = penalty(controversies, "Governance", 12.0, 6.0, 2.0);
    let Some(data) = data else {
        return (
            to_score(50.0 - deduction),
            format!(
                "Governance data unavailable; neutral 50 less {} for {} governance controversies.",
                deduction, incidents
            ),
        );
    };

    let independence = number(data, "pct_independent").unwrap_or(0.0);
    let diversity = number(data, "board_diversity_pct").unwrap_or(0.0);
    let separate_chair = data.get("ceo_chair_separate").and_then(Value::as_bool).unwrap_or(false);
    let clawback = data.get("clawback_policy").and_then(Value::as_bool).unwrap_or(false);

    let raw = 20.0
        + independence * 0.4
        + diversity * 0.2
        + if separate_chair { 5.0 } else { 0.0 }
        + if clawback { 5.0 } else { 0.0 }
        - deduction;

    (
        to_score(raw),
        format!(
            "Board {}% independent, {}% diverse, CEO/chair {}, clawback policy {}; {} governance controversies.",
            independence,
            diversity,
            if separate_chair { "separate" } else { "combined" },
            if clawback { "in place" } else { "absent" },
            incidents
        ),
    )
}

fn controversy_summary(available: bool, controversies: &[Controversy]) -> String {
    if controversies.is_empty() {
        return if available {
            "No controversies on record.".to_string()
        } else {
            "No controversy data available.".to_string()
        };
    }

    controversies
        .iter()
        .map(|c| format!("{} ({:?} severity, {}): {}", c.kind, c.severity, c.period, c.description))
        .collect::<Vec<_>>()
        .join("; ")
}

fn peer_comparison(peers: Option<&Value>) -> String {
    let Some(peers) = peers else {
        return "No peer data available for comparison.".to_string();
    };

    let performance = peers.get("peer_performance").and_then(Value::as_str);
    let ranking = peers.get("esg_ranking").and_then(Value::as_str);
    match (performance, ranking) {
        (Some(p), Some(r)) => format!("{}. {}.", p, r),
        (Some(p), None) => p.to_string(),
        (None, Some(r)) => r.to_string(),
        (None, None) => "Peer data present but without a summary.".to_string(),
    }
}

fn key_risks(controversies: &[Controversy], governance: Option<&Value>) -> Vec<String> {
    let mut risks: Vec<String> = controversies
        .iter()
        .filter(|c| c.severity >= Severity::Medium)
        .map(|c| c.description.clone())
        .collect();

    if let Some(concern) = governance
        .and_then(|g| g.get("recent_governance_concerns"))
        .and_then(Value::as_str)
    {
        risks.push(concern.to_string());
    }
    risks
}
