//! Score aggregation
//!
//! Pure: identical assessment + topic list always yield the identical record.
//! Parsing is defensive; missing or malformed fields fall back to neutral
//! placeholders instead of failing.

use crate::error::OrchestrationError;
use crate::extract::extract_structured;
use crate::materiality::{categorize_topics, round2, Materiality, TopicCounts, TopicWeights, UNKNOWN_INDUSTRY};
use crate::models::EvaluatorStatus;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

const NOT_PROVIDED: &str = "Not provided";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Recommendation {
    #[serde(rename = "Strong ESG")]
    StrongEsg,
    #[serde(rename = "Adequate ESG")]
    AdequateEsg,
    #[serde(rename = "ESG Concern")]
    EsgConcern,
    Unrated,
}

impl Recommendation {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "strong esg" => Recommendation::StrongEsg,
            "adequate esg" => Recommendation::AdequateEsg,
            "esg concern" => Recommendation::EsgConcern,
            _ => Recommendation::Unrated,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::StrongEsg => "Strong ESG",
            Recommendation::AdequateEsg => "Adequate ESG",
            Recommendation::EsgConcern => "ESG Concern",
            Recommendation::Unrated => "Unrated",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalised view of a candidate's verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assessment {
    pub company: String,
    pub ticker: String,
    pub industry: String,
    pub sasb_material_topics: Vec<String>,
    pub environmental_score: u32,
    pub environmental_rationale: String,
    pub social_score: u32,
    pub social_rationale: String,
    pub governance_score: u32,
    pub governance_rationale: String,
    /// As reported by the model; the aggregator recomputes its own.
    pub composite_score: Option<f64>,
    pub controversies_summary: String,
    pub peer_comparison: String,
    pub key_risks: Vec<String>,
    pub recommendation: Recommendation,
    /// False when the source text held no JSON object.
    pub structured: bool,
}

impl Assessment {
    /// All-default record for `ticker`.
    pub fn placeholder(ticker: &str) -> Self {
        Self {
            company: ticker.to_string(),
            ticker: ticker.to_string(),
            industry: UNKNOWN_INDUSTRY.to_string(),
            sasb_material_topics: Vec::new(),
            environmental_score: 0,
            environmental_rationale: NOT_PROVIDED.to_string(),
            social_score: 0,
            social_rationale: NOT_PROVIDED.to_string(),
            governance_score: 0,
            governance_rationale: NOT_PROVIDED.to_string(),
            composite_score: None,
            controversies_summary: NOT_PROVIDED.to_string(),
            peer_comparison: NOT_PROVIDED.to_string(),
            key_risks: Vec::new(),
            recommendation: Recommendation::Unrated,
            structured: false,
        }
    }

    /// Fails with `MalformedOutput` when the text holds no JSON object.
    pub fn parse(text: &str, ticker: &str) -> Result<Self> {
        extract_structured(text)
            .value()
            .map(|value| Self::from_value(value, ticker))
            .ok_or_else(|| {
                OrchestrationError::MalformedOutput(format!(
                    "no JSON assessment found for {}",
                    ticker
                ))
            })
    }

    /// Lenient parse: unstructured text becomes the placeholder.
    pub fn from_text(text: &str, ticker: &str) -> Self {
        Self::parse(text, ticker).unwrap_or_else(|_| Self::placeholder(ticker))
    }

    pub fn from_value(value: &Value, ticker: &str) -> Self {
        let ticker = text_field(value, "ticker").unwrap_or_else(|| ticker.to_string());

        Self {
            company: text_field(value, "company").unwrap_or_else(|| ticker.clone()),
            industry: text_field(value, "industry").unwrap_or_else(|| UNKNOWN_INDUSTRY.to_string()),
            sasb_material_topics: list_field(value, "sasb_material_topics"),
            environmental_score: score_field(value, "environmental_score"),
            environmental_rationale: text_or_placeholder(value, "environmental_rationale"),
            social_score: score_field(value, "social_score"),
            social_rationale: text_or_placeholder(value, "social_rationale"),
            governance_score: score_field(value, "governance_score"),
            governance_rationale: text_or_placeholder(value, "governance_rationale"),
            composite_score: number(value.get("composite_score")),
            controversies_summary: text_or_placeholder(value, "controversies_summary"),
            peer_comparison: text_or_placeholder(value, "peer_comparison"),
            key_risks: list_field(value, "key_risks"),
            recommendation: text_field(value, "recommendation")
                .map(|r| Recommendation::parse(&r))
                .unwrap_or(Recommendation::Unrated),
            structured: true,
            ticker,
        }
    }
}

fn number(value: Option<&Value>) -> Option<f64> {
    let parsed: Option<f64> = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|n| n.is_finite())
}

/// 0-100 integer; anything missing or unparseable is 0.
fn score_field(value: &Value, field: &str) -> u32 {
    number(value.get(field))
        .map(|n| n.round().clamp(0.0, 100.0) as u32)
        .unwrap_or(0)
}

/// Strings pass through; structured values are kept as compact JSON.
fn text_field(value: &Value, field: &str) -> Option<String> {
    match value.get(field)? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.trim().to_string()),
        other => Some(other.to_string()),
    }
}

fn text_or_placeholder(value: &Value, field: &str) -> String {
    text_field(value, field).unwrap_or_else(|| NOT_PROVIDED.to_string())
}

fn list_field(value: &Value, field: &str) -> Vec<String> {
    match value.get(field) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Normalised per-ticker scores with the weights behind the composite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreRecord {
    pub ticker: String,
    pub company: String,
    pub industry: String,
    pub environmental: f64,
    pub social: f64,
    pub governance: f64,
    pub composite: f64,
    pub weights: TopicWeights,
    pub topic_counts: TopicCounts,
    pub material_topics: Vec<String>,
    pub recommendation: Recommendation,
    pub status: EvaluatorStatus,
}

impl ScoreRecord {
    /// Scores only count downstream for final statuses.
    pub fn is_usable(&self) -> bool {
        self.status.is_final()
    }
}

/// Topic list used for weighting: the resolver's, unless it flagged an error.
pub fn weighting_topics<'a>(assessment: &'a Assessment, materiality: &'a Materiality) -> &'a [String] {
    if materiality.is_resolved() {
        &materiality.material_topics
    } else {
        &assessment.sasb_material_topics
    }
}

/// Fold pillar scores into the composite using topic-derived weights.
///
/// Non-final statuses are reported with zeroed scores.
pub fn aggregate(assessment: &Assessment, materiality: &Materiality, status: EvaluatorStatus) -> ScoreRecord {
    let topics = weighting_topics(assessment, materiality);
    let counts = categorize_topics(topics);
    let weights = TopicWeights::from_counts(&counts);

    let (environmental, social, governance) = if status.is_final() {
        (
            f64::from(assessment.environmental_score),
            f64::from(assessment.social_score),
            f64::from(assessment.governance_score),
        )
    } else {
        (0.0, 0.0, 0.0)
    };

    let industry = if materiality.is_resolved() {
        materiality.industry.clone()
    } else {
        assessment.industry.clone()
    };

    ScoreRecord {
        ticker: materiality.ticker.clone(),
        company: assessment.company.clone(),
        industry,
        environmental,
        social,
        governance,
        composite: weights.composite(environmental, social, governance),
        weights: weights.rounded(),
        topic_counts: counts,
        material_topics: topics.to_vec(),
        recommendation: if status.is_final() {
            assessment.recommendation
        } else {
            Recommendation::Unrated
        },
        status,
    }
}

/// Mean of a series, two decimals; `None` when empty.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(round2(values.iter().sum::<f64>() / values.len() as f64))
}
