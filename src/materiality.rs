//! Materiality resolution and E/S/G topic weighting
//!
//! A ticker is classified into an industry, the industry is looked up in the
//! SASB map through the tool registry, and the resulting topics are bucketed
//! into pillars by keyword. Topics matching no vocabulary are not counted.

use crate::error::OrchestrationError;
use crate::tools::{normalize_ticker, EsgTool, ToolRegistry};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub const UNKNOWN_INDUSTRY: &str = "Unknown";

/// Checked in this order; the first vocabulary that matches wins.
const ENVIRONMENTAL_TERMS: &[&str] = &[
    "ghg emissions",
    "emissions",
    "energy management",
    "water management",
    "wastewater",
    "air quality",
    "waste",
    "environmental",
];

const SOCIAL_TERMS: &[&str] = &[
    "employee engagement",
    "labor practices",
    "community relations",
    "customer privacy",
    "product quality",
    "product safety",
    "access to healthcare",
    "ethical marketing",
    "human rights",
    "workforce safety",
    "social",
];

const GOVERNANCE_TERMS: &[&str] = &[
    "data security",
    "business ethics",
    "systemic risk",
    "governance",
    "transparency",
    "privacy",
];

//
// ================= Industry Classification =================
//

/// External ticker → industry lookup.
#[async_trait]
pub trait IndustryClassifier: Send + Sync {
    async fn classify(&self, ticker: &str) -> Result<String>;
}

/// Fixed ticker → SASB industry table.
pub struct StaticIndustryClassifier {
    industries: HashMap<String, String>,
}

impl StaticIndustryClassifier {
    pub fn new() -> Self {
        let industries = [
            ("AAPL", "Technology"),
            ("MSFT", "Technology"),
            ("GOOG", "Technology"),
            ("AMZN", "Consumer Cyclical"),
            ("TSLA", "Consumer Cyclical"),
            ("JPM", "Financial Services"),
            ("XOM", "Oil & Gas"),
            ("JNJ", "Healthcare"),
        ]
        .into_iter()
        .map(|(t, i)| (t.to_string(), i.to_string()))
        .collect();

        Self { industries }
    }

    pub fn with_entry(mut self, ticker: &str, industry: &str) -> Self {
        self.industries
            .insert(normalize_ticker(ticker), industry.to_string());
        self
    }
}

impl Default for StaticIndustryClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IndustryClassifier for StaticIndustryClassifier {
    async fn classify(&self, ticker: &str) -> Result<String> {
        self.industries
            .get(&normalize_ticker(ticker))
            .cloned()
            .ok_or_else(|| {
                OrchestrationError::Classification(format!("no industry on record for {}", ticker))
            })
    }
}

//
// ================= Resolver =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Materiality {
    pub ticker: String,
    pub industry: String,
    pub material_topics: Vec<String>,
    #[serde(default)]
    pub sasb_industry: Option<String>,
    #[serde(default)]
    pub key_metrics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Materiality {
    pub fn unresolved(ticker: &str, reason: String) -> Self {
        Self {
            ticker: ticker.to_string(),
            industry: UNKNOWN_INDUSTRY.to_string(),
            material_topics: vec![format!("Error determining material topics: {}", reason)],
            sasb_industry: None,
            key_metrics: Vec::new(),
            error: Some(reason),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.error.is_none()
    }
}

pub struct MaterialityResolver {
    classifier: Arc<dyn IndustryClassifier>,
    registry: ToolRegistry,
}

impl MaterialityResolver {
    pub fn new(classifier: Arc<dyn IndustryClassifier>, registry: ToolRegistry) -> Self {
        Self {
            classifier,
            registry,
        }
    }

    /// Never fails: lookup problems come back as an `Unknown` industry with
    /// a topic list naming the error.
    pub async fn resolve(&self, ticker: &str) -> Materiality {
        let ticker = normalize_ticker(ticker);

        let industry = match self.classifier.classify(&ticker).await {
            Ok(industry) if !industry.trim().is_empty() && industry != UNKNOWN_INDUSTRY => industry,
            Ok(_) => {
                warn!(ticker = %ticker, "Industry classification returned no label");
                return Materiality::unresolved(&ticker, "industry classification unavailable".into());
            }
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "Industry classification failed");
                return Materiality::unresolved(&ticker, e.to_string());
            }
        };

        let lookup = self.registry.lookup(EsgTool::SasbMateriality, &industry);
        let topics = string_list(lookup.get("material_topics"));
        if topics.is_empty() {
            return Materiality::unresolved(
                &ticker,
                format!("no material topics returned for industry {}", industry),
            );
        }

        debug!(ticker = %ticker, industry = %industry, topics = topics.len(), "Materiality resolved");

        Materiality {
            ticker,
            industry,
            material_topics: topics,
            sasb_industry: lookup
                .get("sasb_industry")
                .and_then(Value::as_str)
                .map(str::to_string),
            key_metrics: string_list(lookup.get("key_metrics")),
            error: None,
        }
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

//
// ================= Categorisation & Weights =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Pillar {
    Environmental,
    Social,
    Governance,
}

pub fn classify_topic(topic: &str) -> Option<Pillar> {
    let lowered = topic.to_lowercase();
    let matches = |terms: &[&str]| terms.iter().any(|t| lowered.contains(t));

    if matches(ENVIRONMENTAL_TERMS) {
        Some(Pillar::Environmental)
    } else if matches(SOCIAL_TERMS) {
        Some(Pillar::Social)
    } else if matches(GOVERNANCE_TERMS) {
        Some(Pillar::Governance)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopicCounts {
    #[serde(rename = "E")]
    pub environmental: u32,
    #[serde(rename = "S")]
    pub social: u32,
    #[serde(rename = "G")]
    pub governance: u32,
}

impl TopicCounts {
    pub fn total(&self) -> u32 {
        self.environmental + self.social + self.governance
    }
}

pub fn categorize_topics<S: AsRef<str>>(topics: &[S]) -> TopicCounts {
    let mut counts = TopicCounts::default();
    for topic in topics {
        match classify_topic(topic.as_ref()) {
            Some(Pillar::Environmental) => counts.environmental += 1,
            Some(Pillar::Social) => counts.social += 1,
            Some(Pillar::Governance) => counts.governance += 1,
            None => debug!(topic = topic.as_ref(), "Topic matched no pillar vocabulary"),
        }
    }
    counts
}

/// Convex pillar weights derived from topic counts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TopicWeights {
    pub w_e: f64,
    pub w_s: f64,
    pub w_g: f64,
}

impl TopicWeights {
    pub fn equal() -> Self {
        Self {
            w_e: 1.0 / 3.0,
            w_s: 1.0 / 3.0,
            w_g: 1.0 / 3.0,
        }
    }

    pub fn from_counts(counts: &TopicCounts) -> Self {
        let total = counts.total();
        if total == 0 {
            return Self::equal();
        }

        let total = f64::from(total);
        Self {
            w_e: f64::from(counts.environmental) / total,
            w_s: f64::from(counts.social) / total,
            w_g: f64::from(counts.governance) / total,
        }
    }

    /// Two-decimal view for display.
    pub fn rounded(&self) -> Self {
        Self {
            w_e: round2(self.w_e),
            w_s: round2(self.w_s),
            w_g: round2(self.w_g),
        }
    }

    pub fn composite(&self, environmental: f64, social: f64, governance: f64) -> f64 {
        round2(self.w_e * environmental + self.w_s * social + self.w_g * governance)
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
