//! Simulated ESG datasets backing the lookup tools
//!
//! Read-only after load; one instance is shared by every concurrent run.

use crate::Result;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

const BUNDLED_DATASET: &str = include_str!("../../data/esg_dataset.json");

lazy_static! {
    static ref BUILTIN: Arc<EsgDataset> = Arc::new(EsgDataset::from_json(BUNDLED_DATASET).unwrap_or_else(|e| {
        error!(error = %e, "Bundled ESG dataset is invalid; tools will report no data");
        EsgDataset::default()
    }));
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Heat-map weight (Low=1, Medium=2, High=3).
    pub fn weight(&self) -> u8 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
        }
    }
}

/// One controversy record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Controversy {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    pub description: String,
    pub period: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EsgDataset {
    #[serde(default)]
    pub environmental: HashMap<String, Value>,
    #[serde(default)]
    pub controversies: HashMap<String, Vec<Controversy>>,
    #[serde(default)]
    pub governance: HashMap<String, Value>,
    #[serde(default)]
    pub materiality: HashMap<String, Value>,
    #[serde(default)]
    pub materiality_default: Value,
    #[serde(default)]
    pub peers: HashMap<String, Value>,
}

impl EsgDataset {
    /// The datasets compiled into the binary.
    pub fn builtin() -> Arc<Self> {
        BUILTIN.clone()
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn environmental_metrics(&self, ticker: &str) -> Value {
        self.environmental
            .get(ticker)
            .cloned()
            .unwrap_or_else(|| not_available("Environmental data not available for this ticker."))
    }

    pub fn controversies_for(&self, ticker: &str) -> Option<&[Controversy]> {
        self.controversies.get(ticker).map(Vec::as_slice)
    }

    pub fn controversies(&self, ticker: &str) -> Value {
        match self.controversies_for(ticker) {
            Some(records) => serde_json::to_value(records)
                .unwrap_or_else(|_| not_available("Controversy data could not be encoded.")),
            None => not_available("Controversy data not available for this ticker."),
        }
    }

    pub fn governance(&self, ticker: &str) -> Value {
        self.governance
            .get(ticker)
            .cloned()
            .unwrap_or_else(|| not_available("Governance data not available for this ticker."))
    }

    /// SASB topics for an industry; unmapped industries get the general set.
    pub fn materiality(&self, industry: &str) -> Value {
        let (entry, note) = match self.materiality.get(industry) {
            Some(entry) => (entry.clone(), None),
            None => (
                self.materiality_default.clone(),
                Some("No industry-specific SASB mapping available; using general topics."),
            ),
        };

        let mut out = Map::new();
        out.insert("industry".to_string(), json!(industry));
        if let Value::Object(fields) = entry {
            out.extend(fields);
        }
        if let Some(note) = note {
            out.insert("note".to_string(), json!(note));
        }
        Value::Object(out)
    }

    pub fn peers(&self, ticker: &str) -> Value {
        self.peers
            .get(ticker)
            .cloned()
            .unwrap_or_else(|| not_available("Peer comparison data not available."))
    }
}

fn not_available(note: &str) -> Value {
    json!({ "note": note, "available": false })
}

/// True when a tool result is the explicit "no data" marker.
pub fn is_not_available(value: &Value) -> bool {
    value.get("available").and_then(Value::as_bool) == Some(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_dataset_loads() {
        let dataset = EsgDataset::builtin();
        for ticker in ["AAPL", "MSFT", "XOM", "JPM", "JNJ"] {
            assert!(dataset.environmental.contains_key(ticker));
            assert!(dataset.governance.contains_key(ticker));
            assert!(dataset.peers.contains_key(ticker));
            assert!(dataset.controversies_for(ticker).is_some());
        }
        assert_eq!(dataset.materiality.len(), 5);
    }

    #[test]
    fn test_xom_controversies_are_typed() {
        let dataset = EsgDataset::builtin();
        let records = dataset.controversies_for("XOM").unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].severity, Severity::High);
        assert_eq!(records[0].kind, "Environmental");
        assert_eq!(records[0].period, "2024-ongoing");
        assert!(records[0].details.contains_key("status"));
    }

    #[test]
    fn test_unknown_identifiers_return_marker() {
        let dataset = EsgDataset::builtin();
        assert!(is_not_available(&dataset.environmental_metrics("ZZZZ")));
        assert!(is_not_available(&dataset.controversies("ZZZZ")));
        assert!(is_not_available(&dataset.governance("ZZZZ")));
        assert!(is_not_available(&dataset.peers("ZZZZ")));
        assert!(!is_not_available(&dataset.environmental_metrics("AAPL")));
    }

    #[test]
    fn test_unmapped_industry_falls_back_to_general() {
        let dataset = EsgDataset::builtin();
        let value = dataset.materiality("Aerospace");
        assert_eq!(value["industry"], "Aerospace");
        assert_eq!(value["sasb_industry"], "General");
        assert!(value.get("note").is_some());

        let oil = dataset.materiality("Oil & Gas");
        assert!(oil.get("note").is_none());
        assert!(oil["material_topics"]
            .as_array()
            .unwrap()
            .iter()
            .any(|t| t == "GHG Emissions"));
    }

    #[test]
    fn test_severity_weights() {
        assert_eq!(Severity::Low.weight(), 1);
        assert_eq!(Severity::Medium.weight(), 2);
        assert_eq!(Severity::High.weight(), 3);
    }
}
