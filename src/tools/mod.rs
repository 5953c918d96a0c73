//! Tool enum and registry
//!
//! Tools are deterministic, side-effect-free lookups over the simulated
//! datasets. The set is closed: a name the model invents never resolves.

pub mod dataset;

pub use dataset::{Controversy, EsgDataset, Severity};

use crate::error::OrchestrationError;
use crate::models::{ToolCall, ToolResult};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// The lookups the generation agent may call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EsgTool {
    EnvironmentalMetrics,
    Controversies,
    GovernanceData,
    SasbMateriality,
    PeerEsgScores,
}

impl EsgTool {
    pub const ALL: [EsgTool; 5] = [
        EsgTool::EnvironmentalMetrics,
        EsgTool::Controversies,
        EsgTool::GovernanceData,
        EsgTool::SasbMateriality,
        EsgTool::PeerEsgScores,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EsgTool::EnvironmentalMetrics => "get_environmental_metrics",
            EsgTool::Controversies => "scan_controversies",
            EsgTool::GovernanceData => "get_governance_data",
            EsgTool::SasbMateriality => "get_sasb_materiality",
            EsgTool::PeerEsgScores => "get_peer_esg_scores",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            EsgTool::EnvironmentalMetrics => {
                "Retrieve environmental data (emissions, energy, water, climate targets) for a company ticker."
            }
            EsgTool::Controversies => {
                "Search recent ESG controversies and incidents, with type, severity and period, for a company ticker."
            }
            EsgTool::GovernanceData => {
                "Retrieve corporate governance metrics (board independence, diversity, pay, policies) for a company ticker."
            }
            EsgTool::SasbMateriality => {
                "Get the SASB material ESG topics for an industry. Guides the materiality-driven analysis."
            }
            EsgTool::PeerEsgScores => {
                "Compare a company's ESG metrics with its sector peers, by ticker."
            }
        }
    }

    /// Name of the single argument the tool takes.
    pub fn argument(&self) -> &'static str {
        match self {
            EsgTool::SasbMateriality => "industry",
            _ => "ticker",
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        let argument = self.argument();
        let argument_doc = match self {
            EsgTool::SasbMateriality => "The industry to retrieve material ESG topics for.",
            _ => "The ticker symbol of the company.",
        };

        ToolDefinition {
            tool_type: "function",
            function: FunctionDefinition {
                name: self.name(),
                description: self.description(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        argument: {
                            "type": "string",
                            "description": argument_doc
                        }
                    },
                    "required": [argument]
                }),
            },
        }
    }
}

/// Tool schema declared to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: &'static str,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

/// Registry for looking up and executing tools
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    dataset: Arc<EsgDataset>,
}

impl ToolRegistry {
    pub fn new(dataset: Arc<EsgDataset>) -> Self {
        Self { dataset }
    }

    /// Registry over the bundled datasets.
    pub fn builtin() -> Self {
        Self::new(EsgDataset::builtin())
    }

    pub fn dataset(&self) -> &EsgDataset {
        &self.dataset
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        EsgTool::ALL.iter().map(EsgTool::definition).collect()
    }

    /// Total over identifiers: unknown ones yield a "not available" marker.
    pub fn lookup(&self, tool: EsgTool, identifier: &str) -> Value {
        match tool {
            EsgTool::EnvironmentalMetrics => self.dataset.environmental_metrics(&normalize_ticker(identifier)),
            EsgTool::Controversies => self.dataset.controversies(&normalize_ticker(identifier)),
            EsgTool::GovernanceData => self.dataset.governance(&normalize_ticker(identifier)),
            EsgTool::SasbMateriality => self.dataset.materiality(identifier.trim()),
            EsgTool::PeerEsgScores => self.dataset.peers(&normalize_ticker(identifier)),
        }
    }

    /// Resolve a model-issued call to a tool and run it.
    pub fn dispatch(&self, call: &ToolCall) -> Result<ToolResult> {
        let tool = EsgTool::from_name(&call.name)
            .ok_or_else(|| OrchestrationError::UnknownTool(call.name.clone()))?;
        let identifier = require_argument(tool, &call.arguments)?;

        Ok(ToolResult {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            content: self.lookup(tool, &identifier),
            is_error: false,
        })
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

pub fn normalize_ticker(ticker: &str) -> String {
    ticker.trim().to_uppercase()
}

fn require_argument(tool: EsgTool, arguments: &Value) -> Result<String> {
    let name = tool.argument();
    let value = match arguments {
        // A bare identifier; text that looks like JSON is a malformed argument object
        Value::String(s) if !looks_like_json(s) => Some(s.as_str()),
        Value::Object(map) => map.get(name).and_then(Value::as_str),
        _ => None,
    };

    value
        .map(|s| s.to_string())
        .ok_or_else(|| {
            OrchestrationError::InvalidToolInput(format!(
                "{} expects a string '{}' argument",
                tool.name(),
                name
            ))
        })
}

fn looks_like_json(s: &str) -> bool {
    matches!(s.trim_start().chars().next(), Some('{' | '[' | '"'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    #[test]
    fn test_names_round_trip() {
        for tool in EsgTool::ALL {
            assert_eq!(EsgTool::from_name(tool.name()), Some(tool));
        }
        assert_eq!(EsgTool::from_name("get_stock_price"), None);
    }

    #[test]
    fn test_dispatch_is_idempotent() {
        let registry = ToolRegistry::builtin();
        let known = [
            ("AAPL", "Technology"),
            ("MSFT", "Technology"),
            ("XOM", "Oil & Gas"),
            ("JPM", "Financial Services"),
            ("JNJ", "Healthcare"),
        ];
        for (ticker, industry) in known {
            for tool in EsgTool::ALL {
                let arg = if tool == EsgTool::SasbMateriality { industry } else { ticker };
                let c = call(tool.name(), json!({ tool.argument(): arg }));
                let first = registry.dispatch(&c).unwrap();
                let second = registry.dispatch(&c).unwrap();
                assert_eq!(
                    serde_json::to_vec(&first.content).unwrap(),
                    serde_json::to_vec(&second.content).unwrap(),
                    "{} on {}",
                    tool.name(),
                    ticker
                );
            }
        }
    }

    #[test]
    fn test_truncated_argument_text_is_invalid_input() {
        let registry = ToolRegistry::builtin();
        let err = registry
            .dispatch(&call("get_environmental_metrics", json!("{\"ticker\": \"XOM\"")))
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidToolInput(_)));

        let err = registry
            .dispatch(&call("get_environmental_metrics", Value::Null))
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidToolInput(_)));
    }

    #[test]
    fn test_unknown_tool_is_rejected() {
        let registry = ToolRegistry::builtin();
        let err = registry
            .dispatch(&call("get_weather", json!({"ticker": "AAPL"})))
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::UnknownTool(name) if name == "get_weather"));
    }

    #[test]
    fn test_missing_argument_is_invalid_input() {
        let registry = ToolRegistry::builtin();
        let err = registry
            .dispatch(&call("scan_controversies", json!({"symbol": "AAPL"})))
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidToolInput(_)));
    }

    #[test]
    fn test_ticker_is_normalized() {
        let registry = ToolRegistry::builtin();
        let result = registry
            .dispatch(&call("get_governance_data", json!({"ticker": " aapl "})))
            .unwrap();
        assert_eq!(result.content["board_size"], 8);
        assert!(!result.is_error);
    }

    #[test]
    fn test_unknown_ticker_does_not_fail() {
        let registry = ToolRegistry::builtin();
        let result = registry
            .dispatch(&call("get_peer_esg_scores", json!("NOPE")))
            .unwrap();
        assert!(dataset::is_not_available(&result.content));
    }

    #[test]
    fn test_definitions_serialize_as_functions() {
        let registry = ToolRegistry::builtin();
        let defs = registry.definitions();
        assert_eq!(defs.len(), 5);

        let json = serde_json::to_value(&defs[3]).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "get_sasb_materiality");
        assert_eq!(json["function"]["parameters"]["required"][0], "industry");
    }
}
