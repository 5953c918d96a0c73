//! ESG Materiality Agent
//!
//! Orchestration core for AI-assisted ESG assessments:
//! - Tool-calling generation loop over a closed set of ESG data tools
//! - Independent reviewer with a fail-closed checklist verdict
//! - Evaluator-Optimizer loop with bounded revisions
//! - Materiality-weighted composite scoring (SASB topics)
//! - Concurrent portfolio runs and consistency sampling
//! - Auditable traces of every tool call and verdict
//!
//! UNIFIED LOOP:
//! TICKER → GENERATE (tools) → REVIEW → REVISE? → SCORE → AUDIT

pub mod agent;
pub mod api;
pub mod audit;
pub mod config;
pub mod consistency;
pub mod error;
pub mod execution;
pub mod extract;
pub mod llm;
pub mod materiality;
pub mod models;
pub mod orchestrator;
pub mod portfolio;
pub mod scoring;
pub mod tools;
pub mod verification;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use config::AppConfig;
pub use orchestrator::{EvaluatorOptimizer, OptimizationResult};
pub use portfolio::{AssessmentPipeline, PortfolioResult, TickerResult};
