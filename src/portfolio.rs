//! Per-ticker pipeline and portfolio-wide runs
//!
//! Tickers are independent: each runs in its own task, up to a concurrency
//! limit, and a failure (even a panic) in one never aborts the others.

use crate::audit::{AuditLog, AuditRecord};
use crate::config::AppConfig;
use crate::llm::{ChatModel, OfflineAnalyst, OpenAiClient};
use crate::materiality::{IndustryClassifier, Materiality, MaterialityResolver, StaticIndustryClassifier};
use crate::models::{EvaluatorStatus, Trace};
use crate::orchestrator::EvaluatorOptimizer;
use crate::scoring::{aggregate, Assessment, ScoreRecord};
use crate::tools::{normalize_ticker, ToolRegistry};
use crate::Result;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Completed run for one ticker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerResult {
    pub ticker: String,
    pub status: EvaluatorStatus,
    pub revisions: u32,
    pub iterations: u32,
    pub assessment: Assessment,
    /// Final text as produced by the generator.
    pub assessment_text: String,
    pub materiality: Materiality,
    pub score: ScoreRecord,
    pub trace: Trace,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_id: Option<Uuid>,
}

impl TickerResult {
    /// Result for a ticker whose task never produced a run.
    pub fn failed(ticker: &str, message: String) -> Self {
        let ticker = normalize_ticker(ticker);
        let materiality = Materiality::unresolved(&ticker, message.clone());
        let assessment = Assessment::placeholder(&ticker);
        let score = aggregate(&assessment, &materiality, EvaluatorStatus::Failed);

        Self {
            status: EvaluatorStatus::Failed,
            revisions: 0,
            iterations: 0,
            assessment,
            assessment_text: String::new(),
            materiality,
            score,
            trace: Trace::new(),
            error: Some(message),
            audit_id: None,
            ticker,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.status.is_final()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioResult {
    pub results: BTreeMap<String, TickerResult>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PortfolioResult {
    pub fn new() -> Self {
        Self {
            results: BTreeMap::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn insert(&mut self, result: TickerResult) {
        self.results.insert(result.ticker.clone(), result);
    }

    pub fn get(&self, ticker: &str) -> Option<&TickerResult> {
        self.results.get(&normalize_ticker(ticker))
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Usable scores, best composite first.
    pub fn ranking(&self) -> Vec<&ScoreRecord> {
        let mut ranked: Vec<&ScoreRecord> = self
            .results
            .values()
            .filter(|r| r.is_usable())
            .map(|r| &r.score)
            .collect();
        ranked.sort_by(|a, b| b.composite.total_cmp(&a.composite).then_with(|| a.ticker.cmp(&b.ticker)));
        ranked
    }

    pub fn failures(&self) -> Vec<&TickerResult> {
        self.results.values().filter(|r| !r.is_usable()).collect()
    }

    pub fn status_counts(&self) -> BTreeMap<EvaluatorStatus, usize> {
        let mut counts = BTreeMap::new();
        for result in self.results.values() {
            *counts.entry(result.status).or_insert(0) += 1;
        }
        counts
    }
}

impl Default for PortfolioResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluator-optimizer + materiality + aggregation for one ticker.
#[derive(Clone)]
pub struct AssessmentPipeline {
    optimizer: Arc<EvaluatorOptimizer>,
    resolver: Arc<MaterialityResolver>,
    registry: ToolRegistry,
    audit: Option<Arc<AuditLog>>,
    max_revisions: u32,
}

impl AssessmentPipeline {
    pub fn new(
        optimizer: EvaluatorOptimizer,
        resolver: MaterialityResolver,
        registry: ToolRegistry,
        max_revisions: u32,
    ) -> Self {
        Self {
            optimizer: Arc::new(optimizer),
            resolver: Arc::new(resolver),
            registry,
            audit: None,
            max_revisions,
        }
    }

    /// Wire the pipeline from configuration. Without an API key, or with
    /// `offline` set, both roles use the deterministic offline analyst.
    pub fn from_config(config: &AppConfig, offline: bool) -> Result<Self> {
        let registry = ToolRegistry::builtin();
        let classifier: Arc<dyn IndustryClassifier> = Arc::new(StaticIndustryClassifier::new());

        let (generator, reviewer): (Arc<dyn ChatModel>, Arc<dyn ChatModel>) =
            if offline || !config.has_api_key() {
                info!("Using offline analyst for generation and review");
                let analyst = Arc::new(OfflineAnalyst::new(classifier.clone()));
                (analyst.clone(), analyst)
            } else {
                info!(model = %config.model, base_url = %config.base_url, "Using chat-completions endpoint");
                let client = Arc::new(OpenAiClient::from_config(config)?);
                (client.clone(), client)
            };

        let optimizer = EvaluatorOptimizer::from_config(generator, reviewer, registry.clone(), config);
        let resolver = MaterialityResolver::new(classifier, registry.clone());
        Ok(Self::new(optimizer, resolver, registry, config.max_revisions))
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_max_revisions(mut self, max_revisions: u32) -> Self {
        self.max_revisions = max_revisions;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> &MaterialityResolver {
        &self.resolver
    }

    /// Full pipeline for one ticker; never fails.
    pub async fn assess(&self, ticker: &str, cancel: &CancellationToken) -> TickerResult {
        let ticker = normalize_ticker(ticker);

        let (materiality, run) = tokio::join!(
            self.resolver.resolve(&ticker),
            self.optimizer.run(&ticker, self.max_revisions, cancel)
        );

        let assessment = Assessment::from_text(&run.assessment, &ticker);
        let score = aggregate(&assessment, &materiality, run.status);

        let error = match run.status {
            EvaluatorStatus::Approved | EvaluatorStatus::MaxRevisionsReached => None,
            EvaluatorStatus::Failed => Some(run.assessment.clone()),
            EvaluatorStatus::FailedRevision => Some(
                run.trace
                    .error_message()
                    .map(|m| format!("Regeneration failed: {}", m))
                    .unwrap_or_else(|| "Regeneration failed".to_string()),
            ),
            EvaluatorStatus::Cancelled => Some("Run cancelled".to_string()),
        };

        let audit_id = match &self.audit {
            Some(audit) => match audit.record(AuditRecord::from_run(&run, score.composite)).await {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(ticker = %ticker, error = %e, "Failed to record audit entry");
                    None
                }
            },
            None => None,
        };

        info!(
            ticker = %ticker,
            status = %run.status,
            revisions = run.revisions,
            composite = score.composite,
            "Ticker assessed"
        );

        TickerResult {
            ticker,
            status: run.status,
            revisions: run.revisions,
            iterations: run.iterations,
            assessment,
            assessment_text: run.assessment,
            materiality,
            score,
            trace: run.trace,
            error,
            audit_id,
        }
    }

    /// Assess every ticker, at most `concurrency` at a time.
    ///
    /// Duplicate tickers (after normalisation) run once.
    pub async fn run_portfolio(
        &self,
        tickers: &[String],
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> PortfolioResult {
        let unique: BTreeSet<String> = tickers
            .iter()
            .map(|t| normalize_ticker(t))
            .filter(|t| !t.is_empty())
            .collect();

        info!(tickers = unique.len(), concurrency, "Portfolio run started");

        let mut portfolio = PortfolioResult::new();
        let mut completed = stream::iter(unique)
            .map(|ticker| {
                let pipeline = self.clone();
                let cancel = cancel.clone();
                async move {
                    let task_ticker = ticker.clone();
                    let handle = tokio::spawn(async move { pipeline.assess(&task_ticker, &cancel).await });
                    match handle.await {
                        Ok(result) => result,
                        Err(e) => {
                            warn!(ticker = %ticker, error = %e, "Assessment task aborted");
                            TickerResult::failed(&ticker, format!("assessment task failed: {}", e))
                        }
                    }
                }
            })
            .buffer_unordered(concurrency.max(1));

        while let Some(result) = completed.next().await {
            portfolio.insert(result);
        }

        portfolio.completed_at = Some(Utc::now());
        info!(
            tickers = portfolio.len(),
            failures = portfolio.failures().len(),
            "Portfolio run finished"
        );
        portfolio
    }
}

/// Ticker → controversy type → highest severity weight (Low=1, Medium=2, High=3).
///
/// Tickers without controversy data map to an empty row.
pub fn controversy_matrix(registry: &ToolRegistry, tickers: &[String]) -> BTreeMap<String, BTreeMap<String, u8>> {
    tickers
        .iter()
        .map(|t| normalize_ticker(t))
        .map(|ticker| {
            let mut row: BTreeMap<String, u8> = BTreeMap::new();
            for controversy in registry.dataset().controversies_for(&ticker).unwrap_or_default() {
                let weight = row.entry(controversy.kind.clone()).or_insert(0);
                *weight = (*weight).max(controversy.severity.weight());
            }
            (ticker, row)
        })
        .collect()
}
