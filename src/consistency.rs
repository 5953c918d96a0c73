//! Consistency sampling: repeat the full pipeline and report score spread
//!
//! Only runs with a final status and a parsed assessment count as samples.
//! No judgement is made on what spread is acceptable.

use crate::materiality::round2;
use crate::models::EvaluatorStatus;
use crate::portfolio::AssessmentPipeline;
use crate::scoring::{mean, ScoreRecord};
use crate::tools::normalize_ticker;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SeriesStats {
    pub min: f64,
    pub max: f64,
    pub range: f64,
    pub mean: f64,
}

impl SeriesStats {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let min = values.iter().copied().reduce(f64::min)?;
        let max = values.iter().copied().reduce(f64::max)?;
        Some(Self {
            min,
            max,
            range: round2(max - min),
            mean: mean(values)?,
        })
    }
}

/// Dispersion of each metric across sampled runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreRanges {
    pub environmental: SeriesStats,
    pub social: SeriesStats,
    pub governance: SeriesStats,
    pub composite: SeriesStats,
}

impl ScoreRanges {
    pub fn from_records(records: &[ScoreRecord]) -> Option<Self> {
        let series = |pick: fn(&ScoreRecord) -> f64| -> Option<SeriesStats> {
            let values: Vec<f64> = records.iter().map(pick).collect();
            SeriesStats::from_values(&values)
        };

        Some(Self {
            environmental: series(|r| r.environmental)?,
            social: series(|r| r.social)?,
            governance: series(|r| r.governance)?,
            composite: series(|r| r.composite)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExcludedRun {
    pub run: usize,
    pub status: EvaluatorStatus,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub ticker: String,
    pub requested_runs: usize,
    pub runs: Vec<ScoreRecord>,
    pub excluded: Vec<ExcludedRun>,
    /// `None` when no run produced a usable sample.
    pub ranges: Option<ScoreRanges>,
}

pub struct ConsistencySampler {
    pipeline: AssessmentPipeline,
    concurrency: usize,
}

impl ConsistencySampler {
    pub fn new(pipeline: AssessmentPipeline) -> Self {
        Self {
            pipeline,
            concurrency: 1,
        }
    }

    /// Runs share nothing, so they may overlap up to this limit.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub async fn sample(&self, ticker: &str, runs: usize, cancel: &CancellationToken) -> ConsistencyReport {
        let ticker = normalize_ticker(ticker);
        info!(ticker = %ticker, runs, "Consistency sampling started");

        let results: Vec<_> = stream::iter(0..runs)
            .map(|_| self.pipeline.assess(&ticker, cancel))
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut samples = Vec::with_capacity(results.len());
        let mut excluded = Vec::new();

        for (run, result) in results.into_iter().enumerate() {
            if !result.is_usable() {
                excluded.push(ExcludedRun {
                    run,
                    status: result.status,
                    reason: result.error.unwrap_or_else(|| result.status.to_string()),
                });
            } else if !result.assessment.structured {
                excluded.push(ExcludedRun {
                    run,
                    status: result.status,
                    reason: "assessment was not structured JSON".to_string(),
                });
            } else {
                samples.push(result.score);
            }
        }

        let ranges = ScoreRanges::from_records(&samples);
        info!(
            ticker = %ticker,
            samples = samples.len(),
            excluded = excluded.len(),
            composite_range = ranges.as_ref().map(|r| r.composite.range),
            "Consistency sampling finished"
        );

        ConsistencyReport {
            ticker,
            requested_runs: runs,
            runs: samples,
            excluded,
            ranges,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::EsgAgent;
    use crate::llm::{OfflineAnalyst, ScriptedModel};
    use crate::materiality::{MaterialityResolver, StaticIndustryClassifier};
    use crate::orchestrator::EvaluatorOptimizer;
    use crate::tools::ToolRegistry;
    use crate::verification::Reviewer;
    use std::sync::Arc;
    use tokio_test::assert_ok;

    const APPROVE: &str = r#"{"status": "APPROVED", "feedback": ""}"#;

    fn assessment(e: u32) -> String {
        format!(
            "```json\n{{\"ticker\": \"AAPL\", \"environmental_score\": {}, \"social_score\": 70, \"governance_score\": 80}}\n```",
            e
        )
    }

    fn sampler(generator: Arc<dyn crate::llm::ChatModel>, reviewer: Arc<dyn crate::llm::ChatModel>) -> ConsistencySampler {
        let registry = ToolRegistry::builtin();
        let optimizer = EvaluatorOptimizer::new(
            EsgAgent::new(generator, registry.clone()),
            Reviewer::new(reviewer),
        );
        let resolver = MaterialityResolver::new(Arc::new(StaticIndustryClassifier::new()), registry.clone());
        ConsistencySampler::new(AssessmentPipeline::new(optimizer, resolver, registry, 3))
    }

    #[tokio::test]
    async fn test_environmental_range() {
        let generator = Arc::new(
            ScriptedModel::new()
                .then_text(assessment(70))
                .then_text(assessment(75))
                .then_text(assessment(68)),
        );
        let reviewer = Arc::new(
            ScriptedModel::new()
                .then_text(APPROVE)
                .then_text(APPROVE)
                .then_text(APPROVE),
        );

        let report = sampler(generator, reviewer)
            .sample("AAPL", 3, &CancellationToken::new())
            .await;

        assert_eq!(report.runs.len(), 3);
        let ranges = report.ranges.unwrap();
        assert_eq!(ranges.environmental.range, 7.0);
        assert_eq!(ranges.environmental.min, 68.0);
        assert_eq!(ranges.environmental.max, 75.0);
        assert_eq!(ranges.social.range, 0.0);
        assert_eq!(ranges.governance.range, 0.0);
    }

    #[tokio::test]
    async fn test_failed_runs_are_excluded() {
        let generator = Arc::new(
            ScriptedModel::new()
                .then_text(assessment(60))
                .then_error("connection refused")
                .then_text("no json here"),
        );
        let reviewer = Arc::new(ScriptedModel::new().then_text(APPROVE).then_text(APPROVE));

        let report = sampler(generator, reviewer)
            .sample("AAPL", 3, &CancellationToken::new())
            .await;

        assert_eq!(report.requested_runs, 3);
        assert_eq!(report.runs.len(), 1);
        assert_eq!(report.excluded.len(), 2);
        assert_eq!(report.excluded[0].status, EvaluatorStatus::Failed);
        assert_eq!(report.excluded[1].status, EvaluatorStatus::Approved);
        assert_eq!(report.ranges.unwrap().environmental.range, 0.0);
    }

    #[tokio::test]
    async fn test_offline_runs_are_identical() {
        let analyst = Arc::new(OfflineAnalyst::default());
        let report = sampler(analyst.clone(), analyst)
            .with_concurrency(3)
            .sample("JNJ", 3, &CancellationToken::new())
            .await;

        let ranges = report.ranges.as_ref().unwrap();
        assert_eq!(ranges.composite.range, 0.0);
        assert_eq!(report.runs.len(), 3);
        assert_ok!(serde_json::to_string(&report));
    }

    #[test]
    fn test_empty_series_has_no_stats() {
        assert_eq!(SeriesStats::from_values(&[]), None);
        assert!(ScoreRanges::from_records(&[]).is_none());

        let stats = SeriesStats::from_values(&[70.0, 75.0, 68.0]).unwrap();
        assert_eq!(stats.range, 7.0);
        assert_eq!(stats.mean, 71.0);
    }
}
