//! Audit log of completed assessment runs
//!
//! Every ticker run is stored with its trace and a SHA-256 digest of the
//! final assessment, so a record can be re-verified later.

use crate::error::OrchestrationError;
use crate::models::{EvaluatorStatus, Trace};
use crate::orchestrator::OptimizationResult;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_id: Uuid,
    pub ticker: String,
    pub status: EvaluatorStatus,
    pub revisions: u32,
    pub iterations: u32,
    pub composite: f64,
    pub assessment: String,
    pub assessment_digest: String,
    pub trace: Arc<Trace>,
    pub created_at: DateTime<Utc>,
    pub execution_time_ms: u64,
}

impl AuditRecord {
    /// Snapshot of a finished evaluator-optimizer run.
    pub fn from_run(run: &OptimizationResult, composite: f64) -> Self {
        Self {
            audit_id: Uuid::new_v4(),
            ticker: run.ticker.clone(),
            status: run.status,
            revisions: run.revisions,
            iterations: run.iterations,
            composite,
            assessment: run.assessment.clone(),
            assessment_digest: compute_assessment_digest(&run.ticker, run.status, &run.assessment),
            trace: Arc::new(run.trace.clone()),
            created_at: Utc::now(),
            execution_time_ms: run.elapsed_ms,
        }
    }
}

/// Audit trail storage
pub struct AuditLog {
    records: Arc<RwLock<HashMap<Uuid, AuditRecord>>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Store a run record
    pub async fn record(&self, record: AuditRecord) -> Result<Uuid> {
        let audit_id = record.audit_id;
        let mut records = self.records.write().await;
        if records.contains_key(&audit_id) {
            return Err(OrchestrationError::Audit(format!(
                "audit id {} already recorded",
                audit_id
            )));
        }
        records.insert(audit_id, record);
        Ok(audit_id)
    }

    /// Retrieve a record by audit ID
    pub async fn get(&self, audit_id: Uuid) -> Option<AuditRecord> {
        let records = self.records.read().await;
        records.get(&audit_id).cloned()
    }

    pub async fn require(&self, audit_id: Uuid) -> Result<AuditRecord> {
        self.get(audit_id)
            .await
            .ok_or_else(|| OrchestrationError::Audit(format!("no audit record {}", audit_id)))
    }

    /// Audit IDs for a ticker, oldest first
    pub async fn list_for_ticker(&self, ticker: &str) -> Vec<Uuid> {
        let records = self.records.read().await;

        let mut items: Vec<_> = records
            .values()
            .filter(|record| record.ticker.eq_ignore_ascii_case(ticker))
            .map(|record| (record.audit_id, record.created_at))
            .collect();

        items.sort_by_key(|(_, created_at)| *created_at);

        items.into_iter().map(|(id, _)| id).collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Recompute a record's digest and compare it to the stored one
    pub async fn verify_integrity(&self, audit_id: Uuid) -> Result<bool> {
        let record = self.require(audit_id).await?;
        let current = compute_assessment_digest(&record.ticker, record.status, &record.assessment);
        Ok(current == record.assessment_digest)
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct DigestInput<'a> {
    ticker: &'a str,
    status: EvaluatorStatus,
    assessment: &'a str,
}

/// SHA-256 over the run's identity and final assessment text.
/// Streams JSON straight into the hasher.
pub fn compute_assessment_digest(ticker: &str, status: EvaluatorStatus, assessment: &str) -> String {
    let mut hasher = Sha256::new();
    let input = DigestInput {
        ticker,
        status,
        assessment,
    };

    if serde_json::to_writer(&mut HashWriter(&mut hasher), &input).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ticker: &str, assessment: &str) -> AuditRecord {
        let run = OptimizationResult {
            ticker: ticker.to_string(),
            assessment: assessment.to_string(),
            status: EvaluatorStatus::Approved,
            revisions: 0,
            iterations: 2,
            trace: Trace::new(),
            elapsed_ms: 12,
        };
        AuditRecord::from_run(&run, 47.0)
    }

    #[tokio::test]
    async fn test_record_and_verify() {
        let log = AuditLog::new();
        let id = log.record(record("XOM", "{\"environmental_score\": 20}")).await.unwrap();

        assert!(log.verify_integrity(id).await.unwrap());
        assert_eq!(log.require(id).await.unwrap().ticker, "XOM");
        assert_eq!(log.len().await, 1);
    }

    #[tokio::test]
    async fn test_tampered_record_fails_verification() {
        let log = AuditLog::new();
        let mut tampered = record("XOM", "{\"environmental_score\": 20}");
        tampered.assessment = "{\"environmental_score\": 90}".to_string();
        let id = log.record(tampered).await.unwrap();

        assert!(!log.verify_integrity(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_id_is_an_audit_error() {
        let log = AuditLog::new();
        let err = log.verify_integrity(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::Audit(_)));
    }

    #[tokio::test]
    async fn test_list_for_ticker_is_ordered() {
        let log = AuditLog::new();
        let mut older = record("AAPL", "a");
        older.created_at = Utc::now() - chrono::Duration::seconds(60);
        let first = log.record(older).await.unwrap();
        log.record(record("MSFT", "b")).await.unwrap();
        let second = log.record(record("aapl", "c")).await.unwrap();

        assert_eq!(log.list_for_ticker("AAPL").await, vec![first, second]);
    }

    #[test]
    fn test_digest_is_stable_and_status_sensitive() {
        let a = compute_assessment_digest("JPM", EvaluatorStatus::Approved, "{}");
        let b = compute_assessment_digest("JPM", EvaluatorStatus::Approved, "{}");
        let c = compute_assessment_digest("JPM", EvaluatorStatus::MaxRevisionsReached, "{}");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
