//! REST API server for ESG assessments
//!
//! Read-only presentation boundary: every handler runs the pipeline and
//! returns its results wrapped in [`ApiResponse`].

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::config::AppConfig;
use crate::consistency::ConsistencySampler;
use crate::portfolio::{controversy_matrix, AssessmentPipeline};
use crate::tools::normalize_ticker;

/// Upper bound on consistency runs per request.
pub const MAX_CONSISTENCY_RUNS: usize = 10;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AssessRequest {
    pub ticker: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PortfolioRequest {
    pub tickers: Vec<String>,
    pub concurrency: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConsistencyRequest {
    pub ticker: String,
    pub runs: Option<usize>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type Reply = (StatusCode, Json<ApiResponse>);

fn ok<T: Serialize>(data: T) -> Reply {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

fn bad_request(message: impl Into<String>) -> Reply {
    (StatusCode::BAD_REQUEST, Json(ApiResponse::error(message.into())))
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub pipeline: AssessmentPipeline,
    pub audit: Arc<AuditLog>,
    pub config: Arc<AppConfig>,
    /// Cancelled on shutdown; every request runs under a child token.
    pub shutdown: CancellationToken,
}

impl ApiState {
    /// Attaches the audit log to the pipeline so every run is recorded.
    pub fn new(pipeline: AssessmentPipeline, config: AppConfig) -> Self {
        let audit = Arc::new(AuditLog::new());
        Self {
            pipeline: pipeline.with_audit(audit.clone()),
            audit,
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        }
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Assessment Endpoints
/// =============================

async fn assess_ticker(State(state): State<ApiState>, Json(req): Json<AssessRequest>) -> Reply {
    let ticker = normalize_ticker(&req.ticker);
    if ticker.is_empty() {
        return bad_request("ticker must not be empty");
    }
    info!(ticker = %ticker, "Received assessment request");

    let result = state.pipeline.assess(&ticker, &state.shutdown.child_token()).await;
    ok(result)
}

async fn assess_portfolio(State(state): State<ApiState>, Json(req): Json<PortfolioRequest>) -> Reply {
    let tickers: Vec<String> = req
        .tickers
        .iter()
        .map(|t| normalize_ticker(t))
        .filter(|t| !t.is_empty())
        .collect();
    if tickers.is_empty() {
        return bad_request("tickers must contain at least one symbol");
    }

    let concurrency = req.concurrency.unwrap_or(state.config.concurrency).max(1);
    info!(tickers = tickers.len(), concurrency, "Received portfolio request");

    let portfolio = state
        .pipeline
        .run_portfolio(&tickers, concurrency, &state.shutdown.child_token())
        .await;
    let matrix = controversy_matrix(state.pipeline.registry(), &tickers);

    ok(serde_json::json!({
        "ranking": portfolio.ranking(),
        "status_counts": portfolio.status_counts(),
        "controversy_matrix": matrix,
        "results": portfolio.results,
        "started_at": portfolio.started_at,
        "completed_at": portfolio.completed_at,
    }))
}

async fn sample_consistency(State(state): State<ApiState>, Json(req): Json<ConsistencyRequest>) -> Reply {
    let ticker = normalize_ticker(&req.ticker);
    if ticker.is_empty() {
        return bad_request("ticker must not be empty");
    }

    let runs = req.runs.unwrap_or(3);
    if runs == 0 || runs > MAX_CONSISTENCY_RUNS {
        return bad_request(format!("runs must be between 1 and {}", MAX_CONSISTENCY_RUNS));
    }

    let sampler = ConsistencySampler::new(state.pipeline.clone()).with_concurrency(state.config.concurrency);
    let report = sampler.sample(&ticker, runs, &state.shutdown.child_token()).await;
    ok(report)
}

/// =============================
/// Audit Endpoint
/// =============================

async fn get_audit(State(state): State<ApiState>, Path(audit_id): Path<String>) -> Reply {
    let Ok(audit_id) = Uuid::parse_str(&audit_id) else {
        return bad_request(format!("invalid audit id '{}'", audit_id));
    };

    let Some(record) = state.audit.get(audit_id).await else {
        return (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("no audit record {}", audit_id))),
        );
    };

    match state.audit.verify_integrity(audit_id).await {
        Ok(verified) => ok(serde_json::json!({
            "record": record,
            "verified": verified,
        })),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(format!("Integrity check failed: {}", e))),
        ),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/assess", post(assess_ticker))
        .route("/api/portfolio", post(assess_portfolio))
        .route("/api/consistency", post(sample_consistency))
        .route("/api/audit/:audit_id", get(get_audit))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(state: ApiState, port: u16) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let shutdown = state.shutdown.clone();
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn test_state() -> ApiState {
        let config = AppConfig::default();
        let pipeline = AssessmentPipeline::from_config(&config, true).unwrap();
        ApiState::new(pipeline, config)
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(create_router(test_state()), get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_assess_then_fetch_audit() {
        let state = test_state();
        let router = create_router(state.clone());

        let (status, body) = send(router.clone(), post_json("/api/assess", serde_json::json!({"ticker": "xom"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["ticker"], "XOM");
        assert_eq!(body["data"]["status"], "APPROVED");
        assert_eq!(body["data"]["score"]["composite"], 46.4);

        let audit_id = body["data"]["audit_id"].as_str().unwrap().to_string();
        let (status, body) = send(router, get_request(&format!("/api/audit/{}", audit_id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["verified"], true);
        assert_eq!(body["data"]["record"]["ticker"], "XOM");
    }

    #[tokio::test]
    async fn test_portfolio_ranking() {
        let router = create_router(test_state());
        let request = post_json(
            "/api/portfolio",
            serde_json::json!({"tickers": ["AAPL", "XOM", "JPM"], "concurrency": 2}),
        );

        let (status, body) = send(router, request).await;
        assert_eq!(status, StatusCode::OK);

        let ranking = body["data"]["ranking"].as_array().unwrap();
        assert_eq!(ranking.len(), 3);
        assert_eq!(ranking[2]["ticker"], "XOM");
        assert_eq!(body["data"]["status_counts"]["APPROVED"], 3);
        assert_eq!(body["data"]["controversy_matrix"]["XOM"]["Environmental"], 3);
    }

    #[tokio::test]
    async fn test_consistency_bounds() {
        let router = create_router(test_state());

        let (status, body) = send(
            router.clone(),
            post_json("/api/consistency", serde_json::json!({"ticker": "MSFT", "runs": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, body) = send(
            router,
            post_json("/api/consistency", serde_json::json!({"ticker": "MSFT", "runs": 2})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["runs"].as_array().unwrap().len(), 2);
        assert_eq!(body["data"]["ranges"]["composite"]["range"], 0.0);
    }

    #[tokio::test]
    async fn test_empty_ticker_rejected() {
        let router = create_router(test_state());
        let (status, body) = send(router, post_json("/api/assess", serde_json::json!({"ticker": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("ticker"));
    }

    #[tokio::test]
    async fn test_unknown_audit_id() {
        let router = create_router(test_state());

        let (status, _) = send(router.clone(), get_request("/api/audit/not-a-uuid")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(router, get_request(&format!("/api/audit/{}", Uuid::new_v4()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
