use esg_materiality_agent::{
    api::{start_server, ApiState},
    config::AppConfig,
    portfolio::AssessmentPipeline,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;
    if !config.has_api_key() {
        warn!("OPENAI_API_KEY not set; serving offline analyst assessments");
    }

    info!("ESG Materiality Agent - API Server");
    info!(port = config.port, model = %config.model, "Configuration loaded");

    let port = config.port;
    let pipeline = AssessmentPipeline::from_config(&config, false)?;
    let state = ApiState::new(pipeline, config);

    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    start_server(state, port).await?;

    Ok(())
}
