use clap::{Parser, Subcommand};
use esg_materiality_agent::{
    config::AppConfig,
    consistency::{ConsistencyReport, ConsistencySampler},
    portfolio::{controversy_matrix, AssessmentPipeline, PortfolioResult},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "esg-assess",
    about = "Materiality-weighted ESG assessments with an evaluator-optimizer loop"
)]
struct Cli {
    /// Use the deterministic offline analyst even when an API key is set
    #[arg(long, global = true)]
    offline: bool,
    /// Print full JSON instead of the summary table
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Assess every ticker and rank by composite score
    Portfolio {
        #[arg(required = true)]
        tickers: Vec<String>,
        #[arg(long)]
        concurrency: Option<usize>,
        #[arg(long)]
        max_revisions: Option<u32>,
    },
    /// Run one ticker repeatedly and report score ranges
    Consistency {
        ticker: String,
        #[arg(long, default_value_t = 3)]
        runs: usize,
    },
    /// Show the industry and SASB material topics for a ticker
    Materiality { ticker: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    let pipeline = AssessmentPipeline::from_config(&config, cli.offline)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling in-flight runs");
            on_signal.cancel();
        }
    });

    match cli.command {
        Commands::Portfolio {
            tickers,
            concurrency,
            max_revisions,
        } => {
            let pipeline = match max_revisions {
                Some(max) => pipeline.with_max_revisions(max),
                None => pipeline,
            };
            let concurrency = concurrency.unwrap_or(config.concurrency);
            info!(tickers = tickers.len(), concurrency, "Running portfolio assessment");

            let portfolio = pipeline.run_portfolio(&tickers, concurrency, &cancel).await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&portfolio)?);
            } else {
                print_portfolio(&pipeline, &portfolio, &tickers);
            }
        }

        Commands::Consistency { ticker, runs } => {
            let sampler = ConsistencySampler::new(pipeline).with_concurrency(config.concurrency);
            let report = sampler.sample(&ticker, runs, &cancel).await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_consistency(&report);
            }
        }

        Commands::Materiality { ticker } => {
            let materiality = pipeline.resolver().resolve(&ticker).await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&materiality)?);
            } else {
                println!("\n=== MATERIALITY: {} ===", materiality.ticker);
                println!("Industry: {}", materiality.industry);
                if let Some(sasb) = &materiality.sasb_industry {
                    println!("SASB industry: {}", sasb);
                }
                println!("Material topics:");
                for topic in &materiality.material_topics {
                    println!("  - {}", topic);
                }
            }
        }
    }

    Ok(())
}

fn print_portfolio(pipeline: &AssessmentPipeline, portfolio: &PortfolioResult, tickers: &[String]) {
    println!("\n=== PORTFOLIO RANKING ===");
    println!(
        "{:<6} {:>6} {:>6} {:>6} {:>9}  {:<22} {}",
        "TICKER", "E", "S", "G", "COMPOSITE", "STATUS", "RECOMMENDATION"
    );
    for score in portfolio.ranking() {
        println!(
            "{:<6} {:>6.1} {:>6.1} {:>6.1} {:>9.1}  {:<22} {}",
            score.ticker,
            score.environmental,
            score.social,
            score.governance,
            score.composite,
            score.status.as_str(),
            score.recommendation
        );
    }

    let failures = portfolio.failures();
    if !failures.is_empty() {
        println!("\nNot scored:");
        for result in failures {
            println!(
                "  {}: {} ({})",
                result.ticker,
                result.status,
                result.error.as_deref().unwrap_or("no detail")
            );
        }
    }

    println!("\nControversies (max severity, 1=Low 3=High):");
    for (ticker, row) in controversy_matrix(pipeline.registry(), tickers) {
        if row.is_empty() {
            println!("  {}: none on record", ticker);
            continue;
        }
        let cells: Vec<String> = row.iter().map(|(kind, level)| format!("{}={}", kind, level)).collect();
        println!("  {}: {}", ticker, cells.join(", "));
    }
}

fn print_consistency(report: &ConsistencyReport) {
    println!("\n=== CONSISTENCY: {} ===", report.ticker);
    println!(
        "Samples: {} of {} requested",
        report.runs.len(),
        report.requested_runs
    );
    for excluded in &report.excluded {
        println!("  run {} excluded: {} ({})", excluded.run, excluded.status, excluded.reason);
    }

    match &report.ranges {
        Some(ranges) => {
            println!("{:<14} {:>7} {:>7} {:>7} {:>7}", "METRIC", "MIN", "MAX", "RANGE", "MEAN");
            for (name, stats) in [
                ("environmental", &ranges.environmental),
                ("social", &ranges.social),
                ("governance", &ranges.governance),
                ("composite", &ranges.composite),
            ] {
                println!(
                    "{:<14} {:>7.1} {:>7.1} {:>7.1} {:>7.1}",
                    name, stats.min, stats.max, stats.range, stats.mean
                );
            }
        }
        None => println!("No usable runs; ranges unavailable."),
    }
}
