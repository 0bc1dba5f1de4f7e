use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

mod analysis;
mod config;
mod engine;
mod feed;
mod models;

use analysis::{HttpJudge, JudgmentProvider, SecondOpinionDesk};
use config::Config;
use engine::{Judgments, ScreeningEngine};
use feed::{collect_fragments, load_judgments, FragmentSource, JsonFileSource};

/// Per-source read timeout.
const SOURCE_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the report.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();
    config.validate()?;

    info!(
        "Bankroll {:.2}, Kelly x{:.2}, per-bet cap {:.1}%, portfolio cap {:.1}%",
        config.bankroll,
        config.kelly_fraction,
        config.max_risk_per_bet * 100.0,
        config.max_portfolio_risk * 100.0
    );

    let sources: Vec<Arc<dyn FragmentSource>> =
        vec![Arc::new(JsonFileSource::new(&config.fragments_path))];
    info!("Configured {} fragment source(s)", sources.len());
    let fragments = collect_fragments(&sources, SOURCE_TIMEOUT).await;

    let judgments: Judgments = match &config.judgments_path {
        Some(path) => match load_judgments(path).await {
            Ok((judgments, malformed)) => {
                info!(
                    "Loaded {} judgment(s) ({} malformed) from {}",
                    judgments.len(),
                    malformed,
                    path.display()
                );
                judgments
            }
            Err(e) => {
                warn!("Judgments unavailable, scoring statistically: {:#}", e);
                Judgments::new()
            }
        },
        None => Judgments::new(),
    };

    let desk = match &config.judge_url {
        Some(url) => {
            let provider: Arc<dyn JudgmentProvider> = Arc::new(HttpJudge::new(
                url,
                config.judge_api_key.clone(),
                Duration::from_secs(config.judge_timeout_secs),
            )?);
            let desk = SecondOpinionDesk::new(provider, config.desk());
            info!("Second opinions from {} ({})", url, desk.provider_name());
            Some(desk)
        }
        None => {
            info!("No JUDGE_URL configured; validation uses statistical estimates");
            None
        }
    };

    let engine = ScreeningEngine::new(config.screening());
    let report = engine
        .run(fragments, &judgments, desk.as_ref(), Utc::now())
        .await;
    if let Some(desk) = desk {
        let usage = desk.close();
        info!(
            "Second opinions: {} requested, {:.0}% cache hits, {} fallback(s), cost {:.4}",
            usage.requested,
            usage.hit_rate * 100.0,
            usage.fallbacks,
            usage.total_cost
        );
    }

    let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
    match &config.output_path {
        Some(path) => {
            tokio::fs::write(path, json)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Report written to {}", path.display());
        }
        None => println!("{}", json),
    }

    Ok(())
}
