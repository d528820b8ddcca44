//! Gateway binary: parses CLI args, loads configuration, wires up the
//! orchestrator and its dependencies, spawns the canary loop, and serves
//! the HTTP gateway.

use std::sync::Arc;

use clap::Parser;
use promptdial::audit::AuditRing;
use promptdial::canary;
use promptdial::config::{Args, Config};
use promptdial::gateway::{self, GatewayState};
use promptdial::planner::StrategyPlanner;
use promptdial::receipt::SigningKeypair;
use promptdial::retrieval::NullRetriever;
use promptdial::runner::Runner;
use promptdial::safety::PatternSanitizer;
use promptdial::telemetry::Metrics;
use promptdial::Orchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env(&args).map_err(|e| anyhow::anyhow!("invalid config: {e}"))?;

    tracing::info!(port = config.port, "starting promptdial gateway");

    let signing_key = Arc::new(SigningKeypair::generate());
    let metrics = Arc::new(Metrics::new());
    let audit = Arc::new(AuditRing::new());
    let runner = Arc::new(Runner::new(&config.runner_urls));

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(PatternSanitizer),
        StrategyPlanner::heuristic(),
        Arc::new(NullRetriever),
        runner,
        metrics.clone(),
        audit.clone(),
        signing_key.clone(),
    ));

    let canary_cancel = canary::spawn(orchestrator.clone(), signing_key.public_key(), metrics.clone());

    let state = GatewayState {
        orchestrator,
        metrics,
        audit,
    };

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(addr = %listener.local_addr()?, "gateway listening");

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        canary_cancel.cancel();
    };

    axum::serve(listener, gateway::routes(state, &config.allowed_origins))
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
