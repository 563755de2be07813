use anyhow::Context;
use campus_energy::{
    AlertDispatcher, EnergyMetrics, HttpAlertSink, Pipeline,
    config::ServiceConfig,
    server::{AppState, ingest_router, metrics_router, serve_with_drain},
};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServiceConfig::parse();
    config.validate()?;

    info!(
        window_capacity = config.window_capacity,
        z_threshold = config.z_threshold,
        baseline = ?config.baseline,
        group_by = ?config.group_by,
        "Initializing aggregator"
    );

    let metrics = Arc::new(EnergyMetrics::new().context("failed to register metrics")?);

    let sink = HttpAlertSink::new(config.alert_url.clone(), config.alert_timeout())
        .context("failed to build alert client")?;
    info!(url = sink.url(), "Alert sink configured");
    let dispatcher = AlertDispatcher::spawn(Arc::new(sink), config.dispatch_config());

    let pipeline = Arc::new(Pipeline::new(
        config.pipeline_config(),
        metrics.clone(),
        dispatcher,
    ));
    info!(shards = pipeline.store().shard_count(), "Window store ready");

    let state = AppState::new(pipeline, metrics).with_max_line_bytes(config.max_line_bytes);

    let metrics_listener = TcpListener::bind(&config.metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", config.metrics_addr))?;
    let ingest_listener = TcpListener::bind(&config.ingest_addr)
        .await
        .with_context(|| format!("failed to bind ingest listener on {}", config.ingest_addr))?;

    let metrics_app = metrics_router(state.clone());
    info!(addr = %config.metrics_addr, "Metrics server listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, metrics_app).await {
            error!(error = %e, "Metrics server stopped");
        }
    });

    info!(addr = %config.ingest_addr, "Aggregator listening");
    info!("  POST /readings/stream - NDJSON reading stream");
    info!("  GET  /health          - Health check");
    info!("  GET  /stats           - Pipeline stats");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };
    let drained = serve_with_drain(
        ingest_listener,
        ingest_router(state),
        shutdown,
        config.shutdown_grace(),
    )
    .await
    .context("ingest server failed")?;

    info!(drained, "Goodbye.");
    Ok(())
}
