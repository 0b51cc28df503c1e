use anyhow::Result;
use homewatch::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

/// Longest wait for viewer tasks to flush their queues after the shutdown signal.
const VIEWER_DRAIN_TIMEOUT: Duration = Duration::from_secs(15);

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;
    let stats = Arc::new(stats::Stats::default());

    let store = Arc::new(
        history::HistoryStore::connect(
            &app_config.database.path,
            app_config.database.max_pool_size,
            app_config.database.retention(),
        )
        .await?
        .with_sweep_batch_limit(app_config.database.sweep_batch_limit),
    );
    store.init().await?;

    let hub = Arc::new(hub::BroadcastHub::new(
        app_config.hub.hub_config(),
        stats.clone(),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (ingress_tx, ingress_rx) = mpsc::channel(app_config.sampling.ingress_capacity);

    let writer_config = app_config.database.writer_config();
    let (history_tx, history_rx) =
        mpsc::channel(history::writer::channel_capacity(writer_config.flush_rate));
    let writer_handle =
        history::writer::spawn(history_rx, store.clone(), writer_config, stats.clone());

    let aggregator =
        aggregator::Aggregator::new(hub.clone(), stats.clone()).with_history(history_tx);
    let monitor = monitor::Monitor::new(
        aggregator.reader(),
        hub.clone(),
        store.clone(),
        stats.clone(),
    );
    let aggregator_handle = aggregator::spawn(aggregator, ingress_rx);

    let providers = providers::from_config(&app_config.sources).await?;
    let mut sampler_handles = Vec::with_capacity(providers.len());
    for provider in providers {
        let cfg = app_config.sampling.sampler_config(provider.source_id());
        tracing::info!(source_id = provider.source_id(), interval_ms = cfg.interval.as_millis() as u64, "sampler started");
        sampler_handles.push(sampler::spawn(
            sampler::Sampler::new(provider, cfg),
            ingress_tx.clone(),
            shutdown_rx.clone(),
        ));
    }
    // The aggregator stops once the last sampler drops its sender.
    drop(ingress_tx);

    let retention_handle = history::retention::spawn(
        store.clone(),
        app_config.database.retention_config(),
        stats.clone(),
        shutdown_rx.clone(),
    );
    let heartbeat_handle = hub::spawn_heartbeat(hub.clone(), shutdown_rx.clone());
    let stats_handle = monitor.spawn_stats_logger(
        Duration::from_secs(app_config.monitoring.stats_log_interval_secs),
        shutdown_rx.clone(),
    );

    let app = routes::app(monitor);
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    let signal_hub = hub.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
            signal_hub.close_all();
        })
        .await?;

    // Upgraded sockets outlive `serve`; let them send their backlog and Close frame.
    if tokio::time::timeout(VIEWER_DRAIN_TIMEOUT, hub.wait_closed())
        .await
        .is_err()
    {
        tracing::warn!(
            viewers = hub.live_handles(),
            "viewers still draining at shutdown deadline"
        );
    }

    for handle in sampler_handles {
        let _ = handle.await;
    }
    let _ = aggregator_handle.await;
    let _ = writer_handle.await;
    let _ = retention_handle.await;
    let _ = heartbeat_handle.await;
    let _ = stats_handle.await;
    store.close().await;
    tracing::info!("shutdown complete");

    Ok(())
}
