use std::sync::Arc;

use tracing::info;

use rostra::clock::SystemClock;
use rostra::config::Config;
use rostra::directory::InMemoryDirectory;
use rostra::engine::{Engine, EngineSettings};
use rostra::finalizer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    rostra::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;

    let engine = Arc::new(Engine::new(
        config.wal_path(),
        EngineSettings::from(&config),
        Arc::new(SystemClock),
        Arc::new(InMemoryDirectory::new()),
    )?);

    info!("rostra started");
    info!("  data_dir: {}", config.data_dir.display());
    info!(
        "  finalize_at: {:02}:{:02} UTC",
        config.finalize_at / rostra::model::HOUR_MS,
        (config.finalize_at % rostra::model::HOUR_MS) / rostra::model::MINUTE_MS
    );
    info!("  compact_threshold: {}", config.compact_threshold);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let background = finalizer::spawn(engine.clone(), config.finalize_at, config.compact_threshold);

    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    info!("shutdown signal received");
    background.shutdown().await;
    info!("rostra stopped");
    Ok(())
}
