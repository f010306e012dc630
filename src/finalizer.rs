use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::engine::Engine;
use crate::model::*;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// The first instant strictly after `now` whose offset into its UTC day is
/// `finalize_at`.
pub fn next_run_at(now: Ms, finalize_at: Ms) -> Ms {
    let midnight = now.div_euclid(DAY_MS) * DAY_MS;
    let today = midnight + finalize_at;
    if today > now { today } else { today + DAY_MS }
}

/// Once a day at `finalize_at`, close every overdue activity.
pub async fn run_finalizer(engine: Arc<Engine>, finalize_at: Ms, shutdown: CancellationToken) {
    loop {
        let now = engine.now();
        let wait = (next_run_at(now, finalize_at) - now).max(0) as u64;
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_millis(wait)) => {}
        }
        engine.finalize_overdue(engine.now()).await;
    }
    info!("finalizer stopped");
}

/// Rewrite the WAL whenever enough appends have piled up since the last
/// compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::error!("WAL compaction failed: {e}"),
        }
    }
    info!("compactor stopped");
}

/// Running background tasks. Dropping this leaves them running; call
/// `shutdown` to stop them.
pub struct Background {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Background {
    /// Signal every task and wait for it to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!("background task ended abnormally: {e}");
            }
        }
    }
}

/// Start the daily finalizer and the WAL compactor for `engine`.
pub fn spawn(engine: Arc<Engine>, finalize_at: Ms, compact_threshold: u64) -> Background {
    let token = CancellationToken::new();
    let tasks = vec![
        tokio::spawn(run_finalizer(engine.clone(), finalize_at, token.clone())),
        tokio::spawn(run_compactor(engine, compact_threshold, token.clone())),
    ];
    Background { token, tasks }
}
