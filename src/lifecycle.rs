//! Process lifecycle (C7): startup sequencing and graceful shutdown.
//!
//! Mirrors the teacher's `run_server`/`shutdown_signal` split in `main.rs`:
//! a `TaskTracker` owns the cache sweeper, `ctrl_c`/`SIGTERM` both trigger
//! shutdown, and a bounded grace period gives in-flight scans a chance to
//! finish before the process exits.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::task::TaskTracker;

use crate::cache::{DetectionCache, DEFAULT_CLEANUP_INTERVAL};
use crate::engines::EngineDriver;

const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Everything started during bring-up that must be torn down on shutdown.
pub struct Lifecycle {
    pub driver: Arc<dyn EngineDriver>,
    pub cache: DetectionCache,
    pub task_tracker: TaskTracker,
}

impl Lifecycle {
    /// Start the active engine's tailer (if any) and the cache sweeper.
    /// Both run under the task tracker so shutdown can wait on them.
    pub async fn start(driver: Arc<dyn EngineDriver>, cache: DetectionCache) -> Self {
        driver.start().await;

        let task_tracker = TaskTracker::new();
        let sweep_handle = cache.spawn_cleanup(DEFAULT_CLEANUP_INTERVAL);
        task_tracker.spawn(async move {
            let _ = sweep_handle.await;
        });

        let health = driver.health().await;
        if health.healthy {
            tracing::info!(engine = %driver.engine(), "active engine healthy at startup");
        } else {
            tracing::warn!(
                engine = %driver.engine(),
                error = ?health.error,
                "active engine unhealthy at startup, serving in degraded mode"
            );
        }

        Self {
            driver,
            cache,
            task_tracker,
        }
    }

    /// Wait for `SIGINT`/`SIGTERM`, then stop accepting new background work
    /// and drain what is in flight within the grace period.
    pub async fn shutdown_signal(self) {
        wait_for_signal().await;
        tracing::info!("shutdown signal received, draining background tasks");

        self.task_tracker.close();
        self.cache.stop();
        self.driver.stop().await;

        match tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, self.task_tracker.wait()).await {
            Ok(()) => tracing::info!("all background tasks completed"),
            Err(_) => tracing::warn!(
                grace_period = ?SHUTDOWN_GRACE_PERIOD,
                "timed out waiting for background tasks, shutting down anyway"
            ),
        }
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
