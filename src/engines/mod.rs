//! Engine drivers (C4) — the uniform interface the orchestrator programs
//! against, regardless of which antivirus vendor is active.

pub mod clamav;
pub mod mock;
pub mod trendmicro;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::cache::DetectionCache;
use crate::config::GatewayConfig;
use crate::domain::{EngineHealth, EngineInfo, EngineKind, OnDemandOutcome};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to invoke scan binary: {0}")]
    Spawn(String),
    #[error("scan timed out after {0:?}")]
    Timeout(Duration),
}

/// The uniform capability set every engine backend implements. The
/// orchestrator (C5) only ever talks to `dyn EngineDriver`; it never knows
/// which vendor is behind it.
#[async_trait]
pub trait EngineDriver: Send + Sync {
    fn engine(&self) -> EngineKind;

    /// Start the background tailer (if this engine has one). Always
    /// succeeds: an unreadable log produces a warning, not an error, and
    /// simply leaves no tailer running.
    async fn start(&self);

    /// Idempotent: stopping twice must not panic or block.
    async fn stop(&self);

    /// Synchronously invoke the on-demand scanner against `path`, enforcing
    /// the configured timeout.
    async fn on_demand(&self, path: &Path) -> OnDemandOutcome;

    /// Never fails; `healthy=false` is itself the failure signal.
    async fn health(&self) -> EngineHealth;

    async fn info(&self) -> EngineInfo;

    /// The wait budget configuration used by the orchestrator's RTS
    /// fallback loop.
    fn rts_wait_config(&self) -> RtsWaitConfig;
}

#[derive(Debug, Clone, Copy)]
pub struct RtsWaitConfig {
    pub base: Duration,
    pub per_mb: Duration,
    pub retry_delay: Duration,
}

/// Construct the driver for the single active engine. Inactive engines are
/// never instantiated (§4.7: eager instantiation of unused engines is
/// optional, and this implementation skips it).
pub fn build_driver(config: &GatewayConfig, cache: DetectionCache) -> Arc<dyn EngineDriver> {
    match config.active_engine {
        EngineKind::ClamAv => Arc::new(clamav::ClamAvDriver::new(config, cache)),
        EngineKind::TrendMicro => Arc::new(trendmicro::TrendMicroDriver::new(config, cache)),
        EngineKind::Mock => Arc::new(mock::MockDriver::new()),
    }
}

/// Shared helper: run `binary` with `args`, enforcing `timeout`. Returns
/// stdout, stderr, and exit code, or an `EngineError` if the process could
/// not be spawned or exceeded its deadline (the child is killed in that
/// case).
pub(crate) async fn run_with_timeout(
    binary: &Path,
    args: &[&str],
    timeout: Duration,
) -> Result<std::process::Output, EngineError> {
    let child = tokio::process::Command::new(binary)
        .args(args)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| EngineError::Spawn(e.to_string()))?;

    // `wait_with_output` consumes `child`; on a timeout the future (and the
    // child handle inside it) is dropped, and `kill_on_drop` ensures the
    // still-running process is reaped rather than leaked.
    let output = tokio::time::timeout(timeout, child.wait_with_output()).await;

    match output {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(EngineError::Spawn(e.to_string())),
        Err(_) => Err(EngineError::Timeout(timeout)),
    }
}
