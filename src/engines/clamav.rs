//! ClamAV engine driver: wraps `clamdscan`-style on-demand invocation plus a
//! tailer on clamd's on-access log.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::GatewayConfig;
use crate::domain::{EngineHealth, EngineInfo, EngineKind, OnDemandOutcome, RawArtifact, Verdict};
use crate::parsers::clamav::ClamAvParser;
use crate::tailer::{self, TailerHandle};
use crate::cache::DetectionCache;

use super::{run_with_timeout, EngineDriver, RtsWaitConfig};

pub struct ClamAvDriver {
    log_path: std::path::PathBuf,
    scan_binary: std::path::PathBuf,
    timeout: Duration,
    rts_wait: RtsWaitConfig,
    cache: DetectionCache,
    tailer: Mutex<Option<TailerHandle>>,
}

impl ClamAvDriver {
    pub fn new(config: &GatewayConfig, cache: DetectionCache) -> Self {
        Self {
            log_path: config.engine.rts_log_path.clone(),
            scan_binary: config.engine.scan_binary.clone(),
            timeout: Duration::from_millis(config.engine.timeout_ms),
            rts_wait: RtsWaitConfig {
                base: Duration::from_millis(config.engine.rts_cache_base_delay_ms),
                per_mb: Duration::from_millis(config.engine.rts_cache_delay_per_mb_ms),
                retry_delay: Duration::from_millis(20),
            },
            cache,
            tailer: Mutex::new(None),
        }
    }

    fn parse_stdout_for_signature(stdout: &str, path: &Path) -> Option<String> {
        // clamdscan emits `<path>: <sig> FOUND` to stdout on a detection.
        let path_str = path.to_string_lossy();
        stdout.lines().find_map(|line| {
            let prefix = format!("{path_str}: ");
            line.strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(" FOUND"))
                .map(|sig| sig.to_string())
        })
    }
}

#[async_trait]
impl EngineDriver for ClamAvDriver {
    fn engine(&self) -> EngineKind {
        EngineKind::ClamAv
    }

    async fn start(&self) {
        if tokio::fs::metadata(&self.log_path).await.is_err() {
            tracing::warn!(
                path = %self.log_path.display(),
                "ClamAV RTS log not readable, starting without a tailer"
            );
            return;
        }
        let (handle, _join) =
            tailer::spawn_tailer(self.log_path.clone(), self.cache.clone(), Arc::new(ClamAvParser));
        *self.tailer.lock().await = Some(handle);
    }

    async fn stop(&self) {
        if let Some(handle) = self.tailer.lock().await.take() {
            handle.stop();
        }
    }

    async fn on_demand(&self, path: &Path) -> OnDemandOutcome {
        if tokio::fs::metadata(path).await.is_err() {
            return OnDemandOutcome {
                verdict: Verdict::Error,
                signature: None,
                raw: RawArtifact {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: "file unreadable (possibly quarantined by RTS)".to_string(),
                },
            };
        }

        let path_str = path.to_string_lossy().into_owned();
        let args = ["--stream", "--no-summary", "--infected", &path_str];

        match run_with_timeout(&self.scan_binary, &args, self.timeout).await {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                let code = output.status.code();
                let raw = RawArtifact {
                    exit_code: code,
                    stdout: stdout.clone(),
                    stderr,
                };
                match code {
                    Some(0) => OnDemandOutcome {
                        verdict: Verdict::Clean,
                        signature: None,
                        raw,
                    },
                    Some(1) => OnDemandOutcome {
                        verdict: Verdict::Infected,
                        signature: Self::parse_stdout_for_signature(&stdout, path),
                        raw,
                    },
                    _ => OnDemandOutcome {
                        verdict: Verdict::Error,
                        signature: None,
                        raw,
                    },
                }
            }
            Err(e) => OnDemandOutcome {
                verdict: Verdict::Error,
                signature: None,
                raw: RawArtifact {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: e.to_string(),
                },
            },
        }
    }

    async fn health(&self) -> EngineHealth {
        let readable = tokio::fs::metadata(&self.log_path).await.is_ok();
        EngineHealth {
            engine: EngineKind::ClamAv,
            healthy: readable,
            version: None,
            last_check: chrono::Utc::now(),
            error: if readable {
                None
            } else {
                Some(format!("log file not readable: {}", self.log_path.display()))
            },
        }
    }

    async fn info(&self) -> EngineInfo {
        let scan_binary_available = tokio::fs::metadata(&self.scan_binary).await.is_ok();
        EngineInfo {
            engine: EngineKind::ClamAv,
            available: scan_binary_available,
            rts_enabled: tokio::fs::metadata(&self.log_path).await.is_ok(),
            manual_scan_available: scan_binary_available,
        }
    }

    fn rts_wait_config(&self) -> RtsWaitConfig {
        self.rts_wait
    }
}
