//! Trend Micro DS Agent engine driver: wraps the on-demand scan binary's
//! JSON output plus a tailer on the SCTRL log.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::cache::DetectionCache;
use crate::config::GatewayConfig;
use crate::domain::{EngineHealth, EngineInfo, EngineKind, OnDemandOutcome, RawArtifact, Verdict};
use crate::parsers::trendmicro::TrendMicroParser;
use crate::tailer::{self, TailerHandle};

use super::{run_with_timeout, EngineDriver, RtsWaitConfig};

#[derive(Debug, Deserialize)]
struct ScanReport {
    #[serde(default, rename = "numOfFileScanned")]
    num_of_file_scanned: u64,
    #[serde(default, rename = "numOfFileSkipped")]
    num_of_file_skipped: u64,
    #[serde(default, rename = "numOfFileInfected")]
    num_of_file_infected: u64,
    #[serde(default, rename = "infectedFiles")]
    infected_files: Vec<InfectedFile>,
}

#[derive(Debug, Deserialize)]
struct InfectedFile {
    #[serde(default, rename = "malwareName")]
    malware_name: String,
}

pub struct TrendMicroDriver {
    log_path: std::path::PathBuf,
    scan_binary: std::path::PathBuf,
    timeout: Duration,
    rts_wait: RtsWaitConfig,
    cache: DetectionCache,
    tailer: Mutex<Option<TailerHandle>>,
}

impl TrendMicroDriver {
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

    fn interpret(stdout: &str, exit_code: Option<i32>) -> (Verdict, Option<String>) {
        match serde_json::from_str::<ScanReport>(stdout) {
            Ok(report) => {
                if report.num_of_file_skipped > 0 && report.num_of_file_scanned == 0 {
                    (Verdict::Error, None)
                } else if report.num_of_file_infected > 0 {
                    let name = report
                        .infected_files
                        .first()
                        .map(|f| f.malware_name.clone())
                        .filter(|n| !n.is_empty());
                    (Verdict::Infected, name)
                } else if report.num_of_file_scanned > 0 {
                    (Verdict::Clean, None)
                } else {
                    (Verdict::Error, None)
                }
            }
            Err(_) => Self::interpret_stdout_fallback(stdout, exit_code),
        }
    }

    fn interpret_stdout_fallback(stdout: &str, exit_code: Option<i32>) -> (Verdict, Option<String>) {
        let lower = stdout.to_ascii_lowercase();
        if ["infected", "virus", "malware"]
            .iter()
            .any(|needle| lower.contains(needle))
        {
            (Verdict::Infected, None)
        } else if exit_code == Some(0) {
            (Verdict::Clean, None)
        } else {
            (Verdict::Error, None)
        }
    }
}

#[async_trait]
impl EngineDriver for TrendMicroDriver {
    fn engine(&self) -> EngineKind {
        EngineKind::TrendMicro
    }

    async fn start(&self) {
        if tokio::fs::metadata(&self.log_path).await.is_err() {
            tracing::warn!(
                path = %self.log_path.display(),
                "Trend Micro SCTRL log not readable, starting without a tailer"
            );
            return;
        }
        let (handle, _join) = tailer::spawn_tailer(
            self.log_path.clone(),
            self.cache.clone(),
            Arc::new(TrendMicroParser),
        );
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
        let args = [path_str.as_str(), "--json"];

        match run_with_timeout(&self.scan_binary, &args, self.timeout).await {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                let code = output.status.code();
                let (verdict, signature) = Self::interpret(&stdout, code);
                OnDemandOutcome {
                    verdict,
                    signature,
                    raw: RawArtifact {
                        exit_code: code,
                        stdout,
                        stderr,
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
            engine: EngineKind::TrendMicro,
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
            engine: EngineKind::TrendMicro,
            available: scan_binary_available,
            rts_enabled: tokio::fs::metadata(&self.log_path).await.is_ok(),
            manual_scan_available: scan_binary_available,
        }
    }

    fn rts_wait_config(&self) -> RtsWaitConfig {
        self.rts_wait
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skipped_with_nothing_scanned_is_error() {
        let stdout = r#"{"numOfFileScanned":0,"numOfFileSkipped":1,"numOfFileInfected":0}"#;
        let (verdict, sig) = TrendMicroDriver::interpret(stdout, Some(0));
        assert_eq!(verdict, Verdict::Error);
        assert_eq!(sig, None);
    }

    #[test]
    fn infected_extracts_malware_name() {
        let stdout = r#"{"numOfFileScanned":1,"numOfFileSkipped":0,"numOfFileInfected":1,"infectedFiles":[{"malwareName":"Eicar_test_file"}]}"#;
        let (verdict, sig) = TrendMicroDriver::interpret(stdout, Some(1));
        assert_eq!(verdict, Verdict::Infected);
        assert_eq!(sig.as_deref(), Some("Eicar_test_file"));
    }

    #[test]
    fn clean_when_scanned_without_infection() {
        let stdout = r#"{"numOfFileScanned":1,"numOfFileSkipped":0,"numOfFileInfected":0}"#;
        let (verdict, _) = TrendMicroDriver::interpret(stdout, Some(0));
        assert_eq!(verdict, Verdict::Clean);
    }

    #[test]
    fn nothing_scanned_or_skipped_is_error() {
        let stdout = r#"{"numOfFileScanned":0,"numOfFileSkipped":0,"numOfFileInfected":0}"#;
        let (verdict, _) = TrendMicroDriver::interpret(stdout, Some(0));
        assert_eq!(verdict, Verdict::Error);
    }

    #[test]
    fn malformed_json_falls_back_to_substring_match() {
        let (verdict, _) = TrendMicroDriver::interpret("Malware detected in stream", Some(1));
        assert_eq!(verdict, Verdict::Infected);
    }

    #[test]
    fn malformed_json_with_exit_zero_falls_back_to_clean() {
        let (verdict, _) = TrendMicroDriver::interpret("scan complete, nothing to report", Some(0));
        assert_eq!(verdict, Verdict::Clean);
    }

    #[test]
    fn malformed_json_with_nonzero_exit_falls_back_to_error() {
        let (verdict, _) = TrendMicroDriver::interpret("unexpected agent output", Some(2));
        assert_eq!(verdict, Verdict::Error);
    }
}
