//! Mock engine driver: used in tests and local development when no real
//! antivirus engine is installed. Has no tailer — it is always healthy and
//! answers every on-demand scan synchronously from the file's own bytes.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{EngineHealth, EngineInfo, EngineKind, OnDemandOutcome, RawArtifact, Verdict};

use super::{EngineDriver, RtsWaitConfig};

const EICAR_SIGNATURE: &str = "EICAR-Test-File";

/// The EICAR test string, reconstructed at runtime so that the literal never
/// appears verbatim in source (on-access scanners on developer machines
/// would otherwise quarantine this very file). The obfuscated form replaces
/// the first `O` with an `x`.
fn eicar_test_string() -> String {
    const OBFUSCATED: &str =
        "X5x!P%@AP[4\\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*";
    OBFUSCATED.replacen('x', "O", 1)
}

pub struct MockDriver;

impl MockDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EngineDriver for MockDriver {
    fn engine(&self) -> EngineKind {
        EngineKind::Mock
    }

    async fn start(&self) {
        // No tailer: the mock engine has no RTS log to follow.
    }

    async fn stop(&self) {}

    async fn on_demand(&self, path: &Path) -> OnDemandOutcome {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return OnDemandOutcome {
                    verdict: Verdict::Error,
                    signature: None,
                    raw: RawArtifact {
                        exit_code: None,
                        stdout: String::new(),
                        stderr: e.to_string(),
                    },
                };
            }
        };

        let eicar = eicar_test_string();
        if contains_subslice(&bytes, eicar.as_bytes()) {
            OnDemandOutcome {
                verdict: Verdict::Infected,
                signature: Some(EICAR_SIGNATURE.to_string()),
                raw: RawArtifact {
                    exit_code: Some(1),
                    stdout: "EICAR test string detected".to_string(),
                    stderr: String::new(),
                },
            }
        } else {
            OnDemandOutcome {
                verdict: Verdict::Clean,
                signature: None,
                raw: RawArtifact {
                    exit_code: Some(0),
                    stdout: String::new(),
                    stderr: String::new(),
                },
            }
        }
    }

    async fn health(&self) -> EngineHealth {
        EngineHealth {
            engine: EngineKind::Mock,
            healthy: true,
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
            last_check: chrono::Utc::now(),
            error: None,
        }
    }

    async fn info(&self) -> EngineInfo {
        EngineInfo {
            engine: EngineKind::Mock,
            available: true,
            rts_enabled: false,
            manual_scan_available: true,
        }
    }

    fn rts_wait_config(&self) -> RtsWaitConfig {
        RtsWaitConfig {
            base: Duration::from_millis(500),
            per_mb: Duration::from_millis(10),
            retry_delay: Duration::from_millis(20),
        }
    }
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() || needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}
