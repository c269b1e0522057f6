//! The scan orchestrator (C5) — the central algorithm.
//!
//! Sequences an on-demand invocation against the active driver, falls back
//! to a bounded wait on the shared detection cache when on-demand cannot
//! produce a decisive verdict, and unconditionally cleans up the
//! materialized file on the way out.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::cache::{normalize_path, DetectionCache};
use crate::domain::{DetectionVerdict, EngineKind, Phase, ScanRequest, ScanResult, Verdict};
use crate::engines::EngineDriver;

pub struct ScanOrchestrator {
    driver: Arc<dyn EngineDriver>,
    cache: DetectionCache,
}

impl ScanOrchestrator {
    pub fn new(driver: Arc<dyn EngineDriver>, cache: DetectionCache) -> Self {
        Self { driver, cache }
    }

    /// Run the full per-request state machine: on-demand, RTS fallback,
    /// cleanup, result assembly. Always deletes the materialized file
    /// before returning, regardless of outcome.
    #[tracing::instrument(skip(self, request), fields(file_id = %request.file_id, size = request.size))]
    pub async fn scan(&self, request: &ScanRequest) -> ScanResult {
        let started = Instant::now();
        let key = normalize_path(&request.path);

        let on_demand = self.driver.on_demand(&request.path).await;
        let raw = on_demand.raw.clone();

        let (verdict, signature, phase) = match on_demand.verdict {
            // Decisive-verdict fast path: on-demand is authoritative and the
            // cache is never consulted, even if it holds a conflicting entry.
            Verdict::Clean => {
                tracing::debug!("on-demand scan reported clean");
                (Verdict::Clean, None, Phase::Manual)
            }
            Verdict::Infected => {
                tracing::info!(signature = ?on_demand.signature, "on-demand scan reported infected");
                (Verdict::Infected, on_demand.signature.clone(), Phase::Manual)
            }
            Verdict::Error => {
                tracing::debug!(
                    exit_code = ?raw.exit_code,
                    stderr = %raw.stderr,
                    "on-demand scan inconclusive, entering RTS fallback wait"
                );
                let (verdict, signature) = self.wait_for_rts(&key, request.size).await;
                (verdict, signature, Phase::Rts)
            }
        };

        self.cleanup(&request.path).await;

        let duration = started.elapsed().as_millis() as u64;
        tracing::info!(%verdict, ?phase, duration_ms = duration, "scan complete");

        ScanResult {
            file_id: request.file_id,
            file_name: request.file_name.clone(),
            status: verdict,
            engine: self.driver.engine(),
            signature,
            duration,
            raw,
        }
    }

    /// RTS fallback: poll the cache for an infected entry until the
    /// size-proportional wait budget is exhausted. The first observation
    /// wins; later entries for the same path are never consulted because
    /// the loop returns immediately on a hit.
    async fn wait_for_rts(&self, key: &str, size: u64) -> (Verdict, Option<String>) {
        let rts = self.driver.rts_wait_config();
        let max_wait = rts_max_wait(rts.base, rts.per_mb, size);
        let deadline = Instant::now() + max_wait;

        loop {
            if let Some(detection) = self.cache.take(key) {
                if detection.verdict == DetectionVerdict::Infected {
                    tracing::info!(signature = %detection.signature, "RTS cache hit");
                    return (Verdict::Infected, Some(detection.signature));
                }
            }

            if Instant::now() >= deadline {
                tracing::warn!("RTS wait exhausted with no cache hit");
                return (Verdict::Error, None);
            }

            tokio::time::sleep(rts.retry_delay).await;
        }
    }

    /// Unconditionally remove the materialized file. A missing file (RTS
    /// already quarantined it) is expected and silently swallowed; other
    /// errors are logged but never alter the verdict already computed.
    async fn cleanup(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "scanned file already removed (likely by RTS)");
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to delete scanned file");
            }
        }
    }

    pub fn engine(&self) -> EngineKind {
        self.driver.engine()
    }
}

fn rts_max_wait(
    base: std::time::Duration,
    per_mb: std::time::Duration,
    size_bytes: u64,
) -> std::time::Duration {
    const MIB: u64 = 1024 * 1024;
    let size_mb = size_bytes / MIB;
    base + per_mb * size_mb as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Detection, OnDemandOutcome, RawArtifact};
    use crate::engines::RtsWaitConfig;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    struct StubDriver {
        engine: EngineKind,
        on_demand_result: Mutex<Option<OnDemandOutcome>>,
        rts_wait: RtsWaitConfig,
    }

    impl StubDriver {
        fn new(engine: EngineKind, outcome: OnDemandOutcome, rts_wait: RtsWaitConfig) -> Self {
            Self {
                engine,
                on_demand_result: Mutex::new(Some(outcome)),
                rts_wait,
            }
        }
    }

    #[async_trait]
    impl EngineDriver for StubDriver {
        fn engine(&self) -> EngineKind {
            self.engine
        }

        async fn start(&self) {}
        async fn stop(&self) {}

        async fn on_demand(&self, _path: &Path) -> OnDemandOutcome {
            self.on_demand_result
                .lock()
                .unwrap()
                .take()
                .expect("on_demand called more than once in test")
        }

        async fn health(&self) -> crate::domain::EngineHealth {
            crate::domain::EngineHealth {
                engine: self.engine,
                healthy: true,
                version: None,
                last_check: chrono::Utc::now(),
                error: None,
            }
        }

        async fn info(&self) -> crate::domain::EngineInfo {
            crate::domain::EngineInfo {
                engine: self.engine,
                available: true,
                rts_enabled: true,
                manual_scan_available: true,
            }
        }

        fn rts_wait_config(&self) -> RtsWaitConfig {
            self.rts_wait
        }
    }

    fn fast_rts_wait() -> RtsWaitConfig {
        RtsWaitConfig {
            base: Duration::from_millis(60),
            per_mb: Duration::from_millis(0),
            retry_delay: Duration::from_millis(5),
        }
    }

    async fn request_with_file(dir: &tempfile::TempDir, contents: &[u8]) -> ScanRequest {
        let path = dir.path().join("scanned.bin");
        tokio::fs::write(&path, contents).await.unwrap();
        ScanRequest {
            file_id: Uuid::new_v4(),
            path,
            file_name: "scanned.bin".to_string(),
            size: contents.len() as u64,
        }
    }

    #[tokio::test]
    async fn fast_path_adopts_on_demand_infected_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let request = request_with_file(&dir, b"irrelevant").await;

        let cache = DetectionCache::new();
        // Seed a conflicting cache entry; the fast path must never consult it.
        cache.put(
            normalize_path(&request.path),
            Detection::infected(request.path.to_string_lossy(), "Cache-Sig", "raw"),
        );

        let driver = Arc::new(StubDriver::new(
            EngineKind::ClamAv,
            OnDemandOutcome {
                verdict: Verdict::Infected,
                signature: Some("OnDemand-Sig".to_string()),
                raw: RawArtifact::default(),
            },
            fast_rts_wait(),
        ));
        let orchestrator = ScanOrchestrator::new(driver, cache);

        let result = orchestrator.scan(&request).await;
        assert_eq!(result.status, Verdict::Infected);
        assert_eq!(result.signature.as_deref(), Some("OnDemand-Sig"));
    }

    #[tokio::test]
    async fn fast_path_adopts_on_demand_clean() {
        let dir = tempfile::tempdir().unwrap();
        let request = request_with_file(&dir, b"clean bytes").await;

        let driver = Arc::new(StubDriver::new(
            EngineKind::ClamAv,
            OnDemandOutcome {
                verdict: Verdict::Clean,
                signature: None,
                raw: RawArtifact::default(),
            },
            fast_rts_wait(),
        ));
        let orchestrator = ScanOrchestrator::new(driver, DetectionCache::new());

        let result = orchestrator.scan(&request).await;
        assert_eq!(result.status, Verdict::Clean);
        assert_eq!(result.signature, None);
    }

    #[tokio::test]
    async fn fallback_adopts_cache_hit_when_on_demand_errors() {
        let dir = tempfile::tempdir().unwrap();
        let request = request_with_file(&dir, b"quarantined already").await;

        let cache = DetectionCache::new();
        cache.put(
            normalize_path(&request.path),
            Detection::infected(request.path.to_string_lossy(), "Rts-Sig", "raw"),
        );

        let driver = Arc::new(StubDriver::new(
            EngineKind::ClamAv,
            OnDemandOutcome {
                verdict: Verdict::Error,
                signature: None,
                raw: RawArtifact::default(),
            },
            fast_rts_wait(),
        ));
        let orchestrator = ScanOrchestrator::new(driver, cache);

        let start = Instant::now();
        let result = orchestrator.scan(&request).await;
        assert_eq!(result.status, Verdict::Infected);
        assert_eq!(result.signature.as_deref(), Some("Rts-Sig"));
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn exhaustion_returns_error_after_full_wait_budget() {
        let dir = tempfile::tempdir().unwrap();
        let request = request_with_file(&dir, b"never detected").await;

        let driver = Arc::new(StubDriver::new(
            EngineKind::ClamAv,
            OnDemandOutcome {
                verdict: Verdict::Error,
                signature: None,
                raw: RawArtifact::default(),
            },
            fast_rts_wait(),
        ));
        let orchestrator = ScanOrchestrator::new(driver, DetectionCache::new());

        let start = Instant::now();
        let result = orchestrator.scan(&request).await;
        assert_eq!(result.status, Verdict::Error);
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn file_is_deleted_after_every_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let request = request_with_file(&dir, b"to be removed").await;
        let path = request.path.clone();

        let driver = Arc::new(StubDriver::new(
            EngineKind::ClamAv,
            OnDemandOutcome {
                verdict: Verdict::Clean,
                signature: None,
                raw: RawArtifact::default(),
            },
            fast_rts_wait(),
        ));
        let orchestrator = ScanOrchestrator::new(driver, DetectionCache::new());

        orchestrator.scan(&request).await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn cleanup_tolerates_file_already_removed_by_rts() {
        let dir = tempfile::tempdir().unwrap();
        let request = request_with_file(&dir, b"rts quarantined this").await;
        // Simulate RTS having already removed the file before on-demand runs.
        tokio::fs::remove_file(&request.path).await.unwrap();

        let driver = Arc::new(StubDriver::new(
            EngineKind::ClamAv,
            OnDemandOutcome {
                verdict: Verdict::Error,
                signature: None,
                raw: RawArtifact::default(),
            },
            fast_rts_wait(),
        ));
        let orchestrator = ScanOrchestrator::new(driver, DetectionCache::new());

        // Should not panic on double-delete and should still reach a verdict.
        let result = orchestrator.scan(&request).await;
        assert_eq!(result.status, Verdict::Error);
    }
}
