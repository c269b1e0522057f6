//! The shared detection cache (C2).
//!
//! Maps absolute, lexically normalized file paths to the most recent
//! infected `Detection` reported by the tailed RTS log. Clean verdicts are
//! never cached — a clean result is inferred by absence combined with a
//! successful on-demand scan (see the orchestrator).

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::domain::Detection;

const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// The sweeper cadence used in production (half the default TTL). Exposed so
/// callers that spawn the sweeper — the lifecycle controller — don't
/// maintain their own separate constant.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// Normalize a path into the cache key form used by both writers (the
/// tailer) and readers (the orchestrator).
///
/// Purely lexical: collapses `.`/`..` components and repeated separators
/// without ever touching the filesystem. This is deliberate — per spec,
/// symlinks at the parent levels are never resolved, only syntactic
/// normalization is required, and both sides must agree on the same key
/// whether or not the file still exists (the tailer observes detections
/// for files RTS has already quarantined/deleted).
pub fn normalize_path(path: &std::path::Path) -> String {
    use std::path::Component;

    let mut components: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match components.last() {
                Some(Component::Normal(_)) => {
                    components.pop();
                }
                _ => components.push(component),
            },
            other => components.push(other),
        }
    }

    let mut normalized = std::path::PathBuf::new();
    for component in components {
        normalized.push(component.as_os_str());
    }
    normalized.to_string_lossy().into_owned()
}

struct Inner {
    map: DashMap<String, Detection>,
    ttl: Duration,
    stop: Notify,
    stopped: std::sync::atomic::AtomicBool,
}

/// Concurrent path -> `Detection` store with TTL-based eviction.
///
/// Cheap to clone: internally an `Arc`, so every component that needs access
/// (tailer writers, orchestrator readers, the sweeper) shares one map.
#[derive(Clone)]
pub struct DetectionCache {
    inner: Arc<Inner>,
}

impl DetectionCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                map: DashMap::new(),
                ttl,
                stop: Notify::new(),
                stopped: std::sync::atomic::AtomicBool::new(false),
            }),
        }
    }

    /// Insert or overwrite the detection for `path`, stamping `created_at`
    /// to now.
    pub fn put(&self, path: String, mut detection: Detection) {
        detection.created_at = Instant::now();
        self.inner.map.insert(path, detection);
    }

    /// Atomically remove and return the entry for `path`, if present.
    ///
    /// Linearizable with respect to other `take` calls on the same key: the
    /// underlying `DashMap::remove` takes the shard's write lock, so at most
    /// one concurrent caller observes `Some`.
    pub fn take(&self, path: &str) -> Option<Detection> {
        self.inner.map.remove(path).map(|(_, v)| v)
    }

    /// Return a clone of the entry for `path` without removing it.
    pub fn peek(&self, path: &str) -> Option<Detection> {
        self.inner.map.get(path).map(|entry| entry.clone())
    }

    /// Spawn the background TTL sweeper. Runs every `cleanup_interval`
    /// (half the TTL by default) until `stop()` is called.
    pub fn spawn_cleanup(&self, cleanup_interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(cleanup_interval) => {
                        cache.sweep();
                    }
                    _ = cache.inner.stop.notified() => {
                        tracing::debug!("detection cache sweeper stopping");
                        break;
                    }
                }
            }
        })
    }

    fn sweep(&self) {
        let ttl = self.inner.ttl;
        let before = self.inner.map.len();
        self.inner
            .map
            .retain(|_, det| det.created_at.elapsed() <= ttl);
        let removed = before.saturating_sub(self.inner.map.len());
        if removed > 0 {
            tracing::debug!(removed, "swept expired detections");
        }
    }

    /// Idempotent cooperative shutdown of the sweeper task.
    pub fn stop(&self) {
        if !self.inner.stopped.swap(true, std::sync::atomic::Ordering::SeqCst) {
            self.inner.stop.notify_waiters();
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.map.len()
    }
}

impl Default for DetectionCache {
    fn default() -> Self {
        Self::new()
    }
}
