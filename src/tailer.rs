//! The log tailer (C3).
//!
//! Follows an append-only log file from its current end-of-file, survives
//! external rotation (rename or truncate), and forwards every infected
//! detection it parses into the shared cache. Runs as a background tokio
//! task for the lifetime of the driver.
//!
//! Event notification is provided by the `notify` crate when the platform
//! supports it; its callback only wakes the poll loop early; the loop
//! itself always re-stats and re-reads the file, which is what makes the
//! tailer correct even when `notify` can't be initialized at all (the
//! mandatory fallback for containerized deployments where the log file is
//! created by shell redirection outside any notification graph).

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cache::{normalize_path, DetectionCache};
use crate::domain::DetectionVerdict;
use crate::parsers::LineParser;

const EVENT_DRIVEN_POLL_INTERVAL: Duration = Duration::from_millis(50);
const FALLBACK_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A handle used to cooperatively stop a running tailer.
#[derive(Clone)]
pub struct TailerHandle {
    cancel: CancellationToken,
}

impl TailerHandle {
    /// Idempotent: cancelling twice is a no-op.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Spawn a tailer for `log_path`, forwarding parsed detections into `cache`.
pub fn spawn_tailer(
    log_path: PathBuf,
    cache: DetectionCache,
    parser: Arc<dyn LineParser>,
) -> (TailerHandle, tokio::task::JoinHandle<()>) {
    let cancel = CancellationToken::new();
    let task_token = cancel.clone();
    let handle = tokio::spawn(async move {
        run(log_path, cache, parser, task_token).await;
    });
    (TailerHandle { cancel }, handle)
}

async fn run(
    log_path: PathBuf,
    cache: DetectionCache,
    parser: Arc<dyn LineParser>,
    cancel: CancellationToken,
) {
    let (poll_interval, _watcher) = init_watcher(&log_path);
    let mut state = TailState::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(log_path = %log_path.display(), "log tailer stopping");
                break;
            }
            _ = tokio::time::sleep(poll_interval) => {
                state.poll_once(&log_path, &cache, parser.as_ref()).await;
            }
        }
    }
}

/// Try to watch the log file's parent directory so the poll loop can wake
/// promptly on writes. Returns the interval to poll at and the watcher
/// (which must be kept alive for as long as we want events), or falls back
/// to a plain polling interval if the platform/sandbox doesn't support
/// watching at all.
fn init_watcher(log_path: &Path) -> (Duration, Option<notify::RecommendedWatcher>) {
    use notify::Watcher;

    let parent = match log_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let watcher = notify::recommended_watcher(|res: notify::Result<notify::Event>| {
        if let Err(e) = res {
            tracing::debug!(error = %e, "log tailer watch event error");
        }
    });

    match watcher {
        Ok(mut watcher) => match watcher.watch(&parent, notify::RecursiveMode::NonRecursive) {
            Ok(()) => (EVENT_DRIVEN_POLL_INTERVAL, Some(watcher)),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %parent.display(),
                    "falling back to plain polling: could not watch log directory"
                );
                (FALLBACK_POLL_INTERVAL, None)
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "falling back to plain polling: notify watcher unavailable");
            (FALLBACK_POLL_INTERVAL, None)
        }
    }
}

/// Tracks read position and rotation identity across polls.
struct TailState {
    offset: u64,
    buffer: String,
    identity: Option<FileIdentity>,
    started: bool,
}

#[derive(PartialEq, Eq, Clone, Copy)]
struct FileIdentity {
    #[cfg(unix)]
    dev: u64,
    #[cfg(unix)]
    ino: u64,
    #[cfg(not(unix))]
    len_at_open: u64,
}

impl FileIdentity {
    fn of(metadata: &std::fs::Metadata) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            Self {
                dev: metadata.dev(),
                ino: metadata.ino(),
            }
        }
        #[cfg(not(unix))]
        {
            Self {
                len_at_open: metadata.len(),
            }
        }
    }
}

impl TailState {
    fn new() -> Self {
        Self {
            offset: 0,
            buffer: String::new(),
            identity: None,
            started: false,
        }
    }

    async fn poll_once(&mut self, log_path: &Path, cache: &DetectionCache, parser: &dyn LineParser) {
        let metadata = match tokio::fs::metadata(log_path).await {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(path = %log_path.display(), error = %e, "log file not accessible");
                return;
            }
        };

        let identity = FileIdentity::of(&metadata);
        let rotated = self.identity.is_some_and(|prev| prev != identity);
        let truncated = metadata.len() < self.offset;

        if !self.started {
            // First observation: begin at current end-of-file, never replay
            // history.
            self.offset = metadata.len();
            self.identity = Some(identity);
            self.started = true;
            return;
        }

        if rotated || truncated {
            tracing::info!(path = %log_path.display(), "log rotation detected, reopening from start");
            self.offset = 0;
            self.buffer.clear();
            self.identity = Some(identity);
        }

        if metadata.len() <= self.offset {
            return;
        }

        match read_new_bytes(log_path, self.offset) {
            Ok((bytes, new_offset)) => {
                self.offset = new_offset;
                self.buffer.push_str(&String::from_utf8_lossy(&bytes));
                self.drain_complete_lines(cache, parser);
            }
            Err(e) => {
                tracing::warn!(path = %log_path.display(), error = %e, "error reading log file, will retry");
            }
        }
    }

    fn drain_complete_lines(&mut self, cache: &DetectionCache, parser: &dyn LineParser) {
        while let Some(idx) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=idx).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                continue;
            }
            if let Some(detection) = parser.parse(line) {
                if detection.verdict == DetectionVerdict::Infected {
                    let key = normalize_path(Path::new(&detection.absolute_path));
                    cache.put(key, detection);
                }
            }
        }
    }
}

fn read_new_bytes(path: &Path, offset: u64) -> std::io::Result<(Vec<u8>, u64)> {
    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::new();
    let read = file.read_to_end(&mut buf)?;
    Ok((buf, offset + read as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::clamav::ClamAvParser;
    use std::io::Write;

    #[tokio::test]
    async fn first_poll_starts_at_eof_without_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clamav.log");
        std::fs::write(&path, "/tmp/old.bin: Old-Sig FOUND\n").unwrap();

        let cache = DetectionCache::new();
        let parser = ClamAvParser;
        let mut state = TailState::new();
        state.poll_once(&path, &cache, &parser).await;

        assert!(cache.peek(&normalize_path(Path::new("/tmp/old.bin"))).is_none());
    }

    #[tokio::test]
    async fn subsequent_poll_picks_up_new_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clamav.log");
        std::fs::write(&path, "").unwrap();

        let cache = DetectionCache::new();
        let parser = ClamAvParser;
        let mut state = TailState::new();
        state.poll_once(&path, &cache, &parser).await; // establishes EOF baseline

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "/tmp/new.bin: Eicar-Test-Signature FOUND").unwrap();

        state.poll_once(&path, &cache, &parser).await;

        let det = cache
            .peek(&normalize_path(Path::new("/tmp/new.bin")))
            .expect("detection should be cached");
        assert_eq!(det.signature, "Eicar-Test-Signature");
    }

    #[tokio::test]
    async fn truncation_resets_offset_and_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clamav.log");
        std::fs::write(&path, "").unwrap();

        let cache = DetectionCache::new();
        let parser = ClamAvParser;
        let mut state = TailState::new();
        state.poll_once(&path, &cache, &parser).await;

        std::fs::write(&path, "partial no newline").unwrap();
        state.poll_once(&path, &cache, &parser).await;
        assert_eq!(state.buffer, "partial no newline");

        // Rotation: truncate to a smaller, fresh file.
        std::fs::write(&path, "/tmp/z.bin: Sig FOUND\n").unwrap();
        state.poll_once(&path, &cache, &parser).await;

        let det = cache.peek(&normalize_path(Path::new("/tmp/z.bin")));
        assert!(det.is_some());
    }

    #[tokio::test]
    async fn partial_trailing_line_is_buffered_until_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clamav.log");
        std::fs::write(&path, "").unwrap();

        let cache = DetectionCache::new();
        let parser = ClamAvParser;
        let mut state = TailState::new();
        state.poll_once(&path, &cache, &parser).await;

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "/tmp/partial.bin: Sig FOU").unwrap();
        state.poll_once(&path, &cache, &parser).await;
        assert!(cache.peek(&normalize_path(Path::new("/tmp/partial.bin"))).is_none());

        writeln!(file, "ND").unwrap();
        state.poll_once(&path, &cache, &parser).await;
        assert!(cache.peek(&normalize_path(Path::new("/tmp/partial.bin"))).is_some());
    }
}
