//! The ingress adapter (C6) — bridges the HTTP layer to the scan core.
//!
//! Accepts a decoded `(bytes, filename, size)` triple, assigns a
//! collision-free file ID, materializes the upload into the shared scan
//! directory, and drives it through the orchestrator.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::domain::{ScanRequest, ScanResult};
use crate::orchestrator::ScanOrchestrator;

#[derive(Debug, Error)]
pub enum IngressError {
    #[error("failed to write upload to disk: {0}")]
    Write(std::io::Error),
}

pub struct IngressAdapter {
    upload_dir: PathBuf,
    orchestrator: Arc<ScanOrchestrator>,
}

impl IngressAdapter {
    pub fn new(upload_dir: PathBuf, orchestrator: Arc<ScanOrchestrator>) -> Self {
        Self {
            upload_dir,
            orchestrator,
        }
    }

    /// Materialize `bytes` under a fresh file ID and run it through the
    /// orchestrator. On a write failure the partial file is removed before
    /// the error is surfaced; file IDs are UUID v4, so paths never collide
    /// across concurrent requests.
    #[tracing::instrument(skip(self, bytes), fields(file_name = %file_name, size = bytes.len()))]
    pub async fn ingest(&self, file_name: String, bytes: Vec<u8>) -> Result<ScanResult, IngressError> {
        let file_id = Uuid::new_v4();
        let size = bytes.len() as u64;
        let path = self.upload_dir.join(format!("{file_id}{}", extension_of(&file_name)));

        if let Err(e) = tokio::fs::write(&path, &bytes).await {
            tracing::error!(path = %path.display(), error = %e, "failed to materialize upload");
            let _ = tokio::fs::remove_file(&path).await;
            return Err(IngressError::Write(e));
        }

        let request = ScanRequest {
            file_id,
            path,
            file_name,
            size,
        };

        Ok(self.orchestrator.scan(&request).await)
    }
}

/// The final `.xxx` suffix of `filename`, including the dot, or empty if
/// there is none. Matches the teacher's extension-preserving upload path
/// convention while keeping the on-disk name unguessable.
fn extension_of(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && !ext.contains('/') => format!(".{ext}"),
        _ => String::new(),
    }
}
