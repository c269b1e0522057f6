//! Shared data model for the scan coordination core.
//!
//! These types cross every component boundary (parser -> cache -> orchestrator
//! -> ingress) and carry no behavior beyond small constructors.

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Which antivirus backend is active for this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    ClamAv,
    TrendMicro,
    Mock,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::ClamAv => "clamav",
            EngineKind::TrendMicro => "trendmicro",
            EngineKind::Mock => "mock",
        }
    }
}

impl std::str::FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "clamav" => Ok(EngineKind::ClamAv),
            "trendmicro" => Ok(EngineKind::TrendMicro),
            "mock" => Ok(EngineKind::Mock),
            other => Err(format!(
                "unrecognized engine '{other}', expected clamav|trendmicro|mock"
            )),
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of a scan, irrespective of which engine produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Clean,
    Infected,
    Error,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Verdict::Clean => "clean",
            Verdict::Infected => "infected",
            Verdict::Error => "error",
        };
        f.write_str(s)
    }
}

/// Which path produced a detection. Carried for observability only; it does
/// not change orchestration logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Produced by the real-time on-access scanner via the tailed log.
    Rts,
    /// Produced by a synchronous on-demand invocation.
    Manual,
}

/// A normalized detection, emitted either by a log parser or by a driver's
/// on-demand invocation.
#[derive(Debug, Clone)]
pub struct Detection {
    pub absolute_path: String,
    pub verdict: DetectionVerdict,
    pub signature: String,
    pub raw_line: String,
    pub created_at: Instant,
}

/// Parsers only ever emit a decisive verdict; ambiguous lines are skipped
/// entirely rather than represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionVerdict {
    Infected,
    Clean,
}

impl Detection {
    pub fn infected(absolute_path: impl Into<String>, signature: impl Into<String>, raw_line: impl Into<String>) -> Self {
        Self {
            absolute_path: absolute_path.into(),
            verdict: DetectionVerdict::Infected,
            signature: signature.into(),
            raw_line: raw_line.into(),
            created_at: Instant::now(),
        }
    }
}

/// Per-request context threaded through the orchestrator.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub file_id: uuid::Uuid,
    pub path: std::path::PathBuf,
    pub file_name: String,
    pub size: u64,
}

/// The orchestrator's final verdict for a request.
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    #[serde(rename = "fileId")]
    pub file_id: uuid::Uuid,
    #[serde(rename = "fileName")]
    pub file_name: String,
    pub status: Verdict,
    pub engine: EngineKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub duration: u64,
    /// Opaque driver output retained for diagnostics; never serialized to
    /// HTTP clients.
    #[serde(skip)]
    pub raw: RawArtifact,
}

/// Raw, opaque output from a driver's on-demand invocation. Not serialized to
/// clients; retained for diagnostics/logging only.
#[derive(Debug, Clone, Default)]
pub struct RawArtifact {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// The decisive (or non-decisive) result of a single on-demand invocation.
#[derive(Debug, Clone)]
pub struct OnDemandOutcome {
    pub verdict: Verdict,
    pub signature: Option<String>,
    pub raw: RawArtifact,
}

/// Health of one engine, as observed by checking whether its RTS log is
/// readable.
#[derive(Debug, Clone, Serialize)]
pub struct EngineHealth {
    pub engine: EngineKind,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub last_check: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Static descriptor of an engine's capabilities, independent of current
/// health.
#[derive(Debug, Clone, Serialize)]
pub struct EngineInfo {
    pub engine: EngineKind,
    pub available: bool,
    #[serde(rename = "rtsEnabled")]
    pub rts_enabled: bool,
    #[serde(rename = "manualScanAvailable")]
    pub manual_scan_available: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_kind_serializes_to_the_wire_names_used_by_as_str() {
        assert_eq!(serde_json::to_string(&EngineKind::ClamAv).unwrap(), "\"clamav\"");
        assert_eq!(
            serde_json::to_string(&EngineKind::TrendMicro).unwrap(),
            "\"trendmicro\""
        );
        assert_eq!(serde_json::to_string(&EngineKind::Mock).unwrap(), "\"mock\"");
    }
}
