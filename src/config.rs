//! Configuration for the scanning gateway.
//!
//! Unlike the teacher project's TOML-file configuration, this gateway is
//! configured entirely from the environment per the deployment contract: a
//! single process runs a single active engine, and every knob has a sane
//! default so an empty environment still produces a working (mock-engine)
//! configuration.

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::domain::EngineKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidValue { var: &'static str, reason: String },

    #[error("{0}")]
    Validation(String),
}

/// Root configuration, loaded once at startup and shared read-only via `Arc`.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub active_engine: EngineKind,
    pub upload_dir: PathBuf,
    pub max_file_size: u64,
    pub log_level: String,
    pub engine: EngineConfig,
}

/// Per-engine knobs. Only the section for the active engine is populated
/// with real values; the others carry defaults but are never used.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub rts_log_path: PathBuf,
    pub scan_binary: PathBuf,
    pub timeout_ms: u64,
    pub rts_cache_base_delay_ms: u64,
    pub rts_cache_delay_per_mb_ms: u64,
}

impl GatewayConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let active_engine = env_string("AV_ENGINE", "clamav");
        let active_engine = EngineKind::from_str(&active_engine).map_err(|reason| {
            ConfigError::InvalidValue {
                var: "AV_ENGINE",
                reason,
            }
        })?;

        let port = parse_env("PORT", 3000u16)?;
        let max_file_size = parse_env("MAX_FILE_SIZE", 104_857_600u64)?;
        let upload_dir = PathBuf::from(env_string("UPLOAD_DIR", "/tmp/av-scanner"));
        let log_level = env_string("LOG_LEVEL", "info");

        let prefix = match active_engine {
            EngineKind::ClamAv => "CLAMAV",
            EngineKind::TrendMicro => "TRENDMICRO",
            EngineKind::Mock => "MOCK",
        };

        let default_log_path = match active_engine {
            EngineKind::ClamAv => "/var/log/clamav/clamav.log",
            EngineKind::TrendMicro => "/var/log/ds_agent/ds_am.log",
            EngineKind::Mock => "/dev/null",
        };
        let default_binary = match active_engine {
            EngineKind::ClamAv => "/usr/bin/clamdscan",
            EngineKind::TrendMicro => "/opt/ds_agent/dsa_scan",
            EngineKind::Mock => "/bin/true",
        };

        let engine = EngineConfig {
            rts_log_path: PathBuf::from(env_string(
                &format!("{prefix}_RTS_LOG_PATH"),
                default_log_path,
            )),
            scan_binary: PathBuf::from(env_string(
                &format!("{prefix}_SCAN_BINARY"),
                default_binary,
            )),
            timeout_ms: parse_env(&format!("{prefix}_TIMEOUT"), 15_000u64)?,
            rts_cache_base_delay_ms: parse_env(&format!("{prefix}_RTS_CACHE_BASE_DELAY"), 500u64)?,
            rts_cache_delay_per_mb_ms: parse_env(
                &format!("{prefix}_RTS_CACHE_DELAY_PER_MB"),
                10u64,
            )?,
        };

        let config = Self {
            port,
            active_engine,
            upload_dir,
            max_file_size,
            log_level,
            engine,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Validation(
                "PORT must be in [1,65535]".to_string(),
            ));
        }
        if self.max_file_size < 1 {
            return Err(ConfigError::Validation(
                "MAX_FILE_SIZE must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// A minimal configuration for unit tests that need a `GatewayConfig`
    /// but not the full environment-loading path.
    #[cfg(test)]
    pub fn for_test(upload_dir: PathBuf) -> Self {
        Self {
            port: 3000,
            active_engine: EngineKind::Mock,
            upload_dir,
            max_file_size: 104_857_600,
            log_level: "info".to_string(),
            engine: EngineConfig {
                rts_log_path: PathBuf::from("/dev/null"),
                scan_binary: PathBuf::from("/bin/true"),
                timeout_ms: 15_000,
                rts_cache_base_delay_ms: 500,
                rts_cache_delay_per_mb_ms: 10,
            },
        }
    }
}

fn env_string(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(var: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
            var: Box::leak(var.to_string().into_boxed_str()),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
