// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pipeline configuration.
//
// Three retry budgets are kept apart on purpose: chunk-level
// (`LinkConfig::chunk_attempts`), reconnect-level (`LinkConfig::reconnect`)
// and job-level (`QueueConfig::job_retry`).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BonwerkError, Result};

/// Probe sent by the heartbeat: DLE EOT 1 (real-time printer status request).
pub const DEFAULT_HEARTBEAT_PROBE: [u8; 3] = [0x10, 0x04, 0x01];

/// Top-level settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BonwerkConfig {
    pub link: LinkConfig,
    pub queue: QueueConfig,
    pub store: StoreConfig,
    pub preview: PreviewConfig,
    pub text_encoding: TextEncoding,
}

impl BonwerkConfig {
    /// Parse and validate a JSON document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&data)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        let p = &self.link.pacing;
        if p.min_chunk_size == 0 {
            return Err(BonwerkError::Config("pacing.min_chunk_size must be > 0".into()));
        }
        if !(p.min_chunk_size <= p.initial_chunk_size && p.initial_chunk_size <= p.max_chunk_size)
        {
            return Err(BonwerkError::Config(format!(
                "pacing chunk sizes must satisfy min <= initial <= max (got {} / {} / {})",
                p.min_chunk_size, p.initial_chunk_size, p.max_chunk_size
            )));
        }
        if !(p.min_delay_ms <= p.initial_delay_ms && p.initial_delay_ms <= p.max_delay_ms) {
            return Err(BonwerkError::Config(
                "pacing delays must satisfy min <= initial <= max".into(),
            ));
        }
        if p.successes_per_step == 0 {
            return Err(BonwerkError::Config("pacing.successes_per_step must be > 0".into()));
        }
        if self.link.chunk_attempts == 0 {
            return Err(BonwerkError::Config("link.chunk_attempts must be > 0".into()));
        }
        if self.link.reconnect.max_attempts == 0 {
            return Err(BonwerkError::Config("link.reconnect.max_attempts must be > 0".into()));
        }
        if self.queue.job_retry.max_attempts == 0 {
            return Err(BonwerkError::Config("queue.job_retry.max_attempts must be > 0".into()));
        }
        if self.queue.job_timeout_ms == 0 {
            return Err(BonwerkError::Config("queue.job_timeout_ms must be > 0".into()));
        }
        if self.link.heartbeat.enabled && self.link.heartbeat.probe.is_empty() {
            return Err(BonwerkError::Config("heartbeat.probe must not be empty".into()));
        }
        if self.preview.paper_width_dots < 8 {
            return Err(BonwerkError::Config("preview.paper_width_dots must be >= 8".into()));
        }
        Ok(())
    }
}

/// Connection manager settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Per-attempt timeout for one chunk write.
    pub write_timeout_ms: u64,
    /// Per-attempt timeout for one connect / reconnect.
    pub connect_timeout_ms: u64,
    /// Tries per chunk before the link is declared degraded.
    pub chunk_attempts: u32,
    pub pacing: PacingConfig,
    pub heartbeat: HeartbeatConfig,
    pub reconnect: BackoffConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: 2_000,
            connect_timeout_ms: 10_000,
            chunk_attempts: 3,
            pacing: PacingConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            reconnect: BackoffConfig {
                max_attempts: 6,
                base_delay_ms: 500,
                max_delay_ms: 30_000,
                jitter: true,
            },
        }
    }
}

impl LinkConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Adaptive chunking: additive increase, multiplicative decrease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub initial_chunk_size: usize,
    pub min_chunk_size: usize,
    /// Platform maximum (e.g. negotiated BLE MTU minus ATT overhead).
    pub max_chunk_size: usize,
    /// Bytes added after `successes_per_step` consecutive successes.
    pub chunk_step: usize,
    pub successes_per_step: u32,
    pub initial_delay_ms: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Milliseconds removed from the delay on each step-up.
    pub delay_step_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            initial_chunk_size: 180,
            min_chunk_size: 20,
            max_chunk_size: 512,
            chunk_step: 20,
            successes_per_step: 8,
            initial_delay_ms: 20,
            min_delay_ms: 5,
            max_delay_ms: 250,
            delay_step_ms: 5,
        }
    }
}

/// Liveness probing while the link is idle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub timeout_ms: u64,
    #[serde(with = "crate::ops::hex_bytes")]
    pub probe: Vec<u8>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 5_000,
            timeout_ms: 1_500,
            probe: DEFAULT_HEARTBEAT_PROBE.to_vec(),
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Exponential backoff with cap and optional jitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter: true,
        }
    }
}

impl BackoffConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Print queue settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Budget for job-level failures only.  Link drops never spend it.
    pub job_retry: BackoffConfig,
    /// Longest one dispatch of a job may run before it counts as a failed
    /// attempt.
    pub job_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            job_retry: BackoffConfig::default(),
            job_timeout_ms: 120_000,
        }
    }
}

impl QueueConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }
}

/// Offline job store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Jobs older than this are purged and never dispatched.
    pub job_ttl_secs: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            job_ttl_secs: 24 * 60 * 60,
        }
    }
}

impl StoreConfig {
    pub fn job_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.job_ttl_secs)
    }
}

/// Preview canvas settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Printable width in dots (384 for 58mm heads, 576 for 80mm).
    pub paper_width_dots: u32,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            paper_width_dots: 384,
        }
    }
}

/// Character encoding applied to `Op::Text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TextEncoding {
    #[default]
    Utf8,
    /// 7-bit ASCII; anything else becomes `?`.
    Ascii,
}
