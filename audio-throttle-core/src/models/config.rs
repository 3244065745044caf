use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ThrottleError;

/// Tunables for an `AudioThrottler`.
///
/// All intervals are in milliseconds so the struct round-trips through JSON
/// settings files unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Seconds of audio the ring buffer holds (default: 4).
    pub buffer_seconds: u32,

    /// Cadence of the capture loop and the readiness wait (default: 100).
    pub poll_interval_ms: u64,

    /// Delay between starting the silencer and starting recording (default: 50).
    pub warmup_delay_ms: u64,

    /// Ceiling for `wait_buffer_ready`. `None` uses `buffer_seconds`.
    pub ready_timeout_ms: Option<u64>,

    /// Window length used by the silence-position heuristic (default: 500).
    pub silence_window_ms: u64,
}

impl ThrottleConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.buffer_seconds == 0 {
            return Err("buffer seconds must be positive".into());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll interval must be positive".into());
        }
        if self.silence_window_ms == 0 {
            return Err("silence window must be positive".into());
        }
        Ok(())
    }

    /// Parse and validate a JSON settings document.
    ///
    /// Missing fields fall back to their defaults.
    pub fn from_json(json: &str) -> Result<Self, ThrottleError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ThrottleError::ConfigurationFailed(format!("invalid throttle config: {}", e)))?;
        config.validate().map_err(ThrottleError::ConfigurationFailed)?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn warmup_delay(&self) -> Duration {
        Duration::from_millis(self.warmup_delay_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        self.ready_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| Duration::from_secs(self.buffer_seconds as u64))
    }

    pub fn silence_window(&self) -> Duration {
        Duration::from_millis(self.silence_window_ms)
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            buffer_seconds: 4,
            poll_interval_ms: 100,
            warmup_delay_ms: 50,
            ready_timeout_ms: None,
            silence_window_ms: 500,
        }
    }
}
