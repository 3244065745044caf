//! Silence-trim read modes and the silence-position heuristic.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::error::ThrottleError;

/// How `AudioThrottler::read` treats the audio around a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SilenceTrim {
    /// Release one second once the read offset is reached.
    #[default]
    None,
    /// Flush everything accumulated so far, then release up to one second.
    TrimStart,
    /// Release the whole buffer.
    TrimEnd,
}

impl fmt::Display for SilenceTrim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::TrimStart => "trim_start",
            Self::TrimEnd => "trim_end",
        };
        f.write_str(name)
    }
}

impl FromStr for SilenceTrim {
    type Err = ThrottleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "trim_start" => Ok(Self::TrimStart),
            "trim_end" => Ok(Self::TrimEnd),
            other => Err(ThrottleError::ConfigurationFailed(format!(
                "unsupported silence trim mode: {}",
                other
            ))),
        }
    }
}

/// Which silent window `position_without_silence` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilenceScan {
    /// Stop at the first silent window.
    First,
    /// Scan the whole buffer and report the last silent window.
    Last,
}

/// Byte offset of a silent window in `data`, or `fallback` if none is silent.
///
/// `data` is read as 16-bit little-endian samples in windows of
/// `window_samples`, stepping half a window at a time. A window is silent
/// when its mean sample value is exactly zero; samples past the end of
/// `data` count as zero.
pub fn position_without_silence(data: &[u8], window_samples: usize, scan: SilenceScan, fallback: usize) -> usize {
    if window_samples == 0 || data.len() < 2 {
        return fallback;
    }

    let window_bytes = window_samples * 2;
    let step = (window_samples / 2).max(1) * 2;
    let mut found = None;

    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + window_bytes).min(data.len());
        let sum: i64 = data[offset..end]
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as i64)
            .sum();

        if sum == 0 {
            found = Some(offset);
            if scan == SilenceScan::First {
                break;
            }
        }
        offset += step;
    }

    match found {
        Some(position) => {
            log::trace!("silent window at byte {} ({:?})", position, scan);
            position
        }
        None => fallback,
    }
}
