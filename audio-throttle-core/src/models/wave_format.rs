//! Capture format descriptor and the buffer thresholds derived from it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Layout of the raw bytes delivered by a capture device.
///
/// Discovered from the endpoint when a capture session opens and immutable
/// for the life of that session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WaveFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl WaveFormat {
    pub fn new(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
        }
    }

    /// 16-bit integer PCM.
    pub fn pcm16(sample_rate: u32, channels: u16) -> Self {
        Self::new(sample_rate, channels, 16)
    }

    /// Bytes per frame: `channels * bits_per_sample / 8`.
    pub fn block_align(&self) -> usize {
        self.channels as usize * self.bits_per_sample as usize / 8
    }

    /// `sample_rate * block_align`, e.g. 192000 for 48 kHz stereo 16-bit.
    pub fn average_bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.block_align()
    }

    /// Byte length of `duration` at this format, rounded down to whole frames.
    pub fn bytes_for(&self, duration: Duration) -> usize {
        let frames = (self.sample_rate as f64 * duration.as_secs_f64()) as usize;
        frames * self.block_align()
    }

    /// Playback time covered by `bytes` at this format.
    pub fn duration_of(&self, bytes: usize) -> Duration {
        let bps = self.average_bytes_per_second();
        if bps == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(bytes as f64 / bps as f64)
    }

    /// Derive the ring sizing and readiness thresholds for this format.
    pub fn thresholds(&self, buffer_seconds: u32, silence_window: Duration) -> BufferThresholds {
        let bytes_per_second = self.average_bytes_per_second();
        let max_length = bytes_per_second * buffer_seconds as usize;
        // the heuristic models the stream as 16-bit samples regardless of
        // the actual sample width
        let shorts_per_second = bytes_per_second / 2;
        let silence_window_samples = (shorts_per_second as u128 * silence_window.as_millis() / 1_000) as usize;

        BufferThresholds {
            bytes_per_second,
            max_length,
            half_capacity: max_length / 2,
            read_offset: max_length / 4,
            silence_window_samples,
        }
    }
}

/// Byte counts the throttler compares the ring against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferThresholds {
    /// One second of audio; the size of a regular read.
    pub bytes_per_second: usize,
    /// Ring capacity.
    pub max_length: usize,
    pub half_capacity: usize,
    /// Minimum fill before an untrimmed read releases data.
    pub read_offset: usize,
    /// Width of one silence-detection window, in 16-bit samples.
    pub silence_window_samples: usize,
}

impl BufferThresholds {
    pub fn is_half_full(&self, count: usize) -> bool {
        count > self.half_capacity
    }

    pub fn is_ready(&self, count: usize) -> bool {
        count > self.read_offset
    }
}
