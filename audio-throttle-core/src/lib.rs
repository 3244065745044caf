//! # audio-throttle-core
//!
//! Platform-agnostic loopback capture throttle.
//!
//! Buffers the bytes of a loopback capture in a fixed-size ring and hands
//! them to a polling consumer one bounded slice at a time, with optional
//! trimming of leading or trailing audio. Platform backends (Windows WASAPI)
//! implement the `CaptureBackend` trait and plug into the generic
//! `AudioThrottler`.
//!
//! ## Architecture
//!
//! ```text
//! audio-throttle-core (this crate)
//! ├── traits/       ← CaptureBackend, LoopbackCapture, Silencer, ThrottleDelegate
//! ├── models/       ← ThrottleError, ThrottleState, ThrottleConfig, WaveFormat, AudioWaveBuffer
//! ├── processing/   ← RingBuffer, SilenceTrim, silence-position heuristic
//! └── session/      ← AudioThrottler (generic orchestrator), CancellationSignal
//! ```

pub mod models;
pub mod processing;
pub mod session;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::config::ThrottleConfig;
pub use models::diagnostics::ThrottleDiagnostics;
pub use models::error::{Result, ThrottleError};
pub use models::state::ThrottleState;
pub use models::wave_buffer::AudioWaveBuffer;
pub use models::wave_format::{BufferThresholds, WaveFormat};
pub use processing::ring_buffer::RingBuffer;
pub use processing::silence::{SilenceScan, SilenceTrim};
pub use session::cancellation::CancellationSignal;
pub use session::throttler::AudioThrottler;
pub use traits::capture_backend::{CaptureBackend, DataAvailableCallback, LoopbackCapture, Silencer};
pub use traits::throttle_delegate::ThrottleDelegate;
