//! # audio-throttle-windows
//!
//! Windows WASAPI backend for audio-throttle.
//!
//! Provides:
//! - `WasapiBackend`: `CaptureBackend` over the default render endpoint
//! - `WasapiLoopbackCapture`: loopback capture in shared mode
//! - `WasapiSilencer`: muted render stream that keeps the endpoint awake
//!
//! ## Platform Requirements
//! - Windows 10 1703+ (build 15063)
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use audio_throttle_core::{AudioThrottler, CancellationSignal, SilenceTrim};
//! use audio_throttle_windows::WasapiBackend;
//!
//! let throttler = Arc::new(AudioThrottler::new(WasapiBackend::new()));
//! let cancel = CancellationSignal::new();
//! tokio::spawn({
//!     let throttler = Arc::clone(&throttler);
//!     let cancel = cancel.clone();
//!     async move { throttler.run(cancel).await }
//! });
//! while let Ok(wave) = throttler.read(SilenceTrim::None).await {
//!     if let Some(wave) = wave {
//!         sink.write_all(wave.bytes())?;
//!     }
//! }
//! ```

#[cfg(target_os = "windows")]
pub mod backend;
#[cfg(target_os = "windows")]
pub mod com;
#[cfg(target_os = "windows")]
pub mod silencer;
#[cfg(target_os = "windows")]
pub mod wasapi_loopback;

#[cfg(target_os = "windows")]
pub use backend::WasapiBackend;
#[cfg(target_os = "windows")]
pub use com::WasapiError;
#[cfg(target_os = "windows")]
pub use silencer::WasapiSilencer;
#[cfg(target_os = "windows")]
pub use wasapi_loopback::WasapiLoopbackCapture;
