use std::sync::Arc;

use crate::models::error::ThrottleError;
use crate::models::wave_format::WaveFormat;

/// Callback invoked when the capture device has raw bytes available.
///
/// Fires on the backend's capture thread, concurrently with readers.
/// The slice is only valid for the duration of the call.
pub type DataAvailableCallback = Arc<dyn Fn(&[u8]) + Send + Sync + 'static>;

/// Provider of the loopback endpoint and its companion silencer stream.
///
/// Methods here and on `LoopbackCapture` / `Silencer` are synchronous and may
/// block briefly while a device thread starts or joins. The throttler calls
/// them only during setup and teardown, never inside the polling loop.
///
/// Implemented by:
/// - `WasapiBackend` (Windows)
pub trait CaptureBackend: Send + Sync {
    type Capture: LoopbackCapture;
    type Silencer: Silencer;

    /// Open a loopback capture on the active output endpoint.
    ///
    /// Returns `Ok(None)` when no endpoint is configured; the throttler
    /// treats that as a silent no-op rather than an error.
    fn open_loopback(&self) -> Result<Option<Self::Capture>, ThrottleError>;

    /// Create a muted playback stream in `format` that keeps the endpoint
    /// from suspending while it is captured.
    fn create_silencer(&self, format: &WaveFormat) -> Result<Self::Silencer, ThrottleError>;
}

/// An opened loopback capture device.
///
/// Dropping the value releases the device.
pub trait LoopbackCapture: Send {
    /// Format of the bytes passed to the callback.
    fn wave_format(&self) -> WaveFormat;

    /// Start delivering captured bytes via `callback`.
    fn start_recording(&mut self, callback: DataAvailableCallback) -> Result<(), ThrottleError>;

    /// Stop delivering bytes. The device stays open until dropped.
    fn stop_recording(&mut self) -> Result<(), ThrottleError>;
}

/// Muted playback stream. Dropping the value disposes the stream.
pub trait Silencer: Send {
    fn play(&mut self) -> Result<(), ThrottleError>;

    fn stop(&mut self) -> Result<(), ThrottleError>;
}
