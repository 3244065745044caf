//! `CaptureBackend` over the default Windows render endpoint.

use std::thread;

use audio_throttle_core::models::error::ThrottleError;
use audio_throttle_core::models::wave_format::WaveFormat;
use audio_throttle_core::traits::capture_backend::CaptureBackend;

use crate::com::{self, ComApartment, WasapiError};
use crate::silencer::WasapiSilencer;
use crate::wasapi_loopback::WasapiLoopbackCapture;

/// Loopback capture of whatever the default output device is playing.
#[derive(Debug, Default, Clone, Copy)]
pub struct WasapiBackend;

impl WasapiBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureBackend for WasapiBackend {
    type Capture = WasapiLoopbackCapture;
    type Silencer = WasapiSilencer;

    fn open_loopback(&self) -> Result<Option<WasapiLoopbackCapture>, ThrottleError> {
        Ok(probe_default_render_format()?.map(WasapiLoopbackCapture::new))
    }

    fn create_silencer(&self, format: &WaveFormat) -> Result<WasapiSilencer, ThrottleError> {
        Ok(WasapiSilencer::new(*format))
    }
}

/// Mix format of the default render endpoint, or `None` if there is none.
///
/// Runs on a short-lived thread so the caller's COM apartment (often an
/// async worker) is left untouched.
fn probe_default_render_format() -> Result<Option<WaveFormat>, WasapiError> {
    let handle = thread::Builder::new()
        .name("wasapi-endpoint-probe".into())
        .spawn(|| {
            let _com = ComApartment::enter()?;
            let Some(device) = com::default_render_device()? else {
                return Ok(None);
            };
            let audio_client = com::activate_client(&device)?;
            com::read_mix_format(&audio_client).map(Some)
        })
        .map_err(|e| WasapiError::Spawn("endpoint probe", e.to_string()))?;

    handle.join().map_err(|_| WasapiError::ThreadExited("endpoint probe"))?
}
