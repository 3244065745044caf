//! COM apartment and MMDevice helpers shared by the capture and silencer threads.

use thiserror::Error;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use audio_throttle_core::models::error::ThrottleError;
use audio_throttle_core::models::wave_format::WaveFormat;

/// Failures of the WASAPI plumbing, folded into `ThrottleError::Device`.
#[derive(Debug, Error)]
pub enum WasapiError {
    #[error("{call} failed: {source}")]
    Call {
        call: &'static str,
        #[source]
        source: windows::core::Error,
    },

    #[error("default render endpoint disappeared")]
    NoEndpoint,

    #[error("{0} thread exited before reporting readiness")]
    ThreadExited(&'static str),

    #[error("failed to spawn {0} thread: {1}")]
    Spawn(&'static str, String),
}

impl From<WasapiError> for ThrottleError {
    fn from(e: WasapiError) -> Self {
        ThrottleError::Device(e.to_string())
    }
}

/// Tag a `windows` error with the API call that produced it.
pub(crate) fn call(name: &'static str) -> impl FnOnce(windows::core::Error) -> WasapiError {
    move |source| WasapiError::Call { call: name, source }
}

/// Multithreaded COM apartment for the current thread; uninitialized on drop.
pub(crate) struct ComApartment;

impl ComApartment {
    pub(crate) fn enter() -> Result<Self, WasapiError> {
        unsafe {
            CoInitializeEx(None, COINIT_MULTITHREADED).ok().map_err(call("CoInitializeEx"))?;
        }
        Ok(Self)
    }
}

impl Drop for ComApartment {
    fn drop(&mut self) {
        unsafe {
            CoUninitialize();
        }
    }
}

/// The default render endpoint, or `None` when no output device is active.
///
/// Loopback reads from the render side, not from a capture endpoint.
pub(crate) fn default_render_device() -> Result<Option<IMMDevice>, WasapiError> {
    unsafe {
        let enumerator: IMMDeviceEnumerator =
            CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL).map_err(call("CoCreateInstance"))?;

        match enumerator.GetDefaultAudioEndpoint(eRender, eConsole) {
            Ok(device) => Ok(Some(device)),
            Err(e) => {
                log::debug!("No default render endpoint: {}", e);
                Ok(None)
            }
        }
    }
}

pub(crate) fn activate_client(device: &IMMDevice) -> Result<IAudioClient, WasapiError> {
    unsafe { device.Activate(CLSCTX_ALL, None).map_err(call("IMMDevice::Activate")) }
}

/// Copy the shared-mode mix format of `client` into a `WaveFormat`.
pub(crate) fn read_mix_format(client: &IAudioClient) -> Result<WaveFormat, WasapiError> {
    unsafe {
        let mix_format_ptr = client.GetMixFormat().map_err(call("GetMixFormat"))?;
        let mix_format = &*mix_format_ptr;
        let format = WaveFormat::new(mix_format.nSamplesPerSec, mix_format.nChannels, mix_format.wBitsPerSample);
        CoTaskMemFree(Some(mix_format_ptr as *const _ as *const _));
        Ok(format)
    }
}
