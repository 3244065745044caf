//! Muted render stream that keeps the loopback endpoint from going idle.
//!
//! WASAPI loopback only produces packets while something is rendering to the
//! endpoint. Writing silent buffers in shared mode keeps the engine running
//! without changing what the user hears.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use audio_throttle_core::models::error::ThrottleError;
use audio_throttle_core::models::wave_format::WaveFormat;
use audio_throttle_core::traits::capture_backend::Silencer;

use crate::com::{self, call, ComApartment, WasapiError};

pub struct WasapiSilencer {
    format: WaveFormat,
    running: Arc<AtomicBool>,
    render_handle: Option<thread::JoinHandle<()>>,
}

impl WasapiSilencer {
    pub(crate) fn new(format: WaveFormat) -> Self {
        Self {
            format,
            running: Arc::new(AtomicBool::new(false)),
            render_handle: None,
        }
    }

    fn join_render_thread(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.render_handle.take() {
            if handle.join().is_err() {
                log::error!("Silencer render thread panicked");
            }
        }
    }
}

impl Silencer for WasapiSilencer {
    fn play(&mut self) -> Result<(), ThrottleError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let format = self.format;
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let handle = thread::Builder::new()
            .name("wasapi-silencer".into())
            .spawn(move || {
                if let Err(e) = silence_render_loop(&running, format, &ready_tx) {
                    log::error!("Silencer render error: {}", e);
                    let _ = ready_tx.try_send(Err(e.to_string()));
                }
                running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| WasapiError::Spawn("silencer", e.to_string()))?;
        self.render_handle = Some(handle);

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => {
                self.join_render_thread();
                Err(ThrottleError::Device(message))
            }
            Err(_) => {
                self.join_render_thread();
                Err(WasapiError::ThreadExited("silencer").into())
            }
        }
    }

    fn stop(&mut self) -> Result<(), ThrottleError> {
        self.join_render_thread();
        Ok(())
    }
}

impl Drop for WasapiSilencer {
    fn drop(&mut self) {
        self.join_render_thread();
    }
}

fn silence_render_loop(
    running: &AtomicBool,
    capture_format: WaveFormat,
    ready: &Sender<Result<(), String>>,
) -> Result<(), WasapiError> {
    let _com = ComApartment::enter()?;

    let device = com::default_render_device()?.ok_or(WasapiError::NoEndpoint)?;
    let audio_client = com::activate_client(&device)?;

    // shared mode renders at the mix format, which is also what loopback captures
    let mix_format = com::read_mix_format(&audio_client)?;
    if mix_format != capture_format {
        log::debug!("Silencer renders at {:?}, capture at {:?}", mix_format, capture_format);
    }

    unsafe {
        let mix_format_ptr = audio_client.GetMixFormat().map_err(call("GetMixFormat"))?;
        let initialized = audio_client.Initialize(AUDCLNT_SHAREMODE_SHARED, 0, 1_000_000, 0, mix_format_ptr, None);
        CoTaskMemFree(Some(mix_format_ptr as *const _ as *const _));
        initialized.map_err(call("IAudioClient::Initialize (render)"))?;

        let buffer_frames = audio_client.GetBufferSize().map_err(call("GetBufferSize"))?;
        let render_client: IAudioRenderClient = audio_client.GetService().map_err(call("GetService"))?;

        audio_client.Start().map_err(call("IAudioClient::Start"))?;
        let _ = ready.try_send(Ok(()));
        log::debug!("Silencer playing ({} frame buffer)", buffer_frames);

        while running.load(Ordering::SeqCst) {
            let padding = audio_client.GetCurrentPadding().map_err(call("GetCurrentPadding"))?;
            let writable = buffer_frames.saturating_sub(padding);
            if writable > 0 {
                render_client.GetBuffer(writable).map_err(call("IAudioRenderClient::GetBuffer"))?;
                render_client
                    .ReleaseBuffer(writable, AUDCLNT_BUFFERFLAGS_SILENT.0 as u32)
                    .map_err(call("IAudioRenderClient::ReleaseBuffer"))?;
            }
            thread::sleep(Duration::from_millis(10));
        }

        let _ = audio_client.Stop();
    }

    log::debug!("Silencer stopped");
    Ok(())
}
