//! WASAPI loopback capture of the default render endpoint.
//!
//! Captures the audio mix going to a render endpoint using
//! `AUDCLNT_STREAMFLAGS_LOOPBACK` in shared mode and hands the raw
//! mix-format bytes to the throttle callback.
//!
//! DRM-protected audio is silenced in loopback; silent packets are delivered
//! as zeroed bytes so the byte stream keeps its timing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use windows::core::PCWSTR;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::*;

use audio_throttle_core::models::error::ThrottleError;
use audio_throttle_core::models::wave_format::WaveFormat;
use audio_throttle_core::traits::capture_backend::{DataAvailableCallback, LoopbackCapture};

use crate::com::{self, call, ComApartment, WasapiError};

/// Loopback capture opened on the default render endpoint.
///
/// COM objects live on the capture thread only. Dropping the value stops
/// that thread, which releases the endpoint.
pub struct WasapiLoopbackCapture {
    format: WaveFormat,
    running: Arc<AtomicBool>,
    capture_handle: Option<thread::JoinHandle<()>>,
}

impl WasapiLoopbackCapture {
    pub(crate) fn new(format: WaveFormat) -> Self {
        Self {
            format,
            running: Arc::new(AtomicBool::new(false)),
            capture_handle: None,
        }
    }

    fn join_capture_thread(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.capture_handle.take() {
            if handle.join().is_err() {
                log::error!("Loopback capture thread panicked");
            }
        }
    }
}

impl LoopbackCapture for WasapiLoopbackCapture {
    fn wave_format(&self) -> WaveFormat {
        self.format
    }

    fn start_recording(&mut self, callback: DataAvailableCallback) -> Result<(), ThrottleError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(ThrottleError::AlreadyRunning);
        }

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let expected = self.format;
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let handle = thread::Builder::new()
            .name("wasapi-loopback-capture".into())
            .spawn(move || {
                if let Err(e) = loopback_capture_loop(&running, expected, callback, &ready_tx) {
                    log::error!("Loopback capture error: {}", e);
                    // no-op if readiness was already reported
                    let _ = ready_tx.try_send(Err(e.to_string()));
                }
                running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| WasapiError::Spawn("loopback", e.to_string()))?;
        self.capture_handle = Some(handle);

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => {
                self.join_capture_thread();
                Err(ThrottleError::Device(message))
            }
            Err(_) => {
                self.join_capture_thread();
                Err(WasapiError::ThreadExited("loopback").into())
            }
        }
    }

    fn stop_recording(&mut self) -> Result<(), ThrottleError> {
        self.join_capture_thread();
        Ok(())
    }
}

impl Drop for WasapiLoopbackCapture {
    fn drop(&mut self) {
        self.join_capture_thread();
    }
}

/// Main loopback capture loop running on a dedicated thread.
///
/// Sequence:
/// 1. CoInitializeEx (MTA)
/// 2. Get default render endpoint
/// 3. Activate IAudioClient
/// 4. Initialize with LOOPBACK flag in shared mode
/// 5. Get IAudioCaptureClient
/// 6. Register with MMCSS
/// 7. Start, report readiness, poll for packets
fn loopback_capture_loop(
    running: &AtomicBool,
    expected: WaveFormat,
    callback: DataAvailableCallback,
    ready: &Sender<Result<(), String>>,
) -> Result<(), WasapiError> {
    let _com = ComApartment::enter()?;

    let device = com::default_render_device()?.ok_or(WasapiError::NoEndpoint)?;
    let audio_client = com::activate_client(&device)?;

    let format = com::read_mix_format(&audio_client)?;
    if format != expected {
        log::warn!(
            "Render mix format changed since the endpoint was opened: {:?} -> {:?}",
            expected,
            format
        );
    }
    let block_align = format.block_align();

    unsafe {
        let mix_format_ptr = audio_client.GetMixFormat().map_err(call("GetMixFormat"))?;

        // 100ms in 100ns units
        let buffer_duration = 1_000_000;
        let initialized = audio_client.Initialize(
            AUDCLNT_SHAREMODE_SHARED,
            AUDCLNT_STREAMFLAGS_LOOPBACK | AUDCLNT_STREAMFLAGS_NOPERSIST,
            buffer_duration,
            0,
            mix_format_ptr,
            None,
        );
        CoTaskMemFree(Some(mix_format_ptr as *const _ as *const _));
        initialized.map_err(call("IAudioClient::Initialize (loopback)"))?;

        let capture_client: IAudioCaptureClient = audio_client.GetService().map_err(call("GetService"))?;

        // MMCSS registration for real-time priority
        let mut task_index: u32 = 0;
        let task_name: Vec<u16> = "Pro Audio\0".encode_utf16().collect();
        let _mmcss_handle = AvSetMmThreadCharacteristicsW(PCWSTR(task_name.as_ptr()), &mut task_index);

        audio_client.Start().map_err(call("IAudioClient::Start"))?;
        let _ = ready.try_send(Ok(()));
        log::debug!("Loopback capture started");

        // poll every 10ms
        let mut silence = Vec::new();
        while running.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(10));

            let mut packet_length = capture_client.GetNextPacketSize().map_err(call("GetNextPacketSize"))?;

            while packet_length > 0 {
                let mut buffer_ptr: *mut u8 = std::ptr::null_mut();
                let mut num_frames: u32 = 0;
                let mut flags: u32 = 0;

                capture_client
                    .GetBuffer(&mut buffer_ptr, &mut num_frames, &mut flags, None, None)
                    .map_err(call("GetBuffer"))?;

                let byte_len = num_frames as usize * block_align;
                if byte_len > 0 && !buffer_ptr.is_null() {
                    if flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 {
                        silence.resize(byte_len, 0u8);
                        callback(&silence[..byte_len]);
                    } else {
                        callback(std::slice::from_raw_parts(buffer_ptr, byte_len));
                    }
                }

                capture_client.ReleaseBuffer(num_frames).map_err(call("ReleaseBuffer"))?;

                packet_length = capture_client.GetNextPacketSize().map_err(call("GetNextPacketSize"))?;
            }
        }

        let _ = audio_client.Stop();
    }

    log::debug!("Loopback capture stopped");
    Ok(())
}
