use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::config::ThrottleConfig;
use crate::models::diagnostics::ThrottleDiagnostics;
use crate::models::error::{Result, ThrottleError};
use crate::models::state::ThrottleState;
use crate::models::wave_buffer::AudioWaveBuffer;
use crate::models::wave_format::{BufferThresholds, WaveFormat};
use crate::processing::ring_buffer::RingBuffer;
use crate::processing::silence::{self, SilenceScan, SilenceTrim};
use crate::session::cancellation::CancellationSignal;
use crate::traits::capture_backend::{CaptureBackend, DataAvailableCallback, LoopbackCapture, Silencer};
use crate::traits::throttle_delegate::ThrottleDelegate;

/// Ring and format of the current capture session, behind one lock.
struct BufferState {
    format: Option<WaveFormat>,
    thresholds: Option<BufferThresholds>,
    ring: Option<RingBuffer>,
    diagnostics: ThrottleDiagnostics,
}

impl BufferState {
    fn new() -> Self {
        Self {
            format: None,
            thresholds: None,
            ring: None,
            diagnostics: ThrottleDiagnostics::default(),
        }
    }

    fn count(&self) -> usize {
        self.ring.as_ref().map(RingBuffer::count).unwrap_or(0)
    }

    /// Publish a new session format; the ring is re-created on first data.
    fn begin_session(&mut self, format: WaveFormat, thresholds: BufferThresholds) {
        self.format = Some(format);
        self.thresholds = Some(thresholds);
        self.ring = None;
    }

    fn write(&mut self, data: &[u8]) {
        let Some(thresholds) = self.thresholds else {
            return;
        };

        let ring = self.ring.get_or_insert_with(|| {
            log::debug!("allocating {} byte capture ring", thresholds.max_length);
            RingBuffer::new(thresholds.max_length)
        });
        let overwritten = ring.write(data);

        self.diagnostics.callback_count += 1;
        self.diagnostics.bytes_captured += data.len() as u64;
        self.diagnostics.bytes_overwritten += overwritten as u64;
    }

    fn take(&mut self, mode: SilenceTrim) -> Option<AudioWaveBuffer> {
        let thresholds = self.thresholds?;
        let ring = self.ring.as_mut()?;

        let data = match mode {
            SilenceTrim::TrimStart => {
                let trimmed = ring.advance(ring.count());
                self.diagnostics.bytes_trimmed += trimmed as u64;
                ring.read(thresholds.bytes_per_second)
            }
            SilenceTrim::TrimEnd => ring.read(ring.count()),
            SilenceTrim::None => {
                if ring.count() >= thresholds.read_offset {
                    ring.read(thresholds.bytes_per_second)
                } else {
                    Vec::new()
                }
            }
        };

        if data.is_empty() {
            return None;
        }

        self.diagnostics.bytes_delivered += data.len() as u64;
        self.diagnostics.reads_delivered += 1;
        Some(AudioWaveBuffer::new(data))
    }
}

/// State shared with the capture callback.
struct Shared {
    config: ThrottleConfig,
    state: Mutex<ThrottleState>,
    buffer: Mutex<BufferState>,
    loop_active: AtomicBool,
}

impl Shared {
    fn on_data_available(&self, data: &[u8]) {
        if !self.state.lock().is_running() {
            return;
        }
        self.buffer.lock().write(data);
    }
}

/// Marks a capture loop as active for the lifetime of one `run` call.
struct LoopClaim<'a>(&'a AtomicBool);

impl<'a> LoopClaim<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for LoopClaim<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Buffers a loopback capture and releases it in bounded, pollable slices.
///
/// Generic over the platform via `CaptureBackend`. Data flow:
/// ```text
/// [capture thread] → on_data_available → [Mutex<RingBuffer>] → read(mode) → AudioWaveBuffer
///                                                ↑
///                      [silencer stream keeps the endpoint awake]
/// ```
///
/// `run` owns the capture loop: it alone enters `Running` and, once
/// cancelled or asked to `stop`, it alone moves to `Stopped`.
pub struct AudioThrottler<B: CaptureBackend> {
    backend: B,
    shared: Arc<Shared>,
    capture: Mutex<Option<B::Capture>>,
    cancel: Mutex<Option<CancellationSignal>>,
    delegate: Option<Arc<dyn ThrottleDelegate>>,
}

impl<B: CaptureBackend> AudioThrottler<B> {
    pub fn new(backend: B) -> Self {
        Self::build(backend, ThrottleConfig::default())
    }

    pub fn with_config(backend: B, config: ThrottleConfig) -> Result<Self> {
        config.validate().map_err(ThrottleError::ConfigurationFailed)?;
        Ok(Self::build(backend, config))
    }

    fn build(backend: B, config: ThrottleConfig) -> Self {
        Self {
            backend,
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(ThrottleState::Idle),
                buffer: Mutex::new(BufferState::new()),
                loop_active: AtomicBool::new(false),
            }),
            capture: Mutex::new(None),
            cancel: Mutex::new(None),
            delegate: None,
        }
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn ThrottleDelegate>) {
        self.delegate = Some(delegate);
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ThrottleState {
        *self.shared.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().is_running()
    }

    /// Format of the current (or last) capture session.
    pub fn wave_format(&self) -> Option<WaveFormat> {
        self.shared.buffer.lock().format
    }

    pub fn thresholds(&self) -> Option<BufferThresholds> {
        self.shared.buffer.lock().thresholds
    }

    pub fn diagnostics(&self) -> ThrottleDiagnostics {
        self.shared.buffer.lock().diagnostics.clone()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.shared.buffer.lock().count()
    }

    pub fn buffer_is_half_full(&self) -> bool {
        let buffer = self.shared.buffer.lock();
        buffer.thresholds.is_some_and(|t| t.is_half_full(buffer.count()))
    }

    pub fn buffer_is_ready(&self) -> bool {
        let buffer = self.shared.buffer.lock();
        buffer.thresholds.is_some_and(|t| t.is_ready(buffer.count()))
    }

    /// Capture until `cancel` fires or `stop` is called.
    ///
    /// Returns `Ok(())` without starting when no output endpoint is active.
    pub async fn run(&self, cancel: CancellationSignal) -> Result<()> {
        if self.state().is_disposed() {
            return Err(ThrottleError::Disposed);
        }
        let _claim = LoopClaim::acquire(&self.shared.loop_active).ok_or(ThrottleError::AlreadyRunning)?;
        *self.cancel.lock() = Some(cancel.clone());

        let Some(capture) = self.backend.open_loopback()? else {
            log::warn!("No active output endpoint; loopback capture not started");
            return Ok(());
        };

        let format = capture.wave_format();
        let thresholds = format.thresholds(self.shared.config.buffer_seconds, self.shared.config.silence_window());
        self.shared.buffer.lock().begin_session(format, thresholds);
        *self.capture.lock() = Some(capture);

        if !self.transition(ThrottleState::can_start, ThrottleState::Running) {
            // disposed between the entry check and here; the slot was already emptied
            if let Some(capture) = self.capture.lock().take() {
                drop(capture);
                log::debug!("Capture device released");
            }
            return Err(ThrottleError::Disposed);
        }
        log::info!(
            "Loopback capture running: {} Hz, {} ch, {} bit, {} byte ring",
            format.sample_rate,
            format.channels,
            format.bits_per_sample,
            thresholds.max_length
        );

        let result = self.capture_loop(&cancel, format).await;

        self.transition(ThrottleState::is_active, ThrottleState::Stopped);
        match &result {
            Ok(()) => log::info!("Loopback capture stopped"),
            Err(e) => {
                log::error!("Loopback capture failed: {}", e);
                if let Some(ref delegate) = self.delegate {
                    delegate.on_error(e);
                }
            }
        }
        result
    }

    async fn capture_loop(&self, cancel: &CancellationSignal, format: WaveFormat) -> Result<()> {
        let mut silencer = self.backend.create_silencer(&format)?;
        silencer.play()?;

        tokio::time::sleep(self.shared.config.warmup_delay()).await;

        let shared = Arc::clone(&self.shared);
        let callback: DataAvailableCallback = Arc::new(move |data: &[u8]| shared.on_data_available(data));
        let started = match self.capture.lock().as_mut() {
            Some(capture) => capture.start_recording(callback),
            None => Err(ThrottleError::Disposed),
        };
        if let Err(e) = started {
            Self::stop_silencer(silencer);
            return Err(e);
        }

        let poll = self.shared.config.poll_interval();
        while self.keep_polling(cancel) {
            tokio::time::sleep(poll).await;
        }

        Self::stop_silencer(silencer);
        match self.capture.lock().as_mut() {
            Some(capture) => capture.stop_recording(),
            None => {
                log::debug!("Capture device already released; nothing to stop");
                Ok(())
            }
        }
    }

    fn keep_polling(&self, cancel: &CancellationSignal) -> bool {
        !cancel.is_cancelled() && self.shared.state.lock().is_running()
    }

    fn stop_silencer(mut silencer: B::Silencer) {
        if let Err(e) = silencer.stop() {
            log::warn!("Failed to stop silencer stream: {}", e);
        }
    }

    /// Ask a running capture loop to exit at its next poll.
    pub fn stop(&self) {
        self.transition(ThrottleState::is_running, ThrottleState::Stopping);
    }

    /// Poll until the buffer is more than half full or `ready_timeout` elapses.
    ///
    /// Best effort: returns whether the buffer was half full on exit.
    pub async fn wait_buffer_ready(&self) -> bool {
        let poll = self.shared.config.poll_interval();
        let timeout = self.shared.config.ready_timeout();

        let mut waited = Duration::ZERO;
        while !self.buffer_is_half_full() && waited < timeout {
            tokio::time::sleep(poll).await;
            waited += poll;
        }
        self.buffer_is_half_full()
    }

    /// Wait for the buffer, then release a slice of it according to `mode`.
    ///
    /// `Ok(None)` means nothing was released this time; call again later.
    pub async fn read(&self, mode: SilenceTrim) -> Result<Option<AudioWaveBuffer>> {
        if self.state().is_disposed() {
            return Err(ThrottleError::Disposed);
        }

        self.wait_buffer_ready().await;

        let result = self.shared.buffer.lock().take(mode);
        if let Some(ref wave) = result {
            log::trace!("released {} bytes ({})", wave.bytes_recorded(), mode);
        }
        Ok(result)
    }

    /// Byte offset of a silent window in the buffered audio.
    ///
    /// Not used by `read`. Returns `None` before any audio has arrived.
    pub fn silence_free_position(&self, scan: SilenceScan) -> Option<usize> {
        let (data, thresholds) = {
            let buffer = self.shared.buffer.lock();
            let ring = buffer.ring.as_ref()?;
            (ring.peek(ring.count()), buffer.thresholds?)
        };
        Some(silence::position_without_silence(
            &data,
            thresholds.silence_window_samples,
            scan,
            thresholds.read_offset,
        ))
    }

    /// Cancel any capture loop and release the capture device.
    ///
    /// Idempotent, and safe to call before `run`.
    pub fn dispose(&self) {
        if !self.transition(|s| !s.is_disposed(), ThrottleState::Disposed) {
            return;
        }

        if let Some(ref cancel) = *self.cancel.lock() {
            cancel.cancel();
        }
        if let Some(capture) = self.capture.lock().take() {
            drop(capture);
            log::debug!("Capture device released");
        }
        self.shared.buffer.lock().ring = None;
    }

    /// Move to `to` if the current state satisfies `from`; notifies the delegate.
    fn transition(&self, from: impl Fn(&ThrottleState) -> bool, to: ThrottleState) -> bool {
        {
            let mut state = self.shared.state.lock();
            if !from(&*state) {
                return false;
            }
            *state = to;
        }
        if let Some(ref delegate) = self.delegate {
            delegate.on_state_changed(to);
        }
        true
    }
}

impl<B: CaptureBackend> Drop for AudioThrottler<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;

    use tokio::task::JoinHandle;

    use super::*;

    #[derive(Default)]
    struct DeviceLog {
        opened: AtomicUsize,
        released: AtomicUsize,
        events: Mutex<Vec<&'static str>>,
    }

    impl DeviceLog {
        fn push(&self, event: &'static str) {
            self.events.lock().push(event);
        }

        fn events(&self) -> Vec<&'static str> {
            self.events.lock().clone()
        }
    }

    type CallbackSlot = Arc<Mutex<Option<DataAvailableCallback>>>;

    struct MockBackend {
        format: Option<WaveFormat>,
        fail_stop: bool,
        // two-party barrier waited on twice: once on entry, once before returning
        open_gate: Option<Arc<Barrier>>,
        log: Arc<DeviceLog>,
        callback: CallbackSlot,
    }

    impl MockBackend {
        fn new(format: Option<WaveFormat>) -> Self {
            Self {
                format,
                fail_stop: false,
                open_gate: None,
                log: Arc::new(DeviceLog::default()),
                callback: Arc::new(Mutex::new(None)),
            }
        }

        fn callback(&self) -> CallbackSlot {
            Arc::clone(&self.callback)
        }
    }

    struct MockCapture {
        format: WaveFormat,
        fail_stop: bool,
        log: Arc<DeviceLog>,
        callback: CallbackSlot,
    }

    impl Drop for MockCapture {
        fn drop(&mut self) {
            self.log.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl LoopbackCapture for MockCapture {
        fn wave_format(&self) -> WaveFormat {
            self.format
        }

        fn start_recording(&mut self, callback: DataAvailableCallback) -> Result<()> {
            self.log.push("capture.start");
            *self.callback.lock() = Some(callback);
            Ok(())
        }

        fn stop_recording(&mut self) -> Result<()> {
            self.log.push("capture.stop");
            if self.fail_stop {
                return Err(ThrottleError::Device("stop failed".into()));
            }
            Ok(())
        }
    }

    struct MockSilencer {
        log: Arc<DeviceLog>,
    }

    impl Silencer for MockSilencer {
        fn play(&mut self) -> Result<()> {
            self.log.push("silencer.play");
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            self.log.push("silencer.stop");
            Ok(())
        }
    }

    impl Drop for MockSilencer {
        fn drop(&mut self) {
            self.log.push("silencer.drop");
        }
    }

    impl CaptureBackend for MockBackend {
        type Capture = MockCapture;
        type Silencer = MockSilencer;

        fn open_loopback(&self) -> Result<Option<MockCapture>> {
            let Some(format) = self.format else {
                return Ok(None);
            };
            if let Some(ref gate) = self.open_gate {
                gate.wait();
                gate.wait();
            }
            self.log.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Some(MockCapture {
                format,
                fail_stop: self.fail_stop,
                log: Arc::clone(&self.log),
                callback: Arc::clone(&self.callback),
            }))
        }

        fn create_silencer(&self, _format: &WaveFormat) -> Result<MockSilencer> {
            Ok(MockSilencer {
                log: Arc::clone(&self.log),
            })
        }
    }

    #[derive(Default)]
    struct RecordingDelegate {
        states: Mutex<Vec<ThrottleState>>,
        errors: Mutex<Vec<ThrottleError>>,
    }

    impl ThrottleDelegate for RecordingDelegate {
        fn on_state_changed(&self, state: ThrottleState) {
            self.states.lock().push(state);
        }

        fn on_error(&self, error: &ThrottleError) {
            self.errors.lock().push(error.clone());
        }
    }

    fn stereo_48k() -> WaveFormat {
        WaveFormat::pcm16(48000, 2)
    }

    /// Deliver `data` through the callback the capture was started with.
    fn deliver(slot: &CallbackSlot, data: &[u8]) {
        let callback = slot.lock().clone();
        if let Some(callback) = callback {
            callback(data);
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    /// Spawn `run` and let it get past the warm-up delay.
    async fn start(throttler: &Arc<AudioThrottler<MockBackend>>) -> (CancellationSignal, JoinHandle<Result<()>>) {
        let cancel = CancellationSignal::new();
        let runner = Arc::clone(throttler);
        let signal = cancel.clone();
        let handle = tokio::spawn(async move { runner.run(signal).await });
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(throttler.is_running());
        (cancel, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn run_without_endpoint_is_noop() {
        let backend = MockBackend::new(None);
        let log = Arc::clone(&backend.log);
        let throttler = AudioThrottler::new(backend);

        throttler.run(CancellationSignal::new()).await.unwrap();

        assert!(!throttler.is_running());
        assert_eq!(throttler.state(), ThrottleState::Idle);
        assert!(throttler.wave_format().is_none());
        assert!(log.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn silencer_starts_before_recording_and_teardown_is_reversed() {
        let backend = MockBackend::new(Some(stereo_48k()));
        let log = Arc::clone(&backend.log);
        let throttler = Arc::new(AudioThrottler::new(backend));

        let cancel = CancellationSignal::new();
        let runner = Arc::clone(&throttler);
        let signal = cancel.clone();
        let handle = tokio::spawn(async move { runner.run(signal).await });

        // still inside the 50ms warm-up
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(log.events(), vec!["silencer.play"]);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(log.events(), vec!["silencer.play", "capture.start"]);

        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(
            log.events(),
            vec!["silencer.play", "capture.start", "silencer.stop", "silencer.drop", "capture.stop"]
        );
        assert_eq!(throttler.state(), ThrottleState::Stopped);
        assert_eq!(log.released.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_honoured_by_the_loop() {
        let backend = MockBackend::new(Some(stereo_48k()));
        let log = Arc::clone(&backend.log);
        let throttler = Arc::new(AudioThrottler::new(backend));

        let (_cancel, handle) = start(&throttler).await;
        throttler.stop();
        assert_eq!(throttler.state(), ThrottleState::Stopping);

        handle.await.unwrap().unwrap();
        assert_eq!(throttler.state(), ThrottleState::Stopped);

        // a second session replaces (and releases) the first device
        let (cancel, handle) = start(&throttler).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(log.opened.load(Ordering::SeqCst), 2);
        assert_eq!(log.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_is_observed_within_one_poll() {
        let throttler = Arc::new(AudioThrottler::new(MockBackend::new(Some(stereo_48k()))));
        let (cancel, handle) = start(&throttler).await;

        cancel.cancel();
        let poll = throttler.config().poll_interval();
        let finished = tokio::time::timeout(poll, handle).await;

        assert!(finished.is_ok());
        assert_eq!(throttler.state(), ThrottleState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dispose_while_opening_releases_new_capture() {
        let gate = Arc::new(Barrier::new(2));
        let mut backend = MockBackend::new(Some(stereo_48k()));
        backend.open_gate = Some(Arc::clone(&gate));
        let log = Arc::clone(&backend.log);
        let throttler = Arc::new(AudioThrottler::new(backend));

        let runner = Arc::clone(&throttler);
        let handle = tokio::spawn(async move { runner.run(CancellationSignal::new()).await });

        let entered = Arc::clone(&gate);
        tokio::task::spawn_blocking(move || entered.wait()).await.unwrap();
        throttler.dispose();
        let release = Arc::clone(&gate);
        tokio::task::spawn_blocking(move || release.wait()).await.unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err, ThrottleError::Disposed);
        assert_eq!(log.opened.load(Ordering::SeqCst), 1);
        assert_eq!(log.released.load(Ordering::SeqCst), 1);
        assert!(log.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn second_concurrent_run_is_rejected() {
        let throttler = Arc::new(AudioThrottler::new(MockBackend::new(Some(stereo_48k()))));
        let (cancel, handle) = start(&throttler).await;

        let err = throttler.run(CancellationSignal::new()).await.unwrap_err();
        assert_eq!(err, ThrottleError::AlreadyRunning);
        assert!(throttler.is_running());

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn read_none_releases_one_second() {
        let backend = MockBackend::new(Some(stereo_48k()));
        let slot = backend.callback();
        let throttler = Arc::new(AudioThrottler::new(backend));
        let (cancel, handle) = start(&throttler).await;

        let data = pattern(200_000);
        deliver(&slot, &data);

        let wave = throttler.read(SilenceTrim::None).await.unwrap().unwrap();
        assert_eq!(wave.bytes_recorded(), 192_000);
        assert_eq!(wave.bytes(), &data[..192_000]);
        assert_eq!(throttler.buffered_bytes(), 8_000);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn read_none_waits_for_read_offset() {
        let backend = MockBackend::new(Some(stereo_48k()));
        let slot = backend.callback();
        let throttler = Arc::new(AudioThrottler::new(backend));
        let (cancel, handle) = start(&throttler).await;

        deliver(&slot, &pattern(100_000));
        assert!(!throttler.buffer_is_ready());

        assert!(throttler.read(SilenceTrim::None).await.unwrap().is_none());
        assert_eq!(throttler.buffered_bytes(), 100_000);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn read_none_preserves_capture_order() {
        let backend = MockBackend::new(Some(stereo_48k()));
        let slot = backend.callback();
        let throttler = Arc::new(AudioThrottler::new(backend));
        let (cancel, handle) = start(&throttler).await;

        let data = pattern(400_000);
        for chunk in data.chunks(4_800) {
            deliver(&slot, chunk);
        }

        let first = throttler.read(SilenceTrim::None).await.unwrap().unwrap();
        let second = throttler.read(SilenceTrim::None).await.unwrap().unwrap();
        assert_eq!(first.bytes(), &data[..192_000]);
        assert_eq!(second.bytes(), &data[192_000..384_000]);
        assert_eq!(throttler.buffered_bytes(), 16_000);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn trim_start_flushes_pending_audio() {
        let backend = MockBackend::new(Some(stereo_48k()));
        let slot = backend.callback();
        let throttler = Arc::new(AudioThrottler::new(backend));
        let (cancel, handle) = start(&throttler).await;

        deliver(&slot, &pattern(500_000));

        assert!(throttler.read(SilenceTrim::TrimStart).await.unwrap().is_none());
        assert_eq!(throttler.buffered_bytes(), 0);
        assert_eq!(throttler.diagnostics().bytes_trimmed, 500_000);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn trim_end_drains_whole_buffer() {
        let backend = MockBackend::new(Some(stereo_48k()));
        let slot = backend.callback();
        let throttler = Arc::new(AudioThrottler::new(backend));
        let (cancel, handle) = start(&throttler).await;

        let data = pattern(500_000);
        deliver(&slot, &data);
        assert!(throttler.buffer_is_half_full());

        let wave = throttler.read(SilenceTrim::TrimEnd).await.unwrap().unwrap();
        assert_eq!(wave.bytes_recorded(), 500_000);
        assert_eq!(wave.into_inner(), data);
        assert_eq!(throttler.buffered_bytes(), 0);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn read_before_any_audio_returns_none() {
        let throttler = AudioThrottler::new(MockBackend::new(Some(stereo_48k())));
        for mode in [SilenceTrim::None, SilenceTrim::TrimStart, SilenceTrim::TrimEnd] {
            assert!(throttler.read(mode).await.unwrap().is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_keeps_newest_four_seconds() {
        let backend = MockBackend::new(Some(stereo_48k()));
        let slot = backend.callback();
        let throttler = Arc::new(AudioThrottler::new(backend));
        let (cancel, handle) = start(&throttler).await;

        for _ in 0..10 {
            deliver(&slot, &pattern(100_000));
        }

        assert_eq!(throttler.buffered_bytes(), 768_000);
        let diagnostics = throttler.diagnostics();
        assert_eq!(diagnostics.callback_count, 10);
        assert_eq!(diagnostics.bytes_captured, 1_000_000);
        assert_eq!(diagnostics.bytes_overwritten, 232_000);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn callback_is_ignored_once_stopped() {
        let backend = MockBackend::new(Some(stereo_48k()));
        let slot = backend.callback();
        let throttler = Arc::new(AudioThrottler::new(backend));
        let (_cancel, handle) = start(&throttler).await;

        deliver(&slot, &pattern(1_000));
        throttler.stop();
        deliver(&slot, &pattern(1_000));
        handle.await.unwrap().unwrap();
        deliver(&slot, &pattern(1_000));

        assert_eq!(throttler.buffered_bytes(), 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_buffer_ready_gives_up_after_timeout() {
        let backend = MockBackend::new(Some(stereo_48k()));
        let slot = backend.callback();
        let throttler = Arc::new(AudioThrottler::new(backend));
        let (cancel, handle) = start(&throttler).await;

        let started = tokio::time::Instant::now();
        assert!(!throttler.wait_buffer_ready().await);
        assert!(started.elapsed() >= Duration::from_secs(4));

        deliver(&slot, &pattern(400_000));
        let started = tokio::time::Instant::now();
        assert!(throttler.wait_buffer_ready().await);
        assert_eq!(started.elapsed(), Duration::ZERO);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn wave_format_and_thresholds_follow_session() {
        let throttler = Arc::new(AudioThrottler::new(MockBackend::new(Some(stereo_48k()))));
        assert!(throttler.wave_format().is_none());
        assert!(throttler.thresholds().is_none());

        let (cancel, handle) = start(&throttler).await;
        assert_eq!(throttler.wave_format(), Some(stereo_48k()));
        let thresholds = throttler.thresholds().unwrap();
        assert_eq!(thresholds.max_length, 768_000);
        assert_eq!(thresholds.read_offset, 192_000);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn silence_position_is_available_but_not_applied() {
        // 1 kHz mono 16-bit: 2000 B/s, 500ms window = 500 samples
        let backend = MockBackend::new(Some(WaveFormat::pcm16(1000, 1)));
        let slot = backend.callback();
        let throttler = Arc::new(AudioThrottler::new(backend));
        let (cancel, handle) = start(&throttler).await;

        assert_eq!(throttler.silence_free_position(SilenceScan::First), None);

        let loud: Vec<u8> = std::iter::repeat(500i16.to_le_bytes()).take(1000).flatten().collect();
        deliver(&slot, &loud);
        // no silent window: falls back to the read offset
        assert_eq!(throttler.silence_free_position(SilenceScan::First), Some(2000));

        deliver(&slot, &vec![0u8; 2000]);
        // windows step 250 samples (500 bytes); first all-zero window starts at byte 2000
        assert_eq!(throttler.silence_free_position(SilenceScan::First), Some(2000));
        assert_eq!(throttler.silence_free_position(SilenceScan::Last), Some(3500));
        assert_eq!(throttler.buffered_bytes(), 4000);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_is_idempotent_and_releases_once() {
        let backend = MockBackend::new(Some(stereo_48k()));
        let log = Arc::clone(&backend.log);
        let throttler = Arc::new(AudioThrottler::new(backend));

        let (cancel, handle) = start(&throttler).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        throttler.dispose();
        throttler.dispose();
        assert_eq!(throttler.state(), ThrottleState::Disposed);
        assert_eq!(log.released.load(Ordering::SeqCst), 1);

        assert_eq!(throttler.read(SilenceTrim::None).await.unwrap_err(), ThrottleError::Disposed);
        assert_eq!(
            throttler.run(CancellationSignal::new()).await.unwrap_err(),
            ThrottleError::Disposed
        );

        drop(throttler);
        assert_eq!(log.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispose_before_run_is_safe() {
        let backend = MockBackend::new(Some(stereo_48k()));
        let log = Arc::clone(&backend.log);
        let throttler = AudioThrottler::new(backend);

        throttler.dispose();
        throttler.dispose();

        assert!(throttler.state().is_disposed());
        assert_eq!(log.released.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_cancels_running_loop() {
        let backend = MockBackend::new(Some(stereo_48k()));
        let log = Arc::clone(&backend.log);
        let throttler = Arc::new(AudioThrottler::new(backend));

        let (cancel, handle) = start(&throttler).await;
        throttler.dispose();
        assert!(cancel.is_cancelled());
        assert_eq!(log.released.load(Ordering::SeqCst), 1);

        handle.await.unwrap().unwrap();
        assert_eq!(throttler.state(), ThrottleState::Disposed);
        // device was gone before teardown, so recording was never stopped twice
        assert!(!log.events().contains(&"capture.stop"));
    }

    #[tokio::test(start_paused = true)]
    async fn capture_stop_failure_is_reported() {
        let mut backend = MockBackend::new(Some(stereo_48k()));
        backend.fail_stop = true;
        let delegate = Arc::new(RecordingDelegate::default());
        let mut throttler = AudioThrottler::new(backend);
        throttler.set_delegate(delegate.clone());
        let throttler = Arc::new(throttler);

        let (cancel, handle) = start(&throttler).await;
        cancel.cancel();
        let err = handle.await.unwrap().unwrap_err();

        assert!(matches!(err, ThrottleError::Device(_)));
        assert_eq!(throttler.state(), ThrottleState::Stopped);
        assert_eq!(delegate.errors.lock().as_slice(), &[err]);
    }

    #[tokio::test(start_paused = true)]
    async fn delegate_sees_every_transition() {
        let delegate = Arc::new(RecordingDelegate::default());
        let mut throttler = AudioThrottler::new(MockBackend::new(Some(stereo_48k())));
        throttler.set_delegate(delegate.clone());
        let throttler = Arc::new(throttler);

        let (_cancel, handle) = start(&throttler).await;
        throttler.stop();
        handle.await.unwrap().unwrap();
        throttler.dispose();

        assert_eq!(
            delegate.states.lock().as_slice(),
            &[
                ThrottleState::Running,
                ThrottleState::Stopping,
                ThrottleState::Stopped,
                ThrottleState::Disposed
            ]
        );
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ThrottleConfig {
            poll_interval_ms: 0,
            ..ThrottleConfig::default()
        };
        let result = AudioThrottler::with_config(MockBackend::new(None), config);
        assert!(matches!(result, Err(ThrottleError::ConfigurationFailed(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_writes_and_read_keep_count_consistent() {
        // 100 B/s mono 8-bit: read offset 100, one-second read 100
        let config = ThrottleConfig {
            poll_interval_ms: 1,
            warmup_delay_ms: 1,
            ready_timeout_ms: Some(5),
            ..ThrottleConfig::default()
        };
        let backend = MockBackend::new(Some(WaveFormat::new(100, 1, 8)));
        let slot = backend.callback();
        let throttler = Arc::new(AudioThrottler::with_config(backend, config).unwrap());

        let cancel = CancellationSignal::new();
        let runner = Arc::clone(&throttler);
        let signal = cancel.clone();
        let handle = tokio::spawn(async move { runner.run(signal).await });
        while slot.lock().is_none() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let writers: Vec<_> = (0..2)
            .map(|_| {
                let slot = Arc::clone(&slot);
                thread::spawn(move || deliver(&slot, &[7u8; 100]))
            })
            .collect();
        let read = throttler.read(SilenceTrim::None).await.unwrap();
        for writer in writers {
            writer.join().unwrap();
        }

        let read_len = read.map(|w| w.bytes_recorded()).unwrap_or(0);
        assert!(read_len == 0 || read_len == 100);
        assert_eq!(throttler.buffered_bytes(), 200 - read_len);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
