//! The streaming session: lifecycle state machine, synchronization-mode
//! selection, and the pump thread.

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use soundpump_foundation::{
    real_clock, AudioError, EngineState, SharedClock, StateGate, StreamOptions,
};
use soundpump_telemetry::PumpMetrics;

use crate::dispatch::{DispatchedStream, HostDispatch, InlineDispatch};
use crate::format::AudioFormat;
use crate::latency::LatencyCalculator;
use crate::native::{DeviceProperties, InitSpec, NativeStream, StreamFactory};
use crate::negotiator::FormatNegotiator;
use crate::reader::CaptureReader;
use crate::ring::{ByteProducer, ByteRing};
use crate::transport::{CaptureTransport, DataRequestFn, RenderTransport, Transport};

/// Consecutive missed buffer-period signals after which the endpoint is
/// assumed gone and the run ends as a normal stop.
const MAX_CONSECUTIVE_UNDERRUNS: u32 = 2;

/// Default capture delivery ring: roughly 2.7 s of 48 kHz stereo 16-bit.
pub const DEFAULT_CAPTURE_RING_BYTES: usize = 512 * 1024;

/// How a running session synchronizes with the endpoint's buffer cadence.
///
/// Decided once per initialization. Event-driven gives lower latency and
/// CPU; some hardware refuses callback registration, in which case the
/// session degrades to polling instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Event,
    Polling,
}

/// Observable session events.
///
/// `Stopped` brackets every pump run and fires on every exit path,
/// including error exits. Pump errors arrive as `Error` and never cross
/// back to caller threads as failures; the session stays restartable.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    FormatChanged,
    Started,
    Stopped,
    Error(AudioError),
}

enum DirectionState {
    Capture {
        producer: Arc<Mutex<ByteProducer>>,
    },
    Render {
        on_data_requested: Arc<Mutex<DataRequestFn>>,
    },
}

/// A streaming session over one hardware endpoint.
///
/// All operations may be called from any thread; the compare-and-set gates
/// make concurrent `start`/`ensure_initialized` calls collapse into one
/// winner doing the work and everyone else observing a no-op. Exactly one
/// pump thread exists while the session is running.
pub struct StreamEngine {
    options: StreamOptions,
    factory: StreamFactory,
    dispatch: Arc<dyn HostDispatch>,
    negotiator: FormatNegotiator,
    direction: DirectionState,
    gate: Arc<StateGate>,
    native: RwLock<Option<Arc<dyn NativeStream>>>,
    desired_format: RwLock<Option<AudioFormat>>,
    sync_mode: RwLock<Option<SyncMode>>,
    latency: RwLock<Option<LatencyCalculator>>,
    signal_rx: Mutex<Option<Receiver<()>>>,
    transport: Mutex<Option<Arc<Mutex<Box<dyn Transport>>>>>,
    pump_thread: Mutex<Option<JoinHandle<()>>>,
    event_tx: Sender<StreamEvent>,
    // Held so event sends cannot fail before anyone subscribes.
    event_rx: Receiver<StreamEvent>,
    metrics: Arc<PumpMetrics>,
    clock: SharedClock,
}

impl StreamEngine {
    /// Capture session. Returns the engine and the reader the caller drains
    /// captured bytes from.
    pub fn capture(
        factory: StreamFactory,
        props: Arc<dyn DeviceProperties>,
        options: StreamOptions,
        ring_capacity_bytes: usize,
    ) -> (Self, CaptureReader) {
        let (producer, consumer) = ByteRing::new(ring_capacity_bytes).split();
        let engine = Self::with_direction(
            factory,
            props,
            options,
            DirectionState::Capture {
                producer: Arc::new(Mutex::new(producer)),
            },
        );
        (engine, CaptureReader::new(consumer))
    }

    /// Render session. `on_data_requested` is invoked from the pump thread
    /// with the free-byte budget whenever the endpoint has room.
    pub fn render(
        factory: StreamFactory,
        props: Arc<dyn DeviceProperties>,
        options: StreamOptions,
        on_data_requested: impl FnMut(&mut [u8]) -> usize + Send + 'static,
    ) -> Self {
        let callback: DataRequestFn = Box::new(on_data_requested);
        Self::with_direction(
            factory,
            props,
            options,
            DirectionState::Render {
                on_data_requested: Arc::new(Mutex::new(callback)),
            },
        )
    }

    fn with_direction(
        factory: StreamFactory,
        props: Arc<dyn DeviceProperties>,
        options: StreamOptions,
        direction: DirectionState,
    ) -> Self {
        let negotiator = FormatNegotiator::new(
            props,
            options.share_mode,
            options.prefer_device_native_format,
        );
        let (event_tx, event_rx) = unbounded();
        Self {
            options,
            factory,
            dispatch: Arc::new(InlineDispatch),
            negotiator,
            direction,
            gate: Arc::new(StateGate::new()),
            native: RwLock::new(None),
            desired_format: RwLock::new(None),
            sync_mode: RwLock::new(None),
            latency: RwLock::new(None),
            signal_rx: Mutex::new(None),
            transport: Mutex::new(None),
            pump_thread: Mutex::new(None),
            event_tx,
            event_rx,
            metrics: Arc::new(PumpMetrics::new()),
            clock: real_clock(),
        }
    }

    /// Replaces the wall clock, for tests driving the polling pump.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Installs the host's thread-affinity capability. When the host
    /// requires it, every call on every endpoint handle is transparently
    /// redirected to the designated thread; callers never need to know.
    pub fn with_dispatch(mut self, dispatch: Arc<dyn HostDispatch>) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn state(&self) -> EngineState {
        self.gate.state()
    }

    pub fn is_running(&self) -> bool {
        self.gate.is_running()
    }

    /// The synchronization mode selected at initialization, if any.
    pub fn sync_mode(&self) -> Option<SyncMode> {
        *self.sync_mode.read()
    }

    /// Subscribes to session events. Receivers share one queue: each event
    /// is delivered to a single subscriber.
    pub fn events(&self) -> Receiver<StreamEvent> {
        self.event_rx.clone()
    }

    pub fn metrics(&self) -> Arc<PumpMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Sets the desired format for subsequent initializations.
    ///
    /// Forces deinitialization first (the desired format may only change
    /// while deinitialized), validates against the endpoint, then warms the
    /// session back up so the first `start` does not pay initialization
    /// latency. An unsupported format leaves the previous desired format
    /// untouched.
    pub fn set_format(&self, format: &AudioFormat) -> Result<(), AudioError> {
        self.ensure_deinitialized();

        let stream = self.probe_stream()?;
        let (supported, _closest) = self.negotiator.is_supported(stream.as_ref(), format)?;
        if !supported {
            return Err(AudioError::FormatNotSupported {
                format: format.to_string(),
            });
        }
        *self.desired_format.write() = Some(format.clone());

        self.ensure_initialized()?;
        self.emit(StreamEvent::FormatChanged);
        Ok(())
    }

    /// The format the session streams with: the explicitly set desired
    /// format, else the head of the suggestion list. `None` means no usable
    /// format exists.
    pub fn format(&self) -> Result<Option<AudioFormat>, AudioError> {
        if let Some(desired) = self.desired_format.read().clone() {
            return Ok(Some(desired));
        }
        self.default_format()
    }

    pub fn desired_format(&self) -> Option<AudioFormat> {
        self.desired_format.read().clone()
    }

    pub fn default_format(&self) -> Result<Option<AudioFormat>, AudioError> {
        let stream = self.probe_stream()?;
        Ok(self.negotiator.suggest(stream.as_ref())?.into_iter().next())
    }

    pub fn suggest_formats(&self) -> Result<Vec<AudioFormat>, AudioError> {
        let stream = self.probe_stream()?;
        self.negotiator.suggest(stream.as_ref())
    }

    pub fn suggest_formats_excluding(
        &self,
        excluded: &[AudioFormat],
    ) -> Result<Vec<AudioFormat>, AudioError> {
        let stream = self.probe_stream()?;
        self.negotiator.suggest_excluding(stream.as_ref(), excluded)
    }

    /// Whether the endpoint accepts `format`, with its proposed alternative
    /// when it does not.
    pub fn is_format_supported(
        &self,
        format: &AudioFormat,
    ) -> Result<(bool, Option<AudioFormat>), AudioError> {
        let stream = self.probe_stream()?;
        self.negotiator.is_supported(stream.as_ref(), format)
    }

    /// Endpoint-reported latency of the open stream.
    pub fn stream_latency(&self) -> Result<Duration, AudioError> {
        let native = self.native.read().clone().ok_or_else(|| AudioError::NotInitialized {
            what: "stream latency".to_string(),
        })?;
        native.stream_latency()
    }

    /// Brings the session to `Initialized`. A no-op when already
    /// initialized or running; on failure the session reverts to
    /// `Deinitialized`.
    pub fn ensure_initialized(&self) -> Result<(), AudioError> {
        if !self.gate.begin_init() {
            return Ok(());
        }
        match self.initialize() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.gate.abort_init();
                Err(e)
            }
        }
    }

    /// Stops streaming and releases the endpoint handle. A no-op when
    /// already deinitialized.
    pub fn ensure_deinitialized(&self) {
        if !self.gate.begin_deinit() {
            return;
        }
        self.stop();
        *self.native.write() = None;
        *self.transport.lock() = None;
        *self.signal_rx.lock() = None;
        *self.latency.write() = None;
        *self.sync_mode.write() = None;
        self.negotiator.invalidate();
        tracing::info!("stream deinitialized");
    }

    /// Starts the pump. A no-op when already running. Does not return until
    /// the pump thread signaled readiness or the configured timeout fired;
    /// on timeout the session reverts and [`AudioError::PumpStartTimeout`]
    /// propagates.
    pub fn start(&self) -> Result<(), AudioError> {
        if !self.gate.begin_run() {
            return Ok(());
        }
        match self.spawn_pump() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.gate.end_run();
                Err(e)
            }
        }
    }

    /// Signals the pump to exit and joins it. Returns only after the thread
    /// is gone, so no transfer can race a subsequent teardown.
    pub fn stop(&self) {
        self.gate.end_run();
        let handle = self.pump_thread.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    // Internals

    fn emit(&self, event: StreamEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Mints a handle and, when the host requires it, wraps it so every
    /// call runs on the designated thread.
    fn mint_stream(&self) -> Result<Arc<dyn NativeStream>, AudioError> {
        let stream = (self.factory)()?;
        Ok(DispatchedStream::wrap(stream, Arc::clone(&self.dispatch)))
    }

    /// Live handle when one exists, otherwise a short-lived probe from the
    /// factory (a deinitialized session owns no handle).
    fn probe_stream(&self) -> Result<Arc<dyn NativeStream>, AudioError> {
        if let Some(native) = self.native.read().as_ref() {
            return Ok(Arc::clone(native));
        }
        self.mint_stream()
    }

    fn initialize(&self) -> Result<(), AudioError> {
        let native = self.mint_stream()?;
        let format = self.resolve_format_on(native.as_ref())?;
        let (native, sync, signal_rx) = self.open_stream(native, &format)?;
        let transport = self.build_transport(&native, &format)?;

        *self.latency.write() = Some(LatencyCalculator::for_format(&format));
        *self.sync_mode.write() = Some(sync);
        *self.signal_rx.lock() = signal_rx;
        *self.transport.lock() = Some(Arc::new(Mutex::new(transport)));
        *self.native.write() = Some(native);

        tracing::info!(format = %format, sync = ?sync, "stream initialized");
        Ok(())
    }

    fn resolve_format_on(&self, stream: &dyn NativeStream) -> Result<AudioFormat, AudioError> {
        if let Some(desired) = self.desired_format.read().clone() {
            return Ok(desired);
        }
        self.negotiator
            .suggest(stream)?
            .into_iter()
            .next()
            .ok_or_else(|| AudioError::FormatNotSupported {
                format: "no usable format".to_string(),
            })
    }

    /// Synchronization-mode selection. Event mode opens with endpoint
    /// defaults and must register the period signal; if registration fails
    /// the partially initialized handle is discarded and a fresh one opens
    /// in polled mode with the configured manual latency.
    fn open_stream(
        &self,
        native: Arc<dyn NativeStream>,
        format: &AudioFormat,
    ) -> Result<(Arc<dyn NativeStream>, SyncMode, Option<Receiver<()>>), AudioError> {
        if self.options.use_event_sync {
            native.initialize(
                self.options.share_mode,
                InitSpec::event_driven(format.clone()),
            )?;

            let (signal_tx, signal_rx) = bounded(1);
            match native.register_event(signal_tx) {
                Ok(()) => return Ok((native, SyncMode::Event, Some(signal_rx))),
                Err(e) => {
                    tracing::warn!(error = %e, "hardware sync unavailable, falling back to polled mode");
                }
            }

            drop(native);
            let native = self.mint_stream()?;
            self.open_polled(&native, format)?;
            return Ok((native, SyncMode::Polling, None));
        }

        self.open_polled(&native, format)?;
        Ok((native, SyncMode::Polling, None))
    }

    fn open_polled(
        &self,
        native: &Arc<dyn NativeStream>,
        format: &AudioFormat,
    ) -> Result<(), AudioError> {
        native.initialize(
            self.options.share_mode,
            InitSpec::polled(format.clone(), self.options.manual_sync_latency()),
        )
    }

    fn build_transport(
        &self,
        native: &Arc<dyn NativeStream>,
        format: &AudioFormat,
    ) -> Result<Box<dyn Transport>, AudioError> {
        let frame_bytes = format.frame_bytes();
        match &self.direction {
            DirectionState::Capture { producer } => Ok(Box::new(CaptureTransport::new(
                native.capture_client()?,
                Arc::clone(producer),
                frame_bytes,
                Arc::clone(&self.metrics),
            ))),
            DirectionState::Render { on_data_requested } => Ok(Box::new(RenderTransport::new(
                native.render_client()?,
                Arc::clone(on_data_requested),
                frame_bytes,
                Arc::clone(&self.metrics),
            ))),
        }
    }

    fn spawn_pump(&self) -> Result<(), AudioError> {
        self.ensure_initialized()?;

        // A previous run that ended on its own leaves a finished thread
        // behind; reap it before spawning the next.
        if let Some(old) = self.pump_thread.lock().take() {
            let _ = old.join();
        }

        let native = self.native.read().clone().ok_or_else(|| {
            AudioError::Fatal("initialized session has no endpoint handle".to_string())
        })?;
        let transport = self.transport.lock().clone().ok_or_else(|| {
            AudioError::Fatal("initialized session has no transport".to_string())
        })?;
        let latency = (*self.latency.read()).ok_or_else(|| {
            AudioError::Fatal("initialized session has no latency calculator".to_string())
        })?;
        let sync = (*self.sync_mode.read()).ok_or_else(|| {
            AudioError::Fatal("initialized session has no synchronization mode".to_string())
        })?;
        let signal_rx = self.signal_rx.lock().clone();

        let worker = PumpWorker {
            native,
            transport,
            latency,
            sync,
            signal_rx,
            gate: Arc::clone(&self.gate),
            event_tx: self.event_tx.clone(),
            metrics: Arc::clone(&self.metrics),
            clock: Arc::clone(&self.clock),
        };

        let (ready_tx, ready_rx) = bounded::<()>(1);
        let handle = std::thread::Builder::new()
            .name("stream-pump".to_string())
            .spawn(move || {
                // Readiness comes first; everything after may block.
                let _ = ready_tx.send(());
                worker.run();
            })
            .map_err(|e| AudioError::Fatal(format!("Failed to spawn pump thread: {e}")))?;
        *self.pump_thread.lock() = Some(handle);

        let timeout = self.options.start_timeout();
        ready_rx
            .recv_timeout(timeout)
            .map_err(|_| AudioError::PumpStartTimeout { waited: timeout })
    }
}

impl Drop for StreamEngine {
    fn drop(&mut self) {
        self.ensure_deinitialized();
    }
}

/// The dedicated pump thread. Owns clones of everything it touches so the
/// engine's caller-facing surface stays lock-free during a run.
struct PumpWorker {
    native: Arc<dyn NativeStream>,
    transport: Arc<Mutex<Box<dyn Transport>>>,
    latency: LatencyCalculator,
    sync: SyncMode,
    signal_rx: Option<Receiver<()>>,
    gate: Arc<StateGate>,
    event_tx: Sender<StreamEvent>,
    metrics: Arc<PumpMetrics>,
    clock: SharedClock,
}

impl PumpWorker {
    fn run(self) {
        tracing::info!(sync = ?self.sync, "stream pump started");
        self.metrics.record_start();
        let _ = self.event_tx.send(StreamEvent::Started);

        if let Err(e) = self.pump() {
            tracing::error!(error = %e, "stream pump failed");
            self.metrics.record_pump_error();
            let _ = self.event_tx.send(StreamEvent::Error(e));
        }

        // Runs on every exit path so callers always observe the stop.
        self.gate.end_run();
        self.metrics.record_stop();
        let _ = self.event_tx.send(StreamEvent::Stopped);
        tracing::info!("stream pump stopped");
    }

    fn pump(&self) -> Result<(), AudioError> {
        self.native.start()?;
        match self.sync {
            SyncMode::Event => self.event_loop()?,
            SyncMode::Polling => self.poll_loop()?,
        }
        self.native.stop()?;
        self.native.reset()?;
        Ok(())
    }

    fn event_loop(&self) -> Result<(), AudioError> {
        let frames = self.native.buffer_frame_count()?;
        let wait = self.latency.frames_to_latency(frames as u64);
        let signal = self.signal_rx.as_ref().ok_or_else(|| {
            AudioError::Fatal("event sync selected without a registered signal".to_string())
        })?;

        let mut consecutive_misses = 0u32;
        while self.gate.is_running() {
            match signal.recv_timeout(wait) {
                Ok(()) => {
                    consecutive_misses = 0;
                    self.transfer()?;
                }
                Err(RecvTimeoutError::Timeout) => {
                    consecutive_misses += 1;
                    self.metrics.record_underrun();
                    tracing::warn!(misses = consecutive_misses, "missed buffer period signal");
                    if consecutive_misses >= MAX_CONSECUTIVE_UNDERRUNS {
                        // The endpoint has most likely gone away; end the
                        // run as a normal stop.
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Ok(())
    }

    fn poll_loop(&self) -> Result<(), AudioError> {
        let frames = self.native.buffer_frame_count()?;
        let interval = self.latency.frames_to_latency(frames as u64) / 2;
        while self.gate.is_running() {
            self.transfer()?;
            self.clock.sleep(interval);
        }
        Ok(())
    }

    fn transfer(&self) -> Result<(), AudioError> {
        self.transport.lock().transfer()
    }
}
