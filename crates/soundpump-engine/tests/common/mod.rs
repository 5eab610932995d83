//! Scriptable in-memory endpoint shared by the integration tests.
#![allow(dead_code)]

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use soundpump_engine::{
    Acquired, AudioFormat, CaptureBuffer, DeviceProperties, FormatSupport, InitSpec,
    NativeStream, PropertyValue, RenderBuffer, StreamEvent, StreamFactory,
};
use soundpump_foundation::{AudioError, ShareMode, StreamOptions};

/// One scripted capture packet.
#[derive(Debug, Clone)]
pub struct Packet {
    pub bytes: Vec<u8>,
    pub silent: bool,
}

impl Packet {
    pub fn data(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            silent: false,
        }
    }

    pub fn silent(len: usize) -> Self {
        Self {
            bytes: vec![0x55; len],
            silent: true,
        }
    }
}

/// Observation point shared by every handle a factory mints.
#[derive(Default)]
pub struct FakeHub {
    pub created: AtomicU32,
    pub init_specs: Mutex<Vec<InitSpec>>,
    pub starts: AtomicU32,
    pub stops: AtomicU32,
    pub resets: AtomicU32,
    pub register_attempts: AtomicU32,
    pub mix_queries: AtomicU32,
    pub releases: AtomicU32,
    /// The period signal registered by the most recent event-mode open.
    pub signal_tx: Mutex<Option<Sender<()>>>,
    /// Packets the capture side will serve, in order.
    pub capture_packets: Mutex<VecDeque<Packet>>,
    /// Free-frame answers the render side will give, in order (empty = 0).
    pub render_free_frames: Mutex<VecDeque<u32>>,
    /// Bytes the render side received via `copy_in`.
    pub rendered: Mutex<Vec<u8>>,
}

impl FakeHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_capture_packet(&self, packet: Packet) {
        self.capture_packets.lock().push_back(packet);
    }

    pub fn push_render_budget(&self, frames: u32) {
        self.render_free_frames.lock().push_back(frames);
    }

    /// Pulses the hardware period signal, if one is registered.
    pub fn pulse_signal(&self) {
        if let Some(tx) = self.signal_tx.lock().as_ref() {
            let _ = tx.try_send(());
        }
    }
}

/// Per-handle behavior knobs.
#[derive(Clone)]
pub struct FakeConfig {
    pub mix_format: AudioFormat,
    /// Formats the endpoint accepts as-is.
    pub supported: Vec<AudioFormat>,
    /// Proposed alternatives: (rejected format, closest match).
    pub closest: Vec<(AudioFormat, AudioFormat)>,
    pub register_event_fails: bool,
    pub buffer_frames: u32,
    pub fail_initialize: bool,
}

impl Default for FakeConfig {
    fn default() -> Self {
        let mix = AudioFormat::pcm(48_000, 2, 16);
        Self {
            mix_format: mix.clone(),
            supported: vec![mix],
            closest: Vec::new(),
            register_event_fails: false,
            buffer_frames: 480,
            fail_initialize: false,
        }
    }
}

pub struct FakeStream {
    cfg: FakeConfig,
    hub: Arc<FakeHub>,
    initialized: Mutex<Option<InitSpec>>,
}

impl FakeStream {
    pub fn new(cfg: FakeConfig, hub: Arc<FakeHub>) -> Self {
        Self {
            cfg,
            hub,
            initialized: Mutex::new(None),
        }
    }

    fn frame_bytes(&self) -> Result<usize, AudioError> {
        self.initialized
            .lock()
            .as_ref()
            .map(|spec| spec.format.frame_bytes())
            .ok_or_else(|| AudioError::NotInitialized {
                what: "buffer accessor".to_string(),
            })
    }
}

impl NativeStream for FakeStream {
    fn initialize(&self, _mode: ShareMode, spec: InitSpec) -> Result<(), AudioError> {
        if self.cfg.fail_initialize {
            return Err(AudioError::Backend {
                reason: "endpoint refused initialization".to_string(),
            });
        }
        self.hub.init_specs.lock().push(spec.clone());
        *self.initialized.lock() = Some(spec);
        Ok(())
    }

    fn start(&self) -> Result<(), AudioError> {
        self.hub.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<(), AudioError> {
        self.hub.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reset(&self) -> Result<(), AudioError> {
        self.hub.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn buffer_frame_count(&self) -> Result<u32, AudioError> {
        Ok(self.cfg.buffer_frames)
    }

    fn current_padding(&self) -> Result<u32, AudioError> {
        Ok(0)
    }

    fn stream_latency(&self) -> Result<Duration, AudioError> {
        Ok(Duration::from_millis(1))
    }

    fn is_format_supported(
        &self,
        _mode: ShareMode,
        format: &AudioFormat,
    ) -> Result<FormatSupport, AudioError> {
        if self.cfg.supported.contains(format) {
            return Ok(FormatSupport::Supported);
        }
        if let Some((_, alt)) = self.cfg.closest.iter().find(|(probe, _)| probe == format) {
            return Ok(FormatSupport::ClosestMatch(alt.clone()));
        }
        Ok(FormatSupport::Unsupported)
    }

    fn mix_format(&self) -> Result<AudioFormat, AudioError> {
        self.hub.mix_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.cfg.mix_format.clone())
    }

    fn register_event(&self, signal: Sender<()>) -> Result<(), AudioError> {
        self.hub.register_attempts.fetch_add(1, Ordering::SeqCst);
        if self.cfg.register_event_fails {
            return Err(AudioError::Backend {
                reason: "driver rejected callback registration".to_string(),
            });
        }
        *self.hub.signal_tx.lock() = Some(signal);
        Ok(())
    }

    fn capture_client(&self) -> Result<Box<dyn CaptureBuffer>, AudioError> {
        let frame_bytes = self.frame_bytes()?;
        Ok(Box::new(FakeCaptureBuffer {
            hub: Arc::clone(&self.hub),
            frame_bytes,
            current: None,
            offset: 0,
        }))
    }

    fn render_client(&self) -> Result<Box<dyn RenderBuffer>, AudioError> {
        self.frame_bytes()?;
        Ok(Box::new(FakeRenderBuffer {
            hub: Arc::clone(&self.hub),
        }))
    }
}

pub struct FakeCaptureBuffer {
    hub: Arc<FakeHub>,
    frame_bytes: usize,
    current: Option<Packet>,
    offset: usize,
}

impl CaptureBuffer for FakeCaptureBuffer {
    fn acquire(&mut self) -> Result<Acquired, AudioError> {
        self.offset = 0;
        self.current = self.hub.capture_packets.lock().pop_front();
        Ok(match &self.current {
            Some(packet) => Acquired {
                frames: (packet.bytes.len() / self.frame_bytes) as u32,
                silent: packet.silent,
            },
            None => Acquired {
                frames: 0,
                silent: false,
            },
        })
    }

    fn copy_out(&mut self, dest: &mut [u8]) -> Result<usize, AudioError> {
        let Some(packet) = &self.current else {
            return Ok(0);
        };
        let remaining = &packet.bytes[self.offset..];
        let n = dest.len().min(remaining.len());
        let n = (n / self.frame_bytes) * self.frame_bytes;
        dest[..n].copy_from_slice(&remaining[..n]);
        self.offset += n;
        Ok(n)
    }

    fn frames_pending(&self) -> Result<u32, AudioError> {
        let queued: usize = self
            .hub
            .capture_packets
            .lock()
            .iter()
            .map(|p| p.bytes.len())
            .sum();
        Ok((queued / self.frame_bytes) as u32)
    }

    fn release(&mut self) -> Result<(), AudioError> {
        if self.current.take().is_some() {
            self.hub.releases.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

pub struct FakeRenderBuffer {
    hub: Arc<FakeHub>,
}

impl RenderBuffer for FakeRenderBuffer {
    fn free_frames(&self) -> Result<u32, AudioError> {
        Ok(self.hub.render_free_frames.lock().pop_front().unwrap_or(0))
    }

    fn copy_in(&mut self, src: &[u8]) -> Result<usize, AudioError> {
        self.hub.rendered.lock().extend_from_slice(src);
        Ok(src.len())
    }

    fn release(&mut self) -> Result<(), AudioError> {
        self.hub.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Device metadata backed by a plain map.
#[derive(Default)]
pub struct StaticProps {
    attributes: HashMap<String, PropertyValue>,
}

impl StaticProps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: PropertyValue) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }
}

impl DeviceProperties for StaticProps {
    fn try_attribute(&self, name: &str) -> Option<PropertyValue> {
        self.attributes.get(name).cloned()
    }
}

/// Factory minting fresh handles that all report into `hub`.
pub fn fake_factory(cfg: FakeConfig, hub: Arc<FakeHub>) -> StreamFactory {
    Box::new(move || {
        hub.created.fetch_add(1, Ordering::SeqCst);
        let stream: Arc<dyn NativeStream> =
            Arc::new(FakeStream::new(cfg.clone(), Arc::clone(&hub)));
        Ok(stream)
    })
}

pub fn no_props() -> Arc<dyn DeviceProperties> {
    Arc::new(StaticProps::new())
}

/// Options most tests start from: polled mode with a short manual latency.
pub fn polled_options() -> StreamOptions {
    StreamOptions {
        use_event_sync: false,
        manual_sync_latency_ms: 20,
        ..StreamOptions::default()
    }
}

pub fn event_options() -> StreamOptions {
    StreamOptions {
        use_event_sync: true,
        ..StreamOptions::default()
    }
}

/// Drains events already delivered plus those arriving within `timeout`,
/// stopping early once `until` matches.
pub fn collect_events(
    rx: &Receiver<StreamEvent>,
    timeout: Duration,
    until: impl Fn(&StreamEvent) -> bool,
) -> Vec<StreamEvent> {
    let deadline = Instant::now() + timeout;
    let mut events = Vec::new();
    while Instant::now() < deadline {
        match rx.recv_timeout(Duration::from_millis(10)) {
            Ok(event) => {
                let done = until(&event);
                events.push(event);
                if done {
                    break;
                }
            }
            Err(_) => {}
        }
    }
    events
}

/// Spins until `cond` holds or `timeout` elapses; returns whether it held.
pub fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}
