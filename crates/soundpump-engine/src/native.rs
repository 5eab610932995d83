//! Contracts for the platform audio endpoint.
//!
//! Everything here is implemented by a backend (WASAPI, CoreAudio, a test
//! double) and injected into the engine. The engine treats the endpoint as
//! an untrusted, fallible external resource: every call can error, and the
//! handle is recreated from the factory whenever a session reinitializes.

use crossbeam_channel::Sender;
use std::sync::Arc;
use std::time::Duration;

use soundpump_foundation::{AudioError, ShareMode};

use crate::format::{AudioFormat, FormatSupport};

/// Property key under which a driver advertises its preferred format.
pub const DEVICE_FORMAT_KEY: &str = "device.format";

/// Secondary property key some drivers use for the same hint.
pub const OEM_FORMAT_KEY: &str = "device.oem-format";

/// How an endpoint stream is opened.
#[derive(Debug, Clone)]
pub struct InitSpec {
    /// Ask the endpoint to signal each completed buffer period.
    pub event_callback: bool,
    /// Requested shared-buffer duration; zero lets the endpoint choose.
    pub buffer_duration: Duration,
    /// Requested device period; zero lets the endpoint choose.
    pub period: Duration,
    pub format: AudioFormat,
    pub session: Option<String>,
}

impl InitSpec {
    /// Event-driven open: endpoint defaults for both durations.
    pub fn event_driven(format: AudioFormat) -> Self {
        Self {
            event_callback: true,
            buffer_duration: Duration::ZERO,
            period: Duration::ZERO,
            format,
            session: None,
        }
    }

    /// Polled open: an explicit buffer sized to the configured latency.
    pub fn polled(format: AudioFormat, buffer_duration: Duration) -> Self {
        Self {
            event_callback: false,
            buffer_duration,
            period: Duration::ZERO,
            format,
            session: None,
        }
    }
}

/// One acquired capture packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquired {
    pub frames: u32,
    /// The endpoint flagged the packet as silence; its bytes need not be
    /// read.
    pub silent: bool,
}

/// Reader side of the endpoint's shared buffer.
///
/// Frame counts are only meaningful between [`acquire`](Self::acquire) and
/// the matching [`release`](Self::release). `copy_out` tracks a read offset
/// inside the current acquisition, so successive calls drain it in order.
pub trait CaptureBuffer: Send {
    fn acquire(&mut self) -> Result<Acquired, AudioError>;

    /// Copies at most `dest.len()` bytes of whole frames out of the current
    /// acquisition. Returns the bytes copied, zero once drained.
    fn copy_out(&mut self, dest: &mut [u8]) -> Result<usize, AudioError>;

    /// Frames queued on the endpoint beyond the current acquisition.
    fn frames_pending(&self) -> Result<u32, AudioError>;

    /// Returns the acquisition to the endpoint. A no-op when nothing is
    /// held.
    fn release(&mut self) -> Result<(), AudioError>;
}

/// Writer side of the endpoint's shared buffer.
pub trait RenderBuffer: Send {
    fn free_frames(&self) -> Result<u32, AudioError>;

    /// Copies whole frames into the shared buffer. Returns the bytes
    /// written.
    fn copy_in(&mut self, src: &[u8]) -> Result<usize, AudioError>;

    /// Releases whatever was acquired, even when nothing was written.
    fn release(&mut self) -> Result<(), AudioError>;
}

/// The platform stream object.
///
/// Methods take `&self`: implementations front an inherently shared native
/// handle and are expected to carry their own interior synchronization.
pub trait NativeStream: Send + Sync {
    fn initialize(&self, mode: ShareMode, spec: InitSpec) -> Result<(), AudioError>;

    fn start(&self) -> Result<(), AudioError>;

    fn stop(&self) -> Result<(), AudioError>;

    fn reset(&self) -> Result<(), AudioError>;

    /// Capacity of the shared buffer, in frames. Valid after `initialize`.
    fn buffer_frame_count(&self) -> Result<u32, AudioError>;

    /// Frames currently queued in the shared buffer.
    fn current_padding(&self) -> Result<u32, AudioError>;

    /// End-to-end latency the endpoint reports for the open stream.
    fn stream_latency(&self) -> Result<Duration, AudioError>;

    fn is_format_supported(
        &self,
        mode: ShareMode,
        format: &AudioFormat,
    ) -> Result<FormatSupport, AudioError>;

    /// The mixer's internal processing format.
    fn mix_format(&self) -> Result<AudioFormat, AudioError>;

    /// Registers the buffer-period signal. The endpoint sends (or
    /// `try_send`s) a unit on every completed period. Fails on hardware
    /// that cannot deliver callbacks; callers fall back to polling.
    fn register_event(&self, signal: Sender<()>) -> Result<(), AudioError>;

    /// Fails with [`AudioError::NotInitialized`] before `initialize`.
    fn capture_client(&self) -> Result<Box<dyn CaptureBuffer>, AudioError>;

    /// Fails with [`AudioError::NotInitialized`] before `initialize`.
    fn render_client(&self) -> Result<Box<dyn RenderBuffer>, AudioError>;
}

/// Mints endpoint handles. Called once per initialization cycle, and again
/// when the event-mode handle has to be discarded during fallback.
pub type StreamFactory =
    Box<dyn Fn() -> Result<Arc<dyn NativeStream>, AudioError> + Send + Sync>;

/// A device metadata attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Format(AudioFormat),
    Text(String),
    Blob(Vec<u8>),
}

/// Read-only device metadata, used only to fetch device-declared preferred
/// formats.
pub trait DeviceProperties: Send + Sync {
    fn try_attribute(&self, name: &str) -> Option<PropertyValue>;
}

/// Metadata source for endpoints that advertise nothing.
#[derive(Debug, Default)]
pub struct NoProperties;

impl DeviceProperties for NoProperties {
    fn try_attribute(&self, _name: &str) -> Option<PropertyValue> {
        None
    }
}
