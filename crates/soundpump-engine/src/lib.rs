//! Streaming engine for hardware audio endpoints.
//!
//! The endpoint itself (device discovery, the platform stream object, the
//! shared-buffer accessors) is injected behind the traits in [`native`];
//! this crate owns everything above that boundary: format negotiation,
//! event/polled synchronization selection with graceful fallback, the pump
//! thread, and the lifecycle discipline around it.

pub mod dispatch;
pub mod engine;
pub mod format;
pub mod latency;
pub mod native;
pub mod negotiator;
pub mod reader;
pub mod ring;
pub mod transport;

// Public API
pub use dispatch::{DispatchedStream, HostDispatch, InlineDispatch, SingleThreadDispatch};
pub use engine::{StreamEngine, StreamEvent, SyncMode, DEFAULT_CAPTURE_RING_BYTES};
pub use format::{AudioFormat, FormatSupport};
pub use latency::LatencyCalculator;
pub use native::{
    Acquired, CaptureBuffer, DeviceProperties, InitSpec, NativeStream, NoProperties,
    PropertyValue, RenderBuffer, StreamFactory, DEVICE_FORMAT_KEY, OEM_FORMAT_KEY,
};
pub use negotiator::FormatNegotiator;
pub use reader::CaptureReader;
pub use ring::{ByteConsumer, ByteProducer, ByteRing};
pub use transport::Transport;
