//! One buffer transfer per direction.
//!
//! The pump loop is direction-agnostic: it drives a [`Transport`] whose two
//! implementations wrap the capture and render buffer accessors. Scratch
//! buffers are reused across iterations so steady-state transfers do not
//! allocate.

use parking_lot::Mutex;
use std::sync::Arc;

use soundpump_foundation::AudioError;
use soundpump_telemetry::PumpMetrics;

use crate::native::{CaptureBuffer, RenderBuffer};
use crate::ring::ByteProducer;

/// Callback that fills a render request. Receives the free-byte budget as a
/// zeroed slice and returns how many bytes it wrote from the front.
pub type DataRequestFn = Box<dyn FnMut(&mut [u8]) -> usize + Send>;

/// Moves one buffer's worth of audio across the endpoint boundary.
pub trait Transport: Send {
    fn transfer(&mut self) -> Result<(), AudioError>;
}

/// Render direction: ask the caller for data, hand it to the endpoint.
pub struct RenderTransport {
    client: Box<dyn RenderBuffer>,
    on_data_requested: Arc<Mutex<DataRequestFn>>,
    frame_bytes: usize,
    scratch: Vec<u8>,
    metrics: Arc<PumpMetrics>,
}

impl RenderTransport {
    pub fn new(
        client: Box<dyn RenderBuffer>,
        on_data_requested: Arc<Mutex<DataRequestFn>>,
        frame_bytes: usize,
        metrics: Arc<PumpMetrics>,
    ) -> Self {
        Self {
            client,
            on_data_requested,
            frame_bytes,
            scratch: Vec::new(),
            metrics,
        }
    }
}

impl Transport for RenderTransport {
    fn transfer(&mut self) -> Result<(), AudioError> {
        let free = self.client.free_frames()? as usize;
        if free > 0 {
            let budget = free * self.frame_bytes;
            self.scratch.clear();
            self.scratch.resize(budget, 0);

            let written = (*self.on_data_requested.lock())(&mut self.scratch[..budget]);
            let written = written.min(budget);
            if written > 0 {
                let copied = self.client.copy_in(&self.scratch[..written])?;
                self.metrics.record_transfer(copied as u64);
            }
        }
        // Release even when the caller wrote nothing, otherwise the
        // endpoint buffer stalls.
        self.client.release()?;
        Ok(())
    }
}

/// Capture direction: drain the endpoint's packet into the delivery ring.
pub struct CaptureTransport {
    client: Box<dyn CaptureBuffer>,
    producer: Arc<Mutex<ByteProducer>>,
    frame_bytes: usize,
    scratch: Vec<u8>,
    metrics: Arc<PumpMetrics>,
}

impl CaptureTransport {
    pub fn new(
        client: Box<dyn CaptureBuffer>,
        producer: Arc<Mutex<ByteProducer>>,
        frame_bytes: usize,
        metrics: Arc<PumpMetrics>,
    ) -> Self {
        Self {
            client,
            producer,
            frame_bytes,
            scratch: Vec::new(),
            metrics,
        }
    }
}

impl Transport for CaptureTransport {
    fn transfer(&mut self) -> Result<(), AudioError> {
        let acquired = self.client.acquire()?;
        let bytes = acquired.frames as usize * self.frame_bytes;
        if bytes > 0 {
            self.scratch.clear();
            self.scratch.resize(bytes, 0);

            // Silent packets keep their timing but the endpoint bytes are
            // not worth reading; deliver zeros.
            let copied = if acquired.silent {
                bytes
            } else {
                self.client.copy_out(&mut self.scratch)?
            };

            if copied > 0 {
                match self.producer.lock().write(&self.scratch[..copied]) {
                    Ok(n) => self.metrics.record_transfer(n as u64),
                    Err(()) => {
                        self.metrics.record_ring_overflow();
                        tracing::warn!(bytes = copied, "capture ring full, dropping packet");
                    }
                }
            }
        }
        self.client.release()?;
        Ok(())
    }
}
