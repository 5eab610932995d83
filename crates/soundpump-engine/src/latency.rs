use std::time::Duration;

use crate::format::AudioFormat;

/// Converts frame and byte counts into wall-clock latency for one
/// negotiated format.
///
/// Built fresh on every initialization because both inputs come from the
/// negotiated format, not from any global state.
#[derive(Debug, Clone, Copy)]
pub struct LatencyCalculator {
    sample_rate: u32,
    frame_bytes: usize,
}

impl LatencyCalculator {
    pub fn new(sample_rate: u32, frame_bytes: usize) -> Self {
        Self {
            sample_rate,
            frame_bytes,
        }
    }

    pub fn for_format(format: &AudioFormat) -> Self {
        Self::new(format.sample_rate, format.frame_bytes())
    }

    /// Latency of `frames` at the negotiated rate, with nanosecond
    /// resolution.
    pub fn frames_to_latency(&self, frames: u64) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let nanos = frames as u128 * 1_000_000_000u128 / self.sample_rate as u128;
        Duration::from_nanos(nanos as u64)
    }

    /// Latency of `bytes` worth of whole frames.
    pub fn bytes_to_latency(&self, bytes: usize) -> Duration {
        if self.frame_bytes == 0 {
            return Duration::ZERO;
        }
        self.frames_to_latency((bytes / self.frame_bytes) as u64)
    }
}
