use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Shared counters for cross-thread pump monitoring.
///
/// Every field is independently updatable from the pump thread without
/// locking; readers take a [`snapshot`](PumpMetrics::snapshot) for display.
#[derive(Clone, Default)]
pub struct PumpMetrics {
    /// Completed buffer transfers.
    pub transfers: Arc<AtomicU64>,
    /// Bytes moved across the endpoint boundary.
    pub bytes_moved: Arc<AtomicU64>,
    /// Missed hardware buffer signals.
    pub underruns: Arc<AtomicU64>,
    /// Capture packets dropped because the delivery ring was full.
    pub ring_overflows: Arc<AtomicU64>,
    /// Errors surfaced from inside the pump loop.
    pub pump_errors: Arc<AtomicU64>,
    /// Pump runs started.
    pub starts: Arc<AtomicU64>,
    /// Pump runs ended (always >= starts - 1).
    pub stops: Arc<AtomicU64>,
    /// Wall-clock time of the most recent transfer.
    pub last_transfer: Arc<RwLock<Option<Instant>>>,
}

impl PumpMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_transfer(&self, bytes: u64) {
        self.transfers.fetch_add(1, Ordering::Relaxed);
        self.bytes_moved.fetch_add(bytes, Ordering::Relaxed);
        *self.last_transfer.write() = Some(Instant::now());
    }

    pub fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ring_overflow(&self) {
        self.ring_overflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pump_error(&self) {
        self.pump_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_start(&self) {
        self.starts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stop(&self) {
        self.stops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            transfers: self.transfers.load(Ordering::Relaxed),
            bytes_moved: self.bytes_moved.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            ring_overflows: self.ring_overflows.load(Ordering::Relaxed),
            pump_errors: self.pump_errors.load(Ordering::Relaxed),
            starts: self.starts.load(Ordering::Relaxed),
            stops: self.stops.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PumpMetrics`] for display and assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub transfers: u64,
    pub bytes_moved: u64,
    pub underruns: u64,
    pub ring_overflows: u64,
    pub pump_errors: u64,
    pub starts: u64,
    pub stops: u64,
}
