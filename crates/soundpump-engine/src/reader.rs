use crate::ring::ByteConsumer;

/// Caller-side handle for draining captured audio.
///
/// Returned by [`StreamEngine::capture`](crate::StreamEngine::capture) and
/// fed by the pump thread. Reads are non-blocking; an empty ring yields
/// zero.
pub struct CaptureReader {
    consumer: ByteConsumer,
    bytes_read: u64,
}

impl CaptureReader {
    pub(crate) fn new(consumer: ByteConsumer) -> Self {
        Self {
            consumer,
            bytes_read: 0,
        }
    }

    /// Copies up to `buf.len()` captured bytes, oldest first.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = self.consumer.read(buf);
        self.bytes_read += n as u64;
        n
    }

    /// Bytes currently waiting in the ring.
    pub fn available_bytes(&self) -> usize {
        self.consumer.available_bytes()
    }

    /// Total bytes handed to the caller since the session was created.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}
