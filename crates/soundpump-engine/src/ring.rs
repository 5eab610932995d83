use rtrb::{chunks::ChunkError, Consumer, Producer, RingBuffer};

/// SPSC byte ring carrying interleaved frames from the pump thread to the
/// caller (real-time safe, no locks on either side).
pub struct ByteRing {
    producer: Producer<u8>,
    consumer: Consumer<u8>,
}

impl ByteRing {
    pub fn new(capacity: usize) -> Self {
        let (producer, consumer) = RingBuffer::new(capacity);
        Self { producer, consumer }
    }

    /// Split into producer and consumer for separate threads.
    pub fn split(self) -> (ByteProducer, ByteConsumer) {
        (
            ByteProducer {
                producer: self.producer,
            },
            ByteConsumer {
                consumer: self.consumer,
            },
        )
    }
}

/// Producer half, owned by the pump thread.
pub struct ByteProducer {
    producer: Producer<u8>,
}

impl ByteProducer {
    /// Non-blocking write of the whole slice. Refuses everything when the
    /// ring cannot hold it, so packets are never torn.
    pub fn write(&mut self, bytes: &[u8]) -> Result<usize, ()> {
        let mut chunk = match self.producer.write_chunk(bytes.len()) {
            Ok(chunk) => chunk,
            Err(_) => return Err(()),
        };

        // The chunk may wrap; fill both slices.
        let (first, second) = chunk.as_mut_slices();
        let split = first.len();
        if split > 0 {
            first.copy_from_slice(&bytes[..split]);
        }
        if !second.is_empty() {
            second.copy_from_slice(&bytes[split..]);
        }
        chunk.commit_all();
        Ok(bytes.len())
    }

    /// Free space, in bytes.
    pub fn free_bytes(&self) -> usize {
        self.producer.slots()
    }
}

/// Consumer half, owned by the caller.
pub struct ByteConsumer {
    consumer: Consumer<u8>,
}

impl ByteConsumer {
    /// Non-blocking read of up to `buf.len()` bytes.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let want = buf.len().min(self.consumer.slots());
        if want == 0 {
            return 0;
        }
        let chunk = match self.consumer.read_chunk(want) {
            Ok(chunk) => chunk,
            // slots() can only have grown since we sampled it; nothing to do.
            Err(ChunkError::TooFewSlots(_)) => return 0,
        };

        let len = chunk.len();
        let (first, second) = chunk.as_slices();
        let split = first.len();
        if split > 0 {
            buf[..split].copy_from_slice(first);
        }
        if !second.is_empty() {
            buf[split..split + second.len()].copy_from_slice(second);
        }
        chunk.commit_all();
        len
    }

    /// Bytes available to read.
    pub fn available_bytes(&self) -> usize {
        self.consumer.slots()
    }
}
