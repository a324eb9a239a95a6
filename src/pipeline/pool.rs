//! Recycling of encoded-frame buffers between producer and slot.

use bytes::BytesMut;
use tracing::debug;

use crate::capture::EncodedFrame;

/// Hands the producer an empty destination buffer per frame.
///
/// Holds at most one spare. A published buffer comes back only once every
/// consumer reference to it is gone.
#[derive(Debug, Default)]
pub struct BufferPool {
    spare: Option<BytesMut>,
    allocations: u64,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers allocated so far.
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    pub fn has_spare(&self) -> bool {
        self.spare.is_some()
    }

    /// An empty buffer able to hold `capacity` bytes. The spare is reused
    /// and only grows when a larger frame size shows up.
    pub fn checkout(&mut self, capacity: usize) -> BytesMut {
        match self.spare.take() {
            Some(mut buf) => {
                buf.clear();
                buf.reserve(capacity);
                buf
            }
            None => {
                self.allocations += 1;
                BytesMut::with_capacity(capacity)
            }
        }
    }

    /// Return a buffer that was never published.
    pub fn give_back(&mut self, mut buf: BytesMut) {
        buf.clear();
        self.spare = Some(buf);
    }

    /// Take back the storage of a frame displaced from the slot. Returns
    /// `false` if a consumer still references it.
    pub fn reclaim(&mut self, frame: EncodedFrame) -> bool {
        let sequence = frame.sequence;
        match frame.data.try_into_mut() {
            Ok(buf) => {
                self.give_back(buf);
                metrics::counter!("uvc_buffers_recycled_total").increment(1);
                true
            }
            Err(_) => {
                debug!(sequence, "displaced frame still referenced, not recycling");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{PixelFormat, RawFrame};

    fn publishable(pool: &mut BufferPool, seq: u64) -> EncodedFrame {
        let mut buf = pool.checkout(64);
        buf.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xD9]);
        let raw = RawFrame::new(PixelFormat::Nv12, 2, 2, seq, &[]);
        EncodedFrame::new(buf.freeze(), &raw)
    }

    #[test]
    fn test_reuses_unreferenced_buffer() {
        let mut pool = BufferPool::new();
        let frame = publishable(&mut pool, 1);

        assert!(pool.reclaim(frame));
        let buf = pool.checkout(64);

        assert!(buf.is_empty());
        assert_eq!(pool.allocations(), 1);
    }

    #[test]
    fn test_keeps_buffer_a_consumer_still_reads() {
        let mut pool = BufferPool::new();
        let frame = publishable(&mut pool, 1);
        let held = frame.clone();

        assert!(!pool.reclaim(frame));
        assert_eq!(held.as_bytes(), &[0xFF, 0xD8, 0xFF, 0xD9]);

        let _ = pool.checkout(64);
        assert_eq!(pool.allocations(), 2);
    }

    #[test]
    fn test_give_back_clears() {
        let mut pool = BufferPool::new();
        let mut buf = pool.checkout(64);
        buf.extend_from_slice(b"partial");

        pool.give_back(buf);

        assert!(pool.has_spare());
        assert!(pool.checkout(64).is_empty());
        assert_eq!(pool.allocations(), 1);
    }

    #[test]
    fn test_spare_grows_for_larger_frames() {
        let mut pool = BufferPool::new();
        pool.give_back(BytesMut::with_capacity(16));

        let buf = pool.checkout(4096);

        assert!(buf.capacity() >= 4096);
        assert_eq!(pool.allocations(), 0);
    }
}
