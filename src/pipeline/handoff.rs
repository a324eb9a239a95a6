//! Single-slot mailbox between the capture producer and one consumer.
//!
//! The producer offers a frame and then waits, bounded, for the consumer to
//! release it. The consumer blocks until a frame is ready, reads it and
//! releases it. Nothing is ever queued more than one deep: a frame the
//! consumer has not picked up is replaced by the next one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use crossbeam::utils::CachePadded;
use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, trace, warn};

use crate::capture::EncodedFrame;
use crate::error::{PipelineError, Result};

pub const DEFAULT_RELEASE_TIMEOUT: Duration = Duration::from_millis(1000);

/// `held` value while the consumer holds nothing
const NOT_HELD: u64 = u64::MAX;

/// Snapshot of slot activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandoffStats {
    pub published: u64,
    /// Frames replaced before any consumer acquired them
    pub superseded: u64,
    pub acquired: u64,
    pub released: u64,
    /// Releases without a held frame, ignored
    pub rejected_releases: u64,
    pub timeouts: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    superseded: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
    rejected_releases: AtomicU64,
    timeouts: AtomicU64,
}

pub struct HandoffSlot {
    /// frame-ready, capacity 1
    ready_tx: Sender<EncodedFrame>,
    ready_rx: Receiver<EncodedFrame>,
    /// frame-released, carries the released frame's sequence
    release_tx: Sender<u64>,
    release_rx: Receiver<u64>,
    latest: ArcSwapOption<EncodedFrame>,
    /// Sequence of the frame the consumer currently holds, or `NOT_HELD`
    held: AtomicU64,
    release_timeout: Duration,
    stats: CachePadded<Counters>,
}

impl HandoffSlot {
    pub fn new(release_timeout: Duration) -> Self {
        let (ready_tx, ready_rx) = flume::bounded(1);
        let (release_tx, release_rx) = flume::unbounded();
        Self {
            ready_tx,
            ready_rx,
            release_tx,
            release_rx,
            latest: ArcSwapOption::empty(),
            held: AtomicU64::new(NOT_HELD),
            release_timeout,
            stats: CachePadded::new(Counters::default()),
        }
    }

    pub fn release_timeout(&self) -> Duration {
        self.release_timeout
    }

    /// Producer: store `frame`, raise frame-ready and wait for the consumer
    /// to release it.
    pub fn publish(&self, frame: EncodedFrame) -> Result<()> {
        let sequence = frame.sequence;
        drop(self.offer(frame));
        self.wait_released(sequence)
    }

    /// Producer: store `frame` and raise frame-ready without waiting.
    ///
    /// Returns the frame it displaced so the caller can recycle its buffer.
    pub fn offer(&self, frame: EncodedFrame) -> Option<EncodedFrame> {
        // Releases that arrive after a timeout belong to older frames.
        while self.release_rx.try_recv().is_ok() {}

        while let Ok(stale) = self.ready_rx.try_recv() {
            trace!(sequence = stale.sequence, "superseding unacquired frame");
            self.stats.superseded.fetch_add(1, Ordering::Relaxed);
        }

        let sequence = frame.sequence;
        let displaced = self.latest.swap(Some(Arc::new(frame.clone())));
        if self.ready_tx.try_send(frame).is_err() {
            // only reachable with a second producer filling the slot
            warn!(sequence, "frame-ready already raised, frame not signalled");
        }
        self.stats.published.fetch_add(1, Ordering::Relaxed);
        debug!(sequence, "frame published");

        displaced.map(|arc| Arc::try_unwrap(arc).unwrap_or_else(|shared| (*shared).clone()))
    }

    /// Producer: block until frame `sequence` is released or the release
    /// timeout expires.
    pub fn wait_released(&self, sequence: u64) -> Result<()> {
        let started = Instant::now();
        let deadline = started + self.release_timeout;
        loop {
            match self.release_rx.recv_deadline(deadline) {
                Ok(released) if released == sequence => {
                    trace!(sequence, waited = ?started.elapsed(), "frame released");
                    return Ok(());
                }
                Ok(released) => {
                    trace!(sequence, released, "ignoring late release");
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("uvc_handoff_timeouts_total").increment(1);
                    let waited = started.elapsed();
                    warn!(sequence, ?waited, "consumer did not release frame in time");
                    return Err(PipelineError::HandoffTimeout { sequence, waited });
                }
                Err(RecvTimeoutError::Disconnected) => return Err(PipelineError::SlotClosed),
            }
        }
    }

    /// Consumer: block until a frame is ready and take it.
    pub fn acquire(&self) -> Result<EncodedFrame> {
        let frame = self
            .ready_rx
            .recv()
            .map_err(|_| PipelineError::SlotClosed)?;
        self.hold(&frame);
        Ok(frame)
    }

    /// Consumer: like [`acquire`](Self::acquire) but gives up after `timeout`.
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<EncodedFrame> {
        let frame = self.ready_rx.recv_timeout(timeout).ok()?;
        self.hold(&frame);
        Some(frame)
    }

    /// Consumer: raise frame-released for the held frame.
    ///
    /// Returns `false`, changing nothing, when no frame is held.
    pub fn release(&self) -> bool {
        match self.held.swap(NOT_HELD, Ordering::AcqRel) {
            NOT_HELD => {
                self.stats.rejected_releases.fetch_add(1, Ordering::Relaxed);
                debug!("release without an acquired frame ignored");
                false
            }
            sequence => {
                // the receiver lives as long as self
                let _ = self.release_tx.send(sequence);
                self.stats.released.fetch_add(1, Ordering::Relaxed);
                trace!(sequence, "frame released by consumer");
                true
            }
        }
    }

    /// Most recently published frame, without touching frame-ready.
    pub fn latest(&self) -> Option<EncodedFrame> {
        self.latest.load_full().map(|frame| (*frame).clone())
    }

    pub fn stats(&self) -> HandoffStats {
        let c = &*self.stats;
        HandoffStats {
            published: c.published.load(Ordering::Relaxed),
            superseded: c.superseded.load(Ordering::Relaxed),
            acquired: c.acquired.load(Ordering::Relaxed),
            released: c.released.load(Ordering::Relaxed),
            rejected_releases: c.rejected_releases.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
        }
    }

    fn hold(&self, frame: &EncodedFrame) {
        let previous = self.held.swap(frame.sequence, Ordering::AcqRel);
        if previous != NOT_HELD {
            debug!(previous, "acquired again without releasing");
        }
        self.stats.acquired.fetch_add(1, Ordering::Relaxed);
        trace!(sequence = frame.sequence, "frame acquired");
    }
}

impl Default for HandoffSlot {
    fn default() -> Self {
        Self::new(DEFAULT_RELEASE_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use bytes::Bytes;

    use super::*;
    use crate::capture::{PixelFormat, RawFrame};

    fn frame(seq: u64, payload: &'static [u8]) -> EncodedFrame {
        let raw = RawFrame::new(PixelFormat::Nv12, 4, 4, seq, &[]);
        EncodedFrame::new(Bytes::from_static(payload), &raw)
    }

    #[test]
    fn test_publish_unblocked_by_release() {
        let slot = Arc::new(HandoffSlot::new(Duration::from_secs(5)));
        let consumer = {
            let slot = slot.clone();
            thread::spawn(move || {
                let frame = slot.acquire().unwrap();
                assert_eq!(frame.as_bytes(), b"one");
                assert!(slot.release());
            })
        };

        let started = Instant::now();
        slot.publish(frame(1, b"one")).unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        consumer.join().unwrap();
        let stats = slot.stats();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.acquired, 1);
        assert_eq!(stats.released, 1);
        assert_eq!(stats.timeouts, 0);
    }

    #[test]
    fn test_release_without_acquire_is_noop() {
        let slot = HandoffSlot::new(Duration::from_millis(50));

        assert!(!slot.release());
        drop(slot.offer(frame(1, b"one")));
        let _ = slot.acquire().unwrap();
        assert!(slot.release());
        assert!(!slot.release());

        let stats = slot.stats();
        assert_eq!(stats.released, 1);
        assert_eq!(stats.rejected_releases, 2);
    }

    #[test]
    fn test_release_signals_most_recently_acquired_frame() {
        let slot = HandoffSlot::new(Duration::from_millis(50));

        drop(slot.offer(frame(0, b"zero")));
        let _ = slot.acquire().unwrap();
        assert!(slot.release());
        slot.wait_released(0).unwrap();

        drop(slot.offer(frame(1, b"one")));
        let _ = slot.acquire().unwrap();
        drop(slot.offer(frame(2, b"two")));
        let _ = slot.acquire().unwrap();
        assert!(slot.release());
        assert!(!slot.release());

        slot.wait_released(2).unwrap();
        let stats = slot.stats();
        assert_eq!(stats.acquired, 3);
        assert_eq!(stats.released, 2);
        assert_eq!(stats.rejected_releases, 1);
    }

    #[test]
    fn test_stale_release_does_not_satisfy_next_publish() {
        let slot = HandoffSlot::new(Duration::from_millis(50));

        drop(slot.offer(frame(1, b"one")));
        let _ = slot.acquire().unwrap();
        assert!(slot.wait_released(1).is_err());
        // consumer releases after the producer gave up
        assert!(slot.release());

        let started = Instant::now();
        let err = slot.publish(frame(2, b"two")).unwrap_err();

        assert!(matches!(err, PipelineError::HandoffTimeout { sequence: 2, .. }));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_unacquired_frame_is_superseded() {
        let slot = HandoffSlot::new(Duration::from_millis(10));

        let first = slot.offer(frame(1, b"one"));
        let displaced = slot.offer(frame(2, b"two"));

        assert!(first.is_none());
        assert_eq!(displaced.map(|f| f.sequence), Some(1));
        let acquired = slot.acquire_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(acquired.sequence, 2);
        assert!(slot.acquire_timeout(Duration::from_millis(10)).is_none());
        assert_eq!(slot.stats().superseded, 1);
    }

    #[test]
    fn test_latest_does_not_consume_ready() {
        let slot = HandoffSlot::new(Duration::from_millis(10));
        assert!(slot.latest().is_none());

        drop(slot.offer(frame(3, b"three")));

        assert_eq!(slot.latest().unwrap().sequence, 3);
        let acquired = slot.acquire_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(acquired.sequence, 3);
        // still visible after acquisition
        assert_eq!(slot.latest().unwrap().as_bytes(), b"three");
    }
}
