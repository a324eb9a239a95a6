//! Per-frame entry point bound to the capture subsystem.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::handoff::HandoffSlot;
use super::pool::BufferPool;
use crate::capture::{EncodedFrame, RawFrame};
use crate::encode::{max_encoded_size, BufferSink, FrameEncoder};
use crate::error::{PipelineError, Result};
use crate::EncoderConfig;

/// How the handoff of an encoded frame ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The consumer released the frame in time
    Released,
    /// The release wait expired; the frame stays visible to a late consumer
    TimedOut,
}

/// Producer side of the pipeline: encodes each raw frame and hands it to
/// the slot.
pub struct CaptureHandler {
    encoder: FrameEncoder,
    sink: BufferSink,
    pool: BufferPool,
    /// Fixed destination capacity; sized per frame when unset
    buffer_size: Option<usize>,
    slot: Arc<HandoffSlot>,
}

impl CaptureHandler {
    pub fn new(config: &EncoderConfig, slot: Arc<HandoffSlot>) -> Result<Self> {
        config.validate()?;
        info!(
            quality = config.quality,
            buffer_size = ?config.buffer_size,
            page_size = config.page_size,
            "capture handler ready"
        );
        Ok(Self {
            encoder: FrameEncoder::new(config.quality)?,
            sink: BufferSink::new(config.buffer_size.unwrap_or(0), config.page_size),
            pool: BufferPool::new(),
            buffer_size: config.buffer_size,
            slot,
        })
    }

    pub fn slot(&self) -> &Arc<HandoffSlot> {
        &self.slot
    }

    /// Buffers allocated for encoded frames so far.
    pub fn buffer_allocations(&self) -> u64 {
        self.pool.allocations()
    }

    /// Encode `frame` and publish it.
    ///
    /// A frame that cannot be encoded is dropped with an error and leaves
    /// the slot as it was. A release timeout is not an error.
    #[instrument(skip_all, fields(seq = frame.sequence))]
    pub fn on_frame(&mut self, frame: &RawFrame<'_>) -> Result<FrameOutcome> {
        debug!(
            format = ?frame.format,
            width = frame.width,
            height = frame.height,
            length = frame.data_bytes(),
            "uvc frame"
        );

        let encoded = match self.encode(frame) {
            Ok(encoded) => encoded,
            Err(err) => {
                metrics::counter!("uvc_frames_dropped_total", "reason" => err.reason())
                    .increment(1);
                warn!(error = %err, "dropping frame");
                return Err(err);
            }
        };
        metrics::counter!("uvc_frames_encoded_total").increment(1);
        metrics::gauge!("uvc_encoded_bytes").set(encoded.len() as f64);

        let sequence = encoded.sequence;
        if let Some(displaced) = self.slot.offer(encoded) {
            self.pool.reclaim(displaced);
        }

        match self.slot.wait_released(sequence) {
            Ok(()) => Ok(FrameOutcome::Released),
            Err(PipelineError::HandoffTimeout { .. }) => Ok(FrameOutcome::TimedOut),
            Err(err) => Err(err),
        }
    }

    fn encode(&mut self, frame: &RawFrame<'_>) -> Result<EncodedFrame> {
        let capacity = self
            .buffer_size
            .unwrap_or_else(|| max_encoded_size(frame.width, frame.height));
        self.sink.set_capacity(capacity);
        self.sink.bind(self.pool.checkout(capacity));
        let result = self.encoder.encode(frame, &mut self.sink);
        let buf = self.sink.unbind();

        match result {
            Ok(len) => {
                debug_assert_eq!(buf.len(), len);
                debug!(len, "frame encoded");
                Ok(EncodedFrame::new(buf.freeze(), frame))
            }
            Err(err) => {
                self.pool.give_back(buf);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::capture::frame::nv12_frame_size;
    use crate::capture::PixelFormat;

    fn handler(timeout_ms: u64) -> CaptureHandler {
        let slot = Arc::new(HandoffSlot::new(Duration::from_millis(timeout_ms)));
        CaptureHandler::new(&EncoderConfig::default(), slot).unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let slot = Arc::new(HandoffSlot::default());
        let config = EncoderConfig {
            page_size: 1000,
            ..EncoderConfig::default()
        };

        assert!(matches!(
            CaptureHandler::new(&config, slot),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_timeout_is_not_an_error() {
        let mut handler = handler(20);
        let data = vec![128u8; nv12_frame_size(16, 16) as usize];
        let raw = RawFrame::new(PixelFormat::Nv12, 16, 16, 1, &data);

        assert_eq!(handler.on_frame(&raw).unwrap(), FrameOutcome::TimedOut);
        assert_eq!(handler.slot().latest().unwrap().sequence, 1);
    }

    #[test]
    fn test_buffers_recycled_in_steady_state() {
        let mut handler = handler(5);
        let data = vec![128u8; nv12_frame_size(16, 16) as usize];

        for seq in 1..=5 {
            let raw = RawFrame::new(PixelFormat::Nv12, 16, 16, seq, &data);
            handler.on_frame(&raw).unwrap();
        }

        // one published, one in flight
        assert_eq!(handler.buffer_allocations(), 2);
        assert_eq!(handler.slot().stats().superseded, 4);
    }

    #[test]
    fn test_fixed_buffer_size_caps_every_frame() {
        let slot = Arc::new(HandoffSlot::new(Duration::from_millis(5)));
        let config = EncoderConfig {
            buffer_size: Some(64),
            ..EncoderConfig::default()
        };
        let mut handler = CaptureHandler::new(&config, slot).unwrap();
        let data = vec![128u8; nv12_frame_size(16, 16) as usize];
        let raw = RawFrame::new(PixelFormat::Nv12, 16, 16, 1, &data);

        assert!(matches!(
            handler.on_frame(&raw),
            Err(PipelineError::BufferOverflow { capacity: 64, .. })
        ));
    }
}
