//! Frame sources standing in for the USB video subsystem.

use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

use super::frame::{nv12_frame_size, PixelFormat, RawFrame};
use crate::error::{PipelineError, Result};

/// Something that delivers raw frames to a callback, one at a time.
pub trait FrameSource: Send {
    fn describe(&self) -> String;

    /// Deliver the next frame. The frame is only valid inside `on_frame`.
    /// Returns `false` once the source is exhausted.
    fn deliver(&mut self, on_frame: &mut dyn FnMut(&RawFrame<'_>)) -> Result<bool>;
}

/// Deterministic NV12 test pattern: a luma ramp drifting with the sequence
/// number over fixed chroma bands.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    interval: Option<Duration>,
    limit: Option<u64>,
    sequence: u64,
    next_due: Option<Instant>,
    buffer: Vec<u8>,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, fps: u32, limit: Option<u64>) -> Result<Self> {
        let size = usize::try_from(nv12_frame_size(width, height))
            .map_err(|_| PipelineError::capture("synthetic frame too large"))?;
        info!(width, height, fps, "synthetic NV12 source");
        Ok(Self {
            width,
            height,
            interval: (fps > 0).then(|| Duration::from_secs(1) / fps),
            limit,
            sequence: 0,
            next_due: None,
            buffer: vec![0; size],
        })
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    fn pace(&mut self) {
        let Some(interval) = self.interval else {
            return;
        };
        let now = Instant::now();
        let due = match self.next_due {
            Some(due) if due > now => {
                thread::sleep(due - now);
                due
            }
            _ => now,
        };
        self.next_due = Some(due + interval);
    }

    fn paint(&mut self) {
        let width = self.width as usize;
        let height = self.height as usize;
        let shift = (self.sequence * 4) as usize;

        let (luma, chroma) = self.buffer.split_at_mut(width * height);
        for (y, row) in luma.chunks_exact_mut(width.max(1)).enumerate() {
            for (x, px) in row.iter_mut().enumerate() {
                *px = ((x + y + shift) & 0xFF) as u8;
            }
        }
        for (band, row) in chroma.chunks_exact_mut(width.max(1)).enumerate() {
            let cr = (64 + band * 128 / height.div_ceil(2).max(1)) as u8;
            for (x, pair) in row.chunks_exact_mut(2).enumerate() {
                pair[0] = (64 + x * 2 * 128 / width.max(1)) as u8;
                pair[1] = cr;
            }
        }
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!("synthetic {}x{} NV12", self.width, self.height)
    }

    fn deliver(&mut self, on_frame: &mut dyn FnMut(&RawFrame<'_>)) -> Result<bool> {
        if self.limit.is_some_and(|limit| self.sequence >= limit) {
            return Ok(false);
        }
        self.pace();
        self.sequence += 1;
        self.paint();

        let frame = RawFrame::new(
            PixelFormat::Nv12,
            self.width,
            self.height,
            self.sequence,
            &self.buffer,
        );
        on_frame(&frame);
        Ok(true)
    }
}
