//! One-shot JPEG compression of NV12 frames.

use std::cell::RefCell;

use jpeg_encoder::{Encoder, EncodingError, ImageBuffer, JpegColorType, SamplingFactor};
use tracing::{instrument, trace};

use super::convert::PlanarFrame;
use super::sink::{OutputSink, SinkWriter};
use crate::capture::frame::nv12_frame_size;
use crate::capture::RawFrame;
use crate::error::{PipelineError, Result};

pub const DEFAULT_QUALITY: u8 = 80;

/// Room for SOI/APP0/DQT/SOF/DHT/SOS/EOI on top of the entropy-coded data
const HEADER_ALLOWANCE: u64 = 1024;

/// Destination capacity that holds the JPEG of any `width` x `height` frame:
/// the raw NV12 payload plus headers.
pub fn max_encoded_size(width: u32, height: u32) -> usize {
    usize::try_from(nv12_frame_size(width, height) + HEADER_ALLOWANCE)
        .unwrap_or(usize::MAX)
}

/// Where the encoder is within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    Idle,
    Configured,
    Compressing,
    Finalized,
}

/// Drives the compressor for one frame at a time.
#[derive(Debug)]
pub struct FrameEncoder {
    quality: u8,
    state: EncoderState,
}

impl FrameEncoder {
    pub fn new(quality: u8) -> Result<Self> {
        if !(1..=100).contains(&quality) {
            return Err(PipelineError::invalid_config(format!(
                "jpeg quality {quality} outside 1..=100"
            )));
        }
        Ok(Self {
            quality,
            state: EncoderState::Idle,
        })
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    /// Compress `frame` through `sink`, returning the number of bytes the
    /// sink committed. The encoder is back in `Idle` when this returns,
    /// whether or not compression succeeded.
    #[instrument(skip_all, fields(seq = frame.sequence))]
    pub fn encode<S: OutputSink + ?Sized>(
        &mut self,
        frame: &RawFrame<'_>,
        sink: &mut S,
    ) -> Result<usize> {
        let planar = PlanarFrame::new(frame)?;

        sink.initialize();
        self.transition(EncoderState::Configured);

        let result = self.compress(planar, sink);
        self.transition(EncoderState::Idle);
        result
    }

    fn compress<S: OutputSink + ?Sized>(
        &mut self,
        planar: PlanarFrame<'_>,
        sink: &mut S,
    ) -> Result<usize> {
        let mut writer = SinkWriter::new(&mut *sink);
        let mut encoder = Encoder::new(&mut writer, self.quality);
        // 2x2 on luma, chroma at quarter resolution
        encoder.set_sampling_factor(SamplingFactor::F_2_2);

        self.transition(EncoderState::Compressing);
        encoder
            .encode_image(Scanlines::new(planar))
            .map_err(encoding_error)?;
        writer.finish()?;
        self.transition(EncoderState::Finalized);

        Ok(sink.written())
    }

    fn transition(&mut self, next: EncoderState) {
        trace!(from = ?self.state, to = ?next, "encoder state");
        self.state = next;
    }
}

/// Feeds converted rows to the compressor on demand, one row buffer reused
/// for every scanline.
struct Scanlines<'a> {
    frame: PlanarFrame<'a>,
    row: RefCell<Vec<u8>>,
}

impl<'a> Scanlines<'a> {
    fn new(frame: PlanarFrame<'a>) -> Self {
        Self {
            row: RefCell::new(vec![0; frame.row_len()]),
            frame,
        }
    }
}

impl ImageBuffer for Scanlines<'_> {
    fn get_jpeg_color_type(&self) -> JpegColorType {
        JpegColorType::Ycbcr
    }

    fn width(&self) -> u16 {
        self.frame.width()
    }

    fn height(&self) -> u16 {
        self.frame.height()
    }

    fn fill_buffers(&self, y: u16, buffers: &mut [Vec<u8>; 4]) {
        let mut row = self.row.borrow_mut();
        self.frame.convert_row(usize::from(y), &mut row);
        for px in row.chunks_exact(3) {
            buffers[0].push(px[0]);
            buffers[1].push(px[1]);
            buffers[2].push(px[2]);
        }
    }
}

/// Recovers sink errors that travelled through the encoder as `io::Error`.
fn encoding_error(err: EncodingError) -> PipelineError {
    match err {
        EncodingError::IoError(io) => match io.downcast::<PipelineError>() {
            Ok(inner) => inner,
            Err(io) => PipelineError::Encoder(io.to_string()),
        },
        other => PipelineError::Encoder(other.to_string()),
    }
}
