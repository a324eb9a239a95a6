use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Pixel/container formats a capture device can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Planar luma followed by interleaved Cb/Cr at 2:1 in both directions
    Nv12,
    Yuyv4,
    Mjpeg,
    Rgb24,
    /// Output of the pipeline
    Jpeg,
}

/// One captured frame, borrowed from the capture subsystem for the
/// duration of the frame callback.
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Monotonically increasing, assigned by the producer
    pub sequence: u64,
    pub data: &'a [u8],
}

impl<'a> RawFrame<'a> {
    pub fn new(
        format: PixelFormat,
        width: u32,
        height: u32,
        sequence: u64,
        data: &'a [u8],
    ) -> Self {
        Self {
            format,
            width,
            height,
            sequence,
            data,
        }
    }

    pub fn data_bytes(&self) -> usize {
        self.data.len()
    }
}

/// Bytes an NV12 frame of the given size occupies: the luma plane plus one
/// chroma row pair per two luma rows.
pub fn nv12_frame_size(width: u32, height: u32) -> u64 {
    let width = u64::from(width);
    let height = u64::from(height);
    width * height + width * height.div_ceil(2)
}

/// Accept a device NV12 layout only if rows are packed: the converter
/// indexes both planes at exactly `width` bytes per row.
pub fn check_nv12_stride(width: u32, stride: u32) -> Result<()> {
    if stride != width {
        return Err(PipelineError::capture(format!(
            "NV12 row stride {stride} differs from width {width}, padded rows are not supported"
        )));
    }
    Ok(())
}

/// A JPEG-compressed frame.
///
/// `data` is shared read-only with the consumer until it releases the frame;
/// cloning is a reference-count bump, never a copy.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub sequence: u64,
    /// Sequence number reused as a seconds-resolution stamp
    pub timestamp: Duration,
}

impl EncodedFrame {
    pub fn new(data: Bytes, source: &RawFrame<'_>) -> Self {
        Self {
            data,
            width: source.width,
            height: source.height,
            format: PixelFormat::Jpeg,
            sequence: source.sequence,
            timestamp: Duration::from_secs(source.sequence),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}
