//! NV12 to interleaved YCbCr scanline conversion.

use crate::capture::frame::{nv12_frame_size, PixelFormat, RawFrame};
use crate::error::{PipelineError, Result};

/// Validated view over the luma and chroma planes of an NV12 frame.
#[derive(Debug, Clone, Copy)]
pub struct PlanarFrame<'a> {
    width: u16,
    height: u16,
    luma: &'a [u8],
    chroma: &'a [u8],
}

impl<'a> PlanarFrame<'a> {
    /// Checks format, dimensions and length before any pixel is touched.
    pub fn new(frame: &RawFrame<'a>) -> Result<Self> {
        if frame.format != PixelFormat::Nv12 {
            return Err(PipelineError::UnsupportedFormat {
                format: frame.format,
            });
        }

        let invalid = |reason| PipelineError::InvalidDimensions {
            width: frame.width,
            height: frame.height,
            reason,
        };
        if frame.width == 0 || frame.height == 0 {
            return Err(invalid("zero dimension"));
        }
        // chroma samples come in Cb/Cr pairs
        if frame.width % 2 != 0 {
            return Err(invalid("odd width"));
        }
        let width = u16::try_from(frame.width).map_err(|_| invalid("exceeds 65535"))?;
        let height = u16::try_from(frame.height).map_err(|_| invalid("exceeds 65535"))?;

        let expected = nv12_frame_size(frame.width, frame.height);
        if (frame.data.len() as u64) < expected {
            return Err(PipelineError::TruncatedFrame {
                expected,
                actual: frame.data.len(),
            });
        }

        let luma_len = usize::from(width) * usize::from(height);
        let (luma, rest) = frame.data.split_at(luma_len);
        let chroma_len = expected as usize - luma_len;

        Ok(Self {
            width,
            height,
            luma,
            chroma: &rest[..chroma_len],
        })
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    /// Length of one converted row.
    pub fn row_len(&self) -> usize {
        usize::from(self.width) * 3
    }

    /// Writes scanline `j` as `(Y, Cb, Cr)` triplets into `row`.
    ///
    /// Chroma is nearest-neighbour upsampled: each Cb/Cr pair covers a 2x2
    /// block of luma samples.
    pub fn convert_row(&self, j: usize, row: &mut [u8]) {
        let width = usize::from(self.width);
        debug_assert!(j < usize::from(self.height));
        debug_assert_eq!(row.len(), self.row_len());

        let luma = &self.luma[j * width..(j + 1) * width];
        let chroma_start = (j / 2) * width;
        let chroma = &self.chroma[chroma_start..chroma_start + width];

        for (i, (px, &y)) in row.chunks_exact_mut(3).zip(luma).enumerate() {
            let c = (i / 2) * 2;
            px[0] = y;
            px[1] = chroma[c];
            px[2] = chroma[c + 1];
        }
    }
}
