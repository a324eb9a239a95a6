use jpeg_decoder::Decoder;

use crate::error::{PipelineError, Result};

/// Decoded view of an encoded frame.
#[derive(Debug, Clone)]
pub struct JpegInfo {
    pub width: u16,
    pub height: u16,
    /// Bytes per decoded pixel
    pub components: usize,
    pub pixels: Vec<u8>,
}

/// Decode a complete JPEG, rejecting anything a standard decoder refuses.
pub fn inspect_jpeg(data: &[u8]) -> Result<JpegInfo> {
    let mut decoder = Decoder::new(data);
    let pixels = decoder
        .decode()
        .map_err(|e| PipelineError::Decode(e.to_string()))?;
    let info = decoder
        .info()
        .ok_or_else(|| PipelineError::Decode("missing frame header".into()))?;

    Ok(JpegInfo {
        width: info.width,
        height: info.height,
        components: info.pixel_format.pixel_bytes(),
        pixels,
    })
}
