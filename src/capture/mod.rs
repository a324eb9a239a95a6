pub mod frame;
pub mod source;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use frame::{EncodedFrame, PixelFormat, RawFrame};
pub use source::{FrameSource, SyntheticSource};
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Source;

use crate::error::Result;
use crate::{CaptureConfig, SourceKind};

/// Build the frame source selected in the configuration.
pub fn open_source(config: &CaptureConfig) -> Result<Box<dyn FrameSource>> {
    match config.source {
        SourceKind::Synthetic => Ok(Box::new(SyntheticSource::new(
            config.width,
            config.height,
            config.fps,
            config.frame_limit,
        )?)),
        #[cfg(feature = "v4l2")]
        SourceKind::V4l2 => Ok(Box::new(V4l2Source::open(config)?)),
        #[cfg(not(feature = "v4l2"))]
        SourceKind::V4l2 => Err(crate::PipelineError::invalid_config(
            "capture.source = \"v4l2\" needs the v4l2 feature",
        )),
    }
}
