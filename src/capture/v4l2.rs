//! V4L2 capture delivering NV12 frames straight from mapped buffers

use tracing::{debug, info, instrument};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::frame::{check_nv12_stride, PixelFormat, RawFrame};
use super::source::FrameSource;
use crate::error::{PipelineError, Result};
use crate::CaptureConfig;

const NV12: [u8; 4] = *b"NV12";

fn io_err(context: &str) -> impl Fn(std::io::Error) -> PipelineError + '_ {
    move |e| PipelineError::capture(format!("{context}: {e}"))
}

pub struct V4l2Source {
    stream: MmapStream<'static>,
    width: u32,
    height: u32,
    limit: Option<u64>,
    sequence: u64,
    path: String,
}

impl V4l2Source {
    /// Open the configured device and start streaming NV12.
    pub fn open(config: &CaptureConfig) -> Result<Self> {
        info!("Initializing V4L2 capture: {}", config.device);

        let device = Device::with_path(&config.device).map_err(io_err("open device"))?;

        let caps = device.query_caps().map_err(io_err("query caps"))?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(PipelineError::capture(
                "device doesn't support video capture",
            ));
        }

        let mut fmt = device.format().map_err(io_err("get format"))?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = FourCC::new(&NV12);
        let fmt = device.set_format(&fmt).map_err(io_err("set format"))?;

        // The converter only understands NV12; a driver substituting another
        // layout would produce garbage rather than an error.
        if fmt.fourcc != FourCC::new(&NV12) {
            return Err(PipelineError::capture(format!(
                "device offers {} instead of NV12",
                fmt.fourcc
            )));
        }
        check_nv12_stride(fmt.width, fmt.stride)?;

        if config.fps > 0 {
            device
                .set_params(&Parameters::with_fps(config.fps))
                .map_err(io_err("set frame rate"))?;
        }

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, config.buffer_count)
            .map_err(io_err("map buffers"))?;
        info!(
            "Capture stream started with {} buffers at {}x{}",
            config.buffer_count, fmt.width, fmt.height
        );

        Ok(Self {
            stream,
            width: fmt.width,
            height: fmt.height,
            limit: config.frame_limit,
            sequence: 0,
            path: config.device.clone(),
        })
    }
}

impl FrameSource for V4l2Source {
    fn describe(&self) -> String {
        format!("v4l2 {} {}x{} NV12", self.path, self.width, self.height)
    }

    #[instrument(skip_all)]
    fn deliver(&mut self, on_frame: &mut dyn FnMut(&RawFrame<'_>)) -> Result<bool> {
        if self.limit.is_some_and(|limit| self.sequence >= limit) {
            return Ok(false);
        }

        let (buf, meta) = self.stream.next().map_err(io_err("dequeue"))?;
        let used = (meta.bytesused as usize).min(buf.len());
        self.sequence += 1;
        debug!(
            sequence = self.sequence,
            driver_sequence = meta.sequence,
            bytes = used,
            "frame dequeued"
        );

        let frame = RawFrame::new(
            PixelFormat::Nv12,
            self.width,
            self.height,
            self.sequence,
            &buf[..used],
        );
        on_frame(&frame);
        Ok(true)
    }
}
