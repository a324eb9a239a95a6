pub mod convert;
pub mod decode;
pub mod jpeg;
pub mod sink;

pub use convert::PlanarFrame;
pub use decode::{inspect_jpeg, JpegInfo};
pub use jpeg::{max_encoded_size, EncoderState, FrameEncoder, DEFAULT_QUALITY};
pub use sink::{BufferSink, OutputSink, ScratchPage, SinkWriter, DEFAULT_PAGE_SIZE, MIN_PAGE_SIZE};
