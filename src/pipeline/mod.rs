pub mod callback;
pub mod handoff;
pub mod pool;
pub mod shutdown;

pub use callback::{CaptureHandler, FrameOutcome};
pub use handoff::{HandoffSlot, HandoffStats, DEFAULT_RELEASE_TIMEOUT};
pub use pool::BufferPool;
pub use shutdown::run_to_completion;
