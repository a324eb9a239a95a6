//! Error types for the capture-to-JPEG pipeline.

use std::time::Duration;

use thiserror::Error;

use crate::capture::PixelFormat;

/// Errors that can occur while converting, encoding or handing off a frame.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The frame arrived in a layout the converter cannot handle.
    #[error("unsupported frame format: {format:?}")]
    UnsupportedFormat { format: PixelFormat },

    /// Zero, odd-width or oversized frame dimensions.
    #[error("invalid frame dimensions {width}x{height}: {reason}")]
    InvalidDimensions {
        width: u32,
        height: u32,
        reason: &'static str,
    },

    /// Frame data is shorter than its planes require.
    #[error("truncated frame: expected at least {expected} bytes, got {actual}")]
    TruncatedFrame { expected: u64, actual: usize },

    /// Encoded output would not fit into the destination buffer.
    #[error("encoded frame overflows destination: {attempted} bytes into {capacity}")]
    BufferOverflow { attempted: usize, capacity: usize },

    /// The consumer did not release the frame within the handoff timeout.
    #[error("frame {sequence} not released within {waited:?}")]
    HandoffTimeout { sequence: u64, waited: Duration },

    /// Both ends of the handoff slot are gone.
    #[error("handoff slot closed")]
    SlotClosed,

    /// Rejected configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Compressor failure other than running out of destination space.
    #[error("jpeg encoder error: {0}")]
    Encoder(String),

    #[error("jpeg decode error: {0}")]
    Decode(String),

    /// Frame source failure.
    #[error("capture error: {0}")]
    Capture(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A producer or consumer task panicked or was cancelled.
    #[error("pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl PipelineError {
    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Short label used when counting dropped frames.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat { .. } => "unsupported_format",
            Self::InvalidDimensions { .. } => "invalid_dimensions",
            Self::TruncatedFrame { .. } => "truncated_frame",
            Self::BufferOverflow { .. } => "buffer_overflow",
            Self::HandoffTimeout { .. } => "handoff_timeout",
            Self::SlotClosed => "slot_closed",
            Self::InvalidConfig(_) | Self::Config(_) => "config",
            Self::Encoder(_) => "encoder",
            Self::Decode(_) => "decode",
            Self::Capture(_) | Self::Io(_) => "capture",
            Self::Task(_) => "task",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
