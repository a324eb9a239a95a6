pub mod capture;
pub mod encode;
pub mod error;
pub mod pipeline;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use capture::{EncodedFrame, PixelFormat, RawFrame};
pub use error::{PipelineError, Result};
pub use pipeline::{CaptureHandler, FrameOutcome, HandoffSlot, HandoffStats};

use encode::{max_encoded_size, DEFAULT_PAGE_SIZE, DEFAULT_QUALITY, MIN_PAGE_SIZE};

/// Environment variable prefix, e.g. `UVC_STREAM__ENCODER__QUALITY=90`
pub const ENV_PREFIX: &str = "UVC_STREAM";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub encoder: EncoderConfig,
    pub handoff: HandoffConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Generated NV12 test pattern
    Synthetic,
    /// V4L2 device (needs the `v4l2` feature)
    V4l2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: SourceKind,
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// 0 delivers as fast as the consumer allows
    pub fps: u32,
    /// Stop after this many frames
    pub frame_limit: Option<u64>,
    pub buffer_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub quality: u8,
    /// Encoder flush granularity, a power of two
    pub page_size: usize,
    /// Capacity of one encoded frame. Unset sizes it from each frame's
    /// dimensions; when set it must cover the configured capture size.
    pub buffer_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    pub release_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Where the consumer keeps the most recent JPEG
    pub snapshot_path: Option<PathBuf>,
    /// Decode every acquired frame before accepting it
    pub verify: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Synthetic,
            device: "/dev/video0".into(),
            width: 960,
            height: 544,
            fps: 15,
            frame_limit: None,
            buffer_count: 4,
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            quality: DEFAULT_QUALITY,
            page_size: DEFAULT_PAGE_SIZE,
            buffer_size: None,
        }
    }
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            release_timeout_ms: 1000,
        }
    }
}

impl HandoffConfig {
    pub fn release_timeout(&self) -> Duration {
        Duration::from_millis(self.release_timeout_ms)
    }
}

impl EncoderConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.quality) {
            return Err(PipelineError::invalid_config(format!(
                "encoder.quality {} outside 1..=100",
                self.quality
            )));
        }
        if self.page_size < MIN_PAGE_SIZE || !self.page_size.is_power_of_two() {
            return Err(PipelineError::invalid_config(format!(
                "encoder.page_size {} must be a power of two >= {MIN_PAGE_SIZE}",
                self.page_size
            )));
        }
        if self.buffer_size == Some(0) {
            return Err(PipelineError::invalid_config("encoder.buffer_size is zero"));
        }
        Ok(())
    }
}

impl Config {
    /// Load from an optional TOML file, then `UVC_STREAM__*` environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        let config: Self = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.encoder.validate()?;
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(PipelineError::invalid_config("capture size is zero"));
        }
        if let Some(size) = self.encoder.buffer_size {
            let needed = max_encoded_size(self.capture.width, self.capture.height);
            if size < needed {
                return Err(PipelineError::invalid_config(format!(
                    "encoder.buffer_size {size} cannot hold a {}x{} frame, need {needed}",
                    self.capture.width, self.capture.height
                )));
            }
        }
        if self.capture.buffer_count == 0 {
            return Err(PipelineError::invalid_config(
                "capture.buffer_count is zero",
            ));
        }
        if self.handoff.release_timeout_ms == 0 {
            return Err(PipelineError::invalid_config(
                "handoff.release_timeout_ms is zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.encoder.quality, 80);
        assert_eq!(config.encoder.page_size, 4096);
        assert_eq!(config.encoder.buffer_size, None);
        assert_eq!(config.handoff.release_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let mut config = Config::default();
        config.encoder.quality = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.encoder.page_size = 3000;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.encoder.page_size = 128;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.handoff.release_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_buffer_size_must_cover_capture_size() {
        let mut config = Config::default();
        config.encoder.buffer_size = Some(35 * 1024);
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));

        config.encoder.buffer_size = Some(max_encoded_size(960, 544));
        config.validate().unwrap();

        config.capture.width = 1920;
        config.capture.height = 1080;
        assert!(config.validate().is_err());

        config.encoder.buffer_size = None;
        config.validate().unwrap();
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        let toml = r#"
[capture]
width = 640
height = 480
frame_limit = 10

[encoder]
quality = 95

[output]
verify = true
"#;
        file.write_all(toml.as_bytes()).unwrap();

        let config = Config::load(Some(file.path())).unwrap();

        assert_eq!(config.capture.width, 640);
        assert_eq!(config.capture.height, 480);
        assert_eq!(config.capture.frame_limit, Some(10));
        assert_eq!(config.capture.source, SourceKind::Synthetic);
        assert_eq!(config.encoder.quality, 95);
        assert_eq!(config.encoder.page_size, 4096);
        assert!(config.output.verify);
    }

    #[test]
    fn test_environment_overrides_file() {
        // only this test touches the handoff section through the environment
        let key = format!("{ENV_PREFIX}__HANDOFF__RELEASE_TIMEOUT_MS");
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[handoff]\nrelease_timeout_ms = 500").unwrap();

        std::env::set_var(&key, "250");
        let loaded = Config::load(Some(file.path()));
        std::env::remove_var(&key);

        let config = loaded.unwrap();
        assert_eq!(config.handoff.release_timeout(), Duration::from_millis(250));
        assert_eq!(config.encoder.quality, DEFAULT_QUALITY);
    }

    #[test]
    fn test_load_rejects_invalid_file_values() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[encoder]\nquality = 0").unwrap();

        assert!(matches!(
            Config::load(Some(file.path())),
            Err(PipelineError::InvalidConfig(_))
        ));
    }
}
