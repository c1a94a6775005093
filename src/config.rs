//! Recording configuration
//!
//! Video/audio encoding parameters and the output destination for one
//! recording. Defaults mirror a typical screen-recording setup: H.264 at
//! 30 fps with bitrate scaled to the frame size, AAC-LC stereo at 44.1 kHz.

use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// PCM samples consumed per encoded AAC frame
pub const AAC_SAMPLES_PER_FRAME: u32 = 1024;

/// Video track configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoConfig {
    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Target bitrate in bits per second
    pub bitrate: u32,

    /// Frames per second
    pub frame_rate: u32,
}

impl VideoConfig {
    /// Bitrate heuristic: 5 bits per pixel per second
    pub fn bitrate_for(width: u32, height: u32) -> u32 {
        5 * width * height
    }

    /// Interval between frames at the configured rate
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate as f64)
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
            bitrate: Self::bitrate_for(1280, 800),
            frame_rate: 30,
        }
    }
}

/// Audio track configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Channel count (1 = mono, 2 = stereo)
    pub channels: u16,

    /// Target bitrate in bits per second
    pub bitrate: u32,
}

impl AudioConfig {
    /// Playback duration of one encoded AAC frame
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(AAC_SAMPLES_PER_FRAME as f64 / self.sample_rate as f64)
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            bitrate: 128_000,
        }
    }
}

/// Full configuration for one recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderConfig {
    /// Destination container file (created on successful stop)
    pub output_path: PathBuf,

    /// Video track parameters
    pub video: VideoConfig,

    /// Audio track parameters
    pub audio: AudioConfig,
}

impl RecorderConfig {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            video: VideoConfig::default(),
            audio: AudioConfig::default(),
        }
    }

    /// Validate the configuration before a recording is allowed to start
    pub fn validate(&self) -> PipelineResult<()> {
        if self.video.width == 0 || self.video.height == 0 {
            return Err(PipelineError::Config(format!(
                "video dimensions must be non-zero, got {}x{}",
                self.video.width, self.video.height
            )));
        }
        if self.video.frame_rate == 0 {
            return Err(PipelineError::Config("frame rate must be non-zero".into()));
        }
        if self.audio.sample_rate == 0 {
            return Err(PipelineError::Config("sample rate must be non-zero".into()));
        }
        if self.audio.channels == 0 {
            return Err(PipelineError::Config("channel count must be non-zero".into()));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(PipelineError::Config("output path must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_setup() {
        let video = VideoConfig::default();
        assert_eq!(video.frame_rate, 30);
        assert_eq!(video.bitrate, 5 * 1280 * 800);

        let audio = AudioConfig::default();
        assert_eq!(audio.sample_rate, 44_100);
        assert_eq!(audio.channels, 2);
        assert_eq!(audio.bitrate, 128_000);
    }

    #[test]
    fn test_frame_timing() {
        let video = VideoConfig::default();
        let interval = video.frame_interval();
        assert!((interval.as_secs_f64() - 1.0 / 30.0).abs() < 1e-9);

        let audio = AudioConfig::default();
        let frame = audio.frame_duration();
        assert!((frame.as_secs_f64() - 1024.0 / 44_100.0).abs() < 1e-9);
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        let mut config = RecorderConfig::new("/tmp/out.mp4");
        assert!(config.validate().is_ok());

        config.video.width = 0;
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        let mut config = RecorderConfig::new("/tmp/out.mp4");
        config.audio.channels = 0;
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        let config = RecorderConfig::new("");
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = RecorderConfig::new("/tmp/out.mp4");
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("outputPath"));
        assert!(json.contains("frameRate"));

        let back: RecorderConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.video.width, config.video.width);
        assert_eq!(back.audio.sample_rate, config.audio.sample_rate);
    }
}
