//! Recording configuration.

use crate::capture::CaptureConfig;
use crate::encode::sink::TimestampPolicy;
use crate::encode::{H264Profile, TrackConfig};
use crate::foundation::core::{Fps, PixelFormat};
use crate::session::output;
use std::path::PathBuf;

/// Errors from validating a [`RecordingConfig`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Width or height of zero cannot be captured or encoded.
    #[error("recording dimensions must be non-zero, got {width}x{height}")]
    ZeroDimension {
        /// Configured width.
        width: u32,
        /// Configured height.
        height: u32,
    },
    /// Frame rate with a zero numerator or denominator.
    #[error("recording fps must have non-zero numerator and denominator")]
    InvalidFps,
    /// The hand-off queue needs room for at least one frame.
    #[error("queue depth must be at least 1")]
    ZeroQueueDepth,
    /// A zero bitrate target cannot drive an encoder.
    #[error("bitrate must be non-zero")]
    ZeroBitrate,
}

/// Everything a [`RecordingSession`](crate::session::RecordingSession)
/// needs to know up front.
///
/// Defaults mirror a plain 1080p screen recording: 1920x1080 BGRA at 30
/// fps, 6 Mbps H.264 High, five frames of queue, timestamps anchored so
/// the output starts at zero.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Capture and encode width in pixels.
    pub width: u32,
    /// Capture and encode height in pixels.
    pub height: u32,
    /// Capture and encode frame rate.
    pub fps: Fps,
    /// Pixel format requested from the capture source.
    pub format: PixelFormat,
    /// Target H.264 bitrate in bits per second.
    pub bitrate_bps: u32,
    /// H.264 profile to encode with.
    pub profile: H264Profile,
    /// Frames the hand-off queue may hold before dropping.
    pub queue_depth: usize,
    /// How source timestamps map to container timestamps.
    pub timestamp_policy: TimestampPolicy,
    /// Where the finished file goes. `None` picks a timestamped name in
    /// the user's downloads directory.
    pub output_path: Option<PathBuf>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: Fps { num: 30, den: 1 },
            format: PixelFormat::Bgra8,
            bitrate_bps: 6_000_000,
            profile: H264Profile::High,
            queue_depth: 5,
            timestamp_policy: TimestampPolicy::AnchorFirstFrame,
            output_path: None,
        }
    }
}

impl RecordingConfig {
    /// Check the configuration for values no pipeline stage can accept.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::ZeroDimension {
                width: self.width,
                height: self.height,
            });
        }
        if self.fps.num == 0 || self.fps.den == 0 {
            return Err(ConfigError::InvalidFps);
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::ZeroQueueDepth);
        }
        if self.bitrate_bps == 0 {
            return Err(ConfigError::ZeroBitrate);
        }
        Ok(())
    }

    /// Stream parameters for the capture source.
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            width: self.width,
            height: self.height,
            fps: self.fps,
            format: self.format,
            queue_depth: self.queue_depth,
        }
    }

    /// Track parameters for the container writer, at the given output
    /// dimensions (these differ from the capture dimensions when a crop
    /// is active).
    pub fn track_config(&self, width: u32, height: u32) -> TrackConfig {
        TrackConfig {
            width,
            height,
            fps: self.fps,
            format: self.format,
            bitrate_bps: self.bitrate_bps,
            profile: self.profile,
        }
    }

    /// The output path, resolving `None` to a timestamped default.
    pub fn resolved_output_path(&self) -> PathBuf {
        match &self.output_path {
            Some(path) => path.clone(),
            None => output::default_output_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        RecordingConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_values_are_rejected() {
        let mut config = RecordingConfig {
            width: 0,
            ..RecordingConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroDimension {
                width: 0,
                height: 1080
            })
        );

        config = RecordingConfig {
            fps: Fps { num: 0, den: 1 },
            ..RecordingConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidFps));

        config = RecordingConfig {
            queue_depth: 0,
            ..RecordingConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroQueueDepth));

        config = RecordingConfig {
            bitrate_bps: 0,
            ..RecordingConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroBitrate));
    }

    #[test]
    fn track_config_takes_output_dimensions() {
        let config = RecordingConfig::default();
        let track = config.track_config(400, 300);
        assert_eq!((track.width, track.height), (400, 300));
        assert_eq!(track.bitrate_bps, 6_000_000);
        assert_eq!(track.profile, H264Profile::High);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: RecordingConfig =
            serde_json::from_str(r#"{ "width": 1280, "height": 720 }"#).unwrap();
        assert_eq!((config.width, config.height), (1280, 720));
        assert_eq!(config.fps, Fps { num: 30, den: 1 });
        assert_eq!(config.queue_depth, 5);
    }
}
