//! Reelcap records a live capture stream into a timestamped MP4 file.
//!
//! The pipeline is capture -> optional crop -> encode, and the public API
//! is session-oriented:
//!
//! - Pick a [`CaptureSource`] (tests and demos use [`SyntheticSource`])
//! - Pick a [`ContainerWriter`] ([`FfmpegWriter`] muxes H.264 MP4)
//! - Drive both with a [`RecordingSession`]: start, frames flow, stop
//!
//! Frames arrive in real time and are never buffered on behalf of a slow
//! encoder: a frame the writer cannot take right now is dropped and
//! counted, and the recording stays live.
#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Capture-source seam and the in-process test source.
pub mod capture;
/// Encoder sink and container writers.
pub mod encode;
/// Shared time and pixel vocabulary.
pub mod foundation;
/// Frame payloads, buffer pooling, and the crop stage.
pub mod frame;
/// Session-oriented recording API.
pub mod session;

pub use crate::foundation::core::{
    Fps, FrameTiming, MediaTime, PixelFormat, Point, Rect, TimeError, Vec2,
};

pub use crate::capture::synthetic::{SyntheticSource, SyntheticSourceOpts};
pub use crate::capture::{
    CaptureConfig, CaptureError, CaptureEvent, CaptureFilter, CaptureSource, CaptureSubscription,
    FrameHandler,
};
pub use crate::encode::ffmpeg::{
    FfmpegWriter, FfmpegWriterOpts, ensure_parent_dir, is_ffmpeg_on_path,
};
pub use crate::encode::sink::{EncoderSink, SinkError, SinkState, SinkStats, TimestampPolicy};
pub use crate::encode::{ContainerWriter, H264Profile, MemoryWriter, OutputHandle, TrackConfig};
pub use crate::frame::buffer::{AllocError, BufferPool, BufferPoolOpts, BufferPoolStats};
pub use crate::frame::crop::{CropError, FrameCropper};
pub use crate::frame::geometry::{GeometryError, PixelBounds, compute_crop_bounds};
pub use crate::frame::{Frame, PixelBuffer};
pub use crate::session::config::{ConfigError, RecordingConfig};
pub use crate::session::{RecordingSession, RecordingStats, SessionError, SessionState};
