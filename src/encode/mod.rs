//! Encoding and container output.
//!
//! [`ContainerWriter`] is the seam between the pipeline and whatever muxes
//! frames into a file; [`EncoderSink`](sink::EncoderSink) owns the writer
//! lifecycle and the drop-not-queue admission gate in front of it.

pub mod ffmpeg;
pub mod sink;

use crate::foundation::core::{Fps, FrameTiming, PixelFormat};
use crate::frame::Frame;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Video track parameters handed to the writer at open.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TrackConfig {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Nominal frame rate of the track.
    pub fps: Fps,
    /// Pixel format of incoming frames.
    pub format: PixelFormat,
    /// Target H.264 bitrate in bits per second.
    pub bitrate_bps: u32,
    /// H.264 profile to encode with.
    pub profile: H264Profile,
}

/// H.264 encoder profile.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum H264Profile {
    /// Constrained baseline, for maximum decoder compatibility.
    Baseline,
    /// Main profile.
    Main,
    /// High profile.
    #[default]
    High,
}

/// A finalized container file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputHandle {
    /// Path of the finished file.
    pub path: PathBuf,
}

/// Container muxer contract.
///
/// Implementations take pixel data by reference; the caller keeps buffer
/// ownership so it can recycle frames after every append. `timing` carries
/// the container timestamp for the sample, which the sink has already run
/// through its timestamp policy.
///
/// Ordering contract: `append` is called with strictly increasing `pts`,
/// and only between a successful `open` and `mark_input_finished`.
pub trait ContainerWriter: Send {
    /// Prepare the writer for a track written to `path`.
    fn open(&mut self, path: &Path, track: &TrackConfig) -> anyhow::Result<()>;

    /// Whether the writer can take another frame right now.
    ///
    /// Callers poll this before every `append` and drop the frame when it
    /// returns false; they never queue on the writer's behalf.
    fn is_ready_for_data(&self) -> bool;

    /// Append one frame with the given container timestamp.
    fn append(&mut self, frame: &Frame, timing: FrameTiming) -> anyhow::Result<()>;

    /// Signal that no more frames will be appended.
    fn mark_input_finished(&mut self) -> anyhow::Result<()>;

    /// Finish the container and return the output file.
    fn finalize(&mut self) -> anyhow::Result<OutputHandle>;
}

#[derive(Debug, Default)]
struct MemoryWriterShared {
    path: Option<PathBuf>,
    track: Option<TrackConfig>,
    frames: Vec<(FrameTiming, Frame)>,
    ready: bool,
    input_finished: bool,
    finalized: bool,
}

/// In-memory writer for tests and debugging.
///
/// Clones share one recording surface, so a test can move one clone into
/// the pipeline and keep another to inspect what arrived. Readiness is
/// scriptable through [`MemoryWriter::set_ready`].
#[derive(Debug, Clone)]
pub struct MemoryWriter {
    shared: Arc<Mutex<MemoryWriterShared>>,
}

impl Default for MemoryWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWriter {
    /// Create a writer that reports ready until told otherwise.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(MemoryWriterShared {
                ready: true,
                ..MemoryWriterShared::default()
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryWriterShared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Script the readiness flag observed by `is_ready_for_data`.
    pub fn set_ready(&self, ready: bool) {
        self.lock().ready = ready;
    }

    /// Path captured at open, if any.
    pub fn output_path(&self) -> Option<PathBuf> {
        self.lock().path.clone()
    }

    /// Track configuration captured at open, if any.
    pub fn track(&self) -> Option<TrackConfig> {
        self.lock().track.clone()
    }

    /// Appended frames with their container timestamps, in append order.
    pub fn frames(&self) -> Vec<(FrameTiming, Frame)> {
        self.lock().frames.clone()
    }

    /// Number of appended frames.
    pub fn frame_count(&self) -> usize {
        self.lock().frames.len()
    }

    /// Whether `mark_input_finished` has run.
    pub fn is_input_finished(&self) -> bool {
        self.lock().input_finished
    }

    /// Whether `finalize` has run successfully.
    pub fn is_finalized(&self) -> bool {
        self.lock().finalized
    }
}

impl ContainerWriter for MemoryWriter {
    fn open(&mut self, path: &Path, track: &TrackConfig) -> anyhow::Result<()> {
        let mut shared = self.lock();
        shared.path = Some(path.to_path_buf());
        shared.track = Some(track.clone());
        shared.frames.clear();
        shared.input_finished = false;
        shared.finalized = false;
        Ok(())
    }

    fn is_ready_for_data(&self) -> bool {
        let shared = self.lock();
        shared.ready && !shared.input_finished
    }

    fn append(&mut self, frame: &Frame, timing: FrameTiming) -> anyhow::Result<()> {
        self.lock().frames.push((timing, frame.clone()));
        Ok(())
    }

    fn mark_input_finished(&mut self) -> anyhow::Result<()> {
        self.lock().input_finished = true;
        Ok(())
    }

    fn finalize(&mut self) -> anyhow::Result<OutputHandle> {
        let mut shared = self.lock();
        let path = shared
            .path
            .clone()
            .ok_or_else(|| anyhow::anyhow!("finalize before open"))?;
        shared.finalized = true;
        Ok(OutputHandle { path })
    }
}
