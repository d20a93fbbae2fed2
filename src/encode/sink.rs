//! Encoder admission gate and writer lifecycle.
//!
//! [`EncoderSink`] wraps a [`ContainerWriter`] in the state machine the
//! recording pipeline talks to. Its one scheduling rule: a frame the writer
//! cannot take right now is dropped, never queued. Real-time capture keeps
//! producing regardless, so queueing here would only grow latency until the
//! session died; dropping keeps the output live at the cost of skipped
//! frames.

use crate::encode::{ContainerWriter, OutputHandle, TrackConfig};
use crate::foundation::core::{FrameTiming, MediaTime};
use crate::frame::Frame;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// Lifecycle phase of an [`EncoderSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    /// Writer not opened yet; offers are rejected.
    Unopened,
    /// Writer opened; offers are admitted subject to readiness.
    Writing,
    /// Input marked finished; finalize has not succeeded yet.
    Finishing,
    /// Container finalized (or abandoned); the sink is spent.
    Finished,
}

/// How source timestamps map to container timestamps.
///
/// Capture subsystems stamp frames against their own clock, so a session
/// that starts at arbitrary wall time sees a first pts far from zero.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum TimestampPolicy {
    /// Rebase so the first accepted frame lands at pts 0.
    #[default]
    AnchorFirstFrame,
    /// Pass source timestamps through unchanged.
    SourceRelative,
}

/// Errors from the sink lifecycle.
///
/// Per-frame conditions never surface here; `offer` reports them as a
/// rejection and the stream continues.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    /// The container writer failed to open.
    #[error("container writer failed to open")]
    OpenFailed(#[source] anyhow::Error),
    /// The container could not be finalized.
    #[error("container finalize failed")]
    FinalizeFailed(#[source] anyhow::Error),
    /// Operation not valid in the current state.
    #[error("sink is {actual:?}, operation requires {expected}")]
    InvalidState {
        /// State the operation needs.
        expected: &'static str,
        /// State the sink was in.
        actual: SinkState,
    },
}

/// Admission counters for one sink lifecycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SinkStats {
    /// Frames appended to the container.
    pub accepted: u64,
    /// Frames dropped at the gate (wrong state, writer busy, bad timing,
    /// or failed append).
    pub rejected: u64,
}

/// Sequential encoder facade: one writer, one lifecycle, one output file.
pub struct EncoderSink {
    writer: Box<dyn ContainerWriter>,
    policy: TimestampPolicy,
    state: SinkState,
    out_path: Option<PathBuf>,
    anchor: Option<MediaTime>,
    last_pts: Option<MediaTime>,
    input_marked: bool,
    stats: SinkStats,
}

impl EncoderSink {
    /// Wrap a writer with the given timestamp policy.
    pub fn new(writer: Box<dyn ContainerWriter>, policy: TimestampPolicy) -> Self {
        Self {
            writer,
            policy,
            state: SinkState::Unopened,
            out_path: None,
            anchor: None,
            last_pts: None,
            input_marked: false,
            stats: SinkStats::default(),
        }
    }

    /// Current lifecycle phase.
    pub fn state(&self) -> SinkState {
        self.state
    }

    /// Admission counters so far.
    pub fn stats(&self) -> SinkStats {
        self.stats
    }

    /// Open the container writer. `Unopened` -> `Writing`.
    ///
    /// On failure the sink stays `Unopened` and nothing was written.
    pub fn open(&mut self, path: &Path, track: &TrackConfig) -> Result<(), SinkError> {
        if self.state != SinkState::Unopened {
            return Err(SinkError::InvalidState {
                expected: "Unopened",
                actual: self.state,
            });
        }
        self.writer
            .open(path, track)
            .map_err(SinkError::OpenFailed)?;
        self.out_path = Some(path.to_path_buf());
        self.state = SinkState::Writing;
        tracing::debug!(path = %path.display(), "encoder sink opened");
        Ok(())
    }

    /// Offer one frame for encoding. Returns whether it was accepted.
    ///
    /// A frame is accepted only when the sink is `Writing`, the writer
    /// reports ready, the pts advances strictly past the last accepted
    /// frame, and the append itself succeeds. Every other outcome is a
    /// counted rejection; the caller keeps the frame and moves on.
    pub fn offer(&mut self, frame: &Frame) -> bool {
        if self.state != SinkState::Writing {
            self.stats.rejected += 1;
            tracing::debug!(state = ?self.state, "frame offered outside Writing; dropped");
            return false;
        }
        if !self.writer.is_ready_for_data() {
            self.stats.rejected += 1;
            tracing::debug!("container writer busy; frame dropped");
            return false;
        }
        if let Some(last) = self.last_pts
            && frame.timing.pts.compare(last) != Ordering::Greater
        {
            self.stats.rejected += 1;
            tracing::warn!(
                pts = frame.timing.pts.as_secs_f64(),
                last = last.as_secs_f64(),
                "non-monotonic pts; frame dropped"
            );
            return false;
        }

        // The anchor candidate is committed only after a successful append,
        // so a frame the writer refuses cannot become the track origin.
        let anchor = self.anchor.unwrap_or(frame.timing.pts);
        let Some(timing) = self.container_timing(frame.timing, anchor) else {
            self.stats.rejected += 1;
            tracing::warn!(
                pts = frame.timing.pts.as_secs_f64(),
                "timestamp rebase overflowed; frame dropped"
            );
            return false;
        };

        if let Err(err) = self.writer.append(frame, timing) {
            self.stats.rejected += 1;
            tracing::warn!(error = %err, "container append failed; frame dropped");
            return false;
        }

        if self.policy == TimestampPolicy::AnchorFirstFrame {
            self.anchor = Some(anchor);
        }
        self.last_pts = Some(frame.timing.pts);
        self.stats.accepted += 1;
        true
    }

    /// Finish the container. `Writing` -> `Finishing` -> `Finished`.
    ///
    /// Closing with zero accepted frames abandons the output: the writer is
    /// shut down, anything it left on disk is removed, and the call reports
    /// `FinalizeFailed`. A close that fails with frames on disk leaves the
    /// sink `Finishing`, and a later close retries the finalize.
    pub fn close(&mut self) -> Result<OutputHandle, SinkError> {
        match self.state {
            SinkState::Unopened | SinkState::Finished => {
                return Err(SinkError::InvalidState {
                    expected: "Writing or Finishing",
                    actual: self.state,
                });
            }
            SinkState::Writing | SinkState::Finishing => {}
        }
        self.state = SinkState::Finishing;

        if self.stats.accepted == 0 {
            return self.abandon_empty_output();
        }

        if !self.input_marked {
            self.writer
                .mark_input_finished()
                .map_err(SinkError::FinalizeFailed)?;
            self.input_marked = true;
        }

        let handle = self.writer.finalize().map_err(SinkError::FinalizeFailed)?;
        self.state = SinkState::Finished;
        tracing::debug!(
            path = %handle.path.display(),
            accepted = self.stats.accepted,
            rejected = self.stats.rejected,
            "encoder sink finished"
        );
        Ok(handle)
    }

    fn container_timing(&self, timing: FrameTiming, anchor: MediaTime) -> Option<FrameTiming> {
        match self.policy {
            TimestampPolicy::SourceRelative => Some(timing),
            TimestampPolicy::AnchorFirstFrame => Some(FrameTiming {
                pts: timing.pts.checked_sub(anchor)?,
                duration: timing.duration,
                dts: timing.dts.checked_sub(anchor)?,
            }),
        }
    }

    // A zero-frame container is useless whether or not the writer manages
    // to finalize it; shut the writer down and remove whatever it left.
    fn abandon_empty_output(&mut self) -> Result<OutputHandle, SinkError> {
        let _ = self.writer.mark_input_finished();
        let _ = self.writer.finalize();
        if let Some(path) = &self.out_path {
            let _ = std::fs::remove_file(path);
        }
        self.state = SinkState::Finished;
        tracing::warn!(rejected = self.stats.rejected, "closed with zero accepted frames");
        Err(SinkError::FinalizeFailed(anyhow::anyhow!(
            "no frames were accepted"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{H264Profile, MemoryWriter};
    use crate::foundation::core::{Fps, PixelFormat};
    use crate::frame::PixelBuffer;

    fn track() -> TrackConfig {
        TrackConfig {
            width: 4,
            height: 4,
            fps: Fps::new(30, 1).unwrap(),
            format: PixelFormat::Bgra8,
            bitrate_bps: 6_000_000,
            profile: H264Profile::High,
        }
    }

    fn frame_at(pts: i64) -> Frame {
        let mt = |v| MediaTime::new(v, 90_000).unwrap();
        Frame {
            buffer: PixelBuffer {
                width: 4,
                height: 4,
                format: PixelFormat::Bgra8,
                stride: 16,
                data: vec![0u8; 64],
            },
            timing: FrameTiming {
                pts: mt(pts),
                duration: mt(3000),
                dts: mt(pts),
            },
        }
    }

    fn open_sink(policy: TimestampPolicy) -> (EncoderSink, MemoryWriter) {
        let observer = MemoryWriter::new();
        let mut sink = EncoderSink::new(Box::new(observer.clone()), policy);
        sink.open(Path::new("/nonexistent/reelcap/out.mp4"), &track())
            .unwrap();
        (sink, observer)
    }

    #[test]
    fn lifecycle_walks_unopened_writing_finished() {
        let observer = MemoryWriter::new();
        let mut sink = EncoderSink::new(
            Box::new(observer.clone()),
            TimestampPolicy::AnchorFirstFrame,
        );
        assert_eq!(sink.state(), SinkState::Unopened);

        sink.open(Path::new("/nonexistent/reelcap/out.mp4"), &track())
            .unwrap();
        assert_eq!(sink.state(), SinkState::Writing);

        assert!(sink.offer(&frame_at(90_000)));
        let out = sink.close().unwrap();
        assert_eq!(sink.state(), SinkState::Finished);
        assert_eq!(out.path, PathBuf::from("/nonexistent/reelcap/out.mp4"));
        assert!(observer.is_finalized());
    }

    #[test]
    fn close_before_open_is_invalid_state() {
        let mut sink = EncoderSink::new(
            Box::new(MemoryWriter::new()),
            TimestampPolicy::AnchorFirstFrame,
        );
        let err = sink.close().unwrap_err();
        assert!(matches!(
            err,
            SinkError::InvalidState {
                actual: SinkState::Unopened,
                ..
            }
        ));
    }

    #[test]
    fn double_close_is_invalid_state() {
        let (mut sink, _observer) = open_sink(TimestampPolicy::AnchorFirstFrame);
        assert!(sink.offer(&frame_at(0)));
        sink.close().unwrap();

        let err = sink.close().unwrap_err();
        assert!(matches!(
            err,
            SinkError::InvalidState {
                actual: SinkState::Finished,
                ..
            }
        ));
    }

    #[test]
    fn offer_before_open_is_rejected_not_an_error() {
        let mut sink = EncoderSink::new(
            Box::new(MemoryWriter::new()),
            TimestampPolicy::AnchorFirstFrame,
        );
        assert!(!sink.offer(&frame_at(0)));
        assert_eq!(sink.stats().rejected, 1);
        assert_eq!(sink.state(), SinkState::Unopened);
    }

    #[test]
    fn offer_after_close_is_rejected() {
        let (mut sink, _observer) = open_sink(TimestampPolicy::AnchorFirstFrame);
        assert!(sink.offer(&frame_at(0)));
        sink.close().unwrap();
        assert!(!sink.offer(&frame_at(3000)));
    }

    #[test]
    fn busy_writer_drops_frames() {
        let (mut sink, observer) = open_sink(TimestampPolicy::AnchorFirstFrame);
        observer.set_ready(false);
        assert!(!sink.offer(&frame_at(0)));
        observer.set_ready(true);
        assert!(sink.offer(&frame_at(3000)));

        let stats = sink.stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.accepted, 1);
        assert_eq!(observer.frame_count(), 1);
    }

    #[test]
    fn zero_frame_close_is_finalize_failed_and_spends_the_sink() {
        let (mut sink, observer) = open_sink(TimestampPolicy::AnchorFirstFrame);
        let err = sink.close().unwrap_err();
        assert!(matches!(err, SinkError::FinalizeFailed(_)));
        assert_eq!(sink.state(), SinkState::Finished);
        assert!(observer.is_input_finished());

        let again = sink.close().unwrap_err();
        assert!(matches!(again, SinkError::InvalidState { .. }));
    }

    #[test]
    fn anchoring_rebases_onto_zero() {
        let (mut sink, observer) = open_sink(TimestampPolicy::AnchorFirstFrame);
        // Source clock started long before this session.
        assert!(sink.offer(&frame_at(86_400 * 90_000)));
        assert!(sink.offer(&frame_at(86_400 * 90_000 + 3003)));
        sink.close().unwrap();

        let frames = observer.frames();
        assert_eq!(frames[0].0.pts, MediaTime::new(0, 90_000).unwrap());
        assert_eq!(frames[0].0.dts, MediaTime::new(0, 90_000).unwrap());
        assert_eq!(frames[1].0.pts, MediaTime::new(3003, 90_000).unwrap());
        // Duration is a delta; anchoring leaves it alone.
        assert_eq!(frames[0].0.duration, MediaTime::new(3000, 90_000).unwrap());
    }

    #[test]
    fn source_relative_passes_timestamps_through() {
        let (mut sink, observer) = open_sink(TimestampPolicy::SourceRelative);
        assert!(sink.offer(&frame_at(90_000)));
        assert!(sink.offer(&frame_at(93_003)));
        sink.close().unwrap();

        let frames = observer.frames();
        assert_eq!(frames[0].0.pts, MediaTime::new(90_000, 90_000).unwrap());
        assert_eq!(frames[1].0.pts, MediaTime::new(93_003, 90_000).unwrap());
    }

    #[test]
    fn non_monotonic_pts_is_rejected() {
        let (mut sink, _observer) = open_sink(TimestampPolicy::AnchorFirstFrame);
        assert!(sink.offer(&frame_at(3000)));
        assert!(!sink.offer(&frame_at(3000)));
        assert!(!sink.offer(&frame_at(2000)));
        assert!(sink.offer(&frame_at(6000)));
        assert_eq!(sink.stats().rejected, 2);
        assert_eq!(sink.stats().accepted, 2);
    }

    /// Writer that fails a scripted number of appends, then works.
    struct FlakyWriter {
        inner: MemoryWriter,
        fail_appends: u32,
        fail_finalizes: u32,
    }

    impl ContainerWriter for FlakyWriter {
        fn open(&mut self, path: &Path, track: &TrackConfig) -> anyhow::Result<()> {
            self.inner.open(path, track)
        }

        fn is_ready_for_data(&self) -> bool {
            self.inner.is_ready_for_data()
        }

        fn append(&mut self, frame: &Frame, timing: FrameTiming) -> anyhow::Result<()> {
            if self.fail_appends > 0 {
                self.fail_appends -= 1;
                anyhow::bail!("synthetic append failure");
            }
            self.inner.append(frame, timing)
        }

        fn mark_input_finished(&mut self) -> anyhow::Result<()> {
            self.inner.mark_input_finished()
        }

        fn finalize(&mut self) -> anyhow::Result<OutputHandle> {
            if self.fail_finalizes > 0 {
                self.fail_finalizes -= 1;
                anyhow::bail!("synthetic finalize failure");
            }
            self.inner.finalize()
        }
    }

    #[test]
    fn failed_append_does_not_anchor_the_track() {
        let observer = MemoryWriter::new();
        let mut sink = EncoderSink::new(
            Box::new(FlakyWriter {
                inner: observer.clone(),
                fail_appends: 1,
                fail_finalizes: 0,
            }),
            TimestampPolicy::AnchorFirstFrame,
        );
        sink.open(Path::new("/nonexistent/reelcap/out.mp4"), &track())
            .unwrap();

        assert!(!sink.offer(&frame_at(90_000)));
        assert!(sink.offer(&frame_at(93_003)));
        sink.close().unwrap();

        // The dropped frame must not have become the origin.
        let frames = observer.frames();
        assert_eq!(frames[0].0.pts, MediaTime::new(0, 90_000).unwrap());
    }

    #[test]
    fn failed_finalize_stays_finishing_and_can_retry() {
        let observer = MemoryWriter::new();
        let mut sink = EncoderSink::new(
            Box::new(FlakyWriter {
                inner: observer.clone(),
                fail_appends: 0,
                fail_finalizes: 1,
            }),
            TimestampPolicy::AnchorFirstFrame,
        );
        sink.open(Path::new("/nonexistent/reelcap/out.mp4"), &track())
            .unwrap();
        assert!(sink.offer(&frame_at(0)));

        let err = sink.close().unwrap_err();
        assert!(matches!(err, SinkError::FinalizeFailed(_)));
        assert_eq!(sink.state(), SinkState::Finishing);

        let out = sink.close().unwrap();
        assert_eq!(out.path, PathBuf::from("/nonexistent/reelcap/out.mp4"));
        assert_eq!(sink.state(), SinkState::Finished);
    }
}
