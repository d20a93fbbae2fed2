//! Recording session orchestration.
//!
//! [`RecordingSession`] wires a capture source, an optional crop stage, and
//! an encoder sink into one start/stop lifecycle producing one output file.
//!
//! Threading: the capture source delivers on its own thread; the handler
//! only stamps counters and does a non-blocking hand-off into a bounded
//! channel. A dedicated consumer thread owns the cropper and the sink, so
//! the encoder is touched from exactly one thread and never blocks the
//! delivery callback. When the queue is full the frame is dropped, never
//! queued elsewhere; a live capture stream waits for no one.

pub mod config;
pub mod output;

use crate::capture::{
    CaptureError, CaptureEvent, CaptureFilter, CaptureSource, CaptureSubscription, FrameHandler,
};
use crate::encode::sink::{EncoderSink, SinkError};
use crate::encode::{ContainerWriter, OutputHandle};
use crate::foundation::core::Rect;
use crate::frame::crop::FrameCropper;
use crate::frame::geometry::{self, GeometryError, PixelBounds};
use crate::frame::Frame;
use crate::session::config::{ConfigError, RecordingConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;

/// Lifecycle phase of a [`RecordingSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Ready to start.
    Idle,
    /// Start in progress.
    Starting,
    /// Recording.
    Active,
    /// Stop in progress.
    Stopping,
    /// Finished; the output file lives at the contained path.
    Stopped(PathBuf),
    /// The lifecycle broke down; the session is spent.
    Failed {
        /// Human-readable cause.
        reason: String,
    },
}

/// Errors from the session lifecycle.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    /// `start` while a recording is running or the session is spent.
    #[error("session cannot start from state {actual:?}")]
    AlreadyRecording {
        /// State the session was in.
        actual: SessionState,
    },
    /// `stop` without an active recording.
    #[error("session has no active recording (state {actual:?})")]
    NotRecording {
        /// State the session was in.
        actual: SessionState,
    },
    /// The configuration failed validation.
    #[error("recording configuration invalid")]
    Config(#[from] ConfigError),
    /// The crop rectangle could not be resolved against the capture size.
    #[error("crop rectangle unusable")]
    Crop(#[from] GeometryError),
    /// The capture subscription could not be established.
    #[error("capture subscription failed")]
    CaptureStart(#[source] CaptureError),
    /// The capture stream could not be shut down.
    #[error("capture shutdown failed")]
    CaptureStop(#[source] CaptureError),
    /// The capture stream died while recording.
    #[error("capture stream failed during recording")]
    CaptureFailed(#[source] CaptureError),
    /// The encoder sink failed.
    #[error(transparent)]
    Sink(#[from] SinkError),
    /// The pipeline thread died.
    #[error("recording pipeline failed: {reason}")]
    Internal {
        /// What broke.
        reason: String,
    },
}

/// Frame accounting for one recording.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecordingStats {
    /// Frames the capture source delivered.
    pub delivered: u64,
    /// Frames the encoder accepted.
    pub accepted: u64,
    /// Frames the encoder gate rejected.
    pub rejected: u64,
    /// Frames dropped because the hand-off queue was full.
    pub dropped_queue_full: u64,
    /// Frames discarded during shutdown.
    pub dropped_shutdown: u64,
    /// Frames lost to crop failures.
    pub crop_failures: u64,
}

impl RecordingStats {
    /// Total frames that never reached the container.
    pub fn dropped_total(&self) -> u64 {
        self.rejected + self.dropped_queue_full + self.dropped_shutdown + self.crop_failures
    }
}

enum PipelineMsg {
    Frame(Frame),
    Shutdown,
}

#[derive(Default)]
struct PipelineShared {
    stopping: AtomicBool,
    delivered: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    dropped_queue_full: AtomicU64,
    dropped_shutdown: AtomicU64,
    crop_failures: AtomicU64,
    capture_failure: Mutex<Option<CaptureError>>,
}

impl PipelineShared {
    fn set_failure(&self, error: CaptureError) {
        let mut slot = self
            .capture_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        // First failure wins; later ones are echoes of the same death.
        slot.get_or_insert(error);
    }

    fn take_failure(&self) -> Option<CaptureError> {
        self.capture_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    fn peek_failure(&self) -> Option<CaptureError> {
        self.capture_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn snapshot(&self) -> RecordingStats {
        RecordingStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dropped_queue_full: self.dropped_queue_full.load(Ordering::Relaxed),
            dropped_shutdown: self.dropped_shutdown.load(Ordering::Relaxed),
            crop_failures: self.crop_failures.load(Ordering::Relaxed),
        }
    }
}

struct ActivePipeline<Sub> {
    subscription: Sub,
    tx: mpsc::SyncSender<PipelineMsg>,
    consumer: JoinHandle<EncoderSink>,
    shared: Arc<PipelineShared>,
}

/// One recording lifecycle: start, frames flow, stop, one output file.
///
/// A session is single-use. After `stop` (or any lifecycle failure) the
/// writer is spent and the session stays in its terminal state; record
/// again with a new session.
///
/// Dropping an active session abandons the recording without finalizing
/// the container; call [`RecordingSession::stop`] to get a playable file.
pub struct RecordingSession<S: CaptureSource> {
    source: S,
    config: RecordingConfig,
    state: SessionState,
    writer_slot: Option<Box<dyn ContainerWriter>>,
    active: Option<ActivePipeline<S::Subscription>>,
    last_stats: RecordingStats,
}

impl<S: CaptureSource> RecordingSession<S> {
    /// Create an idle session over a capture source and container writer.
    pub fn new(source: S, writer: Box<dyn ContainerWriter>, config: RecordingConfig) -> Self {
        Self {
            source,
            config,
            state: SessionState::Idle,
            writer_slot: Some(writer),
            active: None,
            last_stats: RecordingStats::default(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The configuration this session records with.
    pub fn config(&self) -> &RecordingConfig {
        &self.config
    }

    /// Frame accounting: live counters while recording, the final tally
    /// after stop.
    pub fn stats(&self) -> RecordingStats {
        match &self.active {
            Some(pipeline) => pipeline.shared.snapshot(),
            None => self.last_stats,
        }
    }

    /// Out-of-band capture failure reported since start, if any.
    ///
    /// The stream is already dead when this returns `Some`; `stop` will
    /// surface the same failure and move the session to `Failed`.
    pub fn capture_failure(&self) -> Option<CaptureError> {
        self.active
            .as_ref()
            .and_then(|pipeline| pipeline.shared.peek_failure())
    }

    /// Start recording, optionally cropping every frame to `crop` (given
    /// in source pixel coordinates).
    ///
    /// Config and crop problems are reported before anything is touched
    /// and leave the session `Idle`. Failures past that point (writer
    /// open, capture subscribe) spend the session: resources are rolled
    /// back, the state becomes `Failed`, and the error is returned.
    #[tracing::instrument(skip_all)]
    pub fn start(&mut self, filter: &CaptureFilter, crop: Option<Rect>) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::AlreadyRecording {
                actual: self.state.clone(),
            });
        }
        self.config.validate()?;
        let bounds = match crop {
            Some(rect) => Some(geometry::compute_crop_bounds(
                rect,
                self.config.width,
                self.config.height,
            )?),
            None => None,
        };
        let Some(writer) = self.writer_slot.take() else {
            return Err(SessionError::AlreadyRecording {
                actual: self.state.clone(),
            });
        };
        self.state = SessionState::Starting;

        let out_path = self.config.resolved_output_path();
        let (track_w, track_h) = match bounds {
            Some(b) => (b.width, b.height),
            None => (self.config.width, self.config.height),
        };
        let track = self.config.track_config(track_w, track_h);

        let mut sink = EncoderSink::new(writer, self.config.timestamp_policy);
        if let Err(err) = sink.open(&out_path, &track) {
            self.state = SessionState::Failed {
                reason: err.to_string(),
            };
            return Err(SessionError::Sink(err));
        }

        let shared = Arc::new(PipelineShared::default());
        let (tx, rx) = mpsc::sync_channel::<PipelineMsg>(self.config.queue_depth);

        // Consumer thread: sole owner of the cropper and the sink, so
        // encoder state is only ever touched from here.
        let consumer_shared = Arc::clone(&shared);
        let consumer = std::thread::spawn(move || consumer_loop(rx, sink, bounds, consumer_shared));

        let handler = delivery_handler(Arc::clone(&shared), tx.clone());
        match self
            .source
            .subscribe(filter, self.config.capture_config(), handler)
        {
            Ok(subscription) => {
                tracing::info!(
                    path = %out_path.display(),
                    width = track_w,
                    height = track_h,
                    cropped = bounds.is_some(),
                    "recording started"
                );
                self.active = Some(ActivePipeline {
                    subscription,
                    tx,
                    consumer,
                    shared,
                });
                self.state = SessionState::Active;
                Ok(())
            }
            Err(err) => {
                // Roll back: shut the consumer down and discard the sink.
                // Its close error (typically "no frames were accepted") is
                // noise next to the subscribe failure we are surfacing.
                let _ = tx.send(PipelineMsg::Shutdown);
                drop(tx);
                match consumer.join() {
                    Ok(mut sink) => {
                        if let Err(close_err) = sink.close() {
                            tracing::debug!(error = %close_err, "sink discarded during rollback");
                        }
                    }
                    Err(_) => tracing::warn!("pipeline thread panicked during rollback"),
                }
                self.state = SessionState::Failed {
                    reason: err.to_string(),
                };
                Err(SessionError::CaptureStart(err))
            }
        }
    }

    /// Stop recording and finalize the output file.
    ///
    /// Shutdown order matters: the stopping flag is raised, then the
    /// capture subscription is cancelled, and only then is the sink
    /// closed. Once the unsubscribe step returns, no delivery can reach
    /// encoder state anymore; frames still sitting in the hand-off queue
    /// are discarded and counted, not encoded.
    #[tracing::instrument(skip_all)]
    pub fn stop(&mut self) -> Result<OutputHandle, SessionError> {
        if self.state != SessionState::Active {
            return Err(SessionError::NotRecording {
                actual: self.state.clone(),
            });
        }
        let Some(pipeline) = self.active.take() else {
            return Err(SessionError::NotRecording {
                actual: self.state.clone(),
            });
        };
        self.state = SessionState::Stopping;
        let ActivePipeline {
            subscription,
            tx,
            consumer,
            shared,
        } = pipeline;

        // Raised before cancel so that even a source which keeps calling
        // the handler after cancel returns cannot reach the encoder.
        shared.stopping.store(true, Ordering::Release);
        let cancel_result = subscription.cancel();

        let _ = tx.send(PipelineMsg::Shutdown);
        drop(tx);

        let mut sink = match consumer.join() {
            Ok(sink) => sink,
            Err(_) => {
                self.last_stats = shared.snapshot();
                let reason = "pipeline thread panicked".to_string();
                self.state = SessionState::Failed {
                    reason: reason.clone(),
                };
                return Err(SessionError::Internal { reason });
            }
        };

        // The sink is closed before any capture error is surfaced, so a
        // failed unsubscribe still leaves no half-open container behind.
        let close_result = sink.close();
        self.last_stats = shared.snapshot();

        if let Err(err) = cancel_result {
            self.state = SessionState::Failed {
                reason: err.to_string(),
            };
            return Err(SessionError::CaptureStop(err));
        }
        if let Some(err) = shared.take_failure() {
            self.state = SessionState::Failed {
                reason: err.to_string(),
            };
            return Err(SessionError::CaptureFailed(err));
        }
        let handle = match close_result {
            Ok(handle) => handle,
            Err(err) => {
                self.state = SessionState::Failed {
                    reason: err.to_string(),
                };
                return Err(SessionError::Sink(err));
            }
        };

        let stats = self.last_stats;
        if stats.dropped_total() > 0 {
            tracing::warn!(
                rejected = stats.rejected,
                queue_full = stats.dropped_queue_full,
                shutdown = stats.dropped_shutdown,
                crop = stats.crop_failures,
                "recording dropped frames"
            );
        }
        tracing::info!(
            path = %handle.path.display(),
            accepted = stats.accepted,
            delivered = stats.delivered,
            "recording stopped"
        );
        self.state = SessionState::Stopped(handle.path.clone());
        Ok(handle)
    }
}

fn delivery_handler(
    shared: Arc<PipelineShared>,
    tx: mpsc::SyncSender<PipelineMsg>,
) -> FrameHandler {
    Box::new(move |event| match event {
        CaptureEvent::Frame(frame) => {
            shared.delivered.fetch_add(1, Ordering::Relaxed);
            if shared.stopping.load(Ordering::Acquire) {
                shared.dropped_shutdown.fetch_add(1, Ordering::Relaxed);
                return;
            }
            match tx.try_send(PipelineMsg::Frame(frame)) {
                Ok(()) => {}
                Err(mpsc::TrySendError::Full(_)) => {
                    shared.dropped_queue_full.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("hand-off queue full; frame dropped");
                }
                Err(mpsc::TrySendError::Disconnected(_)) => {
                    shared.dropped_shutdown.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        CaptureEvent::Stopped { error } => {
            tracing::warn!(error = %error, "capture stream reported failure");
            shared.set_failure(error);
        }
    })
}

fn consumer_loop(
    rx: mpsc::Receiver<PipelineMsg>,
    mut sink: EncoderSink,
    bounds: Option<PixelBounds>,
    shared: Arc<PipelineShared>,
) -> EncoderSink {
    let mut cropper = FrameCropper::with_defaults();
    while let Ok(msg) = rx.recv() {
        let frame = match msg {
            PipelineMsg::Frame(frame) => frame,
            PipelineMsg::Shutdown => break,
        };
        if shared.stopping.load(Ordering::Acquire) {
            shared.dropped_shutdown.fetch_add(1, Ordering::Relaxed);
            continue;
        }
        match bounds {
            Some(bounds) => match cropper.crop(&frame, bounds) {
                Ok(cropped) => {
                    record_offer(&shared, sink.offer(&cropped));
                    cropper.release(cropped);
                }
                Err(err) => {
                    shared.crop_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(error = %err, "crop failed; frame dropped");
                }
            },
            None => record_offer(&shared, sink.offer(&frame)),
        }
    }
    sink
}

fn record_offer(shared: &PipelineShared, accepted: bool) {
    if accepted {
        shared.accepted.fetch_add(1, Ordering::Relaxed);
    } else {
        shared.rejected.fetch_add(1, Ordering::Relaxed);
    }
}
