//! Capture-source seam.
//!
//! The recording pipeline never talks to an OS capture subsystem directly;
//! it is handed a [`CaptureSource`] and depends only on the subscribe /
//! deliver / cancel contract below. That keeps the pipeline testable with
//! in-process sources and leaves platform bindings to implementations of
//! this trait.

pub mod synthetic;

use crate::foundation::core::{Fps, PixelFormat};
use crate::frame::Frame;

/// Errors from the capture lifecycle.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The requested stream configuration is unusable.
    #[error("capture configuration rejected: {reason}")]
    InvalidConfig {
        /// What the source objected to.
        reason: String,
    },
    /// The stream could not be started.
    #[error("capture stream failed to start: {reason}")]
    StreamStart {
        /// Source-provided failure detail.
        reason: String,
    },
    /// The stream could not be shut down cleanly.
    #[error("capture stream failed to stop: {reason}")]
    StreamStop {
        /// Source-provided failure detail.
        reason: String,
    },
    /// The stream died on its own after starting.
    #[error("capture stream stopped unexpectedly: {reason}")]
    StreamFailed {
        /// Source-provided failure detail.
        reason: String,
    },
}

/// What to capture.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CaptureFilter {
    /// Index of the display to record.
    pub display_index: usize,
    /// Whether the pointer is composited into captured frames.
    pub show_cursor: bool,
}

impl Default for CaptureFilter {
    fn default() -> Self {
        Self {
            display_index: 0,
            show_cursor: true,
        }
    }
}

/// Stream parameters requested from a capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CaptureConfig {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Delivery rate.
    pub fps: Fps,
    /// Pixel format frames are delivered in.
    pub format: PixelFormat,
    /// How many frames the source may hold in flight. Sources treat this
    /// as a hint; the pipeline uses the same bound for its hand-off queue.
    pub queue_depth: usize,
}

/// One delivery from a capture source to its handler.
#[derive(Debug)]
pub enum CaptureEvent {
    /// A captured frame. Ownership transfers to the handler for the
    /// duration of the callback.
    Frame(Frame),
    /// The stream stopped on its own. No further events follow.
    Stopped {
        /// Why the stream died.
        error: CaptureError,
    },
}

/// Callback invoked on the source's delivery context.
pub type FrameHandler = Box<dyn FnMut(CaptureEvent) + Send + 'static>;

/// A stream of captured frames.
pub trait CaptureSource {
    /// Handle for the active stream.
    type Subscription: CaptureSubscription;

    /// Start delivering frames matching `filter` to `handler`.
    fn subscribe(
        &mut self,
        filter: &CaptureFilter,
        config: CaptureConfig,
        handler: FrameHandler,
    ) -> Result<Self::Subscription, CaptureError>;
}

/// Handle to an active capture stream.
pub trait CaptureSubscription: Send {
    /// Stop the stream.
    ///
    /// On return the handler has been dropped and no further events will
    /// be delivered through it.
    fn cancel(self) -> Result<(), CaptureError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_records_primary_display_with_cursor() {
        let filter = CaptureFilter::default();
        assert_eq!(filter.display_index, 0);
        assert!(filter.show_cursor);
    }
}
