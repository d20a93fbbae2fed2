//! Geometric crop stage.
//!
//! Copies a rectangular window out of a source frame into a freshly
//! allocated buffer, leaving timing untouched. Crop failures are per-frame:
//! the caller drops the frame and processes the next one.

use crate::foundation::core::Rect;
use crate::frame::buffer::{AllocError, BufferPool, BufferPoolStats};
use crate::frame::geometry::{self, GeometryError, PixelBounds};
use crate::frame::Frame;

/// Errors from the crop stage.
#[derive(thiserror::Error, Debug)]
pub enum CropError {
    /// Crop rectangle could not be resolved against the source.
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    /// Destination buffer could not be allocated.
    #[error(transparent)]
    Alloc(#[from] AllocError),
    /// Pixel transfer failed; the source frame stays usable.
    #[error("crop render failed: {reason}")]
    RenderFailed {
        /// What the transfer step found inconsistent.
        reason: String,
    },
}

fn render_failed(reason: impl Into<String>) -> CropError {
    CropError::RenderFailed {
        reason: reason.into(),
    }
}

/// Crops frames through a recycled buffer pool.
pub struct FrameCropper {
    pool: BufferPool,
}

impl FrameCropper {
    /// Create a cropper over the given pool.
    pub fn new(pool: BufferPool) -> Self {
        Self { pool }
    }

    /// Create a cropper with default pool caps.
    pub fn with_defaults() -> Self {
        Self::new(BufferPool::with_defaults())
    }

    /// Snapshot of the backing pool counters.
    pub fn pool_stats(&self) -> BufferPoolStats {
        self.pool.stats()
    }

    /// Hand a cropped frame's buffer back for reuse.
    pub fn release(&mut self, frame: Frame) {
        self.pool.release(frame.buffer);
    }

    /// Resolve `rect` against the source dimensions and crop.
    pub fn crop_to_rect(&mut self, source: &Frame, rect: Rect) -> Result<Frame, CropError> {
        let bounds = geometry::compute_crop_bounds(rect, source.width(), source.height())?;
        self.crop(source, bounds)
    }

    /// Copy the `bounds` window of `source` into a new frame.
    ///
    /// The output buffer is tightly packed. `timing` is carried over
    /// bit-identical from the source.
    pub fn crop(&mut self, source: &Frame, bounds: PixelBounds) -> Result<Frame, CropError> {
        if !bounds.fits_within(source.width(), source.height()) {
            return Err(render_failed(format!(
                "bounds {}x{}+{}+{} exceed source {}x{}",
                bounds.width,
                bounds.height,
                bounds.x,
                bounds.y,
                source.width(),
                source.height()
            )));
        }
        if !source.buffer.has_valid_layout() {
            return Err(render_failed(format!(
                "source buffer layout is inconsistent: {}x{} stride {} len {}",
                source.width(),
                source.height(),
                source.buffer.stride,
                source.buffer.data.len()
            )));
        }

        let format = source.format();
        let mut dst = self.pool.allocate(bounds.width, bounds.height, format)?;

        let bpp = format.bytes_per_pixel();
        let x_off = bounds.x as usize * bpp;
        let row_bytes = bounds.width as usize * bpp;

        for (row_idx, dst_row) in dst.data.chunks_exact_mut(row_bytes).enumerate() {
            let src_y = bounds.y + row_idx as u32;
            let src_row = source
                .buffer
                .row(src_y)
                .ok_or_else(|| render_failed(format!("source row {src_y} out of range")))?;
            dst_row.copy_from_slice(&src_row[x_off..x_off + row_bytes]);
        }

        Ok(Frame {
            buffer: dst,
            timing: source.timing,
        })
    }
}
