//! Frame payloads and the crop pipeline.
//!
//! A [`Frame`] is one captured image plus its timing metadata. The crop path
//! is [`geometry::compute_crop_bounds`] (rectangle math) feeding
//! [`crop::FrameCropper`] (pixel copy), with destination buffers coming from
//! the bounded [`buffer::BufferPool`].

use crate::foundation::core::{FrameTiming, PixelFormat};

/// Bounded pooled allocator for destination pixel buffers.
pub mod buffer;
/// Sub-rectangle copy with verbatim timing passthrough.
pub mod crop;
/// Crop-rectangle to integer pixel-bounds computation.
pub mod geometry;

/// A writable pixel buffer, row-major with a per-row stride in bytes.
///
/// Capture subsystems commonly pad rows for alignment, so `stride` may
/// exceed `width * bytes_per_pixel`. Buffers produced by the cropper are
/// always tightly packed.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelBuffer {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel layout of `data`.
    pub format: PixelFormat,
    /// Bytes per row, at least `width * format.bytes_per_pixel()`.
    pub stride: usize,
    /// Pixel bytes, `height` rows of `stride` bytes each.
    pub data: Vec<u8>,
}

impl PixelBuffer {
    /// Bytes per row for a tightly packed buffer of `width`.
    pub fn packed_stride(width: u32, format: PixelFormat) -> usize {
        width as usize * format.bytes_per_pixel()
    }

    /// Return `true` when rows carry no padding.
    pub fn is_tightly_packed(&self) -> bool {
        self.stride == Self::packed_stride(self.width, self.format)
    }

    /// Return `true` when `stride` and `data` can address every pixel.
    ///
    /// The final row is allowed to omit padding past its last pixel, which
    /// matches what capture subsystems hand out.
    pub fn has_valid_layout(&self) -> bool {
        let packed = Self::packed_stride(self.width, self.format);
        if self.stride < packed {
            return false;
        }
        if self.height == 0 {
            return true;
        }
        let Some(full_rows) = self.stride.checked_mul(self.height as usize - 1) else {
            return false;
        };
        let Some(needed) = full_rows.checked_add(packed) else {
            return false;
        };
        self.data.len() >= needed
    }

    /// Borrow the pixel bytes of row `y`, excluding row padding.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height || !self.has_valid_layout() {
            return None;
        }
        let start = self.stride * y as usize;
        let packed = Self::packed_stride(self.width, self.format);
        self.data.get(start..start + packed)
    }
}

/// One captured image plus its timing metadata.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Pixel payload.
    pub buffer: PixelBuffer,
    /// Presentation/decode timing from the capture source.
    pub timing: FrameTiming,
}

impl Frame {
    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.buffer.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.buffer.height
    }

    /// Pixel layout of the payload.
    pub fn format(&self) -> PixelFormat {
        self.buffer.format
    }
}
