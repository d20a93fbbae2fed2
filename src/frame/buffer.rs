use crate::foundation::core::PixelFormat;
use crate::frame::PixelBuffer;
use std::collections::HashMap;

/// Errors from pixel-buffer allocation.
///
/// All variants are per-frame recoverable: the caller drops the frame and
/// the stream continues.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// Zero-width or zero-height buffers cannot hold a frame.
    #[error("pixel buffer dimensions must be non-zero")]
    ZeroDimension,
    /// The requested buffer exceeds the configured per-frame byte budget.
    #[error("pixel buffer {width}x{height} needs {bytes} bytes, over the {limit} byte frame budget")]
    BudgetExceeded {
        /// Requested width in pixels.
        width: u32,
        /// Requested height in pixels.
        height: u32,
        /// Bytes the buffer would need.
        bytes: usize,
        /// Configured per-frame budget.
        limit: usize,
    },
    /// The allocator could not reserve the backing memory.
    #[error("pixel buffer allocation of {bytes} bytes failed")]
    Exhausted {
        /// Bytes requested from the allocator.
        bytes: usize,
    },
}

/// Pool configuration for recycled pixel buffers.
#[derive(Debug, Clone, Copy)]
pub struct BufferPoolOpts {
    /// Largest single buffer the pool will hand out, in bytes.
    pub max_frame_bytes: usize,
    /// Maximum bytes retained across all buckets.
    pub max_pool_bytes: usize,
    /// Maximum retained buffers per (width, height, format) bucket.
    pub max_buffers_per_bucket: usize,
}

impl Default for BufferPoolOpts {
    fn default() -> Self {
        Self {
            // Covers 8K BGRA with headroom.
            max_frame_bytes: 192 * 1024 * 1024,
            max_pool_bytes: 256 * 1024 * 1024,
            max_buffers_per_bucket: 8,
        }
    }
}

/// Counters describing pool behavior.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Buffers currently retained for reuse.
    pub retained_buffers: usize,
    /// Bytes currently retained for reuse.
    pub retained_bytes: usize,
    /// Fresh allocations performed.
    pub alloc_buffers: u64,
    /// Bytes freshly allocated.
    pub alloc_bytes: u64,
    /// Allocations served from a bucket instead of the allocator.
    pub reused_buffers: u64,
    /// Buffers dropped on release because of pool caps or layout.
    pub dropped_on_release: u64,
    /// Allocation attempts that failed.
    pub failed_allocations: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BufferKey {
    w: u32,
    h: u32,
    format: PixelFormat,
}

impl BufferKey {
    fn byte_len(self) -> Option<usize> {
        (self.w as usize)
            .checked_mul(self.h as usize)?
            .checked_mul(self.format.bytes_per_pixel())
    }
}

struct Bucket {
    buffers: Vec<Vec<u8>>,
}

/// Bounded pooled allocator for destination pixel buffers.
///
/// Keyed by `(width, height, format)`. Buffers come out tightly packed with
/// unspecified contents; callers are expected to overwrite every pixel.
pub struct BufferPool {
    opts: BufferPoolOpts,
    stats: BufferPoolStats,

    bucket_idx_by_key: HashMap<BufferKey, usize>,
    buckets: Vec<Bucket>,
}

impl BufferPool {
    /// Create a pool with the given caps.
    pub fn new(opts: BufferPoolOpts) -> Self {
        Self {
            opts,
            stats: BufferPoolStats::default(),
            bucket_idx_by_key: HashMap::new(),
            buckets: Vec::new(),
        }
    }

    /// Create a pool with default caps.
    pub fn with_defaults() -> Self {
        Self::new(BufferPoolOpts::default())
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> BufferPoolStats {
        self.stats
    }

    /// Allocate (or reuse) a tightly packed buffer of `width` x `height`.
    pub fn allocate(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<PixelBuffer, AllocError> {
        if width == 0 || height == 0 {
            self.stats.failed_allocations += 1;
            return Err(AllocError::ZeroDimension);
        }

        let key = BufferKey {
            w: width,
            h: height,
            format,
        };
        let bytes = match key.byte_len() {
            Some(b) if b <= self.opts.max_frame_bytes => b,
            checked => {
                self.stats.failed_allocations += 1;
                tracing::debug!(width, height, "pixel buffer over frame budget");
                return Err(AllocError::BudgetExceeded {
                    width,
                    height,
                    bytes: checked.unwrap_or(usize::MAX),
                    limit: self.opts.max_frame_bytes,
                });
            }
        };

        let stride = PixelBuffer::packed_stride(width, format);
        if let Some(&bi) = self.bucket_idx_by_key.get(&key)
            && let Some(data) = self.buckets[bi].buffers.pop()
        {
            self.stats.retained_buffers = self.stats.retained_buffers.saturating_sub(1);
            self.stats.retained_bytes = self.stats.retained_bytes.saturating_sub(bytes);
            self.stats.reused_buffers += 1;
            return Ok(PixelBuffer {
                width,
                height,
                format,
                stride,
                data,
            });
        }

        let mut data = Vec::new();
        if data.try_reserve_exact(bytes).is_err() {
            self.stats.failed_allocations += 1;
            return Err(AllocError::Exhausted { bytes });
        }
        data.resize(bytes, 0);

        self.stats.alloc_buffers += 1;
        self.stats.alloc_bytes += bytes as u64;
        Ok(PixelBuffer {
            width,
            height,
            format,
            stride,
            data,
        })
    }

    /// Hand a spent buffer back for reuse.
    ///
    /// Only tightly packed buffers with a consistent layout are retained;
    /// anything else (and anything over the pool caps) is dropped.
    pub fn release(&mut self, buffer: PixelBuffer) {
        if self.opts.max_pool_bytes == 0 || self.opts.max_buffers_per_bucket == 0 {
            self.stats.dropped_on_release += 1;
            return;
        }
        if !buffer.is_tightly_packed() || !buffer.has_valid_layout() {
            self.stats.dropped_on_release += 1;
            return;
        }

        let key = BufferKey {
            w: buffer.width,
            h: buffer.height,
            format: buffer.format,
        };
        let Some(bytes) = key.byte_len() else {
            self.stats.dropped_on_release += 1;
            return;
        };
        if buffer.data.len() != bytes
            || self.stats.retained_bytes.saturating_add(bytes) > self.opts.max_pool_bytes
        {
            self.stats.dropped_on_release += 1;
            return;
        }

        let bi = match self.bucket_idx_by_key.get(&key).copied() {
            Some(i) => i,
            None => {
                let i = self.buckets.len();
                self.buckets.push(Bucket {
                    buffers: Vec::new(),
                });
                self.bucket_idx_by_key.insert(key, i);
                i
            }
        };

        let bucket = &mut self.buckets[bi];
        if bucket.buffers.len() >= self.opts.max_buffers_per_bucket {
            self.stats.dropped_on_release += 1;
            return;
        }

        bucket.buffers.push(buffer.data);
        self.stats.retained_buffers += 1;
        self.stats.retained_bytes += bytes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_is_tightly_packed_and_zeroed() {
        let mut pool = BufferPool::with_defaults();
        let buf = pool.allocate(8, 4, PixelFormat::Bgra8).unwrap();
        assert_eq!(buf.stride, 32);
        assert_eq!(buf.data.len(), 128);
        assert!(buf.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn zero_dimension_is_rejected() {
        let mut pool = BufferPool::with_defaults();
        assert_eq!(
            pool.allocate(0, 4, PixelFormat::Bgra8),
            Err(AllocError::ZeroDimension)
        );
        assert_eq!(pool.stats().failed_allocations, 1);
    }

    #[test]
    fn frame_budget_is_enforced() {
        let mut pool = BufferPool::new(BufferPoolOpts {
            max_frame_bytes: 1024,
            ..BufferPoolOpts::default()
        });
        let err = pool.allocate(64, 64, PixelFormat::Bgra8).unwrap_err();
        assert_eq!(
            err,
            AllocError::BudgetExceeded {
                width: 64,
                height: 64,
                bytes: 16384,
                limit: 1024
            }
        );
    }

    #[test]
    fn released_buffers_are_reused() {
        let mut pool = BufferPool::with_defaults();
        let buf = pool.allocate(8, 8, PixelFormat::Bgra8).unwrap();
        pool.release(buf);
        assert_eq!(pool.stats().retained_buffers, 1);

        let again = pool.allocate(8, 8, PixelFormat::Bgra8).unwrap();
        assert_eq!(again.data.len(), 256);
        let st = pool.stats();
        assert_eq!(st.reused_buffers, 1);
        assert_eq!(st.alloc_buffers, 1);
        assert_eq!(st.retained_buffers, 0);
    }

    #[test]
    fn pool_honors_bucket_cap() {
        let mut pool = BufferPool::new(BufferPoolOpts {
            max_buffers_per_bucket: 1,
            ..BufferPoolOpts::default()
        });
        let a = pool.allocate(8, 8, PixelFormat::Bgra8).unwrap();
        let b = pool.allocate(8, 8, PixelFormat::Bgra8).unwrap();
        pool.release(a);
        pool.release(b);

        let st = pool.stats();
        assert_eq!(st.retained_buffers, 1);
        assert_eq!(st.dropped_on_release, 1);
    }

    #[test]
    fn pool_honors_global_byte_cap() {
        let mut pool = BufferPool::new(BufferPoolOpts {
            max_pool_bytes: 256,
            ..BufferPoolOpts::default()
        });
        let a = pool.allocate(8, 8, PixelFormat::Bgra8).unwrap();
        let b = pool.allocate(8, 8, PixelFormat::Bgra8).unwrap();
        pool.release(a);
        pool.release(b);

        let st = pool.stats();
        assert_eq!(st.retained_bytes, 256);
        assert_eq!(st.retained_buffers, 1);
        assert_eq!(st.dropped_on_release, 1);
    }

    #[test]
    fn padded_buffers_are_not_retained() {
        let mut pool = BufferPool::with_defaults();
        let mut buf = pool.allocate(8, 8, PixelFormat::Bgra8).unwrap();
        buf.stride += 16;
        buf.data.resize(buf.stride * 8, 0);
        pool.release(buf);
        assert_eq!(pool.stats().retained_buffers, 0);
        assert_eq!(pool.stats().dropped_on_release, 1);
    }
}
