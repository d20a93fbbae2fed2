//! Test-pattern capture source.
//!
//! Synthesizes a moving gradient at a configured resolution and rate on a
//! dedicated delivery thread. It stands in for an OS capture stream
//! anywhere one is not available: demos, CI, and every pipeline test in
//! this crate. Frames carry padded strides so downstream code that claims
//! to handle non-packed layouts actually gets exercised.

use crate::capture::{
    CaptureConfig, CaptureError, CaptureEvent, CaptureFilter, CaptureSource,
    CaptureSubscription, FrameHandler,
};
use crate::foundation::core::{FrameTiming, MediaTime, PixelFormat};
use crate::frame::{Frame, PixelBuffer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const STOP_POLL: Duration = Duration::from_millis(5);

/// Options for [`SyntheticSource`].
#[derive(Debug, Clone, Copy)]
pub struct SyntheticSourceOpts {
    /// Timestamp of the first frame, in seconds. Non-zero values model
    /// capture clocks that started long before the recording did.
    pub base_pts_secs: f64,
    /// Timescale used for generated timestamps.
    pub timescale: u32,
    /// Row strides are padded to this byte alignment (0 or 1 for packed).
    pub row_align: usize,
}

impl Default for SyntheticSourceOpts {
    fn default() -> Self {
        Self {
            base_pts_secs: 0.0,
            timescale: 90_000,
            row_align: 64,
        }
    }
}

/// Capture source that generates a moving test pattern.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    opts: SyntheticSourceOpts,
}

impl SyntheticSource {
    /// Create a source with the given options.
    pub fn new(opts: SyntheticSourceOpts) -> Self {
        Self { opts }
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new(SyntheticSourceOpts::default())
    }
}

impl CaptureSource for SyntheticSource {
    type Subscription = SyntheticSubscription;

    fn subscribe(
        &mut self,
        filter: &CaptureFilter,
        config: CaptureConfig,
        mut handler: FrameHandler,
    ) -> Result<Self::Subscription, CaptureError> {
        if config.width == 0 || config.height == 0 {
            return Err(CaptureError::InvalidConfig {
                reason: "frame width/height must be non-zero".into(),
            });
        }
        if self.opts.timescale == 0 {
            return Err(CaptureError::InvalidConfig {
                reason: "timestamp timescale must be non-zero".into(),
            });
        }
        let duration = config.fps.frame_duration(self.opts.timescale).map_err(|e| {
            CaptureError::InvalidConfig {
                reason: e.to_string(),
            }
        })?;
        let base = MediaTime {
            value: (self.opts.base_pts_secs * f64::from(self.opts.timescale)).round() as i64,
            timescale: self.opts.timescale,
        };

        tracing::debug!(
            display_index = filter.display_index,
            width = config.width,
            height = config.height,
            fps = config.fps.as_f64(),
            "synthetic capture stream starting"
        );

        let opts = self.opts;
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let period_secs = config.fps.frame_duration_secs();

        let thread = std::thread::spawn(move || {
            let started = Instant::now();
            let mut idx: u64 = 0;
            'deliver: loop {
                if thread_stop.load(Ordering::Acquire) {
                    break 'deliver;
                }
                let frame = generate_frame(&config, &opts, base, duration, idx);
                handler(CaptureEvent::Frame(frame));
                idx += 1;

                let target = started + Duration::from_secs_f64(period_secs * idx as f64);
                loop {
                    if thread_stop.load(Ordering::Acquire) {
                        break 'deliver;
                    }
                    let now = Instant::now();
                    if now >= target {
                        break;
                    }
                    std::thread::sleep((target - now).min(STOP_POLL));
                }
            }
        });

        Ok(SyntheticSubscription {
            stop,
            thread: Some(thread),
        })
    }
}

/// Handle to a running synthetic stream.
#[derive(Debug)]
pub struct SyntheticSubscription {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SyntheticSubscription {
    fn shutdown(&mut self) -> std::thread::Result<()> {
        self.stop.store(true, Ordering::Release);
        match self.thread.take() {
            Some(thread) => thread.join(),
            None => Ok(()),
        }
    }
}

impl CaptureSubscription for SyntheticSubscription {
    fn cancel(mut self) -> Result<(), CaptureError> {
        self.shutdown().map_err(|_| CaptureError::StreamStop {
            reason: "delivery thread panicked".into(),
        })
    }
}

impl Drop for SyntheticSubscription {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// Pattern color at `(x, y)` for frame `idx`.
///
/// Position-derived so tests can predict any pixel of any frame, and
/// `idx`-dependent so consecutive frames differ.
pub fn pattern_pixel(x: u32, y: u32, idx: u64, format: PixelFormat) -> [u8; 4] {
    let r = x.wrapping_add(idx as u32) as u8;
    let g = y.wrapping_add((idx / 2) as u32) as u8;
    let b = (x ^ y) as u8;
    match format {
        PixelFormat::Bgra8 => [b, g, r, 0xff],
        PixelFormat::Rgba8 => [r, g, b, 0xff],
    }
}

fn generate_frame(
    config: &CaptureConfig,
    opts: &SyntheticSourceOpts,
    base: MediaTime,
    duration: MediaTime,
    idx: u64,
) -> Frame {
    let bpp = config.format.bytes_per_pixel();
    let packed = PixelBuffer::packed_stride(config.width, config.format);
    let stride = packed.next_multiple_of(opts.row_align.max(1));

    let mut data = vec![0u8; stride * config.height as usize];
    for y in 0..config.height {
        let row = &mut data[y as usize * stride..y as usize * stride + packed];
        for x in 0..config.width {
            let px = pattern_pixel(x, y, idx, config.format);
            row[x as usize * bpp..x as usize * bpp + bpp].copy_from_slice(&px);
        }
    }

    let pts = MediaTime {
        value: base.value + idx as i64 * duration.value,
        timescale: base.timescale,
    };
    Frame {
        buffer: PixelBuffer {
            width: config.width,
            height: config.height,
            format: config.format,
            stride,
            data,
        },
        timing: FrameTiming {
            pts,
            duration,
            // Raw frames decode in presentation order.
            dts: pts,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::core::Fps;
    use std::sync::Mutex;

    fn config(width: u32, height: u32, fps: u32) -> CaptureConfig {
        CaptureConfig {
            width,
            height,
            fps: Fps::new(fps, 1).unwrap(),
            format: PixelFormat::Bgra8,
            queue_depth: 5,
        }
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn pattern_is_deterministic_and_format_aware() {
        assert_eq!(pattern_pixel(3, 5, 0, PixelFormat::Bgra8), [6, 5, 3, 0xff]);
        assert_eq!(pattern_pixel(3, 5, 0, PixelFormat::Rgba8), [3, 5, 6, 0xff]);
        assert_eq!(pattern_pixel(3, 5, 2, PixelFormat::Bgra8), [6, 6, 5, 0xff]);
    }

    #[test]
    fn generated_frames_carry_padded_strides() {
        let opts = SyntheticSourceOpts::default();
        let base = MediaTime::new(0, 90_000).unwrap();
        let duration = MediaTime::new(3000, 90_000).unwrap();
        // 10px rows pack to 40 bytes and pad to 64.
        let frame = generate_frame(&config(10, 4, 30), &opts, base, duration, 0);

        assert_eq!(frame.buffer.stride, 64);
        assert!(!frame.buffer.is_tightly_packed());
        assert!(frame.buffer.has_valid_layout());
        assert_eq!(frame.buffer.row(0).unwrap().len(), 40);
    }

    #[test]
    fn timestamps_start_at_the_configured_base() {
        let opts = SyntheticSourceOpts {
            base_pts_secs: 2.0,
            timescale: 600,
            ..SyntheticSourceOpts::default()
        };
        let base = MediaTime::new(1200, 600).unwrap();
        let duration = MediaTime::new(20, 600).unwrap();

        let first = generate_frame(&config(4, 4, 30), &opts, base, duration, 0);
        let third = generate_frame(&config(4, 4, 30), &opts, base, duration, 2);

        assert_eq!(first.timing.pts, MediaTime::new(1200, 600).unwrap());
        assert_eq!(first.timing.dts, first.timing.pts);
        assert_eq!(third.timing.pts, MediaTime::new(1240, 600).unwrap());
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        let mut source = SyntheticSource::default();
        let err = source
            .subscribe(
                &CaptureFilter::default(),
                config(0, 4, 30),
                Box::new(|_| {}),
            )
            .unwrap_err();
        assert!(matches!(err, CaptureError::InvalidConfig { .. }));
    }

    #[test]
    fn stream_delivers_monotonic_frames_until_cancelled() {
        let mut source = SyntheticSource::default();
        let seen: Arc<Mutex<Vec<FrameTiming>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let sub = source
            .subscribe(
                &CaptureFilter::default(),
                config(8, 8, 120),
                Box::new(move |event| {
                    if let CaptureEvent::Frame(frame) = event {
                        sink.lock().unwrap().push(frame.timing);
                    }
                }),
            )
            .unwrap();

        assert!(wait_until(Duration::from_secs(2), || {
            seen.lock().unwrap().len() >= 3
        }));
        sub.cancel().unwrap();

        let count_after_cancel = seen.lock().unwrap().len();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(seen.lock().unwrap().len(), count_after_cancel);

        let timings = seen.lock().unwrap().clone();
        for pair in timings.windows(2) {
            assert_eq!(
                pair[0].pts.compare(pair[1].pts),
                std::cmp::Ordering::Less
            );
        }
        assert_eq!(timings[0].pts, MediaTime::new(0, 90_000).unwrap());
    }
}
