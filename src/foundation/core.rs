use std::cmp::Ordering;

pub use kurbo::{Point, Rect, Vec2};

/// Errors from constructing time values.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeError {
    /// A media timescale of zero cannot represent any instant.
    #[error("media timescale must be > 0")]
    ZeroTimescale,
    /// A frame rate with a zero numerator or denominator.
    #[error("fps numerator and denominator must be > 0")]
    ZeroRate,
}

/// A rational media timestamp: `value / timescale` seconds.
///
/// Capture subsystems hand out timestamps against a fixed per-stream
/// timescale; keeping the rational form (instead of converting to float
/// seconds) lets downstream math stay exact, and lets equality mean
/// bit-identical.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct MediaTime {
    /// Timestamp value in `1/timescale` second units.
    pub value: i64,
    /// Units per second, must be non-zero.
    pub timescale: u32,
}

impl MediaTime {
    /// Create a validated media time.
    pub fn new(value: i64, timescale: u32) -> Result<Self, TimeError> {
        if timescale == 0 {
            return Err(TimeError::ZeroTimescale);
        }
        Ok(Self { value, timescale })
    }

    /// Convert to floating-point seconds.
    pub fn as_secs_f64(self) -> f64 {
        self.value as f64 / f64::from(self.timescale)
    }

    /// Numeric comparison that works across differing timescales.
    ///
    /// Derived `PartialEq` is bitwise on purpose (two representations of the
    /// same instant compare unequal); use this for ordering checks.
    pub fn compare(self, other: MediaTime) -> Ordering {
        let lhs = i128::from(self.value) * i128::from(other.timescale);
        let rhs = i128::from(other.value) * i128::from(self.timescale);
        lhs.cmp(&rhs)
    }

    /// Subtract `rhs`, expressing the result in `self`'s timescale.
    ///
    /// Returns `None` when rescaling or the subtraction overflows.
    pub fn checked_sub(self, rhs: MediaTime) -> Option<MediaTime> {
        let rhs_value = rhs.value_in(self.timescale)?;
        let value = self.value.checked_sub(rhs_value)?;
        Some(MediaTime {
            value,
            timescale: self.timescale,
        })
    }

    /// Rescale the value into `timescale` units, rounding to nearest.
    fn value_in(self, timescale: u32) -> Option<i64> {
        if self.timescale == timescale {
            return Some(self.value);
        }
        let num = i128::from(self.value) * i128::from(timescale);
        let den = i128::from(self.timescale);
        let half = den / 2;
        let rounded = if num >= 0 {
            (num + half) / den
        } else {
            (num - half) / den
        };
        i64::try_from(rounded).ok()
    }
}

/// Timing metadata attached to one frame.
///
/// Cropping copies this through verbatim; only the encoder sink rebases it
/// (see the sink's timestamp policy).
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FrameTiming {
    /// Presentation timestamp.
    pub pts: MediaTime,
    /// Display duration of the frame.
    pub duration: MediaTime,
    /// Decode timestamp, monotonic in capture delivery order.
    pub dts: MediaTime,
}

/// Frames-per-second represented as a rational `num/den`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fps {
    /// Numerator (frames).
    pub num: u32,
    /// Denominator (seconds), must be non-zero.
    pub den: u32,
}

impl Fps {
    /// Create a validated FPS value.
    pub fn new(num: u32, den: u32) -> Result<Self, TimeError> {
        if num == 0 || den == 0 {
            return Err(TimeError::ZeroRate);
        }
        Ok(Self { num, den })
    }

    /// Convert to floating-point FPS.
    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    /// Duration of one frame in seconds.
    pub fn frame_duration_secs(self) -> f64 {
        f64::from(self.den) / f64::from(self.num)
    }

    /// Duration of one frame in `timescale` units, rounded to nearest.
    pub fn frame_duration(self, timescale: u32) -> Result<MediaTime, TimeError> {
        if self.num == 0 || self.den == 0 {
            return Err(TimeError::ZeroRate);
        }
        if timescale == 0 {
            return Err(TimeError::ZeroTimescale);
        }
        let num = u64::from(timescale) * u64::from(self.den);
        let value = (num + u64::from(self.num) / 2) / u64::from(self.num);
        MediaTime::new(value as i64, timescale)
    }
}

/// Pixel layout of a frame buffer.
///
/// Both variants are 32-bit packed, the layout family capture subsystems
/// hand out and the cropper copies without conversion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PixelFormat {
    /// 8-bit blue, green, red, alpha.
    Bgra8,
    /// 8-bit red, green, blue, alpha.
    Rgba8,
}

impl PixelFormat {
    /// Bytes per pixel for this format.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mt(value: i64, timescale: u32) -> MediaTime {
        MediaTime::new(value, timescale).unwrap()
    }

    #[test]
    fn media_time_rejects_zero_timescale() {
        assert_eq!(MediaTime::new(1, 0), Err(TimeError::ZeroTimescale));
    }

    #[test]
    fn media_time_equality_is_bitwise() {
        assert_ne!(mt(1, 1), mt(2, 2));
        assert_eq!(mt(1, 1).compare(mt(2, 2)), Ordering::Equal);
    }

    #[test]
    fn media_time_compare_across_timescales() {
        assert_eq!(mt(2999, 90_000).compare(mt(1, 30)), Ordering::Less);
        assert_eq!(mt(3000, 90_000).compare(mt(1, 30)), Ordering::Equal);
        assert_eq!(mt(3001, 90_000).compare(mt(1, 30)), Ordering::Greater);
    }

    #[test]
    fn media_time_checked_sub_same_timescale() {
        let d = mt(9000, 90_000).checked_sub(mt(3000, 90_000)).unwrap();
        assert_eq!(d, mt(6000, 90_000));
    }

    #[test]
    fn media_time_checked_sub_rescales_rhs() {
        // 1/30 s expressed at 90 kHz is 3000 units.
        let d = mt(9000, 90_000).checked_sub(mt(1, 30)).unwrap();
        assert_eq!(d, mt(6000, 90_000));
    }

    #[test]
    fn media_time_checked_sub_overflow_is_none() {
        assert!(mt(i64::MIN, 1).checked_sub(mt(1, 1)).is_none());
    }

    #[test]
    fn fps_rejects_zero() {
        assert_eq!(Fps::new(0, 1), Err(TimeError::ZeroRate));
        assert_eq!(Fps::new(30, 0), Err(TimeError::ZeroRate));
    }

    #[test]
    fn fps_frame_duration_is_rounded() {
        let fps = Fps::new(30, 1).unwrap();
        assert_eq!(fps.frame_duration(90_000).unwrap(), mt(3000, 90_000));

        // 29.97 fps (30000/1001) at 90 kHz rounds to 3003 units.
        let ntsc = Fps::new(30_000, 1001).unwrap();
        assert_eq!(ntsc.frame_duration(90_000).unwrap(), mt(3003, 90_000));
    }

    #[test]
    fn pixel_formats_are_32_bit_packed() {
        assert_eq!(PixelFormat::Bgra8.bytes_per_pixel(), 4);
        assert_eq!(PixelFormat::Rgba8.bytes_per_pixel(), 4);
    }
}
