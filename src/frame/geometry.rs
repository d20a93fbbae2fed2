use crate::foundation::core::Rect;

/// Errors from crop-bounds computation.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryError {
    /// The clamped crop rectangle covers no pixels of the source frame.
    ///
    /// Callers must treat this as "abort the crop", never as "capture the
    /// full frame".
    #[error("crop rectangle does not intersect the source frame")]
    EmptyIntersection,
    /// The crop rectangle carries non-finite coordinates.
    #[error("crop rectangle coordinates must be finite")]
    InvalidRect,
}

/// Integer, clamped, source-relative pixel rectangle used for the memory
/// copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct PixelBounds {
    /// Left edge in pixels.
    pub x: u32,
    /// Top edge in pixels.
    pub y: u32,
    /// Width in pixels, >= 1.
    pub width: u32,
    /// Height in pixels, >= 1.
    pub height: u32,
}

impl PixelBounds {
    /// Return `true` when these bounds select pixels that all exist in a
    /// `source_width` x `source_height` frame.
    pub fn fits_within(self, source_width: u32, source_height: u32) -> bool {
        let x1 = u64::from(self.x) + u64::from(self.width);
        let y1 = u64::from(self.y) + u64::from(self.height);
        x1 <= u64::from(source_width) && y1 <= u64::from(source_height)
    }
}

/// Compute the integer pixel bounds for cropping `crop` out of a
/// `source_width` x `source_height` frame.
///
/// The rectangle is intersected with the source extent, then rounded
/// outward (floor the origin, ceil the far edge) and clamped back, so the
/// result always stays inside the source while never losing a partially
/// covered pixel. Negative-size rectangles are normalized first.
pub fn compute_crop_bounds(
    crop: Rect,
    source_width: u32,
    source_height: u32,
) -> Result<PixelBounds, GeometryError> {
    if !crop.is_finite() {
        return Err(GeometryError::InvalidRect);
    }

    let source = Rect::new(0.0, 0.0, f64::from(source_width), f64::from(source_height));
    let clipped = crop.abs().intersect(source);
    if clipped.width() <= 0.0 || clipped.height() <= 0.0 {
        return Err(GeometryError::EmptyIntersection);
    }

    let x0 = clipped.x0.floor();
    let y0 = clipped.y0.floor();
    let x1 = clipped.x1.ceil().min(f64::from(source_width));
    let y1 = clipped.y1.ceil().min(f64::from(source_height));

    Ok(PixelBounds {
        x: x0 as u32,
        y: y0 as u32,
        width: (x1 - x0) as u32,
        height: (y1 - y0) as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x: f64, y: f64, w: f64, h: f64) -> Rect {
        Rect::from_origin_size((x, y), (w, h))
    }

    #[test]
    fn fully_inside_rect_is_unchanged() {
        let b = compute_crop_bounds(rect(100.0, 100.0, 400.0, 300.0), 1920, 1080).unwrap();
        assert_eq!(
            b,
            PixelBounds {
                x: 100,
                y: 100,
                width: 400,
                height: 300
            }
        );
    }

    #[test]
    fn overhanging_rect_is_clamped() {
        let b = compute_crop_bounds(rect(1800.0, 1000.0, 400.0, 300.0), 1920, 1080).unwrap();
        assert_eq!(
            b,
            PixelBounds {
                x: 1800,
                y: 1000,
                width: 120,
                height: 80
            }
        );
    }

    #[test]
    fn disjoint_rect_is_empty_intersection() {
        assert_eq!(
            compute_crop_bounds(rect(2000.0, 2000.0, 100.0, 100.0), 1920, 1080),
            Err(GeometryError::EmptyIntersection)
        );
    }

    #[test]
    fn fractional_edges_round_outward() {
        let b = compute_crop_bounds(rect(10.3, 20.7, 5.0, 5.0), 100, 100).unwrap();
        assert_eq!(
            b,
            PixelBounds {
                x: 10,
                y: 20,
                width: 6,
                height: 6
            }
        );
    }

    #[test]
    fn negative_origin_clamps_to_zero() {
        let b = compute_crop_bounds(rect(-50.5, -20.0, 100.0, 100.0), 1920, 1080).unwrap();
        assert_eq!(
            b,
            PixelBounds {
                x: 0,
                y: 0,
                width: 50,
                height: 80
            }
        );
    }

    #[test]
    fn negative_size_is_normalized() {
        // Same pixels as rect(10, 10, 20, 20) selected from the other corner.
        let b = compute_crop_bounds(rect(30.0, 30.0, -20.0, -20.0), 100, 100).unwrap();
        assert_eq!(
            b,
            PixelBounds {
                x: 10,
                y: 10,
                width: 20,
                height: 20
            }
        );
    }

    #[test]
    fn zero_area_rect_is_empty_intersection() {
        assert_eq!(
            compute_crop_bounds(rect(10.0, 10.0, 0.0, 5.0), 100, 100),
            Err(GeometryError::EmptyIntersection)
        );
    }

    #[test]
    fn zero_sized_source_is_empty_intersection() {
        assert_eq!(
            compute_crop_bounds(rect(0.0, 0.0, 10.0, 10.0), 0, 100),
            Err(GeometryError::EmptyIntersection)
        );
    }

    #[test]
    fn non_finite_rect_is_invalid() {
        assert_eq!(
            compute_crop_bounds(rect(f64::NAN, 0.0, 10.0, 10.0), 100, 100),
            Err(GeometryError::InvalidRect)
        );
        assert_eq!(
            compute_crop_bounds(rect(0.0, 0.0, f64::INFINITY, 10.0), 100, 100),
            Err(GeometryError::InvalidRect)
        );
    }

    #[test]
    fn clamped_bounds_always_fit_the_source() {
        let cases = [
            rect(0.0, 0.0, 5000.0, 5000.0),
            rect(1919.2, 1079.2, 10.0, 10.0),
            rect(-3.7, -8.1, 4.0, 9.0),
            rect(0.4, 0.4, 0.2, 0.2),
        ];
        for crop in cases {
            let b = compute_crop_bounds(crop, 1920, 1080).unwrap();
            assert!(b.width >= 1 && b.height >= 1, "{crop:?} -> {b:?}");
            assert!(b.fits_within(1920, 1080), "{crop:?} -> {b:?}");
        }
    }
}
