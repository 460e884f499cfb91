//! Axis-aligned integer boxes in image pixel coordinates.

use std::fmt;

/// A normalized box: `x1 <= x2` and `y1 <= y2`, integer pixel units.
///
/// Boxes are built from the two raw annotation points by truncating both
/// corners towards zero and swapping coordinates where needed, so the order
/// the annotator dragged the rectangle in does not matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BBox {
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
}

impl BBox {
    /// Create a box from any two corners.
    pub fn from_corners(a: (i64, i64), b: (i64, i64)) -> Self {
        Self {
            x1: a.0.min(b.0),
            y1: a.1.min(b.1),
            x2: a.0.max(b.0),
            y2: a.1.max(b.1),
        }
    }

    /// Create a box from two floating point corners, truncating towards zero.
    pub fn from_points(a: [f64; 2], b: [f64; 2]) -> Self {
        Self::from_corners(
            (a[0].trunc() as i64, a[1].trunc() as i64),
            (b[0].trunc() as i64, b[1].trunc() as i64),
        )
    }

    pub fn width(&self) -> i64 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> i64 {
        self.y2.saturating_sub(self.y1)
    }

    /// Saturates at `i64::MAX` for boxes larger than any image.
    pub fn area(&self) -> i64 {
        self.width().saturating_mul(self.height())
    }

    /// True when the box has zero width or zero height.
    pub fn is_degenerate(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Area shared with `other`, zero when the boxes do not touch.
    pub fn intersection_area(&self, other: &BBox) -> i64 {
        let w = self.x2.min(other.x2).saturating_sub(self.x1.max(other.x1)).max(0);
        let h = self.y2.min(other.y2).saturating_sub(self.y1.max(other.y1)).max(0);
        w.saturating_mul(h)
    }

    /// Clip the box to an image of the given size.
    ///
    /// The result may be degenerate if the box lies (partly) outside the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> BBox {
        let (w, h) = (i64::from(width), i64::from(height));
        BBox {
            x1: self.x1.clamp(0, w),
            y1: self.y1.clamp(0, h),
            x2: self.x2.clamp(0, w),
            y2: self.y2.clamp(0, h),
        }
    }

    /// As `[x1, y1, x2, y2]` in floating point, the row layout used by the
    /// overlap matrices.
    pub fn to_bounds(&self) -> [f64; 4] {
        [self.x1 as f64, self.y1 as f64, self.x2 as f64, self.y2 as f64]
    }

    /// Center and size normalized by the image dimensions: `(xc, yc, w, h)`.
    pub fn to_normalized_xywh(&self, image_width: f64, image_height: f64) -> (f64, f64, f64, f64) {
        let xc = (self.x1 as f64 + self.x2 as f64) / 2.0 / image_width;
        let yc = (self.y1 as f64 + self.y2 as f64) / 2.0 / image_height;
        let w = self.width() as f64 / image_width;
        let h = self.height() as f64 / image_height;
        (xc.abs(), yc.abs(), w.abs(), h.abs())
    }
}

impl fmt::Display for BBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BBox({}, {}, {}, {})", self.x1, self.y1, self.x2, self.y2)
    }
}
