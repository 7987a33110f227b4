use serde::Serialize;

/// Axis-aligned integer rectangle.
///
/// Origins are signed: tiles of a centered, uncropped grid may start before
/// the region origin, and region origins themselves may be negative in
/// whole-image coordinate systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i64, y: i64, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn right(&self) -> i64 {
        self.x + self.width as i64
    }

    pub const fn bottom(&self) -> i64 {
        self.y + self.height as i64
    }

    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn contains_point(&self, x: i64, y: i64) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// True when `other` lies entirely inside `self`. Empty rectangles are
    /// contained everywhere.
    pub fn contains(&self, other: &Rect) -> bool {
        other.is_empty()
            || (other.x >= self.x
                && other.y >= self.y
                && other.right() <= self.right()
                && other.bottom() <= self.bottom())
    }

    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= x || bottom <= y {
            return None;
        }
        Some(Rect::new(x, y, (right - x) as u32, (bottom - y) as u32))
    }

    /// Grow (positive margin) or shrink (negative margin) by `margin` pixels
    /// on every side. Shrinking past zero collapses to an empty rectangle
    /// anchored at the center edge.
    pub fn expand(&self, margin: i64) -> Rect {
        let x = self.x - margin;
        let y = self.y - margin;
        let width = (self.width as i64 + 2 * margin).max(0) as u32;
        let height = (self.height as i64 + 2 * margin).max(0) as u32;
        Rect::new(x, y, width, height)
    }

    /// Clip to `bounds`, producing an empty rectangle at the nearest corner
    /// when there is no overlap.
    pub fn clamp_to(&self, bounds: &Rect) -> Rect {
        self.intersect(bounds).unwrap_or_else(|| {
            Rect::new(
                self.x.clamp(bounds.x, bounds.right()),
                self.y.clamp(bounds.y, bounds.bottom()),
                0,
                0,
            )
        })
    }

    /// Project into the downsampled pixel grid. Edges are rounded
    /// independently so that adjacent rectangles stay adjacent after scaling.
    pub fn scaled_down(&self, downsample: f64) -> Rect {
        let x0 = (self.x as f64 / downsample).round() as i64;
        let y0 = (self.y as f64 / downsample).round() as i64;
        let x1 = (self.right() as f64 / downsample).round() as i64;
        let y1 = (self.bottom() as f64 / downsample).round() as i64;
        Rect::new(x0, y0, (x1 - x0).max(0) as u32, (y1 - y0).max(0) as u32)
    }
}

/// Overlap ratio used to decide whether two candidate geometries represent
/// the same physical object.
///
/// `IoMin` (intersection over the smaller area) is the default: it is more
/// tolerant of partial-object truncation near tile seams than strict `IoU`,
/// where a cropped fragment of a large object scores low against the whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum OverlapMetric {
    IoU,
    #[default]
    IoMin,
}

/// Pixel-mask footprint of a detected object.
///
/// `bbox` is tight around the mask and shares the coordinate system of the
/// run (the downsampled pixel grid); `mask` is row-major with one byte per
/// bbox pixel, nonzero meaning covered.
#[derive(Debug, Clone, Serialize)]
pub struct Geometry {
    pub bbox: Rect,
    #[serde(skip)]
    pub mask: Vec<u8>,
}

impl Geometry {
    pub fn new(bbox: Rect, mask: Vec<u8>) -> Self {
        debug_assert_eq!(mask.len() as u64, bbox.area());
        Self { bbox, mask }
    }

    /// A geometry covering `bbox` completely.
    pub fn filled(bbox: Rect) -> Self {
        Self {
            mask: vec![1; bbox.area() as usize],
            bbox,
        }
    }

    /// Number of covered pixels.
    pub fn area(&self) -> u64 {
        self.mask.iter().filter(|&&v| v != 0).count() as u64
    }

    /// Degenerate geometries carry no pixels and are dropped at merge time.
    pub fn is_degenerate(&self) -> bool {
        self.bbox.is_empty() || self.mask.iter().all(|&v| v == 0)
    }

    fn covered(&self, x: i64, y: i64) -> bool {
        let ix = (y - self.bbox.y) as usize * self.bbox.width as usize + (x - self.bbox.x) as usize;
        self.mask[ix] != 0
    }

    /// Count of pixels covered by both geometries.
    pub fn intersection_area(&self, other: &Geometry) -> u64 {
        let Some(overlap) = self.bbox.intersect(&other.bbox) else {
            return 0;
        };
        let mut count = 0u64;
        for y in overlap.y..overlap.bottom() {
            for x in overlap.x..overlap.right() {
                if self.covered(x, y) && other.covered(x, y) {
                    count += 1;
                }
            }
        }
        count
    }

    /// Overlap score in `[0, 1]` under the given metric. Zero when either
    /// geometry is degenerate.
    pub fn overlap(&self, other: &Geometry, metric: OverlapMetric) -> f64 {
        let inter = self.intersection_area(other) as f64;
        if inter == 0.0 {
            return 0.0;
        }
        let a = self.area() as f64;
        let b = other.area() as f64;
        let denom = match metric {
            OverlapMetric::IoU => a + b - inter,
            OverlapMetric::IoMin => a.min(b),
        };
        if denom <= 0.0 {
            0.0
        } else {
            inter / denom
        }
    }
}
