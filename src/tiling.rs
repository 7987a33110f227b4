use serde::Serialize;

use crate::errors::{Result, TileSegError};
use crate::geometry::Rect;

/// A rectangular area of a larger image, in full-resolution source pixels,
/// together with the downsample factor the run operates at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Region {
    pub bounds: Rect,
    pub downsample: f64,
}

impl Region {
    pub fn new(x: i64, y: i64, width: u32, height: u32, downsample: f64) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(TileSegError::Validation {
                field: "region".to_string(),
                reason: "must have nonzero width and height".to_string(),
            });
        }
        if !downsample.is_finite() || downsample <= 0.0 {
            return Err(TileSegError::Validation {
                field: "downsample".to_string(),
                reason: "must be a positive finite factor".to_string(),
            });
        }
        Ok(Self {
            bounds: Rect::new(x, y, width, height),
            downsample,
        })
    }

    /// The region bounds projected into the downsampled pixel grid.
    pub fn bounds_ds(&self) -> Rect {
        self.bounds.scaled_down(self.downsample)
    }
}

/// One tile of the grid: the inner content area and the padded read bounds,
/// both in full-resolution source pixels.
///
/// Inner areas of a grid tile the region exactly once; padded areas overlap
/// neighbouring tiles by up to the padding amount.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TileSpec {
    pub row: u32,
    pub col: u32,
    pub inner: Rect,
    pub padded: Rect,
}

impl TileSpec {
    pub fn inner_ds(&self, downsample: f64) -> Rect {
        self.inner.scaled_down(downsample)
    }

    pub fn padded_ds(&self, downsample: f64) -> Rect {
        self.padded.scaled_down(downsample)
    }
}

/// Compute an overlapping tiling of `region`.
///
/// `tile_dims` and `padding` are expressed in model-input pixels; the
/// effective inner tile size in source pixels is
/// `ceil(downsample * (tile_dims - padding))`, so that after padded inference
/// and cropping the content exactly matches the downsample-adjusted tiling.
///
/// With `align_center` the grid is centered on the region instead of anchored
/// top-left, splitting the remainder between the far edges. With
/// `crop_at_edges == false` boundary tiles may extend past the region edge
/// and the consumer is responsible for clamping reads.
///
/// The returned sequence is lazy and finite; call again to regenerate.
pub fn compute_tiles(
    region: &Region,
    tile_dims: u32,
    padding: u32,
    align_center: bool,
    crop_at_edges: bool,
) -> Result<TileGrid> {
    if tile_dims == 0 {
        return Err(TileSegError::Validation {
            field: "tile_dims".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    if padding >= tile_dims {
        return Err(TileSegError::Validation {
            field: "padding".to_string(),
            reason: "must be smaller than tile_dims".to_string(),
        });
    }

    let ds = region.downsample;
    let inner_size = ((ds * f64::from(tile_dims - padding)).ceil() as i64).max(1);
    let pad = (ds * f64::from(padding)).ceil() as i64;

    let bounds = region.bounds;
    let cols = div_ceil(i64::from(bounds.width), inner_size).max(1) as u32;
    let rows = div_ceil(i64::from(bounds.height), inner_size).max(1) as u32;

    // Centering splits the (negative) remainder between the two far edges;
    // a region smaller than one tile always yields a tile equal to the region.
    let start_x = if cols == 1 {
        bounds.x
    } else if align_center {
        bounds.x + (i64::from(bounds.width) - i64::from(cols) * inner_size) / 2
    } else {
        bounds.x
    };
    let start_y = if rows == 1 {
        bounds.y
    } else if align_center {
        bounds.y + (i64::from(bounds.height) - i64::from(rows) * inner_size) / 2
    } else {
        bounds.y
    };

    Ok(TileGrid {
        bounds,
        inner_size,
        pad,
        rows,
        cols,
        start_x,
        start_y,
        crop_at_edges,
        next: 0,
    })
}

const fn div_ceil(a: i64, b: i64) -> i64 {
    (a + b - 1) / b
}

/// Lazy, finite sequence of [`TileSpec`]s produced by [`compute_tiles`].
#[derive(Debug, Clone)]
pub struct TileGrid {
    bounds: Rect,
    inner_size: i64,
    pad: i64,
    rows: u32,
    cols: u32,
    start_x: i64,
    start_y: i64,
    crop_at_edges: bool,
    next: u32,
}

impl TileGrid {
    pub const fn tile_count(&self) -> u32 {
        self.rows * self.cols
    }

    fn tile_at(&self, row: u32, col: u32) -> TileSpec {
        // A single-tile axis covers the region span exactly.
        let (x, width) = if self.cols == 1 {
            (self.bounds.x, i64::from(self.bounds.width))
        } else {
            (
                self.start_x + i64::from(col) * self.inner_size,
                self.inner_size,
            )
        };
        let (y, height) = if self.rows == 1 {
            (self.bounds.y, i64::from(self.bounds.height))
        } else {
            (
                self.start_y + i64::from(row) * self.inner_size,
                self.inner_size,
            )
        };

        let mut inner = Rect::new(x, y, width as u32, height as u32);
        if self.crop_at_edges {
            inner = inner.clamp_to(&self.bounds);
        }
        let mut padded = inner.expand(self.pad);
        if self.crop_at_edges {
            padded = padded.clamp_to(&self.bounds);
        }
        TileSpec {
            row,
            col,
            inner,
            padded,
        }
    }
}

impl Iterator for TileGrid {
    type Item = TileSpec;

    fn next(&mut self) -> Option<TileSpec> {
        if self.next >= self.tile_count() {
            return None;
        }
        let row = self.next / self.cols;
        let col = self.next % self.cols;
        self.next += 1;
        Some(self.tile_at(row, col))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.tile_count() - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for TileGrid {}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(w: u32, h: u32, ds: f64) -> Region {
        Region::new(0, 0, w, h, ds).unwrap()
    }

    /// Every region pixel must fall inside exactly one tile's inner area.
    fn assert_exact_coverage(region: &Region, tiles: &[TileSpec]) {
        let b = region.bounds;
        for y in b.y..b.bottom() {
            for x in b.x..b.right() {
                let covering = tiles
                    .iter()
                    .filter(|t| t.inner.contains_point(x, y))
                    .count();
                assert_eq!(covering, 1, "pixel ({x}, {y}) covered {covering} times");
            }
        }
    }

    #[test]
    fn inner_areas_tile_region_exactly_once() {
        for &(w, h) in &[(512u32, 256u32), (500, 300), (100, 100), (33, 97)] {
            for &align in &[false, true] {
                for &crop in &[false, true] {
                    let r = region(w, h, 1.0);
                    let tiles: Vec<_> = compute_tiles(&r, 128, 16, align, crop)
                        .unwrap()
                        .collect();
                    assert_exact_coverage(&r, &tiles);
                }
            }
        }
    }

    #[test]
    fn centered_grid_example() {
        // tile 256, padding 32 at downsample 1 gives 224px inner tiles;
        // a 512x256 region needs a 3x2 centered grid.
        let r = region(512, 256, 1.0);
        let grid = compute_tiles(&r, 256, 32, true, true).unwrap();
        assert_eq!(grid.tile_count(), 6);

        let tiles: Vec<_> = grid.collect();
        let first = &tiles[0];
        // 3 * 224 = 672 overshoots 512 by 160, so the centered grid starts
        // 80px before the region and edge tiles are clipped.
        assert_eq!(first.inner, Rect::new(0, 0, 144, 128));
        let middle = &tiles[1];
        assert_eq!(middle.inner.width, 224);
        // Padded bounds extend up to 32px beyond the inner area but stay
        // clipped to the region.
        assert_eq!(middle.padded.x, middle.inner.x - 32);
        assert_eq!(middle.padded.y, 0);
        assert_exact_coverage(&r, &tiles);
    }

    #[test]
    fn uncropped_tiles_may_overhang() {
        let r = region(500, 300, 1.0);
        let tiles: Vec<_> = compute_tiles(&r, 256, 32, true, false).unwrap().collect();
        assert!(tiles.iter().any(|t| t.inner.x < 0 || t.inner.right() > 500));
        // Inner areas intersected with the region still cover it exactly.
        assert_exact_coverage(&r, &tiles);
    }

    #[test]
    fn region_smaller_than_tile_yields_one_region_sized_tile() {
        let r = region(100, 80, 1.0);
        let tiles: Vec<_> = compute_tiles(&r, 256, 32, true, false).unwrap().collect();
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].inner, r.bounds);
        // Padding is still applied around the single tile.
        assert_eq!(tiles[0].padded, Rect::new(-32, -32, 164, 144));
    }

    #[test]
    fn downsample_scales_inner_size() {
        let r = region(2000, 2000, 2.0);
        let tiles: Vec<_> = compute_tiles(&r, 256, 32, false, false).unwrap().collect();
        // ceil(2.0 * (256 - 32)) = 448 source pixels per inner tile.
        assert_eq!(tiles[0].inner.width, 448);
        assert_eq!(tiles[0].padded.x, tiles[0].inner.x - 64);
    }

    #[test]
    fn grid_is_regenerated_by_calling_again() {
        let r = region(512, 512, 1.0);
        let a: Vec<_> = compute_tiles(&r, 128, 16, true, true).unwrap().collect();
        let b: Vec<_> = compute_tiles(&r, 128, 16, true, true).unwrap().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let r = region(100, 100, 1.0);
        assert!(compute_tiles(&r, 0, 0, true, true).is_err());
        assert!(compute_tiles(&r, 64, 64, true, true).is_err());
        assert!(Region::new(0, 0, 0, 10, 1.0).is_err());
        assert!(Region::new(0, 0, 10, 10, 0.0).is_err());
    }
}
