use log::debug;

use crate::objects::ObjectCandidate;
use crate::tiling::Region;

/// Discard candidates that touch the outer `boundary_width`-wide margin of
/// their originating tile's read bounds.
///
/// Detections near the edge of what an inference call actually saw are
/// systematically truncated by the read window and must be recovered from a
/// neighbouring tile, whose read extends `padding` pixels past the seam.
/// Candidates deeper inside — including duplicates in the overlap zone
/// between adjacent reads — pass through unchanged and are reconciled by the
/// merger. The one exception is a read side flush with the region edge: no
/// neighbouring tile exists there, so detections touching only such sides are
/// kept.
///
/// Purely per-candidate, so it commutes with tile processing order.
pub fn prune(
    candidates: Vec<ObjectCandidate>,
    boundary_width: u32,
    region: &Region,
) -> Vec<ObjectCandidate> {
    let region_ds = region.bounds_ds();
    let b = i64::from(boundary_width);

    candidates
        .into_iter()
        .filter(|c| {
            let padded = c.tile.padded_ds(region.downsample);

            let x0 = if padded.x <= region_ds.x {
                padded.x
            } else {
                padded.x + b
            };
            let y0 = if padded.y <= region_ds.y {
                padded.y
            } else {
                padded.y + b
            };
            let x1 = if padded.right() >= region_ds.right() {
                padded.right()
            } else {
                padded.right() - b
            };
            let y1 = if padded.bottom() >= region_ds.bottom() {
                padded.bottom()
            } else {
                padded.bottom() - b
            };

            let bbox = &c.geometry.bbox;
            let keep = bbox.x >= x0 && bbox.y >= y0 && bbox.right() <= x1 && bbox.bottom() <= y1;
            if !keep {
                debug!(
                    "pruning boundary candidate {} of tile ({}, {})",
                    c.label, c.tile.row, c.tile.col
                );
            }
            keep
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Geometry, Rect};
    use crate::tiling::TileSpec;

    fn region() -> Region {
        Region::new(0, 0, 448, 224, 1.0).unwrap()
    }

    /// Middle tile of a 2x1-ish grid: reads 80..368 in x, flush with the
    /// region in y.
    fn middle_tile() -> TileSpec {
        TileSpec {
            row: 0,
            col: 1,
            inner: Rect::new(112, 0, 224, 224),
            padded: Rect::new(80, -32, 288, 288),
        }
    }

    fn candidate(tile: TileSpec, bbox: Rect) -> ObjectCandidate {
        ObjectCandidate {
            label: 1,
            class_value: 0.0,
            geometry: Geometry::filled(bbox),
            tile,
        }
    }

    #[test]
    fn interior_candidates_pass_through_unchanged() {
        let c = candidate(middle_tile(), Rect::new(200, 100, 20, 20));
        let kept = prune(vec![c.clone()], 16, &region());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].geometry.bbox, c.geometry.bbox);
        assert_eq!(kept[0].geometry.mask, c.geometry.mask);
    }

    #[test]
    fn read_edge_margins_are_discarded() {
        // The read spans x 80..368; margins of 16px on the interior sides.
        let at_left = candidate(middle_tile(), Rect::new(90, 100, 10, 10));
        assert!(prune(vec![at_left], 16, &region()).is_empty());

        let at_right = candidate(middle_tile(), Rect::new(340, 100, 20, 20));
        assert!(prune(vec![at_right], 16, &region()).is_empty());
    }

    #[test]
    fn overlap_zone_duplicates_survive_both_tiles() {
        // A left neighbour reading -32..144 and the middle tile reading
        // 80..368 both keep a candidate at 100..120, which the merger then
        // collapses.
        let left_tile = TileSpec {
            row: 0,
            col: 0,
            inner: Rect::new(-112, 0, 224, 224),
            padded: Rect::new(-144, -32, 288, 288),
        };
        let shared = Rect::new(100, 60, 20, 20);
        assert_eq!(prune(vec![candidate(left_tile, shared)], 16, &region()).len(), 1);
        assert_eq!(
            prune(vec![candidate(middle_tile(), shared)], 16, &region()).len(),
            1
        );
    }

    #[test]
    fn region_edge_sides_keep_their_detections() {
        // The read's top side extends past the region: a candidate touching
        // y = 0 has no neighbouring tile to be re-detected from.
        let at_edge = candidate(middle_tile(), Rect::new(200, -4, 20, 12));
        assert_eq!(prune(vec![at_edge], 16, &region()).len(), 1);

        // Same y-extent near an interior read edge is still discarded.
        let at_seam = candidate(middle_tile(), Rect::new(82, -4, 20, 12));
        assert!(prune(vec![at_seam], 16, &region()).is_empty());
    }

    #[test]
    fn zero_boundary_keeps_everything_inside_the_read() {
        let flush = candidate(middle_tile(), Rect::new(80, 0, 10, 10));
        assert_eq!(prune(vec![flush.clone()], 0, &region()).len(), 1);
        assert!(prune(vec![flush], 16, &region()).is_empty());
    }
}
