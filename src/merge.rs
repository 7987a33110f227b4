use std::collections::HashMap;

use log::debug;

use crate::geometry::OverlapMetric;
use crate::objects::{MergedObject, MergedObjectSet, ObjectCandidate};

/// Resolves overlapping candidates produced by adjacent tiles into a single
/// deduplicated object set.
///
/// Candidates from different tiles whose overlap score exceeds the threshold
/// are judged to be the same physical object and collapse transitively into
/// one. The resolution rule is deterministic and order-independent: within a
/// group, the candidate with the largest mask area wins; ties break by stable
/// tile scan order (row, col, label). Candidates without a qualifying overlap
/// become standalone members unchanged.
pub struct ObjectMerger {
    metric: OverlapMetric,
    threshold: f64,
}

impl Default for ObjectMerger {
    fn default() -> Self {
        Self {
            metric: OverlapMetric::IoMin,
            threshold: 0.5,
        }
    }
}

impl ObjectMerger {
    pub const fn new(metric: OverlapMetric, threshold: f64) -> Self {
        Self { metric, threshold }
    }

    pub fn merge(&self, candidates: Vec<ObjectCandidate>) -> MergedObjectSet {
        // Malformed geometries are dropped rather than propagated, so one bad
        // tile cannot corrupt the whole merged set.
        let mut cands: Vec<ObjectCandidate> = candidates
            .into_iter()
            .filter(|c| {
                if c.geometry.is_degenerate() {
                    debug!(
                        "dropping degenerate geometry {} from tile ({}, {})",
                        c.label, c.tile.row, c.tile.col
                    );
                    false
                } else {
                    true
                }
            })
            .collect();
        if cands.is_empty() {
            return MergedObjectSet::default();
        }

        // Scan order is the canonical ordering; everything downstream is
        // independent of the caller's candidate order from here on.
        cands.sort_by_key(ObjectCandidate::scan_key);

        let mut groups = DisjointSet::new(cands.len());

        // Sweep over bbox x-extents so only spatially close pairs pay for a
        // mask intersection.
        let mut by_x: Vec<usize> = (0..cands.len()).collect();
        by_x.sort_by_key(|&i| cands[i].geometry.bbox.x);
        for (pos, &i) in by_x.iter().enumerate() {
            let bi = cands[i].geometry.bbox;
            for &j in &by_x[pos + 1..] {
                let bj = cands[j].geometry.bbox;
                if bj.x >= bi.right() {
                    break;
                }
                // Same-tile candidates are distinct objects by construction.
                if cands[i].tile.row == cands[j].tile.row
                    && cands[i].tile.col == cands[j].tile.col
                {
                    continue;
                }
                if bj.y >= bi.bottom() || bj.bottom() <= bi.y {
                    continue;
                }
                let score = cands[i].geometry.overlap(&cands[j].geometry, self.metric);
                if score > self.threshold {
                    groups.union(i, j);
                }
            }
        }

        let mut members: HashMap<usize, Vec<usize>> = HashMap::new();
        for i in 0..cands.len() {
            members.entry(groups.find(i)).or_default().push(i);
        }

        // Largest area wins; equal areas fall back to the earliest candidate
        // in scan order (the lowest index after the sort above).
        let mut winners: Vec<(usize, u32)> = members
            .values()
            .filter_map(|group| {
                group
                    .iter()
                    .copied()
                    .max_by_key(|&i| (cands[i].geometry.area(), std::cmp::Reverse(i)))
                    .map(|winner| (winner, group.len() as u32))
            })
            .collect();
        winners.sort_by_key(|&(winner, _)| winner);

        let objects = winners
            .into_iter()
            .enumerate()
            .map(|(n, (winner, merged_from))| {
                let c = &cands[winner];
                MergedObject {
                    label: n as u32 + 1,
                    class_value: c.class_value,
                    geometry: c.geometry.clone(),
                    merged_from,
                }
            })
            .collect();
        MergedObjectSet { objects }
    }
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            // Root at the lower index; harmless either way, the member sets
            // decide the winner.
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}
