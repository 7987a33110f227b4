use serde::Serialize;

use crate::geometry::Geometry;
use crate::tiling::TileSpec;

/// Output object flavour requested from the object store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ObjectKind {
    #[default]
    Detection,
    Annotation,
}

/// A detected object instance produced from one tile, before pruning and
/// merging.
///
/// `label` is the instance id within the originating tile's output; the
/// geometry lives in the run's downsampled pixel grid. The tile back-reference
/// drives boundary pruning and the deterministic merge ordering.
#[derive(Debug, Clone)]
pub struct ObjectCandidate {
    pub label: u32,
    pub class_value: f32,
    pub geometry: Geometry,
    pub tile: TileSpec,
}

impl ObjectCandidate {
    /// Stable scan-order key used for every deterministic tie-break.
    pub fn scan_key(&self) -> (u32, u32, u32) {
        (self.tile.row, self.tile.col, self.label)
    }
}

/// One member of the final object set.
#[derive(Debug, Clone, Serialize)]
pub struct MergedObject {
    pub label: u32,
    pub class_value: f32,
    pub geometry: Geometry,
    /// How many candidates collapsed into this object (1 = standalone).
    pub merged_from: u32,
}

/// The final, deduplicated collection of objects covering the whole region.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergedObjectSet {
    pub objects: Vec<MergedObject>,
}

impl MergedObjectSet {
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MergedObject> {
        self.objects.iter()
    }
}
