use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use log::{debug, warn};
use ndarray::prelude::*;

use crate::config::RunParams;
use crate::errors::{Result, TileSegError};
use crate::geometry::{Geometry, Rect};
use crate::model::{ChannelSpec, ModelContract};
use crate::objects::ObjectCandidate;
use crate::pool::PredictorPool;
use crate::tiling::{Region, TileSpec};
use crate::traits::PixelSource;

/// Per-tile inference: read pixels, run a pooled predictor, decode the label
/// map into object candidates.
///
/// Failure policy: any error on this path is tile-local. It is logged,
/// counted once on the run's failure counter and converted into an empty
/// candidate list, so one bad tile never aborts the others.
pub(crate) struct TileWorker<'a> {
    pub source: &'a dyn PixelSource,
    pub pool: &'a PredictorPool,
    pub contract: &'a ModelContract,
    pub params: &'a RunParams,
    pub region: &'a Region,
    pub failed_tiles: &'a AtomicU32,
}

impl TileWorker<'_> {
    pub fn process(&self, tile: &TileSpec, channels: &ChannelSpec) -> Vec<ObjectCandidate> {
        match self.try_process(tile, channels) {
            Ok(candidates) => {
                debug!(
                    "tile ({}, {}) produced {} candidates",
                    tile.row,
                    tile.col,
                    candidates.len()
                );
                candidates
            }
            Err(e) => {
                warn!(
                    "tile ({}, {}) failed and contributes no objects: {e}",
                    tile.row, tile.col
                );
                self.failed_tiles.fetch_add(1, Ordering::Relaxed);
                Vec::new()
            }
        }
    }

    fn try_process(&self, tile: &TileSpec, channels: &ChannelSpec) -> Result<Vec<ObjectCandidate>> {
        let ds = self.region.downsample;
        let mut input = self.source.read_region(&tile.padded, ds, channels)?;
        if self.params.pad_to_input {
            // Clipped edge tiles read short of the expected input size.
            input = pad_to_min_dims(input, self.params.tile_dims + self.params.padding);
        }

        let output = {
            let mut predictor = self.pool.acquire()?;
            predictor.infer(input.view())?
            // The guard drops here: the handle is back in the pool before
            // decoding, and on the error path above.
        };

        decode_label_map(&output, tile, ds, self.contract.output_channels)
    }
}

/// Zero-pad the bottom/right of a CHW tensor up to `min_dims` per spatial
/// axis. Decoding stays anchored at the read origin, so padded pixels land in
/// the discarded outer area.
fn pad_to_min_dims(input: Array3<f32>, min_dims: u32) -> Array3<f32> {
    let (c, h, w) = input.dim();
    let min = min_dims as usize;
    if h >= min && w >= min {
        return input;
    }
    let mut padded = Array3::<f32>::zeros((c, h.max(min), w.max(min)));
    padded.slice_mut(s![.., ..h, ..w]).assign(&input);
    padded
}

/// Decode an inference output into labeled candidates.
///
/// Channel 0 is the instance label map (0 = background); channel 1, when the
/// model declares a second output channel, is averaged per instance into the
/// candidate's class value. Geometries are translated into the run's
/// downsampled grid via the tile's padded origin.
fn decode_label_map(
    output: &Array3<f32>,
    tile: &TileSpec,
    downsample: f64,
    output_channels: u32,
) -> Result<Vec<ObjectCandidate>> {
    let (c, height, width) = output.dim();
    if c == 0 {
        return Err(TileSegError::Model {
            operation: "output decoding".to_string(),
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "output tensor has no channels",
            )),
        });
    }
    let labels = output.index_axis(Axis(0), 0);
    let class_map = (output_channels > 1 && c > 1).then(|| output.index_axis(Axis(0), 1));

    struct Extent {
        min_x: usize,
        min_y: usize,
        max_x: usize,
        max_y: usize,
        count: u64,
        class_sum: f64,
    }

    let mut extents: HashMap<u32, Extent> = HashMap::new();
    for y in 0..height {
        for x in 0..width {
            let Some(id) = instance_id(labels[(y, x)]) else {
                continue;
            };
            let class_value = class_map.map_or(0.0, |m| f64::from(m[(y, x)]));
            extents
                .entry(id)
                .and_modify(|e| {
                    e.min_x = e.min_x.min(x);
                    e.min_y = e.min_y.min(y);
                    e.max_x = e.max_x.max(x);
                    e.max_y = e.max_y.max(y);
                    e.count += 1;
                    e.class_sum += class_value;
                })
                .or_insert(Extent {
                    min_x: x,
                    min_y: y,
                    max_x: x,
                    max_y: y,
                    count: 1,
                    class_sum: class_value,
                });
        }
    }

    let origin = tile.padded_ds(downsample);
    let mut candidates = Vec::with_capacity(extents.len());
    for (id, e) in &extents {
        let bbox_w = (e.max_x - e.min_x + 1) as u32;
        let bbox_h = (e.max_y - e.min_y + 1) as u32;
        let mut mask = vec![0u8; bbox_w as usize * bbox_h as usize];
        for y in e.min_y..=e.max_y {
            for x in e.min_x..=e.max_x {
                if instance_id(labels[(y, x)]) == Some(*id) {
                    mask[(y - e.min_y) * bbox_w as usize + (x - e.min_x)] = 1;
                }
            }
        }
        let bbox = Rect::new(
            origin.x + e.min_x as i64,
            origin.y + e.min_y as i64,
            bbox_w,
            bbox_h,
        );
        candidates.push(ObjectCandidate {
            label: *id,
            class_value: (e.class_sum / e.count as f64) as f32,
            geometry: Geometry::new(bbox, mask),
            tile: *tile,
        });
    }

    // HashMap iteration order is arbitrary; candidates are emitted in label
    // order so downstream tie-breaks stay deterministic.
    candidates.sort_by_key(|c| c.label);
    Ok(candidates)
}

/// Map a raw label-map value to an instance id, ignoring background and
/// garbage values.
fn instance_id(value: f32) -> Option<u32> {
    if !value.is_finite() {
        return None;
    }
    let rounded = value.round();
    if rounded < 1.0 || rounded >= u32::MAX as f32 {
        return None;
    }
    Some(rounded as u32)
}
