use ndarray::prelude::*;

use crate::errors::Result;
use crate::geometry::Rect;
use crate::model::{ChannelSpec, ModelContract};
use crate::objects::{MergedObjectSet, ObjectKind};
use crate::tiling::Region;

/// A stateful, single-consumer inference session bound to one model + device.
///
/// Input and output are CHW tensors. Exclusive access is enforced by the
/// predictor pool, which hands a handle to exactly one worker at a time.
pub trait Predictor: Send {
    fn infer(&mut self, input: ArrayView3<'_, f32>) -> Result<Array3<f32>>;
}

/// A resolved model artifact: exposes the declared contract and mints
/// predictor handles for the pool. Creation failure is fatal to the run.
pub trait PredictorProvider: Send + Sync {
    fn contract(&self) -> &ModelContract;

    fn create_predictor(&self) -> Result<Box<dyn Predictor>>;
}

/// Supplies pixel data for rectangular requests against the source image.
///
/// `rect` is in full-resolution source pixels; the returned tensor is CHW
/// with one channel per selector and spatial dims `rect.scaled_down(downsample)`.
/// Requests may extend past the actual image bounds (uncropped edge tiles);
/// implementations clamp such reads and zero-fill the outside.
pub trait PixelSource: Send + Sync {
    fn read_region(
        &self,
        rect: &Rect,
        downsample: f64,
        channels: &ChannelSpec,
    ) -> Result<Array3<f32>>;
}

/// Accepts the finished object set for a region.
pub trait ObjectSink: Send + Sync {
    fn accept(&self, region: &Region, kind: ObjectKind, objects: &MergedObjectSet) -> Result<()>;
}
