use std::path::PathBuf;
use std::thread;

use clap::Parser;

use crate::geometry::OverlapMetric;
use crate::model::{InputChannels, ModelContract};
use crate::objects::ObjectKind;

/// Parameters of one segmentation run, consumed by the pipeline. The core
/// never parses arguments; the CLI [`Config`] converts into this.
#[derive(Debug, Clone)]
pub struct RunParams {
    /// Tile size in model-input pixels.
    pub tile_dims: u32,
    /// Extra context read around each tile, in model-input pixels.
    pub padding: u32,
    /// Margin of the inner tile area whose detections are discarded.
    pub boundary: u32,
    /// Center the grid on the region instead of anchoring top-left.
    pub align_center: bool,
    /// Shrink boundary tiles to the region instead of letting them overhang.
    pub crop_at_edges: bool,
    /// Zero-pad short edge-tile reads up to the expected input size.
    pub pad_to_input: bool,
    /// Predictor pool capacity.
    pub predictors: usize,
    pub metric: OverlapMetric,
    pub overlap_threshold: f64,
    pub object_kind: ObjectKind,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            tile_dims: 512,
            padding: 32,
            boundary: 16,
            align_center: true,
            crop_at_edges: false,
            pad_to_input: true,
            predictors: 1,
            metric: OverlapMetric::IoMin,
            overlap_threshold: 0.5,
            object_kind: ObjectKind::Detection,
        }
    }
}

#[derive(Parser, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Image to segment.
    pub input_image: PathBuf,

    #[arg(short, long)]
    pub model_path: PathBuf,

    /// Where the merged object set is written as JSON.
    #[arg(short, long, default_value = "objects.json")]
    pub output: PathBuf,

    #[arg(long, default_value_t = 512)]
    pub tile_dims: u32,

    #[arg(long, default_value_t = 32)]
    pub padding: u32,

    #[arg(long, default_value_t = 16)]
    pub boundary: u32,

    #[arg(long, default_value_t = 1.0)]
    pub downsample: f64,

    #[arg(short, long, default_value_t = 0)]
    pub device_id: i32,

    /// Predictor pool capacity.
    #[arg(long, default_value_t = 1)]
    pub predictors: usize,

    #[arg(
        short, long, default_value_t = thread::available_parallelism().map_or(1, |n| n.get())
    )]
    pub num_threads: usize,

    /// Overlap metric for cross-tile merging: `iou` or `iomin`.
    #[arg(long, default_value = "iomin", value_parser = check_metric)]
    pub metric: OverlapMetric,

    #[arg(long, default_value_t = 0.5)]
    pub overlap_threshold: f64,

    /// Output object flavour: `detection` or `annotation`.
    #[arg(long, default_value = "detection", value_parser = check_kind)]
    pub object_kind: ObjectKind,

    /// Channels the model expects; omit for models accepting any number.
    #[arg(long)]
    pub input_channels: Option<u32>,

    /// Output channels produced by the model (1 = labels only,
    /// 2 = labels + class map).
    #[arg(long, default_value_t = 1)]
    pub output_channels: u32,
}

impl Config {
    pub fn run_params(&self) -> RunParams {
        RunParams {
            tile_dims: self.tile_dims,
            padding: self.padding,
            boundary: self.boundary,
            predictors: self.predictors,
            metric: self.metric,
            overlap_threshold: self.overlap_threshold,
            object_kind: self.object_kind,
            ..RunParams::default()
        }
    }

    pub fn model_contract(&self) -> ModelContract {
        let input_channels = match self.input_channels {
            Some(n) => InputChannels::Fixed(n),
            None => InputChannels::Any,
        };
        ModelContract::new(input_channels, self.output_channels)
    }
}

fn check_metric(s: &str) -> Result<OverlapMetric, String> {
    match s.to_lowercase().as_str() {
        "iou" => Ok(OverlapMetric::IoU),
        "iomin" => Ok(OverlapMetric::IoMin),
        other => Err(format!("{other} is not supported. Supported metrics: `iou`, `iomin`")),
    }
}

fn check_kind(s: &str) -> Result<ObjectKind, String> {
    match s.to_lowercase().as_str() {
        "detection" => Ok(ObjectKind::Detection),
        "annotation" => Ok(ObjectKind::Annotation),
        other => Err(format!(
            "{other} is not supported. Supported kinds: `detection`, `annotation`"
        )),
    }
}
