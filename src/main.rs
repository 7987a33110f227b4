use anyhow::{ensure, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::ThreadPoolBuilder;

use tiled_seg_rs::{
    compute_tiles, ChannelSpec, Config, ImagePixelSource, JsonFileSink, OnnxModel, Region,
    SegmentationPipeline,
};

fn main() -> Result<()> {
    env_logger::init();
    let config = Config::parse();

    ensure!(config.model_path.exists(), "Model path does not exist");
    ensure!(config.input_image.exists(), "Input image does not exist");

    let image = image::open(&config.input_image)
        .with_context(|| format!("Failed to open image: {}", config.input_image.display()))?;
    let source = ImagePixelSource::new(image);
    let region = Region::new(
        0,
        0,
        source.width(),
        source.height(),
        config.downsample,
    )?;

    let channels = match config.input_channels {
        Some(n) => ChannelSpec::first(n as usize),
        None => ChannelSpec::first(source.channel_count()),
    };
    let model = OnnxModel::new(&config.model_path, config.device_id, config.model_contract())?;

    let thread_pool = ThreadPoolBuilder::new()
        .num_threads(config.num_threads)
        .build()?;
    let params = config.run_params();

    let tile_count = compute_tiles(
        &region,
        params.tile_dims,
        params.padding,
        params.align_center,
        params.crop_at_edges,
    )?
    .tile_count();
    let progress_bar = ProgressBar::new(u64::from(tile_count));
    progress_bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec} {eta})",
        )?
        .progress_chars("#>-"),
    );

    let sink = JsonFileSink::new(&config.output);
    let pipeline = SegmentationPipeline::new(model, params);
    let merged = pipeline.run_with_progress(&region, &channels, &source, &sink, &thread_pool, |_| {
        progress_bar.inc(1);
    })?;
    progress_bar.finish();

    if pipeline.failed_tile_count() > 0 {
        log::warn!(
            "{} of {} tiles produced no output",
            pipeline.failed_tile_count(),
            tile_count
        );
    }
    println!(
        "{} objects written to {}",
        merged.len(),
        config.output.display()
    );

    Ok(())
}
