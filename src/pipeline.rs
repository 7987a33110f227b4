use std::sync::atomic::{AtomicU32, Ordering};

use log::{error, info};
use rayon::prelude::*;

use crate::config::RunParams;
use crate::errors::Result;
use crate::merge::ObjectMerger;
use crate::model::ChannelSpec;
use crate::objects::MergedObjectSet;
use crate::pool::PredictorPool;
use crate::prune::prune;
use crate::tiling::{compute_tiles, Region, TileSpec};
use crate::traits::{ObjectSink, PixelSource, PredictorProvider};
use crate::worker::TileWorker;

/// Drives a whole segmentation run: tile grid, predictor pool, parallel tile
/// workers, boundary pruning, global merge, publication.
///
/// Tiles execute on the caller-supplied rayon thread pool, bounded further by
/// the predictor pool capacity. Tile-local failures are absorbed by the
/// workers and only raise the failure counter; an `Err` from [`run`] is a
/// whole-run fatal error and nothing is published.
///
/// [`run`]: SegmentationPipeline::run
pub struct SegmentationPipeline<P: PredictorProvider> {
    provider: P,
    params: RunParams,
    failed_tiles: AtomicU32,
}

impl<P: PredictorProvider> SegmentationPipeline<P> {
    pub fn new(provider: P, params: RunParams) -> Self {
        Self {
            provider,
            params,
            failed_tiles: AtomicU32::new(0),
        }
    }

    /// Tiles that produced no output in the most recently completed run.
    /// Non-zero means partial completion, not total failure.
    pub fn failed_tile_count(&self) -> u32 {
        self.failed_tiles.load(Ordering::Relaxed)
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn run(
        &self,
        region: &Region,
        channels: &ChannelSpec,
        source: &dyn PixelSource,
        sink: &dyn ObjectSink,
        thread_pool: &rayon::ThreadPool,
    ) -> Result<MergedObjectSet> {
        self.run_with_progress(region, channels, source, sink, thread_pool, |_| {})
    }

    pub fn run_with_progress(
        &self,
        region: &Region,
        channels: &ChannelSpec,
        source: &dyn PixelSource,
        sink: &dyn ObjectSink,
        thread_pool: &rayon::ThreadPool,
        on_tile: impl Fn(&TileSpec) + Sync,
    ) -> Result<MergedObjectSet> {
        self.failed_tiles.store(0, Ordering::Relaxed);
        // The counter workers update lives on the run, not the pipeline, so
        // concurrent runs of one pipeline cannot interfere.
        let failed = AtomicU32::new(0);

        let result = self.run_inner(region, channels, source, sink, &failed, thread_pool, on_tile);
        self.failed_tiles
            .store(failed.load(Ordering::Relaxed), Ordering::Relaxed);
        if let Err(e) = &result {
            error!("segmentation run failed: {e}");
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn run_inner(
        &self,
        region: &Region,
        channels: &ChannelSpec,
        source: &dyn PixelSource,
        sink: &dyn ObjectSink,
        failed: &AtomicU32,
        thread_pool: &rayon::ThreadPool,
        on_tile: impl Fn(&TileSpec) + Sync,
    ) -> Result<MergedObjectSet> {
        let p = &self.params;
        channels.validate_against(&self.provider.contract().input_channels)?;

        let tiles: Vec<TileSpec> =
            compute_tiles(region, p.tile_dims, p.padding, p.align_center, p.crop_at_edges)?
                .collect();
        info!(
            "processing {} tiles of {}x{} (padding {}) at downsample {}",
            tiles.len(),
            p.tile_dims,
            p.tile_dims,
            p.padding,
            region.downsample
        );

        let pool = PredictorPool::new(p.predictors, || self.provider.create_predictor())?;
        let worker = TileWorker {
            source,
            pool: &pool,
            contract: self.provider.contract(),
            params: p,
            region,
            failed_tiles: failed,
        };

        let candidates = thread_pool.install(|| {
            tiles
                .par_iter()
                .map(|tile| {
                    let kept = prune(worker.process(tile, channels), p.boundary, region);
                    on_tile(tile);
                    kept
                })
                .reduce(Vec::new, |mut acc, mut part| {
                    acc.append(&mut part);
                    acc
                })
        });

        // Deterministic drain before merging; the pool's Drop would also
        // catch a panic unwinding out of the dispatch above.
        pool.close_all();

        let merged = ObjectMerger::new(p.metric, p.overlap_threshold).merge(candidates);
        info!(
            "merged into {} objects ({} failed tiles)",
            merged.len(),
            failed.load(Ordering::Relaxed)
        );

        sink.accept(region, p.object_kind, &merged)?;
        Ok(merged)
    }
}
