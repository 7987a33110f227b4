use rayon::ThreadPoolBuilder;

use tiled_seg_rs::mocks::{CollectingSink, MockModel, MockPixelSource};
use tiled_seg_rs::{
    ChannelSpec, InputChannels, ModelContract, ObjectKind, Rect, Region, RunParams,
    SegmentationPipeline, TileSegError,
};

/// Small tiles so the tests stay fast: 56px inner area, reads overlap by
/// 16px, 4px of each read edge is discarded.
fn small_params() -> RunParams {
    RunParams {
        tile_dims: 64,
        padding: 8,
        boundary: 4,
        ..RunParams::default()
    }
}

fn thread_pool(threads: usize) -> rayon::ThreadPool {
    ThreadPoolBuilder::new().num_threads(threads).build().unwrap()
}

#[test]
fn objects_across_seams_merge_into_one_set() {
    // 112x56 region splits into two 56px tiles with the seam at x = 56.
    let region = Region::new(0, 0, 112, 56, 1.0).unwrap();
    let source = MockPixelSource::new(112, 56)
        // Inside the overlap zone of both reads: detected twice.
        .with_object(1, Rect::new(52, 20, 7, 10))
        // Interior of the left / right tile respectively.
        .with_object(2, Rect::new(10, 10, 12, 12))
        .with_object(3, Rect::new(80, 30, 12, 12));
    let sink = CollectingSink::new();

    let pipeline = SegmentationPipeline::new(MockModel::new(), small_params());
    let merged = pipeline
        .run(
            &region,
            &ChannelSpec::first(1),
            &source,
            &sink,
            &thread_pool(2),
        )
        .unwrap();

    assert_eq!(merged.len(), 3);
    assert_eq!(pipeline.failed_tile_count(), 0);

    // The seam object was collapsed from two candidates, the others stand
    // alone.
    let collapsed: Vec<_> = merged.iter().filter(|o| o.merged_from == 2).collect();
    assert_eq!(collapsed.len(), 1);
    assert_eq!(collapsed[0].geometry.bbox, Rect::new(52, 20, 7, 10));
    assert_eq!(merged.iter().filter(|o| o.merged_from == 1).count(), 2);

    // The sink received exactly the returned set.
    let accepted = sink.accepted();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].1, ObjectKind::Detection);
    assert_eq!(accepted[0].2.len(), 3);
}

#[test]
fn failed_tiles_are_counted_not_fatal() {
    // 280x112 region yields a 5x2 grid of 56px tiles; one object in the
    // interior of each tile.
    let region = Region::new(0, 0, 280, 112, 1.0).unwrap();
    let mut source = MockPixelSource::new(280, 112);
    for row in 0..2i64 {
        for col in 0..5i64 {
            let label = (row * 5 + col + 1) as u32;
            source = source.with_object(label, Rect::new(col * 56 + 24, row * 56 + 24, 8, 8));
        }
    }
    let sink = CollectingSink::new();

    // Pool capacity 1 serializes inference, so "fail the first two calls"
    // means exactly two tiles produce no output.
    let model = MockModel::new().fail_first_calls(2);
    let pipeline = SegmentationPipeline::new(model, small_params());
    let merged = pipeline
        .run(
            &region,
            &ChannelSpec::first(1),
            &source,
            &sink,
            &thread_pool(4),
        )
        .unwrap();

    assert_eq!(pipeline.failed_tile_count(), 2);
    assert_eq!(merged.len(), 8);
    assert_eq!(sink.accepted().len(), 1);
}

#[test]
fn model_load_failure_is_fatal_and_publishes_nothing() {
    let region = Region::new(0, 0, 112, 56, 1.0).unwrap();
    let source = MockPixelSource::new(112, 56).with_object(1, Rect::new(10, 10, 12, 12));
    let sink = CollectingSink::new();

    let pipeline = SegmentationPipeline::new(MockModel::new().failing_creation(), small_params());
    let result = pipeline.run(
        &region,
        &ChannelSpec::first(1),
        &source,
        &sink,
        &thread_pool(2),
    );

    assert!(matches!(result, Err(TileSegError::Model { .. })));
    assert!(sink.accepted().is_empty());
}

#[test]
fn incompatible_channel_spec_fails_before_loading_the_model() {
    let region = Region::new(0, 0, 112, 56, 1.0).unwrap();
    let source = MockPixelSource::new(112, 56);
    let sink = CollectingSink::new();

    let model = MockModel::new().with_contract(ModelContract::new(InputChannels::Fixed(3), 1));
    let pipeline = SegmentationPipeline::new(model, small_params());
    let result = pipeline.run(
        &region,
        &ChannelSpec::first(1),
        &source,
        &sink,
        &thread_pool(2),
    );

    assert!(matches!(result, Err(TileSegError::Validation { .. })));
    assert_eq!(pipeline.provider().created_predictors(), 0);
    assert!(sink.accepted().is_empty());
}

#[test]
fn merged_set_is_independent_of_parallelism() {
    let region = Region::new(0, 0, 280, 112, 1.0).unwrap();
    let mut source = MockPixelSource::new(280, 112);
    for col in 0..5i64 {
        source = source.with_object(col as u32 + 1, Rect::new(col * 56 + 20, 30, 10, 10));
    }
    // One object in the overlap of two tile rows' reads.
    source = source.with_object(9, Rect::new(140, 52, 6, 8));

    let mut sets = Vec::new();
    for threads in [1, 4] {
        let sink = CollectingSink::new();
        let pipeline = SegmentationPipeline::new(MockModel::new(), small_params());
        let merged = pipeline
            .run(
                &region,
                &ChannelSpec::first(1),
                &source,
                &sink,
                &thread_pool(threads),
            )
            .unwrap();
        sets.push(merged);
    }

    assert_eq!(sets[0].len(), sets[1].len());
    for (a, b) in sets[0].iter().zip(sets[1].iter()) {
        assert_eq!(a.label, b.label);
        assert_eq!(a.geometry.bbox, b.geometry.bbox);
        assert_eq!(a.merged_from, b.merged_from);
    }
}
