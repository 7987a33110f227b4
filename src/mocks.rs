//! Test doubles for the pipeline's external collaborators.
//!
//! The mock predictor echoes channel 0 of its input as the label map; paired
//! with [`MockPixelSource`], which paints instance labels as pixel values,
//! end-to-end runs become fully deterministic without a model runtime.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ndarray::prelude::*;
use parking_lot::Mutex;

use crate::errors::{Result, TileSegError};
use crate::geometry::Rect;
use crate::model::{ChannelSpec, InputChannels, ModelContract};
use crate::objects::{MergedObjectSet, ObjectKind};
use crate::tiling::Region;
use crate::traits::{ObjectSink, PixelSource, Predictor, PredictorProvider};

pub struct IdentityPredictor {
    calls: Arc<AtomicUsize>,
    fail_first: usize,
    hold: Option<Duration>,
    intervals: Arc<Mutex<Vec<(Instant, Instant)>>>,
}

impl Predictor for IdentityPredictor {
    fn infer(&mut self, input: ArrayView3<'_, f32>) -> Result<Array3<f32>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let start = Instant::now();
        if let Some(hold) = self.hold {
            std::thread::sleep(hold);
        }
        let result = if call < self.fail_first {
            Err(TileSegError::Model {
                operation: "mock inference".to_string(),
                source: Box::new(std::io::Error::other("injected failure")),
            })
        } else {
            Ok(input.slice(s![0..1, .., ..]).to_owned())
        };
        self.intervals.lock().push((start, Instant::now()));
        result
    }
}

/// Provider minting [`IdentityPredictor`]s. Counters are shared across all
/// minted predictors, so failure injection ("the first k inference calls
/// fail") and interval tracking work regardless of pool capacity.
pub struct MockModel {
    contract: ModelContract,
    fail_creation: bool,
    fail_first: usize,
    hold: Option<Duration>,
    calls: Arc<AtomicUsize>,
    created: AtomicUsize,
    intervals: Arc<Mutex<Vec<(Instant, Instant)>>>,
}

impl MockModel {
    pub fn new() -> Self {
        Self {
            contract: ModelContract::new(InputChannels::Any, 1),
            fail_creation: false,
            fail_first: 0,
            hold: None,
            calls: Arc::new(AtomicUsize::new(0)),
            created: AtomicUsize::new(0),
            intervals: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_contract(mut self, contract: ModelContract) -> Self {
        self.contract = contract;
        self
    }

    /// The first `k` inference calls across all predictors fail.
    pub fn fail_first_calls(mut self, k: usize) -> Self {
        self.fail_first = k;
        self
    }

    /// Every `create_predictor` call fails, simulating a model that cannot
    /// be loaded.
    pub fn failing_creation(mut self) -> Self {
        self.fail_creation = true;
        self
    }

    /// Sleep inside each inference call, widening the held interval for
    /// exclusivity tests.
    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = Some(hold);
        self
    }

    pub fn inference_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn created_predictors(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// (start, end) of every inference call, in completion order.
    pub fn intervals(&self) -> Vec<(Instant, Instant)> {
        self.intervals.lock().clone()
    }
}

impl Default for MockModel {
    fn default() -> Self {
        Self::new()
    }
}

impl PredictorProvider for MockModel {
    fn contract(&self) -> &ModelContract {
        &self.contract
    }

    fn create_predictor(&self) -> Result<Box<dyn Predictor>> {
        if self.fail_creation {
            return Err(TileSegError::Model {
                operation: "mock model loading".to_string(),
                source: Box::new(std::io::Error::other("injected creation failure")),
            });
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(IdentityPredictor {
            calls: Arc::clone(&self.calls),
            fail_first: self.fail_first,
            hold: self.hold,
            intervals: Arc::clone(&self.intervals),
        }))
    }
}

/// Synthetic label image: instance ids painted into rectangles. Every
/// requested channel returns the same label plane, which is all the identity
/// predictor needs.
pub struct MockPixelSource {
    width: u32,
    height: u32,
    labels: Vec<u32>,
}

impl MockPixelSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            labels: vec![0; width as usize * height as usize],
        }
    }

    /// Paint `label` into `rect` (clipped to the image).
    pub fn with_object(mut self, label: u32, rect: Rect) -> Self {
        let bounds = Rect::new(0, 0, self.width, self.height);
        if let Some(clipped) = rect.intersect(&bounds) {
            for y in clipped.y..clipped.bottom() {
                for x in clipped.x..clipped.right() {
                    self.labels[y as usize * self.width as usize + x as usize] = label;
                }
            }
        }
        self
    }

    pub const fn width(&self) -> u32 {
        self.width
    }

    pub const fn height(&self) -> u32 {
        self.height
    }

    fn label_at(&self, x: i64, y: i64) -> u32 {
        if x < 0 || y < 0 || x >= i64::from(self.width) || y >= i64::from(self.height) {
            return 0;
        }
        self.labels[y as usize * self.width as usize + x as usize]
    }
}

impl PixelSource for MockPixelSource {
    fn read_region(
        &self,
        rect: &Rect,
        downsample: f64,
        channels: &ChannelSpec,
    ) -> Result<Array3<f32>> {
        let out = rect.scaled_down(downsample);
        let (w, h) = (out.width as usize, out.height as usize);
        let mut data = Array3::<f32>::zeros((channels.len(), h, w));
        for y in 0..h {
            for x in 0..w {
                let sx = rect.x + (x as f64 * downsample) as i64;
                let sy = rect.y + (y as f64 * downsample) as i64;
                let value = self.label_at(sx, sy) as f32;
                for c in 0..channels.len() {
                    data[(c, y, x)] = value;
                }
            }
        }
        Ok(data)
    }
}

/// Sink that records everything it is handed.
#[derive(Default)]
pub struct CollectingSink {
    accepted: Mutex<Vec<(Region, ObjectKind, MergedObjectSet)>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accepted(&self) -> Vec<(Region, ObjectKind, MergedObjectSet)> {
        self.accepted.lock().clone()
    }
}

impl ObjectSink for CollectingSink {
    fn accept(&self, region: &Region, kind: ObjectKind, objects: &MergedObjectSet) -> Result<()> {
        self.accepted.lock().push((*region, kind, objects.clone()));
        Ok(())
    }
}
