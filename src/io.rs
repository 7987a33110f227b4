use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use image::DynamicImage;
use ndarray::prelude::*;
use serde::Serialize;

use crate::errors::{Result, TileSegError};
use crate::geometry::Rect;
use crate::model::{ChannelSelector, ChannelSpec};
use crate::objects::{MergedObjectSet, ObjectKind};
use crate::tiling::Region;
use crate::traits::{ObjectSink, PixelSource};

/// Pixel source backed by a decoded image held in memory.
///
/// Values are normalized to 0..1; reads past the image bounds (uncropped edge
/// tiles) are zero-filled.
pub struct ImagePixelSource {
    pixels: image::Rgb32FImage,
}

impl ImagePixelSource {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            pixels: image.to_rgb32f(),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub const fn channel_count(&self) -> usize {
        3
    }

    fn sample(&self, channel: usize, x: i64, y: i64) -> f32 {
        if x < 0 || y < 0 || x >= i64::from(self.width()) || y >= i64::from(self.height()) {
            return 0.0;
        }
        self.pixels.get_pixel(x as u32, y as u32)[channel]
    }
}

impl PixelSource for ImagePixelSource {
    fn read_region(
        &self,
        rect: &Rect,
        downsample: f64,
        channels: &ChannelSpec,
    ) -> Result<Array3<f32>> {
        for selector in channels.selectors() {
            let out_of_range = match selector {
                ChannelSelector::Index(i) => *i >= self.channel_count(),
                ChannelSelector::Average(list) => {
                    list.iter().any(|i| *i >= self.channel_count())
                }
            };
            if out_of_range {
                return Err(TileSegError::PixelSource {
                    operation: format!("channel selection {selector:?}"),
                    source: Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "selector index exceeds the image channel count",
                    )),
                });
            }
        }

        let out = rect.scaled_down(downsample);
        let (w, h) = (out.width as usize, out.height as usize);
        let mut data = Array3::<f32>::zeros((channels.len(), h, w));
        for (ci, selector) in channels.selectors().iter().enumerate() {
            for y in 0..h {
                for x in 0..w {
                    let sx = rect.x + (x as f64 * downsample) as i64;
                    let sy = rect.y + (y as f64 * downsample) as i64;
                    data[(ci, y, x)] = match selector {
                        ChannelSelector::Index(i) => self.sample(*i, sx, sy),
                        ChannelSelector::Average(list) => {
                            list.iter().map(|i| self.sample(*i, sx, sy)).sum::<f32>()
                                / list.len() as f32
                        }
                    };
                }
            }
        }
        Ok(data)
    }
}

/// Writes the merged object set for a region as a JSON document.
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[derive(Serialize)]
struct ObjectReport<'a> {
    region: &'a Region,
    kind: ObjectKind,
    objects: &'a MergedObjectSet,
}

impl ObjectSink for JsonFileSink {
    fn accept(&self, region: &Region, kind: ObjectKind, objects: &MergedObjectSet) -> Result<()> {
        let file = File::create(&self.path).map_err(|e| TileSegError::Sink {
            operation: format!("create {}", self.path.display()),
            source: Box::new(e),
        })?;
        serde_json::to_writer_pretty(
            BufWriter::new(file),
            &ObjectReport {
                region,
                kind,
                objects,
            },
        )
        .map_err(|e| TileSegError::Sink {
            operation: "serialize object set".to_string(),
            source: Box::new(e),
        })
    }
}
