use std::path::{Path, PathBuf};

use ndarray::prelude::*;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDA, TensorRT},
    session::{builder::SessionBuilder, Session},
};

use crate::errors::{Result, TileSegError};
use crate::traits::{Predictor, PredictorProvider};

/// Declared input-channel contract of a model: a fixed count, or any number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputChannels {
    Any,
    Fixed(u32),
}

impl InputChannels {
    pub fn accepts(&self, n: usize) -> bool {
        match self {
            Self::Any => n > 0,
            Self::Fixed(c) => n == *c as usize,
        }
    }
}

/// Physical pixel size declared in the model metadata, defaulting to 1.0/1.0
/// when the metadata carries none.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelSize {
    pub x: f64,
    pub y: f64,
}

impl Default for PixelSize {
    fn default() -> Self {
        Self { x: 1.0, y: 1.0 }
    }
}

/// What the resolved model artifact promises: channel contract, pixel size
/// metadata and how many output channels inference produces (channel 0 is the
/// instance label map, channel 1, when present, a class/confidence map).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelContract {
    pub input_channels: InputChannels,
    pub pixel_size: PixelSize,
    pub output_channels: u32,
}

impl ModelContract {
    pub fn new(input_channels: InputChannels, output_channels: u32) -> Self {
        Self {
            input_channels,
            pixel_size: PixelSize::default(),
            output_channels,
        }
    }

    pub fn with_pixel_size(mut self, x: f64, y: f64) -> Self {
        self.pixel_size = PixelSize { x, y };
        self
    }
}

/// How raw image channels are assembled into the model input layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSelector {
    /// A single source channel by index.
    Index(usize),
    /// The mean of several source channels (e.g. RGB to a single band).
    Average(Vec<usize>),
}

/// Ordered list of channel selectors defining the model input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    selectors: Vec<ChannelSelector>,
}

impl ChannelSpec {
    pub fn new(selectors: Vec<ChannelSelector>) -> Self {
        Self { selectors }
    }

    /// The first `n` source channels, in order.
    pub fn first(n: usize) -> Self {
        Self {
            selectors: (0..n).map(ChannelSelector::Index).collect(),
        }
    }

    pub fn selectors(&self) -> &[ChannelSelector] {
        &self.selectors
    }

    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    /// Check compatibility with the model's declared channel contract.
    pub fn validate_against(&self, input_channels: &InputChannels) -> Result<()> {
        if self.is_empty() {
            return Err(TileSegError::Validation {
                field: "channels".to_string(),
                reason: "at least one channel selector is required".to_string(),
            });
        }
        if !input_channels.accepts(self.len()) {
            let expected = match input_channels {
                InputChannels::Any => "any number of channels".to_string(),
                InputChannels::Fixed(c) => format!("{c} channels"),
            };
            return Err(TileSegError::Validation {
                field: "channels".to_string(),
                reason: format!("model expects {expected}, got {}", self.len()),
            });
        }
        Ok(())
    }
}

/// A resolved ONNX model artifact bound to a device, able to mint predictor
/// handles for the pool.
pub struct OnnxModel {
    model_path: PathBuf,
    device_id: i32,
    contract: ModelContract,
}

impl OnnxModel {
    pub fn new(
        model_path: impl AsRef<Path>,
        device_id: i32,
        contract: ModelContract,
    ) -> Result<Self> {
        let model_path = model_path.as_ref().to_path_buf();
        if !model_path.is_file() {
            return Err(TileSegError::Model {
                operation: format!("model file lookup: {}", model_path.display()),
                source: Box::new(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "model file does not exist",
                )),
            });
        }
        Ok(Self {
            model_path,
            device_id,
            contract,
        })
    }
}

impl PredictorProvider for OnnxModel {
    fn contract(&self) -> &ModelContract {
        &self.contract
    }

    fn create_predictor(&self) -> Result<Box<dyn Predictor>> {
        let session = SessionBuilder::new()
            .map_err(|e| TileSegError::Model {
                operation: "session builder initialization".to_string(),
                source: Box::new(e),
            })?
            .with_execution_providers([
                TensorRT::default()
                    .with_device_id(self.device_id)
                    .build(),
                CUDA::default()
                    .with_device_id(self.device_id)
                    .build(),
            ])
            .map_err(|e| TileSegError::Model {
                operation: "execution provider configuration".to_string(),
                source: Box::new(ort::Error::<()>::from(e)),
            })?
            .with_memory_pattern(true)
            .map_err(|e| TileSegError::Model {
                operation: "memory pattern configuration".to_string(),
                source: Box::new(ort::Error::<()>::from(e)),
            })?
            .commit_from_file(&self.model_path)
            .map_err(|e| TileSegError::Model {
                operation: format!("model file loading: {}", self.model_path.display()),
                source: Box::new(e),
            })?;

        let input_name = session.inputs()[0].name().to_string();
        let output_name = session.outputs()[0].name().to_string();
        Ok(Box::new(OnnxPredictor {
            session,
            input_name,
            output_name,
        }))
    }
}

/// A live ONNX Runtime session. Single-consumer: the pool hands it to one
/// worker at a time, so no internal locking is needed.
pub struct OnnxPredictor {
    session: Session,
    input_name: String,
    output_name: String,
}

impl Predictor for OnnxPredictor {
    fn infer(&mut self, input: ArrayView3<'_, f32>) -> Result<Array3<f32>> {
        let batched = input.insert_axis(Axis(0));
        let outputs = self.session.run(
            ort::inputs![self.input_name.as_str() => TensorRef::from_array_view(&batched.as_standard_layout())?],
        )?;
        let raw = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .to_owned();
        match raw.ndim() {
            4 => Ok(raw
                .into_dimensionality::<Ix4>()?
                .index_axis_move(Axis(0), 0)),
            3 => Ok(raw.into_dimensionality::<Ix3>()?),
            n => Err(TileSegError::Model {
                operation: format!("output rank check (expected 3 or 4, got {n})"),
                source: Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "unexpected output tensor rank",
                )),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_channel_contract_rejects_mismatch() {
        let spec = ChannelSpec::first(3);
        assert!(spec.validate_against(&InputChannels::Fixed(3)).is_ok());
        assert!(spec.validate_against(&InputChannels::Fixed(1)).is_err());
    }

    #[test]
    fn any_channel_contract_accepts_everything_nonempty() {
        assert!(ChannelSpec::first(1).validate_against(&InputChannels::Any).is_ok());
        assert!(ChannelSpec::first(7).validate_against(&InputChannels::Any).is_ok());
        assert!(ChannelSpec::new(vec![]).validate_against(&InputChannels::Any).is_err());
    }

    #[test]
    fn pixel_size_defaults_to_unit() {
        let contract = ModelContract::new(InputChannels::Any, 1);
        assert_eq!(contract.pixel_size, PixelSize { x: 1.0, y: 1.0 });
        let scaled = contract.with_pixel_size(0.25, 0.25);
        assert_eq!(scaled.pixel_size.x, 0.25);
    }

    #[test]
    fn missing_model_file_is_fatal() {
        let err = OnnxModel::new(
            "/nonexistent/model.onnx",
            0,
            ModelContract::new(InputChannels::Any, 1),
        );
        assert!(matches!(err, Err(TileSegError::Model { .. })));
    }
}
