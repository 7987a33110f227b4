use thiserror::Error;

/// Structured error types for the tiled segmentation pipeline.
///
/// Each variant carries the context of its error domain — the failing
/// operation plus a `#[source]` cause — so callers never parse error strings.
/// Sources are `Send + Sync` because tile workers run on rayon threads.
///
/// Only whole-run (fatal) errors ever escape `SegmentationPipeline::run`;
/// tile-local errors are caught at the worker boundary, logged and counted.
#[derive(Error, Debug)]
pub enum TileSegError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },

    #[error("Pixel source error: {operation} failed")]
    PixelSource {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Predictor pool error: {operation}: {reason}")]
    Pool { operation: String, reason: String },

    #[error("Object sink error: {operation} failed")]
    Sink {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

pub type Result<T> = std::result::Result<T, TileSegError>;

/// Convert anyhow errors to configuration errors.
///
/// Dependencies that hand back `anyhow::Error` lose their structure anyway;
/// folding them into the configuration domain at the boundary keeps the rest
/// of the crate on the typed enum.
impl From<anyhow::Error> for TileSegError {
    fn from(err: anyhow::Error) -> Self {
        TileSegError::Configuration {
            message: err.to_string(),
        }
    }
}

/// Convert I/O errors to pixel source errors.
///
/// Fallback for callsites without operation context; code that has context
/// constructs the variant directly.
impl From<std::io::Error> for TileSegError {
    fn from(err: std::io::Error) -> Self {
        Self::PixelSource {
            operation: "io".to_string(),
            source: Box::new(err),
        }
    }
}

/// Convert image crate errors to pixel source errors.
impl From<image::ImageError> for TileSegError {
    fn from(err: image::ImageError) -> Self {
        Self::PixelSource {
            operation: "image decoding".to_string(),
            source: Box::new(err),
        }
    }
}

/// Convert ONNX Runtime errors to model errors.
impl From<ort::Error> for TileSegError {
    fn from(err: ort::Error) -> Self {
        Self::Model {
            operation: "ort operation".to_string(),
            source: Box::new(err),
        }
    }
}

/// Convert ndarray shape errors to model errors.
///
/// Shape mismatches only ever arise while wrangling inference tensors, so
/// they live in the model domain instead of a tensor error type of their own.
impl From<ndarray::ShapeError> for TileSegError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Model {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}
