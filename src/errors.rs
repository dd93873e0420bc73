use std::path::PathBuf;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Structured error types for the segmentation service.
///
/// Each variant captures context specific to one stage of the prediction pipeline
/// (model loading, image validation, inference, artifact persistence). The HTTP layer
/// only distinguishes client errors (`InvalidImage`) from everything else, but the
/// variants keep the cause chain intact for logging.
#[derive(Error, Debug)]
pub enum SegmentationError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Model load error: {operation} failed")]
    Load {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Model not loaded")]
    ModelUnavailable,

    #[error("Invalid image: {reason}")]
    InvalidImage { reason: String },

    #[error("Image processing error: {operation} failed")]
    ImageProcessing {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Inference error: {operation} failed")]
    Inference {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Persistence error: {operation} failed for {path:?}")]
    Persistence {
        path: PathBuf,
        operation: String,
        #[source]
        source: BoxError,
    },
}

pub type Result<T> = std::result::Result<T, SegmentationError>;

impl SegmentationError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn invalid_image(reason: impl Into<String>) -> Self {
        Self::InvalidImage {
            reason: reason.into(),
        }
    }

    pub fn load<E>(operation: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Load {
            operation: operation.into(),
            source: source.into(),
        }
    }

    pub fn inference<E>(operation: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Inference {
            operation: operation.into(),
            source: source.into(),
        }
    }

    pub fn persistence<E>(path: impl Into<PathBuf>, operation: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Persistence {
            path: path.into(),
            operation: operation.into(),
            source: source.into(),
        }
    }

    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidImage { .. })
    }

    /// Renders the error together with every `source()` below it, joined by `": "`.
    pub fn detail(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }
}

/// Convert I/O errors to persistence errors.
///
/// Code that knows the path should construct `SegmentationError::Persistence`
/// directly; this conversion is the fallback for the rest.
impl From<std::io::Error> for SegmentationError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: Box::new(err),
        }
    }
}

/// Convert image crate errors to image processing errors.
impl From<image::ImageError> for SegmentationError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

/// Convert ONNX Runtime errors to inference errors.
impl From<ort::Error> for SegmentationError {
    fn from(err: ort::Error) -> Self {
        Self::Inference {
            operation: "ort operation".to_string(),
            source: Box::new(err),
        }
    }
}

/// Convert ndarray shape errors to inference errors.
///
/// Shape errors only show up while reshaping model inputs and outputs, so they are
/// reported as part of the forward pass.
impl From<ndarray::ShapeError> for SegmentationError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Inference {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}

/// Convert JSON errors to persistence errors.
///
/// JSON only crosses the disk boundary (result files), so like I/O errors these land
/// in `Persistence`; callers that know the path construct the variant directly.
impl From<serde_json::Error> for SegmentationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence {
            path: PathBuf::from("unknown"),
            operation: "json serialization".to_string(),
            source: Box::new(err),
        }
    }
}

/// Convert HTTP client errors to load errors; only artifact downloads talk HTTP.
impl From<reqwest::Error> for SegmentationError {
    fn from(err: reqwest::Error) -> Self {
        Self::Load {
            operation: "artifact transfer".to_string(),
            source: Box::new(err),
        }
    }
}
