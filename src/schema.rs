//! Request/response and on-disk JSON shapes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassStatistic {
    pub class_id: u32,
    pub class_name: String,
    pub pixel_count: u64,
    pub percentage: f64,
}

/// Light prediction result, also written as `prediction_result.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub class_statistics: Vec<ClassStatistic>,
    /// `[width, height]` of the upload.
    pub image_size: [u32; 2],
    /// `[height, width]` of the mask.
    pub segmented_image_size: [u32; 2],
    pub num_classes: usize,
    pub dominant_class: String,
    pub dominant_class_percentage: f64,
    pub timestamp: String,
    pub filename: String,
}

/// `prediction_result_full.json`: the light result plus raw arrays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullPredictionResult {
    #[serde(flatten)]
    pub result: PredictionResult,
    pub prediction_mask: Vec<Vec<u8>>,
    /// At the upload's resolution.
    pub colored_mask: Vec<Vec<[u8; 3]>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSet {
    pub original: String,
    pub prediction_mask: String,
    pub overlay: String,
    pub side_by_side: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    #[serde(flatten)]
    pub result: PredictionResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<ImageSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSummary {
    pub timestamp: String,
    pub filename: String,
    pub dominant_class: String,
    pub dominant_class_percentage: f64,
    pub folder: String,
}

impl PredictionSummary {
    pub fn from_result(result: PredictionResult, folder: impl Into<String>) -> Self {
        Self {
            timestamp: result.timestamp,
            filename: result.filename,
            dominant_class: result.dominant_class,
            dominant_class_percentage: result.dominant_class_percentage,
            folder: folder.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionsResponse {
    pub predictions: Vec<PredictionSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub status: &'static str,
    pub model_loaded: bool,
    pub model_name: String,
    pub input_shape: Vec<i64>,
    pub output_shape: Vec<i64>,
    pub num_parameters: Option<u64>,
    pub num_classes: usize,
    pub class_names: Vec<String>,
    pub class_colors: Vec<[u8; 3]>,
    pub runtime: String,
    pub runtime_version: String,
    pub binding_version: Option<String>,
    pub producer: Option<String>,
    pub service_version: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ModelInfoResponse {
    Loaded(Box<ModelInfo>),
    Unavailable {
        status: &'static str,
        model_loaded: bool,
    },
}

impl ModelInfoResponse {
    pub const fn unavailable() -> Self {
        Self::Unavailable {
            status: "Model not loaded",
            model_loaded: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}
