use chrono::Local;
use image::DynamicImage;
use ndarray::ArrayView4;
use tracing::info;

use crate::{
    artifacts::{ArtifactBundle, ArtifactStore},
    class_mapping::ClassMapping,
    errors::{Result, SegmentationError},
    image_io::{encode_dynamic_png, encode_png, png_data_uri},
    mask::{argmax_mask, SegmentationMask},
    model::preprocess,
    schema::{FullPredictionResult, ImageSet, ModelInfo, PredictionResponse, PredictionResult},
    stats::{compute_stats, dominant_class},
    traits::{ImageSegmentationModel, ModelDescriptor},
    visualize::{colorize, overlay, resize_nearest, Visualizer, OVERLAY_ALPHA},
};

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// A loaded model together with its class table. Read-only once built.
pub struct Predictor {
    model: Box<dyn ImageSegmentationModel>,
    class_mapping: ClassMapping,
}

impl Predictor {
    pub fn new(model: Box<dyn ImageSegmentationModel>, class_mapping: ClassMapping) -> Result<Self> {
        if model.num_classes() != class_mapping.len() {
            return Err(SegmentationError::load(
                "class mapping validation",
                format!(
                    "model outputs {} classes but the mapping lists {}",
                    model.num_classes(),
                    class_mapping.len()
                ),
            ));
        }
        Ok(Self {
            model,
            class_mapping,
        })
    }

    pub fn input_size(&self) -> (u32, u32) {
        self.model.input_size()
    }

    pub fn class_mapping(&self) -> &ClassMapping {
        &self.class_mapping
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        self.model.descriptor()
    }

    /// One forward pass reduced to a class-index mask.
    pub fn infer(&self, tensor: ArrayView4<f32>) -> Result<SegmentationMask> {
        let scores = self.model.predict(tensor)?;
        let channels = scores.shape()[3];
        if channels != self.class_mapping.len() {
            return Err(SegmentationError::inference(
                "model output",
                format!(
                    "expected {} class channels, got {channels}",
                    self.class_mapping.len()
                ),
            ));
        }
        argmax_mask(scores.view())
    }

    pub fn model_info(&self) -> ModelInfo {
        let descriptor = self.descriptor();
        ModelInfo {
            status: "Model loaded successfully",
            model_loaded: true,
            model_name: descriptor.name.clone(),
            input_shape: descriptor.input_shape.clone(),
            output_shape: descriptor.output_shape.clone(),
            num_parameters: descriptor.num_parameters,
            num_classes: self.class_mapping.len(),
            class_names: self.class_mapping.names(),
            class_colors: self.class_mapping.colors(),
            runtime: descriptor.runtime.clone(),
            runtime_version: descriptor.runtime_version.clone(),
            binding_version: descriptor.binding_version.clone(),
            producer: descriptor.producer.clone(),
            service_version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Preprocess, infer, count, render and (optionally) persist one image.
///
/// With `persist_artifacts` off the response carries statistics only: no images are
/// encoded and nothing is written to disk.
pub struct Pipeline {
    store: ArtifactStore,
    visualizer: Visualizer,
    persist_artifacts: bool,
}

impl Pipeline {
    pub const fn new(store: ArtifactStore, visualizer: Visualizer, persist_artifacts: bool) -> Self {
        Self {
            store,
            visualizer,
            persist_artifacts,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub const fn persist_artifacts(&self) -> bool {
        self.persist_artifacts
    }

    pub fn run(
        &self,
        predictor: &Predictor,
        image: &DynamicImage,
        filename: &str,
    ) -> Result<PredictionResponse> {
        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let mapping = predictor.class_mapping();

        let tensor = preprocess(image, predictor.input_size())?;
        let mask = predictor.infer(tensor.view())?;
        let stats = compute_stats(&mask, mapping);

        let (dominant, dominant_percentage) = dominant_class(&stats);
        let result = PredictionResult {
            image_size: [image.width(), image.height()],
            segmented_image_size: [mask.height() as u32, mask.width() as u32],
            num_classes: mapping.len(),
            dominant_class: dominant.to_string(),
            dominant_class_percentage: dominant_percentage,
            timestamp,
            filename: filename.to_string(),
            class_statistics: stats,
        };
        info!(
            filename,
            dominant_class = %result.dominant_class,
            percentage = format_args!("{:.1}", result.dominant_class_percentage),
            "prediction finished"
        );

        if !self.persist_artifacts {
            return Ok(PredictionResponse {
                result,
                images: None,
                artifacts_path: None,
            });
        }

        let original = image.to_rgb8();
        let mask_image = resize_nearest(&colorize(&mask, mapping), image.width(), image.height());
        let overlay_image = overlay(&original, &mask_image, OVERLAY_ALPHA);
        let side_by_side =
            self.visualizer
                .composite(&original, &mask_image, &result.class_statistics);

        let full = FullPredictionResult {
            prediction_mask: mask.to_rows(),
            colored_mask: mask_image
                .rows()
                .map(|row| row.map(|pixel| pixel.0).collect())
                .collect(),
            result,
        };
        let dir = self.store.persist(&ArtifactBundle {
            original: image,
            mask: &mask_image,
            overlay: &overlay_image,
            side_by_side: &side_by_side,
            full: &full,
        })?;
        info!(path = %dir.display(), "artifacts saved");

        let images = ImageSet {
            original: png_data_uri(&encode_dynamic_png(image)?),
            prediction_mask: png_data_uri(&encode_png(&mask_image)?),
            overlay: png_data_uri(&encode_png(&overlay_image)?),
            side_by_side: png_data_uri(&encode_png(&side_by_side)?),
        };

        Ok(PredictionResponse {
            result: full.result,
            images: Some(images),
            artifacts_path: Some(dir.display().to_string()),
        })
    }
}
