use std::path::Path;

use image::{imageops, imageops::FilterType, DynamicImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use ort::value::TensorRef;
use ort::{
    execution_providers::{
        CUDAExecutionProvider, ExecutionProviderDispatch, TensorRTExecutionProvider,
    },
    session::{builder::GraphOptimizationLevel, Session},
};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    errors::{Result, SegmentationError},
    traits::{ImageSegmentationModel, ModelDescriptor},
};

pub const DEFAULT_MODEL_NAME: &str = "MobileNetV2-UNet";
const PARAMETER_COUNT_KEY: &str = "num_parameters";
/// Kept in step with the exact `ort` pin in Cargo.toml.
pub const ORT_BINDING_VERSION: &str = "2.0.0-rc.10";

/// ONNX Runtime API version the binding targets, e.g. `1.22`.
pub fn onnxruntime_version() -> String {
    format!("1.{}", ort::MINOR_VERSION)
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub num_threads: usize,
    pub device_id: Option<i32>,
    /// Used when the graph declares dynamic spatial dimensions.
    pub image_size: (u32, u32),
}

pub struct OnnxModel {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    input_size: (u32, u32),
    num_classes: usize,
    descriptor: ModelDescriptor,
}

impl OnnxModel {
    pub fn new(model_path: &Path, options: &SessionOptions) -> Result<Self> {
        let mut builder = Session::builder()
            .map_err(|e| SegmentationError::load("session builder init", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| SegmentationError::load("optimization level", e))?
            .with_intra_threads(options.num_threads)
            .map_err(|e| SegmentationError::load("intra-op thread count", e))?;

        let providers = execution_providers(options.device_id);
        if !providers.is_empty() {
            builder = builder
                .with_execution_providers(providers)
                .map_err(|e| SegmentationError::load("execution provider", e))?;
        }

        let mut session = builder.commit_from_file(model_path).map_err(|e| {
            SegmentationError::load(format!("model file load: {}", model_path.display()), e)
        })?;

        let input = session.inputs.first().ok_or_else(|| {
            SegmentationError::load("model input lookup", "model declares no inputs")
        })?;
        let input_name = input.name.clone();
        let input_shape: Vec<i64> = input
            .input_type
            .tensor_shape()
            .map(|shape| shape.to_vec())
            .ok_or_else(|| {
                SegmentationError::load("model input shape", "input is not a tensor")
            })?;

        let output = session.outputs.first().ok_or_else(|| {
            SegmentationError::load("model output lookup", "model declares no outputs")
        })?;
        let output_name = output.name.clone();
        let declared_output_shape: Vec<i64> = output
            .output_type
            .tensor_shape()
            .map(|shape| shape.to_vec())
            .unwrap_or_default();

        // NHWC; dynamic dims are reported as -1
        let dim = |index: usize, fallback: u32| {
            input_shape
                .get(index)
                .and_then(|&d| u32::try_from(d).ok())
                .filter(|&d| d > 0)
                .unwrap_or(fallback)
        };
        let input_size = (
            dim(1, options.image_size.0),
            dim(2, options.image_size.1),
        );

        let (name, producer, num_parameters) = {
            let metadata = session
                .metadata()
                .map_err(|e| SegmentationError::load("model metadata", e))?;
            let name = metadata
                .name()
                .ok()
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string());
            let producer = metadata.producer().ok().filter(|p| !p.is_empty());
            let num_parameters = metadata
                .custom(PARAMETER_COUNT_KEY)
                .ok()
                .flatten()
                .and_then(|v| v.trim().parse::<u64>().ok());
            (name, producer, num_parameters)
        };

        // initialize model
        let data = Array4::<f32>::zeros((1, input_size.0 as usize, input_size.1 as usize, 3));
        let output_shape: Vec<usize> = {
            let outputs = session
                .run(ort::inputs![input_name.as_str() => TensorRef::from_array_view(&data)
                    .map_err(|e| SegmentationError::load("warm-up tensor", e))?])
                .map_err(|e| SegmentationError::load("warm-up run", e))?;
            outputs[output_name.as_str()]
                .try_extract_array::<f32>()
                .map_err(|e| SegmentationError::load("warm-up output", e))?
                .shape()
                .to_vec()
        };
        debug!(?output_shape, "warm-up pass finished");

        if output_shape.len() != 4 {
            return Err(SegmentationError::load(
                "model output shape",
                format!("expected a 4-D NHWC output, got {output_shape:?}"),
            ));
        }
        let num_classes = output_shape[3];

        let output_shape = if declared_output_shape.is_empty() {
            output_shape.iter().map(|&d| d as i64).collect()
        } else {
            declared_output_shape
        };

        let descriptor = ModelDescriptor {
            name,
            input_shape,
            output_shape,
            num_parameters,
            producer,
            runtime: "onnxruntime".to_string(),
            runtime_version: onnxruntime_version(),
            binding_version: Some(ORT_BINDING_VERSION.to_string()),
        };
        info!(
            model = %descriptor.name,
            input_shape = ?descriptor.input_shape,
            output_shape = ?descriptor.output_shape,
            num_parameters = ?descriptor.num_parameters,
            runtime_version = %descriptor.runtime_version,
            "ONNX session ready"
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            input_size,
            num_classes,
            descriptor,
        })
    }
}

/// GPU providers in priority order; empty means the default CPU provider.
///
/// Providers not compiled into ort (see the `tensorrt` and `cuda` features) are
/// skipped by the session builder with a warning.
pub fn execution_providers(device_id: Option<i32>) -> Vec<ExecutionProviderDispatch> {
    match device_id {
        Some(device_id) => vec![
            TensorRTExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
            CUDAExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
        ],
        None => Vec::new(),
    }
}

impl ImageSegmentationModel for OnnxModel {
    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        let mut binding = self.session.lock();
        let outputs = binding.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&tensor.as_standard_layout())?
        ])?;
        Ok(outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned())
    }

    fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }
}

/// Turns any decoded image into a `(1, height, width, 3)` tensor in `[0, 1]`.
///
/// The image is converted to float RGB (already divided by 255) and resized straight
/// to the target size (no crop, aspect ratio is not kept) with a triangle filter.
/// `imageops::resize` widens the filter support when downscaling, so this is bilinear
/// with anti-aliasing. Resizing in `f32` keeps interpolated values unrounded.
pub fn preprocess(image: &DynamicImage, (height, width): (u32, u32)) -> Result<Array4<f32>> {
    if image.width() == 0 || image.height() == 0 {
        return Err(SegmentationError::invalid_image(format!(
            "image has zero area ({}x{})",
            image.width(),
            image.height()
        )));
    }
    if width == 0 || height == 0 {
        return Err(SegmentationError::configuration(format!(
            "target size must be non-zero, got {width}x{height}"
        )));
    }

    let rgb = image.to_rgb32f();
    let resized = imageops::resize(&rgb, width, height, FilterType::Triangle);

    // (C, H, W) -> (1, H, W, C)
    let tensor = resized
        .as_ndarray3()
        .permuted_axes([1, 2, 0])
        .insert_axis(Axis(0))
        .mapv(|v| v.clamp(0.0, 1.0));

    Ok(tensor.as_standard_layout().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};

    #[test]
    fn test_preprocess_shape_and_range() -> Result<()> {
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(640, 360, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 255])
        }));
        let tensor = preprocess(&image, (224, 224))?;
        assert_eq!(tensor.shape(), &[1, 224, 224, 3]);
        assert!(tensor.iter().all(|v| (0.0..=1.0).contains(v)));
        Ok(())
    }

    #[test]
    fn test_preprocess_keeps_channel_order() -> Result<()> {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb([255, 0, 51])));
        let tensor = preprocess(&image, (8, 8))?;
        assert!((tensor[[0, 3, 4, 0]] - 1.0).abs() < 1e-6);
        assert!(tensor[[0, 3, 4, 1]].abs() < 1e-6);
        assert!((tensor[[0, 3, 4, 2]] - 0.2).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_preprocess_interpolates_without_rounding() -> Result<()> {
        // averaging 0 and 1 gives half a quantization step
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(2, 1, |x, _| {
            if x == 0 { Rgb([0, 0, 0]) } else { Rgb([1, 1, 1]) }
        }));
        let tensor = preprocess(&image, (1, 1))?;
        assert!((tensor[[0, 0, 0, 0]] - 0.5 / 255.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_preprocess_non_square_target() -> Result<()> {
        let image = DynamicImage::ImageRgb8(RgbImage::new(50, 50));
        let tensor = preprocess(&image, (16, 24))?;
        assert_eq!(tensor.shape(), &[1, 16, 24, 3]);
        Ok(())
    }

    #[test]
    fn test_preprocess_converts_alpha_and_gray() -> Result<()> {
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([10, 20, 30, 0])));
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(10, 10, Luma([128])));
        assert_eq!(preprocess(&rgba, (4, 4))?.shape(), &[1, 4, 4, 3]);
        let gray_tensor = preprocess(&gray, (4, 4))?;
        assert_eq!(gray_tensor.shape(), &[1, 4, 4, 3]);
        assert!((gray_tensor[[0, 0, 0, 0]] - gray_tensor[[0, 0, 0, 2]]).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_onnxruntime_version_format() {
        let version = onnxruntime_version();
        assert!(version.starts_with("1."));
        assert!(version[2..].parse::<u32>().is_ok());
    }

    #[test]
    fn test_execution_providers() {
        assert!(execution_providers(None).is_empty());
        assert_eq!(execution_providers(Some(0)).len(), 2);
    }

    #[test]
    fn test_preprocess_rejects_zero_area() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
        assert!(matches!(
            preprocess(&image, (224, 224)),
            Err(SegmentationError::InvalidImage { .. })
        ));
        let image = DynamicImage::ImageRgb8(RgbImage::new(12, 0));
        assert!(matches!(
            preprocess(&image, (224, 224)),
            Err(SegmentationError::InvalidImage { .. })
        ));
    }
}
