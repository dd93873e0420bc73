use crate::errors::{Result, SegmentationError};
use crate::traits::{ImageSegmentationModel, ModelDescriptor};
use ndarray::prelude::*;

/// Test double for [`ImageSegmentationModel`].
///
/// Emits one-hot scores for a fixed class layout, whatever the input pixels are.
#[derive(Debug, Clone)]
pub struct MockSegmentationModel {
    layout: Array2<u8>,
    num_classes: usize,
    descriptor: ModelDescriptor,
}

impl MockSegmentationModel {
    pub fn new(layout: Array2<u8>, num_classes: usize) -> Self {
        let (height, width) = layout.dim();
        let descriptor = ModelDescriptor {
            name: "mock-unet".to_string(),
            input_shape: vec![-1, height as i64, width as i64, 3],
            output_shape: vec![-1, height as i64, width as i64, num_classes as i64],
            num_parameters: Some(1_024),
            producer: Some("tests".to_string()),
            runtime: "mock".to_string(),
            runtime_version: "0.1.0".to_string(),
            binding_version: None,
        };
        Self {
            layout,
            num_classes,
            descriptor,
        }
    }

    /// Every pixel predicts `class_id`.
    pub fn uniform(size: usize, num_classes: usize, class_id: u8) -> Self {
        Self::new(Array2::from_elem((size, size), class_id), num_classes)
    }

    /// Vertical bands, one per class, left to right.
    pub fn striped(size: usize, num_classes: usize) -> Self {
        let layout = Array2::from_shape_fn((size, size), |(_, x)| (x * num_classes / size) as u8);
        Self::new(layout, num_classes)
    }
}

impl ImageSegmentationModel for MockSegmentationModel {
    fn input_size(&self) -> (u32, u32) {
        let (height, width) = self.layout.dim();
        (height as u32, width as u32)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        let (batch, height, width, channels) = tensor.dim();
        if (height, width) != self.layout.dim() || channels != 3 {
            return Err(SegmentationError::inference(
                "mock predict",
                format!("unexpected input shape {:?}", tensor.shape()),
            ));
        }
        let mut scores = Array4::<f32>::zeros((batch, height, width, self.num_classes));
        for ((y, x), &class_id) in self.layout.indexed_iter() {
            for b in 0..batch {
                scores[[b, y, x, usize::from(class_id)]] = 1.0;
            }
        }
        Ok(scores)
    }

    fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::argmax_mask;

    #[test]
    fn test_mock_model_predict_shape() -> Result<()> {
        let mock = MockSegmentationModel::uniform(16, 8, 3);
        let input = Array4::<f32>::zeros((1, 16, 16, 3));
        let scores = mock.predict(input.view())?;
        assert_eq!(scores.shape(), &[1, 16, 16, 8]);
        assert!(argmax_mask(scores.view())?.iter().all(|&c| c == 3));
        Ok(())
    }

    #[test]
    fn test_mock_model_rejects_wrong_size() {
        let mock = MockSegmentationModel::striped(16, 8);
        let input = Array4::<f32>::zeros((1, 8, 8, 3));
        assert!(mock.predict(input.view()).is_err());
    }
}
