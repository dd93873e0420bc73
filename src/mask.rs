use ndarray::prelude::*;

use crate::errors::{Result, SegmentationError};

/// Per-pixel class indices at the model's output resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationMask {
    classes: Array2<u8>,
}

impl SegmentationMask {
    pub const fn new(classes: Array2<u8>) -> Self {
        Self { classes }
    }

    pub fn from_rows(rows: &[Vec<u8>]) -> Result<Self> {
        let height = rows.len();
        let width = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|row| row.len() != width) {
            return Err(SegmentationError::configuration("mask rows differ in length"));
        }
        let flat: Vec<u8> = rows.iter().flatten().copied().collect();
        Ok(Self::new(Array2::from_shape_vec((height, width), flat)?))
    }

    pub fn height(&self) -> usize {
        self.classes.nrows()
    }

    pub fn width(&self) -> usize {
        self.classes.ncols()
    }

    /// Number of pixels.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn get(&self, y: usize, x: usize) -> Option<u8> {
        self.classes.get((y, x)).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &u8> {
        self.classes.iter()
    }

    pub fn view(&self) -> ArrayView2<'_, u8> {
        self.classes.view()
    }

    pub fn to_rows(&self) -> Vec<Vec<u8>> {
        self.classes.outer_iter().map(|row| row.to_vec()).collect()
    }
}

/// Reduces a `(1, H, W, C)` score tensor to class indices.
///
/// Ties resolve to the lowest class index.
pub fn argmax_mask(scores: ArrayView4<f32>) -> Result<SegmentationMask> {
    let (batch, _, _, channels) = scores.dim();
    if batch != 1 {
        return Err(SegmentationError::inference(
            "argmax",
            format!("expected a single-image batch, got {batch}"),
        ));
    }
    if channels == 0 || channels > usize::from(u8::MAX) + 1 {
        return Err(SegmentationError::inference(
            "argmax",
            format!("unsupported class channel count {channels}"),
        ));
    }

    let classes = scores.index_axis(Axis(0), 0).map_axis(Axis(2), |lane| {
        let mut best = 0;
        let mut best_score = f32::NEG_INFINITY;
        for (class_id, &score) in lane.iter().enumerate() {
            if score > best_score {
                best = class_id;
                best_score = score;
            }
        }
        best as u8
    });
    Ok(SegmentationMask::new(classes))
}
