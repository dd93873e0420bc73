use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ndarray::prelude::*;
use serde::Serialize;

use crate::errors::Result;

/// Static facts about a loaded network, captured once at load time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub input_shape: Vec<i64>,
    pub output_shape: Vec<i64>,
    pub num_parameters: Option<u64>,
    pub producer: Option<String>,
    pub runtime: String,
    /// Version of the inference runtime itself.
    pub runtime_version: String,
    /// Version of the Rust binding driving the runtime, if any.
    pub binding_version: Option<String>,
}

/// 画像セグメンテーションモデルの抽象化
///
/// The network is a black box: an NHWC float tensor goes in, an NHWC per-class
/// score tensor comes out.
pub trait ImageSegmentationModel: Send + Sync {
    /// `(height, width)` the model expects.
    fn input_size(&self) -> (u32, u32);

    /// Number of output class channels.
    fn num_classes(&self) -> usize;

    /// `(1, H, W, 3)` in, `(1, H, W, C)` out.
    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>>;

    fn descriptor(&self) -> &ModelDescriptor;
}

/// Where model artifacts come from (an experiment-tracking run, a local directory).
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Copies the artifact at `artifact_path` (file or directory) under `destination`
    /// and returns its local path.
    async fn fetch(&self, artifact_path: &str, destination: &Path) -> Result<PathBuf>;

    fn describe(&self) -> String;
}
