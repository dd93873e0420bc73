pub mod artifacts;
pub mod class_mapping;
pub mod config;
pub mod errors;
pub mod image_io;
pub mod loader;
pub mod mask;
pub mod model;
pub mod pipeline;
pub mod schema;
pub mod server;
pub mod source;
pub mod stats;
pub mod traits;
pub mod visualize;

pub mod mocks;

pub use artifacts::ArtifactStore;
pub use class_mapping::ClassMapping;
pub use config::Config;
pub use errors::{Result, SegmentationError};
pub use loader::ModelLoader;
pub use mask::SegmentationMask;
pub use model::OnnxModel;
pub use pipeline::{Pipeline, Predictor};
pub use server::{router, AppState, RouterOptions};
pub use traits::*;
pub use visualize::Visualizer;

#[cfg(test)]
pub use mocks::*;
