use std::path::{Path, PathBuf};

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::{
    class_mapping::ClassMapping,
    errors::{Result, SegmentationError},
    model::{OnnxModel, SessionOptions},
    pipeline::Predictor,
    traits::ArtifactSource,
};

pub const MODEL_ARTIFACT: &str = "model";
pub const CLASS_MAPPING_ARTIFACT: &str = "class_mapping.json";
pub const MODEL_EXTENSION: &str = "onnx";

/// Relative to the downloaded model directory, tried before scanning.
const MODEL_FILE_CANDIDATES: &[&str] = &["data/model.onnx", "model.onnx"];

/// Fetches model and class mapping from an artifact source and builds a [`Predictor`].
pub struct ModelLoader {
    source: Box<dyn ArtifactSource>,
    options: SessionOptions,
}

impl ModelLoader {
    pub fn new(source: Box<dyn ArtifactSource>, options: SessionOptions) -> Self {
        Self { source, options }
    }

    /// Downloads into a temporary directory that is removed on every return path.
    /// Nothing is retried.
    pub async fn load(&self) -> Result<Predictor> {
        info!(source = %self.source.describe(), "loading model");
        let workspace = tempfile::Builder::new()
            .prefix("segmentation-model-")
            .tempdir()
            .map_err(|e| SegmentationError::load("temporary directory creation", e))?;

        let model_dir = self.source.fetch(MODEL_ARTIFACT, workspace.path()).await?;
        let model_path = locate_model_file(&model_dir)?;
        info!(path = %model_path.display(), "model file located");

        let mapping_path = self
            .source
            .fetch(CLASS_MAPPING_ARTIFACT, workspace.path())
            .await?;
        let mapping_bytes = tokio::fs::read(&mapping_path).await.map_err(|e| {
            SegmentationError::load(format!("class mapping read: {}", mapping_path.display()), e)
        })?;
        let class_mapping = ClassMapping::from_json(&mapping_bytes)?;

        let options = self.options.clone();
        let model = tokio::task::spawn_blocking(move || OnnxModel::new(&model_path, &options))
            .await
            .map_err(|e| SegmentationError::load("model session task", e))??;

        let predictor = Predictor::new(Box::new(model), class_mapping)?;
        info!(
            model = %predictor.descriptor().name,
            num_classes = predictor.class_mapping().len(),
            "model and class mapping loaded"
        );
        Ok(predictor)
    }
}

/// Conventional locations first, then the first `.onnx` file found anywhere below.
pub fn locate_model_file(model_dir: &Path) -> Result<PathBuf> {
    if model_dir.is_file() {
        return Ok(model_dir.to_path_buf());
    }

    if let Some(path) = MODEL_FILE_CANDIDATES
        .iter()
        .map(|candidate| model_dir.join(candidate))
        .find(|path| path.is_file())
    {
        return Ok(path);
    }

    let mut found: Vec<PathBuf> = WalkDir::new(model_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(MODEL_EXTENSION))
        })
        .collect();

    if found.len() > 1 {
        warn!(count = found.len(), "several model files found, using the first");
    }
    if found.is_empty() {
        return Err(SegmentationError::load(
            "model file lookup",
            format!("no .{MODEL_EXTENSION} file under {}", model_dir.display()),
        ));
    }
    Ok(found.swap_remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::LocalArtifactSource;
    use std::fs;
    use tempfile::TempDir;

    fn options() -> SessionOptions {
        SessionOptions {
            num_threads: 1,
            device_id: None,
            image_size: (224, 224),
        }
    }

    #[test]
    fn test_locate_prefers_conventional_paths() -> Result<()> {
        let dir = TempDir::new()?;
        fs::create_dir_all(dir.path().join("data"))?;
        fs::create_dir_all(dir.path().join("aaa"))?;
        fs::write(dir.path().join("aaa/other.onnx"), b"x")?;
        fs::write(dir.path().join("model.onnx"), b"x")?;
        assert_eq!(locate_model_file(dir.path())?, dir.path().join("model.onnx"));

        fs::write(dir.path().join("data/model.onnx"), b"x")?;
        assert_eq!(
            locate_model_file(dir.path())?,
            dir.path().join("data/model.onnx")
        );
        Ok(())
    }

    #[test]
    fn test_locate_falls_back_to_scan() -> Result<()> {
        let dir = TempDir::new()?;
        fs::create_dir_all(dir.path().join("exported/v1"))?;
        fs::write(dir.path().join("exported/v1/unet.ONNX"), b"x")?;
        fs::write(dir.path().join("exported/MLmodel"), b"x")?;
        assert_eq!(
            locate_model_file(dir.path())?,
            dir.path().join("exported/v1/unet.ONNX")
        );
        Ok(())
    }

    #[test]
    fn test_locate_without_model_fails() -> Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("weights.keras"), b"x")?;
        assert!(matches!(
            locate_model_file(dir.path()),
            Err(SegmentationError::Load { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_load_fails_cleanly_without_model() -> Result<()> {
        let artifacts = TempDir::new()?;
        fs::create_dir_all(artifacts.path().join("model"))?;
        fs::write(artifacts.path().join(CLASS_MAPPING_ARTIFACT), b"{}")?;

        let loader = ModelLoader::new(Box::new(LocalArtifactSource::new(artifacts.path())), options());
        assert!(matches!(
            loader.load().await,
            Err(SegmentationError::Load { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_class_mapping() -> Result<()> {
        let artifacts = TempDir::new()?;
        fs::create_dir_all(artifacts.path().join("model"))?;
        fs::write(artifacts.path().join("model/model.onnx"), b"x")?;
        fs::write(artifacts.path().join(CLASS_MAPPING_ARTIFACT), b"[not json")?;

        let loader = ModelLoader::new(Box::new(LocalArtifactSource::new(artifacts.path())), options());
        match loader.load().await {
            Err(err @ SegmentationError::Load { .. }) => {
                assert!(err.detail().contains("class mapping parse"));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("invalid class mapping was accepted"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_load_rejects_corrupt_model() -> Result<()> {
        let artifacts = TempDir::new()?;
        fs::create_dir_all(artifacts.path().join("model/data"))?;
        fs::write(artifacts.path().join("model/data/model.onnx"), b"definitely not onnx")?;
        fs::write(artifacts.path().join(CLASS_MAPPING_ARTIFACT), b"{}")?;

        let loader = ModelLoader::new(Box::new(LocalArtifactSource::new(artifacts.path())), options());
        assert!(loader.load().await.is_err());
        Ok(())
    }
}
