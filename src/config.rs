use clap::Parser;
use std::path::PathBuf;

use crate::{
    errors::{Result, SegmentationError},
    model::SessionOptions,
    source::{LocalArtifactSource, MlflowArtifactSource},
    traits::ArtifactSource,
};

pub const DEFAULT_API_PREFIX: &str = "/api/v1/segmentation";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;
pub const ANY_ORIGIN: &str = "*";

/// Every option can also come from the environment (or a `.env` file).
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(short, long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    #[arg(long, env = "API_PREFIX", default_value = DEFAULT_API_PREFIX)]
    pub api_prefix: String,

    /// MLflow tracking server the model run lives on.
    #[arg(long, env = "MLFLOW_TRACKING_URI")]
    pub tracking_uri: Option<String>,

    #[arg(long, env = "MLFLOW_TRACKING_TOKEN", hide_env_values = true)]
    pub tracking_token: Option<String>,

    #[arg(long, env = "RUN_ID")]
    pub run_id: Option<String>,

    /// Local directory with the run's artifacts; takes precedence over MLflow.
    #[arg(long, env = "ARTIFACT_DIR")]
    pub artifact_dir: Option<PathBuf>,

    #[arg(long, env = "PREDICTIONS_DIR", default_value = "predictions")]
    pub predictions_dir: PathBuf,

    #[arg(
        long,
        env = "PERSIST_ARTIFACTS",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub persist_artifacts: bool,

    /// Fallback model input size when the graph's spatial dims are dynamic.
    #[arg(long, env = "IMG_SIZE", default_value_t = 224)]
    pub image_size: u32,

    #[arg(
        short, long, env = "NUM_THREADS",
        default_value_t = std::thread::available_parallelism().map_or(1, |n| n.get())
    )]
    pub num_threads: usize,

    /// CUDA device; CPU when unset.
    #[arg(short, long, env = "DEVICE_ID")]
    pub device_id: Option<i32>,

    #[arg(long, env = "FONT_PATH")]
    pub font_path: Option<PathBuf>,

    #[arg(long, env = "FRONTEND_URL")]
    pub frontend_url: Option<String>,

    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.image_size == 0 {
            return Err(SegmentationError::configuration("image size must be non-zero"));
        }
        if self.num_threads == 0 {
            return Err(SegmentationError::configuration("thread count must be non-zero"));
        }
        if !self.api_prefix.is_empty()
            && (!self.api_prefix.starts_with('/') || self.api_prefix.ends_with('/'))
        {
            return Err(SegmentationError::configuration(format!(
                "api prefix must start with '/' and must not end with '/', got {:?}",
                self.api_prefix
            )));
        }
        Ok(())
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            num_threads: self.num_threads,
            device_id: self.device_id,
            image_size: (self.image_size, self.image_size),
        }
    }

    /// Local directory if configured, otherwise the MLflow run.
    pub fn artifact_source(&self) -> Result<Box<dyn ArtifactSource>> {
        if let Some(dir) = &self.artifact_dir {
            return Ok(Box::new(LocalArtifactSource::new(dir)));
        }
        match (&self.tracking_uri, &self.run_id) {
            (Some(uri), Some(run_id)) => Ok(Box::new(MlflowArtifactSource::new(
                uri,
                run_id.clone(),
                self.tracking_token.clone(),
            ))),
            _ => Err(SegmentationError::configuration(
                "no model source: set ARTIFACT_DIR, or MLFLOW_TRACKING_URI and RUN_ID",
            )),
        }
    }

    /// Origins allowed by CORS: the local frontend plus `FRONTEND_URL`, which
    /// defaults to any origin (`*`).
    pub fn allowed_origins(&self) -> Vec<String> {
        let frontend = self
            .frontend_url
            .as_deref()
            .map_or(ANY_ORIGIN, |url| url.trim_end_matches('/'));
        vec![
            "http://localhost:3000".to_string(),
            "https://localhost:3000".to_string(),
            frontend.to_string(),
        ]
    }
}
