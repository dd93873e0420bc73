use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, RgbImage};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    errors::{Result, SegmentationError},
    image_io::{encode_dynamic_png, encode_png},
    schema::{FullPredictionResult, PredictionResult, PredictionSummary},
};

pub const RESULT_SUFFIX: &str = "-result";
pub const ORIGINAL_FILE: &str = "original.png";
pub const MASK_FILE: &str = "prediction_mask.png";
pub const OVERLAY_FILE: &str = "visualization_overlay.png";
pub const SIDE_BY_SIDE_FILE: &str = "visualization_side_by_side.png";
pub const RESULT_FILE: &str = "prediction_result.json";
pub const FULL_RESULT_FILE: &str = "prediction_result_full.json";

/// Number of summaries returned by the listing endpoint.
pub const RECENT_PREDICTIONS: usize = 20;

/// Everything written for one prediction.
pub struct ArtifactBundle<'a> {
    pub original: &'a DynamicImage,
    pub mask: &'a RgbImage,
    pub overlay: &'a RgbImage,
    pub side_by_side: &'a RgbImage,
    pub full: &'a FullPredictionResult,
}

/// Timestamped result directories under a single root.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| {
            SegmentationError::persistence(&self.root, "predictions directory creation", e)
        })
    }

    pub fn result_dir(&self, timestamp: &str) -> PathBuf {
        self.root.join(format!("{timestamp}{RESULT_SUFFIX}"))
    }

    /// Writes the bundle to `<root>/<timestamp>-result/` and returns that directory.
    ///
    /// Two predictions within the same second share a directory; the later one
    /// overwrites the earlier files.
    pub fn persist(&self, bundle: &ArtifactBundle<'_>) -> Result<PathBuf> {
        let dir = self.result_dir(&bundle.full.result.timestamp);
        if dir.exists() {
            warn!(
                path = %dir.display(),
                "result directory already exists, overwriting artifacts from the same second"
            );
        }
        fs::create_dir_all(&dir)
            .map_err(|e| SegmentationError::persistence(&dir, "result directory creation", e))?;

        write_file(&dir.join(ORIGINAL_FILE), &encode_dynamic_png(bundle.original)?)?;
        write_file(&dir.join(MASK_FILE), &encode_png(bundle.mask)?)?;
        write_file(&dir.join(OVERLAY_FILE), &encode_png(bundle.overlay)?)?;
        write_file(&dir.join(SIDE_BY_SIDE_FILE), &encode_png(bundle.side_by_side)?)?;
        write_json(&dir.join(RESULT_FILE), &bundle.full.result)?;
        write_json(&dir.join(FULL_RESULT_FILE), bundle.full)?;

        debug!(path = %dir.display(), "artifacts written");
        Ok(dir)
    }

    /// Most recent summaries first, by reverse directory-name order.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<PredictionSummary>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(SegmentationError::persistence(
                    &self.root,
                    "predictions directory listing",
                    e,
                ))
            }
        };

        let mut folders: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.ends_with(RESULT_SUFFIX))
            .collect();
        folders.sort_unstable_by(|a, b| b.cmp(a));

        let summaries = folders
            .into_iter()
            .filter_map(|folder| {
                let path = self.root.join(&folder).join(RESULT_FILE);
                match read_result(&path) {
                    Ok(Some(result)) => Some(PredictionSummary::from_result(result, folder)),
                    Ok(None) => None,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e.detail(), "skipping unreadable prediction result");
                        None
                    }
                }
            })
            .take(limit)
            .collect();
        Ok(summaries)
    }
}

fn read_result(path: &Path) -> Result<Option<PredictionResult>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(SegmentationError::persistence(path, "result read", e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| SegmentationError::persistence(path, "result parse", e))
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).map_err(|e| SegmentationError::persistence(path, "artifact write", e))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| SegmentationError::persistence(path, "json serialization", e))?;
    write_file(path, &bytes)
}
