use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use walkdir::WalkDir;

use crate::{
    errors::{Result, SegmentationError},
    traits::ArtifactSource,
};

/// A directory laid out like a run's artifact root.
#[derive(Debug, Clone)]
pub struct LocalArtifactSource {
    root: PathBuf,
}

impl LocalArtifactSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArtifactSource for LocalArtifactSource {
    async fn fetch(&self, artifact_path: &str, destination: &Path) -> Result<PathBuf> {
        let source = self.root.join(artifact_path);
        let target = destination.join(artifact_path);
        tokio::task::spawn_blocking(move || copy_tree(&source, &target).map(|()| target))
            .await
            .map_err(|e| SegmentationError::load("artifact copy task", e))?
    }

    fn describe(&self) -> String {
        format!("local directory {}", self.root.display())
    }
}

fn copy_tree(source: &Path, target: &Path) -> Result<()> {
    let copy_error =
        |path: &Path, e: std::io::Error| SegmentationError::load(format!("artifact copy: {}", path.display()), e);

    if source.is_file() {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| copy_error(parent, e))?;
        }
        fs::copy(source, target).map_err(|e| copy_error(source, e))?;
        return Ok(());
    }

    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|e| SegmentationError::load("artifact directory walk", e))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| SegmentationError::load("artifact relative path", e))?;
        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&destination).map_err(|e| copy_error(&destination, e))?;
        } else {
            fs::copy(entry.path(), &destination).map_err(|e| copy_error(entry.path(), e))?;
        }
    }
    Ok(())
}

/// Artifacts of an MLflow run, fetched through the tracking server.
///
/// The tracking server proxies artifact storage, so storage credentials stay on the
/// server side.
pub struct MlflowArtifactSource {
    client: reqwest::Client,
    tracking_uri: String,
    run_id: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListArtifactsResponse {
    #[serde(default)]
    files: Vec<ArtifactFileInfo>,
}

#[derive(Debug, Deserialize)]
struct ArtifactFileInfo {
    path: String,
    #[serde(default)]
    is_dir: bool,
}

impl MlflowArtifactSource {
    pub fn new(tracking_uri: &str, run_id: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            tracking_uri: tracking_uri.trim_end_matches('/').to_string(),
            run_id: run_id.into(),
            token,
        }
    }

    fn get(&self, endpoint: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(format!("{}{}", self.tracking_uri, endpoint));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn list(&self, path: &str) -> Result<Vec<ArtifactFileInfo>> {
        let response = self
            .get("/api/2.0/mlflow/artifacts/list")
            .query(&[("run_id", self.run_id.as_str()), ("path", path)])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| SegmentationError::load(format!("artifact listing: {path}"), e))?;
        let listing: ListArtifactsResponse = response
            .json()
            .await
            .map_err(|e| SegmentationError::load(format!("artifact listing parse: {path}"), e))?;
        Ok(listing.files)
    }

    async fn download_file(&self, path: &str, destination: &Path) -> Result<()> {
        let bytes = self
            .get("/get-artifact")
            .query(&[("path", path), ("run_uuid", self.run_id.as_str())])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| SegmentationError::load(format!("artifact download: {path}"), e))?
            .bytes()
            .await?;

        let target = destination.join(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SegmentationError::load("artifact directory creation", e))?;
        }
        tokio::fs::write(&target, &bytes)
            .await
            .map_err(|e| SegmentationError::load(format!("artifact write: {}", target.display()), e))?;
        debug!(path, size = bytes.len(), "downloaded artifact");
        Ok(())
    }
}

#[async_trait]
impl ArtifactSource for MlflowArtifactSource {
    async fn fetch(&self, artifact_path: &str, destination: &Path) -> Result<PathBuf> {
        let mut pending = vec![artifact_path.to_string()];
        let mut is_directory = false;

        while let Some(path) = pending.pop() {
            let entries = self.list(&path).await?;
            if entries.is_empty() && path == artifact_path {
                // listing a plain file yields nothing
                self.download_file(&path, destination).await?;
                continue;
            }
            is_directory = true;
            for entry in entries {
                if entry.is_dir {
                    pending.push(entry.path);
                } else {
                    self.download_file(&entry.path, destination).await?;
                }
            }
        }

        let local = destination.join(artifact_path);
        if is_directory {
            tokio::fs::create_dir_all(&local)
                .await
                .map_err(|e| SegmentationError::load("artifact directory creation", e))?;
        }
        Ok(local)
    }

    fn describe(&self) -> String {
        format!("MLflow run {} at {}", self.run_id, self.tracking_uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Query,
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::get,
        Json, Router,
    };
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const MODEL_BYTES: &[u8] = b"onnx graph";
    const MAPPING_BYTES: &[u8] = br#"{"group_names": ["flat"]}"#;

    async fn list_artifacts(Query(query): Query<HashMap<String, String>>) -> Response {
        let path = query.get("path").map(String::as_str).unwrap_or_default();
        let files = match path {
            "model" => json!([
                {"path": "model/MLmodel", "is_dir": false, "file_size": 12},
                {"path": "model/data", "is_dir": true}
            ]),
            "model/data" => json!([
                {"path": "model/data/model.onnx", "is_dir": false, "file_size": 10}
            ]),
            // MLflow answers a file path with an empty listing
            "class_mapping.json" => return Json(json!({})).into_response(),
            _ => return StatusCode::NOT_FOUND.into_response(),
        };
        Json(json!({ "root_uri": "mlflow-artifacts:/run", "files": files })).into_response()
    }

    async fn get_artifact(Query(query): Query<HashMap<String, String>>) -> Response {
        if query.get("run_uuid").map(String::as_str) != Some("run-42") {
            return StatusCode::BAD_REQUEST.into_response();
        }
        match query.get("path").map(String::as_str) {
            Some("model/MLmodel") => b"flavors: {}".to_vec().into_response(),
            Some("model/data/model.onnx") => MODEL_BYTES.to_vec().into_response(),
            Some("class_mapping.json") => MAPPING_BYTES.to_vec().into_response(),
            _ => StatusCode::NOT_FOUND.into_response(),
        }
    }

    async fn spawn_tracking_server() -> String {
        let app = Router::new()
            .route("/api/2.0/mlflow/artifacts/list", get(list_artifacts))
            .route("/get-artifact", get(get_artifact));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{address}/")
    }

    #[tokio::test]
    async fn test_mlflow_source_downloads_directories_and_files() -> Result<()> {
        let uri = spawn_tracking_server().await;
        let source = MlflowArtifactSource::new(&uri, "run-42", Some("token".to_string()));
        let destination = TempDir::new()?;

        let model_dir = source.fetch("model", destination.path()).await?;
        assert_eq!(model_dir, destination.path().join("model"));
        assert!(model_dir.is_dir());
        assert_eq!(fs::read(model_dir.join("data/model.onnx"))?, MODEL_BYTES);
        assert!(model_dir.join("MLmodel").is_file());

        let mapping = source.fetch("class_mapping.json", destination.path()).await?;
        assert_eq!(mapping, destination.path().join("class_mapping.json"));
        assert_eq!(fs::read(mapping)?, MAPPING_BYTES);
        Ok(())
    }

    #[tokio::test]
    async fn test_mlflow_source_http_error_is_load_error() -> Result<()> {
        let uri = spawn_tracking_server().await;
        let destination = TempDir::new()?;

        let source = MlflowArtifactSource::new(&uri, "run-42", None);
        assert!(matches!(
            source.fetch("missing", destination.path()).await,
            Err(SegmentationError::Load { .. })
        ));

        // listing works, downloads are refused for another run
        let other_run = MlflowArtifactSource::new(&uri, "run-7", None);
        assert!(matches!(
            other_run.fetch("class_mapping.json", destination.path()).await,
            Err(SegmentationError::Load { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_local_source_copies_directories_and_files() -> Result<()> {
        let artifacts = TempDir::new()?;
        fs::create_dir_all(artifacts.path().join("model/data"))?;
        fs::write(artifacts.path().join("model/data/model.onnx"), b"onnx")?;
        fs::write(artifacts.path().join("model/MLmodel"), b"flavors: {}")?;
        fs::write(artifacts.path().join("class_mapping.json"), b"{}")?;

        let destination = TempDir::new()?;
        let source = LocalArtifactSource::new(artifacts.path());

        let model_dir = source.fetch("model", destination.path()).await?;
        assert_eq!(model_dir, destination.path().join("model"));
        assert_eq!(fs::read(model_dir.join("data/model.onnx"))?, b"onnx");
        assert!(model_dir.join("MLmodel").is_file());

        let mapping = source.fetch("class_mapping.json", destination.path()).await?;
        assert_eq!(fs::read(mapping)?, b"{}");
        Ok(())
    }

    #[tokio::test]
    async fn test_local_source_missing_artifact() -> Result<()> {
        let artifacts = TempDir::new()?;
        let destination = TempDir::new()?;
        let source = LocalArtifactSource::new(artifacts.path());
        assert!(matches!(
            source.fetch("model", destination.path()).await,
            Err(SegmentationError::Load { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_mlflow_source_normalizes_uri() {
        let source = MlflowArtifactSource::new("http://mlflow:5000/", "abc123", None);
        assert_eq!(source.tracking_uri, "http://mlflow:5000");
        assert_eq!(source.describe(), "MLflow run abc123 at http://mlflow:5000");
    }
}
