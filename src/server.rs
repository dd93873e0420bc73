use std::sync::{Arc, OnceLock};

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::{
    artifacts::RECENT_PREDICTIONS,
    config::ANY_ORIGIN,
    errors::SegmentationError,
    image_io::decode_image,
    pipeline::{Pipeline, Predictor},
    schema::{
        ErrorResponse, HealthResponse, ModelInfoResponse, PredictionResponse, PredictionsResponse,
    },
};

const UPLOAD_FIELD: &str = "file";
const DEFAULT_FILENAME: &str = "image.png";

/// Shared by every request. The predictor slot is filled at most once.
pub struct AppState {
    predictor: OnceLock<Predictor>,
    pipeline: Pipeline,
    api_prefix: String,
}

impl AppState {
    pub fn new(pipeline: Pipeline, api_prefix: impl Into<String>) -> Self {
        Self {
            predictor: OnceLock::new(),
            pipeline,
            api_prefix: api_prefix.into(),
        }
    }

    pub fn install(&self, predictor: Predictor) -> crate::Result<()> {
        self.predictor
            .set(predictor)
            .map_err(|_| SegmentationError::configuration("a model is already installed"))
    }

    pub fn predictor(&self) -> Option<&Predictor> {
        self.predictor.get()
    }

    pub fn model_loaded(&self) -> bool {
        self.predictor.get().is_some()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}

#[derive(Debug, Clone)]
pub struct RouterOptions {
    pub max_upload_bytes: usize,
    pub allowed_origins: Vec<String>,
}

/// Error body is always `{"detail": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: detail.into(),
        }
    }
}

impl From<SegmentationError> for ApiError {
    fn from(err: SegmentationError) -> Self {
        if err.is_client_error() {
            warn!(error = %err, "rejected request");
            Self::bad_request(err.to_string())
        } else {
            let detail = err.detail();
            error!(error = %detail, "request failed");
            Self::internal(detail)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse { detail: self.detail })).into_response()
    }
}

pub fn router(state: Arc<AppState>, options: &RouterOptions) -> Router {
    let api = Router::new()
        .route("/predict", post(predict))
        .route("/health", get(health))
        .route("/model/info", get(model_info))
        .route("/predictions", get(list_predictions));

    let app = if state.api_prefix.is_empty() {
        Router::new().merge(api)
    } else {
        Router::new().nest(&state.api_prefix, api)
    };

    app.route("/", get(root))
        .layer(DefaultBodyLimit::max(options.max_upload_bytes))
        .layer(cors_layer(&options.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == ANY_ORIGIN) {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

async fn root(State(state): State<Arc<AppState>>) -> Json<Value> {
    let prefix = &state.api_prefix;
    Json(json!({
        "message": "Cityscapes semantic segmentation API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "predict": format!("{prefix}/predict"),
            "health": format!("{prefix}/health"),
            "model_info": format!("{prefix}/model/info"),
            "predictions": format!("{prefix}/predictions"),
        }
    }))
}

async fn predict(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<PredictionResponse>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let content_type = field.content_type().unwrap_or_default().to_string();
        if !content_type.starts_with("image/") {
            return Err(ApiError::bad_request("The uploaded file must be an image"));
        }
        let filename = field
            .file_name()
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_FILENAME)
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        upload = Some((filename, bytes));
        break;
    }

    let (filename, bytes) =
        upload.ok_or_else(|| ApiError::bad_request("Missing multipart field 'file'"))?;
    info!(filename = %filename, size = bytes.len(), "prediction requested");

    let response = tokio::task::spawn_blocking(move || {
        let image = decode_image(&bytes)?;
        let predictor = state
            .predictor()
            .ok_or(SegmentationError::ModelUnavailable)?;
        state.pipeline.run(predictor, &image, &filename)
    })
    .await
    .map_err(|e| ApiError::internal(e.to_string()))??;

    Ok(Json(response))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        model_loaded: state.model_loaded(),
    })
}

async fn model_info(State(state): State<Arc<AppState>>) -> Json<ModelInfoResponse> {
    Json(match state.predictor() {
        Some(predictor) => ModelInfoResponse::Loaded(Box::new(predictor.model_info())),
        None => ModelInfoResponse::unavailable(),
    })
}

async fn list_predictions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PredictionsResponse>, ApiError> {
    let predictions = tokio::task::spawn_blocking(move || {
        state.pipeline.store().list_recent(RECENT_PREDICTIONS)
    })
    .await
    .map_err(|e| ApiError::internal(e.to_string()))??;
    Ok(Json(PredictionsResponse { predictions }))
}
