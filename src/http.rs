//! HTTP surface: `POST /predict` (multipart field `image`) and `GET /health`.

use crate::config::{ALLOWED_ORIGIN, ServerConfig};
use crate::predictor::{PredictError, PredictionResult, Predictor, predict_blocking};
use axum::extract::multipart::MultipartError;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Multipart field carrying the upload.
pub const IMAGE_FIELD: &str = "image";

#[derive(Clone)]
pub struct AppState {
    predictor: Predictor,
    timeout: Option<Duration>,
}

impl AppState {
    pub fn new(predictor: Predictor, timeout: Option<Duration>) -> Self {
        Self { predictor, timeout }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub details: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("No image uploaded: {0}")]
    MissingImage(String),
    #[error("Invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error("Not a multipart upload: {0}")]
    NotMultipart(#[from] MultipartRejection),
    #[error(transparent)]
    Predict(#[from] PredictError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, details) = match self {
            ApiError::MissingImage(details) => {
                (StatusCode::BAD_REQUEST, "No image uploaded", details)
            }
            ApiError::Multipart(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                (StatusCode::PAYLOAD_TOO_LARGE, "Image too large", e.body_text())
            }
            ApiError::Multipart(e) => (StatusCode::BAD_REQUEST, "No image uploaded", e.body_text()),
            ApiError::NotMultipart(e) => {
                (StatusCode::BAD_REQUEST, "No image uploaded", e.body_text())
            }
            ApiError::Predict(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error processing the image",
                e.to_string(),
            ),
        };
        let body = ErrorBody {
            error: error.to_string(),
            details,
        };
        (status, Json(body)).into_response()
    }
}

/// Fixed allow-list: one origin, GET/POST, `Content-Type`.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(HeaderValue::from_static(ALLOWED_ORIGIN))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

pub fn router(predictor: Predictor, config: &ServerConfig) -> Router {
    let state = AppState::new(predictor, config.inference_timeout());

    Router::new()
        .route("/predict", post(predict))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(config.body_limit_bytes))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn predict(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResult>, ApiError> {
    let mut multipart = multipart?;
    let mut image = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(IMAGE_FIELD) {
            image = Some(field.bytes().await?);
            break;
        }
    }

    let image = match image {
        Some(bytes) if !bytes.is_empty() => bytes,
        Some(_) => {
            warn!("uploaded image is empty");
            return Err(ApiError::MissingImage(format!(
                "multipart field `{IMAGE_FIELD}` is empty"
            )));
        }
        None => {
            warn!("request has no image field");
            return Err(ApiError::MissingImage(format!(
                "multipart field `{IMAGE_FIELD}` is required"
            )));
        }
    };

    info!(bytes = image.len(), "image received");
    let result = predict_blocking(state.predictor, image, state.timeout).await?;
    Ok(Json(result))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
