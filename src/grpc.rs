use crate::config::ServerConfig;
use crate::predictor::{PredictError, Predictor, predict_blocking};
use std::time::Duration;
use tonic::{Request, Response, Status};

// Generated from proto/image_classifier.proto.
pub mod image_classifier_service {
    tonic::include_proto!("image_classifier_service");
    pub(crate) const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("image_classifier_descriptor");
}

use image_classifier_service::classify_request::ImageSource;
use image_classifier_service::image_classifier_server::{ImageClassifier, ImageClassifierServer};
use image_classifier_service::{ClassifyRequest, ClassifyResponse};

/// Bounds on downloading an `image_url`.
#[derive(Debug, Clone, Copy)]
pub struct FetchLimits {
    pub timeout: Duration,
    pub max_bytes: usize,
}

impl FetchLimits {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            timeout: config.fetch_timeout(),
            max_bytes: config.body_limit_bytes,
        }
    }
}

pub struct ClassifierService {
    predictor: Predictor,
    timeout: Option<Duration>,
    limits: FetchLimits,
    http: reqwest::Client,
}

impl ClassifierService {
    pub fn new(
        predictor: Predictor,
        timeout: Option<Duration>,
        limits: FetchLimits,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(limits.timeout).build()?;
        Ok(Self {
            predictor,
            timeout,
            limits,
            http,
        })
    }

    pub fn into_server(self) -> ImageClassifierServer<Self> {
        ImageClassifierServer::new(self)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, Status> {
        let max = self.limits.max_bytes;
        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(download_error)?;

        if response.content_length().is_some_and(|len| len > max as u64) {
            return Err(too_large(max));
        }
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(download_error)? {
            if body.len() + chunk.len() > max {
                return Err(too_large(max));
            }
            body.extend_from_slice(&chunk);
        }
        tracing::debug!(%url, bytes = body.len(), "image downloaded");
        Ok(body)
    }
}

fn download_error(e: reqwest::Error) -> Status {
    let message = format!("Failed to download image: {e}");
    if e.is_timeout() {
        Status::deadline_exceeded(message)
    } else {
        Status::invalid_argument(message)
    }
}

fn too_large(max: usize) -> Status {
    tracing::warn!(max_bytes = max, "image download exceeds limit");
    Status::invalid_argument(format!("Image exceeds the {max} byte limit"))
}

fn to_status(err: PredictError) -> Status {
    match err {
        PredictError::Decode(e) => Status::invalid_argument(e.to_string()),
        PredictError::TimedOut(limit) => {
            Status::deadline_exceeded(format!("Prediction timed out after {limit:?}"))
        }
        other => Status::internal(other.to_string()),
    }
}

#[tonic::async_trait]
impl ImageClassifier for ClassifierService {
    async fn classify(
        &self,
        request: Request<ClassifyRequest>,
    ) -> Result<Response<ClassifyResponse>, Status> {
        let request = request.into_inner();
        let request_id = request.request_id;
        tracing::info!(%request_id, "classify request");

        let raw = match request.image_source {
            Some(ImageSource::ImageData(data)) if !data.is_empty() => data,
            Some(ImageSource::ImageUrl(url)) if !url.is_empty() => self.fetch(&url).await?,
            _ => return Err(Status::invalid_argument("No valid image data provided")),
        };

        let result = predict_blocking(self.predictor.clone(), raw, self.timeout)
            .await
            .map_err(to_status)?;

        Ok(Response::new(ClassifyResponse {
            request_id,
            predicted_class: result.predicted_class,
            predicted_class_index: result.predicted_class_index as u64,
        }))
    }
}
