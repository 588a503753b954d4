//! Per-request prediction lifecycle: decode, infer, pick the best class.
//!
//! A request moves through `Preprocessing -> Inferring -> MappingResult` and
//! ends either with a [`PredictionResult`] or a [`PredictError`]. Nothing is
//! retried. Every stage logs its outcome.

use crate::config::ModelSignature;
use crate::labels::LabelTable;
use crate::model::{InferenceEngine, ModelError};
use crate::preprocess::{PreprocessError, Preprocessor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub predicted_class: String,
    pub predicted_class_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Preprocessing,
    Inferring,
    MappingResult,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Preprocessing => "preprocessing",
            Stage::Inferring => "inferring",
            Stage::MappingResult => "mapping_result",
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PredictError {
    #[error(transparent)]
    Decode(#[from] PreprocessError),
    #[error(transparent)]
    Engine(#[from] ModelError),
    #[error("Model did not return an output tensor")]
    MissingOutput,
    #[error("Model returned an empty output tensor")]
    EmptyOutput,
    #[error("Prediction timed out after {0:?}")]
    TimedOut(Duration),
    #[error("Prediction task aborted: {0}")]
    Aborted(String),
}

impl PredictError {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PredictError::Decode(_) => Some(Stage::Preprocessing),
            PredictError::Engine(_) | PredictError::MissingOutput => Some(Stage::Inferring),
            PredictError::EmptyOutput => Some(Stage::MappingResult),
            PredictError::TimedOut(_) | PredictError::Aborted(_) => None,
        }
    }
}

/// Index of the largest score; the lowest index wins ties. NaN never wins.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((i, score));
        }
    }
    // All-NaN output still names a class, the first one.
    best.map(|(i, _)| i)
        .or_else(|| (!scores.is_empty()).then_some(0))
}

/// Request handler state shared by every transport. Cloning is cheap.
#[derive(Clone)]
pub struct Predictor {
    engine: Arc<dyn InferenceEngine>,
    labels: Arc<LabelTable>,
    preprocessor: Preprocessor,
    signature: ModelSignature,
}

impl Predictor {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        labels: Arc<LabelTable>,
        preprocessor: Preprocessor,
        signature: ModelSignature,
    ) -> Self {
        Self {
            engine,
            labels,
            preprocessor,
            signature,
        }
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    /// Runs one request to completion on the calling thread.
    pub fn predict(&self, raw: &[u8]) -> Result<PredictionResult, PredictError> {
        let started = Instant::now();
        debug!(bytes = raw.len(), "received image");

        let result = self.run_stages(raw);
        match &result {
            Ok(prediction) => info!(
                class = %prediction.predicted_class,
                index = prediction.predicted_class_index,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "prediction complete"
            ),
            Err(err) => error!(
                stage = %err.stage().map(|s| s.to_string()).unwrap_or_default(),
                error = %err,
                "prediction failed"
            ),
        }
        result
    }

    fn run_stages(&self, raw: &[u8]) -> Result<PredictionResult, PredictError> {
        let tensor = self.preprocessor.preprocess(raw)?;
        debug!(stage = %Stage::Preprocessing, shape = ?tensor.shape(), "ok");

        let scores = self
            .engine
            .run(&self.signature, &tensor)?
            .ok_or(PredictError::MissingOutput)?;
        debug!(stage = %Stage::Inferring, scores = scores.len(), "ok");

        let index = argmax(&scores).ok_or(PredictError::EmptyOutput)?;
        let predicted_class = self.labels.resolve(index).to_string();
        debug!(stage = %Stage::MappingResult, index, class = %predicted_class, "ok");

        Ok(PredictionResult {
            predicted_class,
            predicted_class_index: index,
        })
    }
}

/// Runs [`Predictor::predict`] on the blocking pool, optionally bounded by `timeout`.
///
/// A timed-out task keeps running in the background; only the caller stops waiting.
pub async fn predict_blocking<B>(
    predictor: Predictor,
    raw: B,
    timeout: Option<Duration>,
) -> Result<PredictionResult, PredictError>
where
    B: AsRef<[u8]> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(move || predictor.predict(raw.as_ref()));
    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined,
            Err(_) => {
                error!(timeout_ms = limit.as_millis() as u64, "prediction timed out");
                return Err(PredictError::TimedOut(limit));
            }
        },
        None => task.await,
    };
    joined.map_err(|e| {
        error!(error = %e, "prediction task aborted");
        PredictError::Aborted(e.to_string())
    })?
}
