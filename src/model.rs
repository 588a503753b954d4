use crate::config::ModelSignature;
use crate::preprocess::InputTensor;
use ort::error::Error as OrtError;
use ort::inputs;
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::{Session, SessionOutputs};
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum ModelError {
    #[error("ONNX Runtime error: {0}")]
    Ort(#[from] OrtError),
    #[error("Invalid path for model file: {0}")]
    InvalidPath(String),
    #[error("Inference engine failure: {0}")]
    Engine(String),
}

/// Runs a loaded model. Implementations must tolerate concurrent calls.
pub trait InferenceEngine: Send + Sync {
    /// Feeds `input` under `signature.input_name` and returns the f32 scores
    /// found under `signature.output_name`, or `None` if the model produced no
    /// such output. Other outputs are never read.
    fn run(
        &self,
        signature: &ModelSignature,
        input: &InputTensor,
    ) -> Result<Option<Vec<f32>>, ModelError>;
}

pub struct OrtEngine {
    session: Session,
}

impl OrtEngine {
    pub fn new(model_path: &Path) -> Result<Self, ModelError> {
        if !model_path.exists() {
            return Err(ModelError::InvalidPath(format!(
                "Model file not found: {:?}",
                model_path
            )));
        }

        tracing::info!(path = ?model_path, "loading ONNX model");
        let session = SessionBuilder::new()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(num_cpus::get())?
            .commit_from_file(model_path)?;

        for input in &session.inputs {
            tracing::info!(name = %input.name, kind = ?input.input_type, "model input");
        }
        for output in &session.outputs {
            tracing::info!(name = %output.name, kind = ?output.output_type, "model output");
        }

        Ok(Self { session })
    }

    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.session.inputs.iter().map(|i| i.name.as_str())
    }

    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.session.outputs.iter().map(|o| o.name.as_str())
    }
}

impl InferenceEngine for OrtEngine {
    fn run(
        &self,
        signature: &ModelSignature,
        input: &InputTensor,
    ) -> Result<Option<Vec<f32>>, ModelError> {
        let inputs = inputs![signature.input_name.as_str() => input.view()]?;
        let outputs: SessionOutputs = self.session.run(inputs)?;

        let Some(value) = outputs.get(&signature.output_name) else {
            return Ok(None);
        };
        let scores = value.try_extract_tensor::<f32>()?;
        Ok(Some(scores.iter().copied().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::Predictor;
    use crate::preprocess::Preprocessor;
    use std::sync::Arc;

    #[test]
    fn missing_model_file_is_rejected_before_loading() {
        let err = OrtEngine::new(Path::new("/nonexistent/model.onnx"))
            .err()
            .expect("load should fail");
        assert!(matches!(err, ModelError::InvalidPath(ref msg) if msg.contains("model.onnx")));
    }

    /// Two outputs, like exported classifiers that emit an int64 `label`
    /// next to f32 scores. Only f32 outputs convert.
    struct TwoHeaded;

    impl InferenceEngine for TwoHeaded {
        fn run(
            &self,
            signature: &ModelSignature,
            input: &InputTensor,
        ) -> Result<Option<Vec<f32>>, ModelError> {
            match signature.output_name.as_str() {
                "label" => Err(ModelError::Engine("`label` is int64, not f32".into())),
                "probabilities" => Ok(Some(vec![input.as_slice().iter().sum(), 0.5])),
                _ => Ok(None),
            }
        }
    }

    fn blank_tensor() -> InputTensor {
        Preprocessor::default()
            .preprocess_image(&image::DynamicImage::new_luma8(2, 2))
            .unwrap()
    }

    #[test]
    fn unrelated_non_float_outputs_do_not_break_prediction() {
        let engine: Arc<dyn InferenceEngine> = Arc::new(TwoHeaded);
        let signature = ModelSignature {
            input_name: "input".into(),
            output_name: "probabilities".into(),
        };
        let predictor = Predictor::new(
            engine,
            Arc::new(["zero", "half"].into_iter().collect()),
            Preprocessor::default(),
            signature,
        );

        let mut png = std::io::Cursor::new(Vec::new());
        image::DynamicImage::new_luma8(3, 3)
            .write_to(&mut png, image::ImageFormat::Png)
            .unwrap();
        let result = predictor.predict(png.get_ref()).unwrap();
        assert_eq!(result.predicted_class, "half");
    }

    #[test]
    fn absent_output_name_yields_none() {
        let signature = ModelSignature {
            input_name: "input".into(),
            output_name: "logits".into(),
        };
        assert!(TwoHeaded.run(&signature, &blank_tensor()).unwrap().is_none());
    }
}
