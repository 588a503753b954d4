//! Startup wiring: load labels and model, then serve HTTP and gRPC until Ctrl-C.

use crate::config::{ConfigError, ServerConfig};
use crate::grpc::{ClassifierService, FetchLimits, image_classifier_service};
use crate::http;
use crate::labels::{LabelError, LabelTable};
use crate::model::{InferenceEngine, ModelError, OrtEngine};
use crate::predictor::Predictor;
use crate::preprocess::Preprocessor;
use std::sync::Arc;
use tokio::net::TcpListener;
use tonic::transport::Server;
use tracing::info;

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to load labels: {0}")]
    Labels(#[from] LabelError),
    #[error("Failed to load model: {0}")]
    Model(#[from] ModelError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
    #[error("gRPC reflection error: {0}")]
    Reflection(#[from] tonic_reflection::server::Error),
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Loads everything a [`Predictor`] needs. Any failure here is fatal.
pub fn build_predictor(config: &ServerConfig) -> Result<Predictor, ServerError> {
    let labels = LabelTable::load(&config.labels_path)?;
    let engine = OrtEngine::new(&config.model_path)?;

    let inputs: Vec<&str> = engine.input_names().collect();
    if !inputs.contains(&config.signature.input_name.as_str()) {
        tracing::warn!(
            expected = %config.signature.input_name,
            found = ?inputs,
            "model does not declare the configured input name"
        );
    }
    let outputs: Vec<&str> = engine.output_names().collect();
    if !outputs.contains(&config.signature.output_name.as_str()) {
        tracing::warn!(
            expected = %config.signature.output_name,
            found = ?outputs,
            "model does not declare the configured output name"
        );
    }

    let engine: Arc<dyn InferenceEngine> = Arc::new(engine);
    Ok(Predictor::new(
        engine,
        Arc::new(labels),
        Preprocessor::new(config.image_size.validate()?),
        config.signature.clone(),
    ))
}

pub async fn run(config: ServerConfig, predictor: Predictor) -> Result<(), ServerError> {
    let app = http::router(predictor.clone(), &config);
    let listener = TcpListener::bind(config.http_addr).await?;
    info!("HTTP server listening on {}", listener.local_addr()?);
    let http_server = async {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(ServerError::from)
    };

    let grpc_server = async {
        let Some(addr) = config.grpc_addr else {
            return Ok::<(), ServerError>(());
        };
        let reflection_service = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(image_classifier_service::FILE_DESCRIPTOR_SET)
            .build_v1()?;
        let classifier = ClassifierService::new(
            predictor,
            config.inference_timeout(),
            FetchLimits::from_config(&config),
        )?;

        info!("gRPC server listening on {}", addr);
        Server::builder()
            .add_service(classifier.into_server())
            .add_service(reflection_service)
            .serve_with_shutdown(addr, shutdown_signal())
            .await
            .map_err(ServerError::from)
    };

    tokio::try_join!(http_server, grpc_server)?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
