use image_classifier_server::{ServerConfig, server, telemetry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init();

    let config = ServerConfig::load()?;
    tracing::info!(?config, "configuration loaded");

    let predictor = server::build_predictor(&config)?;
    server::run(config, predictor).await?;
    Ok(())
}
