use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cityscapes_seg_rs::{
    router, AppState, ArtifactStore, Config, ModelLoader, Pipeline, RouterOptions, Visualizer,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config = Config::parse();
    config.validate()?;

    info!("starting segmentation API");
    info!(
        tracking_uri = config.tracking_uri.as_deref().unwrap_or("-"),
        run_id = config.run_id.as_deref().unwrap_or("-"),
        artifact_dir = ?config.artifact_dir,
        persist_artifacts = config.persist_artifacts,
        "model source"
    );

    let store = ArtifactStore::new(&config.predictions_dir);
    store.ensure_root()?;
    let pipeline = Pipeline::new(
        store,
        Visualizer::new(config.font_path.as_deref()),
        config.persist_artifacts,
    );
    let state = Arc::new(AppState::new(pipeline, config.api_prefix.clone()));

    // the API serves (degraded) while the model loads, and keeps serving if it fails
    match config.artifact_source() {
        Ok(source) => {
            let loader = ModelLoader::new(source, config.session_options());
            let state = state.clone();
            tokio::spawn(async move {
                match loader.load().await {
                    Ok(predictor) => {
                        if let Err(e) = state.install(predictor) {
                            error!(error = %e, "could not install model");
                        }
                    }
                    Err(e) => error!(error = %e.detail(), "model load failed, predictions unavailable"),
                }
            });
        }
        Err(e) => error!(error = %e, "model source not configured, predictions unavailable"),
    }

    let app = router(
        state,
        &RouterOptions {
            max_upload_bytes: config.max_upload_bytes,
            allowed_origins: config.allowed_origins(),
        },
    );

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
    info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutting down");
}
