use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use vigil_core::{
    load_graph, Device, DistanceMatcher, EmbeddingEngine, EngineOptions, InferenceSession,
};

mod api;
mod config;
mod engine;

use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "vigild starting");

    let config = Config::load()?;

    // Device and graph are acquired once; any failure here is fatal.
    let device = Device::open(&config.device).context("opening inference device")?;
    let graph = load_graph(
        &config.graph_path,
        &device,
        config.input_size,
        config.intra_threads,
    )
    .context("loading embedding graph")?;

    let embedder = EmbeddingEngine::new(
        graph,
        EngineOptions {
            layout: config.tensor_layout,
            embedding_dim: config.embedding_dim,
            l2_normalize: config.l2_normalize,
        },
    );
    let session = InferenceSession::new(
        &config.gallery_dir,
        DistanceMatcher::new(config.match_threshold),
        config.match_policy,
    )
    .with_cache(config.gallery_cache);

    if !config.gallery_dir.is_dir() {
        tracing::warn!(
            dir = %config.gallery_dir.display(),
            "gallery directory does not exist yet; requests will fail until it is created"
        );
    }

    let (engine, engine_thread) = engine::spawn_engine(
        embedder,
        session,
        engine::EngineOptions {
            timeout: config.inference_timeout(),
            queue_depth: config.queue_depth,
            capture_dir: config.capture_dir.clone(),
        },
    )?;

    let state = api::AppState {
        engine,
        info: Arc::new(api::ServiceInfo {
            service: config.service.clone(),
            device: device.to_string(),
            graph_path: config.graph_path.clone(),
            gallery_dir: config.gallery_dir.clone(),
            match_policy: config.match_policy,
            match_threshold: config.match_threshold,
        }),
    };
    let router = api::create_router(state, config.max_body_bytes);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("binding {}:{}", config.host, config.port))?;
    tracing::info!(
        addr = %listener.local_addr()?,
        endpoint = %format!("/api/{}/infer", config.service),
        policy = %config.match_policy,
        "vigild ready"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("vigild shutting down");
    // The router held the last engine handles; the thread now drains and exits.
    let joined = tokio::task::spawn_blocking(move || engine_thread.join()).await?;
    if joined.is_err() {
        anyhow::bail!("engine thread panicked");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
