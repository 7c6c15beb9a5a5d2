use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use server::{config::ServerConfig, router, AppState};
use speech_cache::{CacheManager, EngineRegistry};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer};
use tracing::{info, warn};
use tts_core::PiperEngine;

const PIPER_ENGINE_ID: &str = "piper";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

/// Engines available to the cache; a missing voice map leaves Piper out.
fn build_engines(config: &ServerConfig) -> anyhow::Result<EngineRegistry> {
    let mut engines = EngineRegistry::new();

    match PiperEngine::from_map_file(&config.voice_map) {
        Ok(piper) => {
            let piper = match config.default_language.as_deref() {
                Some(language) => piper.with_default_language(language)?,
                None => piper,
            };
            engines.register(PIPER_ENGINE_ID, Arc::new(piper))?;
        }
        Err(e) => warn!(
            "Could not load {}: {e:#}, starting without the Piper engine.",
            config.voice_map.display()
        ),
    }

    if let Some(default_engine) = &config.default_engine {
        engines.set_default(default_engine.clone());
    }
    Ok(engines)
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::OPTIONS];
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .flatten()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();

    let allow_origin = if origins.is_empty() {
        if config.cors_allowed_origins.is_some() {
            warn!("CORS_ALLOWED_ORIGINS is empty, falling back to permissive CORS");
        } else {
            warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
        }
        AllowOrigin::any()
    } else {
        info!("CORS configured for {} origin(s)", origins.len());
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(methods)
        .allow_headers(Any)
        .allow_credentials(false)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting speech cache server...");

    let config = ServerConfig::from_env();
    info!(
        "Server configuration loaded: port={}, rate_limit={}/min, cache={}, cache_dir={}, time_memory={}s",
        config.port,
        config.rate_limit_per_minute,
        config.use_cache,
        config.cache_dir.display(),
        config.time_memory_secs
    );

    let engines = build_engines(&config)?;
    info!("Registered {} TTS engine(s)", engines.len());

    let cache = CacheManager::init(config.cache_config(), engines)
        .await
        .context("speech cache init")?;
    let state = AppState::new(cache.clone(), config.clone());

    // Using GlobalKeyExtractor to rate limit globally (all requests share the same limit)
    // This works better in Docker/proxy environments where IP extraction can be problematic
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(u64::from((config.rate_limit_per_minute / 60).max(1)))
            .burst_size(config.rate_limit_per_minute.max(1))
            .key_extractor(GlobalKeyExtractor)
            .finish()
            .context("invalid rate limit configuration")?,
    );
    info!("Rate limiting: {} requests per minute", config.rate_limit_per_minute);

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer::new(governor_conf))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(cors_layer(&config))
        .into_inner();

    let app = router(state).layer(middleware_stack);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cache.shutdown();
    info!("Server stopped");
    Ok(())
}
