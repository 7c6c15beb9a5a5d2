//! HTTP surface of the speech cache.
//!
//! Routes are served both at the root and under `/api`, so the proxy URLs the
//! cache manager hands out (`/api/tts_proxy/<file>`) resolve against this
//! router.

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod validation;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use speech_cache::CacheManager;

use crate::config::ServerConfig;
use crate::metrics::AppMetrics;

#[derive(Clone)]
pub struct AppState {
    pub cache: CacheManager,
    pub config: ServerConfig,
    pub metrics: AppMetrics,
    pub request_count: Arc<AtomicU64>,
    pub started: Instant,
}

impl AppState {
    pub fn new(cache: CacheManager, config: ServerConfig) -> Self {
        Self {
            cache,
            config,
            metrics: AppMetrics::new(),
            request_count: Arc::new(AtomicU64::new(0)),
            started: Instant::now(),
        }
    }
}

/// Request ID middleware for tracing
async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let header = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = &header {
        request.headers_mut().insert("x-request-id", value.clone());
    }
    let mut response = next.run(request).await;
    if let Some(value) = header {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

async fn count_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    next.run(request).await
}

/// All routes with request counting and ids; transport layers (rate limit,
/// timeout, CORS) are added by the binary.
pub fn router(state: AppState) -> Router {
    let public_api = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/healthz", get(handlers::health_check))
        .route("/tts_get_url", post(handlers::tts_get_url))
        .route("/tts_proxy/{filename}", get(handlers::tts_proxy))
        .route("/tts_audio", post(handlers::tts_audio))
        .route("/tts_clear_cache", post(handlers::tts_clear_cache))
        .route("/tts/engines", get(handlers::list_engines))
        .route("/tts/engines/{engine_id}", get(handlers::get_engine))
        .route("/tts/engines/{engine_id}/voices", get(handlers::list_voices));

    // Metrics endpoint - consider adding authentication in production
    let metrics_api = Router::new().route("/metrics", get(handlers::metrics_endpoint));

    let api = Router::new().merge(public_api).merge(metrics_api);

    Router::new()
        .merge(api.clone()) // root paths
        .nest("/api", api) // /api prefix
        .layer(middleware::from_fn_with_state(state.clone(), count_requests))
        .layer(middleware::from_fn(add_request_id))
        .with_state(state)
}
