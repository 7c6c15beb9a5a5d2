use std::sync::atomic::Ordering;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use speech_cache::{filename, language_matches, Engine, Options, SpeechRequest, Voice};
use tracing::{error, info};

use crate::error::ApiError;
use crate::metrics::{collect_system_metrics, MetricsResponse};
use crate::validation::validate_speech_request;
use crate::AppState;

/// Body of `tts_get_url` and `tts_audio`.
#[derive(Debug, Deserialize)]
pub struct SpeechBody {
    pub engine_id: Option<String>,
    pub platform: Option<String>,
    pub message: Option<String>,
    pub cache: Option<bool>,
    pub language: Option<String>,
    pub options: Option<Options>,
}

impl SpeechBody {
    fn into_request(self) -> Result<SpeechRequest, ApiError> {
        let engine = validate_speech_request(
            self.engine_id.as_deref(),
            self.platform.as_deref(),
            self.message.as_deref(),
            self.language.as_deref(),
        )?
        .to_string();
        Ok(SpeechRequest {
            engine: Some(engine),
            message: self.message.unwrap_or_default(),
            language: self.language,
            options: self.options,
            cache: self.cache,
        })
    }
}

fn parse_body(payload: Result<Json<SpeechBody>, JsonRejection>) -> Result<SpeechRequest, ApiError> {
    let Json(body) =
        payload.map_err(|_| ApiError::InvalidInput("Invalid JSON specified".to_string()))?;
    body.into_request()
}

#[derive(Debug, Serialize)]
pub struct UrlResponse {
    pub url: String,
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct EngineInfo {
    pub engine_id: String,
    pub name: String,
    pub default_language: Option<String>,
    pub supported_languages: Vec<String>,
    pub supported_options: Vec<String>,
}

impl EngineInfo {
    fn new(engine_id: &str, engine: &dyn Engine) -> Self {
        Self {
            engine_id: engine_id.to_string(),
            name: engine.name().to_string(),
            default_language: engine.default_language().map(str::to_string),
            supported_languages: engine.supported_languages(),
            supported_options: engine.supported_options(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EngineQuery {
    pub language: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VoicesQuery {
    pub language: Option<String>,
}

pub async fn health_check() -> &'static str {
    "ok"
}

/// Absolute URL for `path`: configured base URL, else the request's host.
fn absolute_url(state: &AppState, headers: &HeaderMap, path: &str) -> String {
    if state.cache.config().base_url.is_some() {
        return state.cache.config().absolute_url(path);
    }
    match headers.get(header::HOST).and_then(|h| h.to_str().ok()) {
        Some(host) => format!("http://{host}{path}"),
        None => path.to_string(),
    }
}

fn audio_response(content_type: Option<&'static str>, data: Bytes) -> Response {
    let content_type = content_type.unwrap_or("application/octet-stream");
    ([(header::CONTENT_TYPE, content_type)], data).into_response()
}

pub async fn tts_get_url(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SpeechBody>, JsonRejection>,
) -> Result<Json<UrlResponse>, ApiError> {
    let started = Instant::now();
    let result = async {
        let request = parse_body(payload)?;
        state.cache.get_url_path(request).await.map_err(|e| {
            error!(error = %e, "Error on init tts");
            ApiError::InvalidInput(e.to_string())
        })
    }
    .await;
    state.metrics.get_url.record(started, result.is_ok());

    let path = result?;
    let url = absolute_url(&state, &headers, &path);
    Ok(Json(UrlResponse { url, path }))
}

pub async fn tts_proxy(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let result = state.cache.read_tts(&filename).await;
    state.metrics.proxy.record(started, result.is_ok());

    let (content_type, data) = result.map_err(|e| {
        error!(filename = %filename, error = %e, "Error on load tts");
        ApiError::NotFound(e.to_string())
    })?;
    Ok(audio_response(content_type, data))
}

pub async fn tts_audio(
    State(state): State<AppState>,
    payload: Result<Json<SpeechBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let result = async {
        let request = parse_body(payload)?;
        Ok::<_, ApiError>(state.cache.get_tts_audio(request).await?)
    }
    .await;
    state.metrics.audio.record(started, result.is_ok());

    let (extension, data) = result?;
    Ok(audio_response(filename::content_type(&extension), data))
}

pub async fn tts_clear_cache(State(state): State<AppState>) -> Json<Value> {
    state.cache.clear_cache().await;
    info!("Speech cache cleared");
    Json(json!({ "status": "ok" }))
}

/// All engines, with languages narrowed to matches when `language` is given.
pub async fn list_engines(
    State(state): State<AppState>,
    Query(query): Query<EngineQuery>,
) -> Json<Value> {
    let providers: Vec<EngineInfo> = state
        .cache
        .engines()
        .iter()
        .map(|(engine_id, engine)| {
            let mut info = EngineInfo::new(engine_id, engine.as_ref());
            if let Some(language) = query.language.as_deref().filter(|l| !l.is_empty()) {
                info.supported_languages = language_matches(
                    language,
                    &info.supported_languages,
                    query.country.as_deref(),
                );
            }
            info
        })
        .collect();
    Json(json!({ "providers": providers }))
}

pub async fn get_engine(
    State(state): State<AppState>,
    Path(engine_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let engine = state
        .cache
        .engines()
        .get(&engine_id)
        .ok_or_else(|| ApiError::NotFound(format!("tts engine {engine_id} not found")))?;
    let info = EngineInfo::new(&engine_id, engine.as_ref());
    Ok(Json(json!({ "provider": info })))
}

pub async fn list_voices(
    State(state): State<AppState>,
    Path(engine_id): Path<String>,
    Query(query): Query<VoicesQuery>,
) -> Result<Json<Value>, ApiError> {
    let engine = state
        .cache
        .engines()
        .get(&engine_id)
        .ok_or_else(|| ApiError::NotFound(format!("tts engine {engine_id} not found")))?;
    let language = query
        .language
        .filter(|l| !l.is_empty())
        .ok_or_else(|| ApiError::InvalidInput("language is required".to_string()))?;
    let voices: Option<Vec<Voice>> = engine.supported_voices(&language);
    Ok(Json(json!({ "voices": voices })))
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    let request_count = state.request_count.load(Ordering::Relaxed);
    Json(MetricsResponse {
        timestamp: chrono::Utc::now(),
        system: collect_system_metrics(request_count, state.started.elapsed()),
        endpoints: state.metrics.endpoints(),
        cache: state.cache.stats().into(),
    })
}
