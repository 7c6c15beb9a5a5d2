//! Common utilities for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, Response},
    Router,
};
use bytes::Bytes;
use server::{config::ServerConfig, router, AppState};
use speech_cache::{CacheManager, Engine, EngineRegistry, Options, SynthesizedAudio, Voice};
use tempfile::TempDir;
use tower::ServiceExt;

/// Engine producing fake mp3 audio; the message `fail` makes it error.
#[derive(Default)]
pub struct FakeEngine {
    calls: AtomicUsize,
}

impl FakeEngine {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Engine for FakeEngine {
    fn name(&self) -> &str {
        "Fake"
    }

    fn default_language(&self) -> Option<&str> {
        Some("en")
    }

    fn supported_languages(&self) -> Vec<String> {
        ["en", "en_US", "en_GB", "de_DE"].map(String::from).to_vec()
    }

    fn supported_options(&self) -> Vec<String> {
        vec!["voice".to_string()]
    }

    fn supported_voices(&self, language: &str) -> Option<Vec<Voice>> {
        language
            .starts_with("en")
            .then(|| vec![Voice::new("amy", "Amy"), Voice::new("bob", "Bob")])
    }

    async fn synthesize(
        &self,
        message: &str,
        language: &str,
        _options: Option<&Options>,
    ) -> anyhow::Result<SynthesizedAudio> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if message == "fail" {
            anyhow::bail!("backend unavailable");
        }
        let mut audio = vec![0xff, 0xfb];
        audio.extend_from_slice(format!("{message}|{language}").as_bytes());
        Ok(SynthesizedAudio::new("mp3", Bytes::from(audio)))
    }
}

pub struct TestApp {
    pub app: Router,
    pub cache: CacheManager,
    pub engine: Arc<FakeEngine>,
    pub dir: TempDir,
}

/// Create a test app instance backed by a temporary cache directory
pub async fn create_test_app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let config = ServerConfig {
        cache_dir: dir.path().join("tts"),
        ..ServerConfig::default()
    };

    let engine = Arc::new(FakeEngine::default());
    let mut engines = EngineRegistry::new();
    engines.register("fake", engine.clone()).unwrap();

    let cache = CacheManager::init(config.cache_config(), engines).await.unwrap();
    let app = router(AppState::new(cache.clone(), config));
    TestApp {
        app,
        cache,
        engine,
        dir,
    }
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .header("host", "speech.local:8085")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    to_bytes(response.into_body(), usize::MAX).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
