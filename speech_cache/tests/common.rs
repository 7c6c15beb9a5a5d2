//! Common utilities for coordinator tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use speech_cache::{
    CacheConfig, CacheManager, Engine, EngineRegistry, Options, SynthesizedAudio, Voice,
};
use tempfile::TempDir;
use tokio::sync::Notify;

/// Engine that records calls and produces distinguishable fake audio.
pub struct MockEngine {
    calls: AtomicUsize,
    failures_left: AtomicUsize,
    extension: String,
    delay: Duration,
    gate: Option<Arc<Notify>>,
    empty: bool,
}

impl MockEngine {
    pub fn new(extension: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            extension: extension.to_string(),
            delay: Duration::ZERO,
            gate: None,
            empty: false,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the next `count` calls.
    pub fn failing(self, count: usize) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    /// Block every call until the returned handle is notified.
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    pub fn returning_empty(mut self) -> Self {
        self.empty = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Engine for MockEngine {
    fn name(&self) -> &str {
        "Mock Engine"
    }

    fn default_language(&self) -> Option<&str> {
        Some("en")
    }

    fn supported_languages(&self) -> Vec<String> {
        vec!["en".to_string(), "de".to_string(), "en_US".to_string()]
    }

    fn supported_options(&self) -> Vec<String> {
        vec!["voice".to_string(), "audio_output".to_string()]
    }

    fn supported_voices(&self, language: &str) -> Option<Vec<Voice>> {
        (language == "en").then(|| vec![Voice::new("a", "Alice"), Voice::new("b", "Bob")])
    }

    async fn synthesize(
        &self,
        message: &str,
        language: &str,
        options: Option<&Options>,
    ) -> anyhow::Result<SynthesizedAudio> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            anyhow::bail!("engine offline");
        }
        if self.empty {
            return Ok(SynthesizedAudio::new(self.extension.clone(), Bytes::new()));
        }

        let mut data = vec![0xff, 0xfb];
        data.extend_from_slice(format!("{message}|{language}|{options:?}|{call}").as_bytes());
        Ok(SynthesizedAudio::new(self.extension.clone(), data))
    }
}

pub fn config(dir: &TempDir, time_memory: Duration) -> CacheConfig {
    CacheConfig::default()
        .with_base_dir(dir.path())
        .with_time_memory(time_memory)
}

pub async fn manager_with(engine: Arc<MockEngine>, config: CacheConfig) -> CacheManager {
    let mut engines = EngineRegistry::new();
    engines.register("demo", engine).unwrap();
    CacheManager::init(config, engines).await.unwrap()
}

/// Poll `condition` for up to two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
