//! Loaded Piper models, bounded by least-recent use.

use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use anyhow::{anyhow, Context};
use dashmap::DashMap;
use piper_rs::synth::{PiperSpeechStreamParallel, PiperSpeechSynthesizer};
use tracing::{debug, info};

use crate::text;

pub(crate) const DEFAULT_MAX_MODELS: usize = 15;

struct CachedSynth {
    synth: Arc<RwLock<PiperSpeechSynthesizer>>,
    sample_rate: u32,
    last_accessed: Instant,
}

pub(crate) struct SynthCache {
    models: DashMap<String, CachedSynth>,
    max_models: usize,
}

impl SynthCache {
    pub fn new(max_models: usize) -> Self {
        Self {
            models: DashMap::new(),
            max_models: max_models.max(1),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Synthesizer and sample rate for a model config, loading it on first use.
    pub fn get_or_load(&self, config: &str) -> anyhow::Result<(Arc<RwLock<PiperSpeechSynthesizer>>, u32)> {
        if let Some(mut cached) = self.models.get_mut(config) {
            cached.last_accessed = Instant::now();
            return Ok((Arc::clone(&cached.synth), cached.sample_rate));
        }

        let started = Instant::now();
        let sample_rate = read_sample_rate(config)?;
        let model = piper_rs::from_config_path(Path::new(config))
            .map_err(|e| anyhow!("piper load error for {config}: {e}"))?;
        let synth = Arc::new(RwLock::new(PiperSpeechSynthesizer::new(model)?));
        info!(config, sample_rate, elapsed_ms = started.elapsed().as_millis() as u64, "Loaded Piper model");

        if self.models.len() >= self.max_models {
            self.evict_least_recent();
        }
        self.models.insert(
            config.to_string(),
            CachedSynth {
                synth: Arc::clone(&synth),
                sample_rate,
                last_accessed: Instant::now(),
            },
        );
        Ok((synth, sample_rate))
    }

    fn evict_least_recent(&self) {
        let oldest = self
            .models
            .iter()
            .min_by_key(|entry| entry.last_accessed)
            .map(|entry| entry.key().clone());
        if let Some(config) = oldest {
            debug!(config = %config, "Evicting Piper model");
            self.models.remove(&config);
        }
    }

    /// Synthesize `message` to mono f32 samples, pausing at punctuation.
    pub fn synthesize(&self, config: &str, message: &str) -> anyhow::Result<(Vec<f32>, u32)> {
        let (synth, sample_rate) = self.get_or_load(config)?;
        let synth = synth
            .read()
            .map_err(|_| anyhow!("Synthesizer lock poisoned by an earlier panic"))?;

        let chunks = text::split_with_pauses(message);
        let mut samples = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let spoken = chunk.trim();
            if spoken.is_empty() {
                continue;
            }
            let stream: PiperSpeechStreamParallel = synth
                .synthesize_parallel(spoken.to_string(), None)
                .map_err(|e| anyhow!("piper synth error: {e}"))?;
            for part in stream {
                samples.extend(part.map_err(|e| anyhow!("chunk error: {e}"))?.into_vec());
            }
            if i + 1 < chunks.len() {
                let pause = text::pause_after(chunk);
                samples.resize(samples.len() + text::silence_samples(pause, sample_rate), 0.0);
            }
        }
        Ok((samples, sample_rate))
    }
}

/// `audio.sample_rate` from a Piper model config.
pub(crate) fn read_sample_rate<P: AsRef<Path>>(config: P) -> anyhow::Result<u32> {
    let path = config.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let json: serde_json::Value =
        serde_json::from_str(&text).context("Config file is not valid JSON")?;
    let rate = json
        .get("audio")
        .and_then(|a| a.get("sample_rate"))
        .and_then(|sr| sr.as_u64())
        .ok_or_else(|| anyhow!("Missing or invalid 'audio.sample_rate' in {}", path.display()))?;
    u32::try_from(rate).context("sample rate out of range")
}
