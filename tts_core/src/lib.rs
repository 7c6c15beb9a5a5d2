//! Piper speech engine.
//!
//! Maps language keys to Piper ONNX models through a voice map, keeps loaded
//! models in a bounded cache and produces WAV audio for the speech cache.

mod synth;
mod text;
mod voices;
mod wav;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;
use speech_cache::{Engine, Options, SynthesizedAudio, Voice, ATTR_VOICE};
use tracing::{debug, info, warn};

use crate::synth::{SynthCache, DEFAULT_MAX_MODELS};

pub use text::{pause_after, split_with_pauses};
pub use voices::{ModelRef, VoiceEntry, VoiceMap};
pub use wav::encode_wav;

pub const ENGINE_NAME: &str = "Piper";

/// Language used when the map has it and no other default is configured.
pub const FALLBACK_LANGUAGE: &str = "de_DE";

pub struct PiperEngine {
    voices: VoiceMap,
    default_language: Option<String>,
    synths: Arc<SynthCache>,
}

impl PiperEngine {
    pub fn new(voices: VoiceMap) -> Self {
        Self::with_max_models(voices, DEFAULT_MAX_MODELS)
    }

    /// Keep at most `max_models` Piper models loaded at once.
    pub fn with_max_models(voices: VoiceMap, max_models: usize) -> Self {
        let default_language = if voices.contains(FALLBACK_LANGUAGE) {
            Some(FALLBACK_LANGUAGE.to_string())
        } else {
            voices.languages().into_iter().next()
        };
        Self {
            voices,
            default_language,
            synths: Arc::new(SynthCache::new(max_models)),
        }
    }

    pub fn from_map_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let voices = VoiceMap::load(path.as_ref())?;
        info!(
            map = %path.as_ref().display(),
            languages = voices.languages().len(),
            "Loaded Piper voice map"
        );
        Ok(Self::new(voices))
    }

    /// Use `language` as default; rejected if the map doesn't have it.
    pub fn with_default_language(mut self, language: &str) -> anyhow::Result<Self> {
        if !self.voices.contains(language) {
            return Err(anyhow!("default language {language} is not in the voice map"));
        }
        self.default_language = Some(language.to_string());
        Ok(self)
    }
}

fn voice_option(options: Option<&Options>) -> anyhow::Result<Option<String>> {
    match options.and_then(|o| o.get(ATTR_VOICE)) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(voice)) => Ok(Some(voice.clone())),
        Some(other) => Err(anyhow!("voice must be a string, got {other}")),
    }
}

#[async_trait]
impl Engine for PiperEngine {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    fn default_language(&self) -> Option<&str> {
        self.default_language.as_deref()
    }

    fn supported_languages(&self) -> Vec<String> {
        self.voices.languages()
    }

    fn supported_options(&self) -> Vec<String> {
        vec![ATTR_VOICE.to_string()]
    }

    fn supported_voices(&self, language: &str) -> Option<Vec<Voice>> {
        self.voices.voices(language)
    }

    async fn synthesize(
        &self,
        message: &str,
        language: &str,
        options: Option<&Options>,
    ) -> anyhow::Result<SynthesizedAudio> {
        let voice = voice_option(options)?;
        let model = self.voices.resolve(language, voice.as_deref())?;
        debug!(language, voice = %model.voice_id, config = %model.config, "Piper synthesis");

        let synths = Arc::clone(&self.synths);
        let message = message.to_string();
        let started = Instant::now();

        // Model loading and inference are blocking
        let (wav, samples, sample_rate) = tokio::task::spawn_blocking(move || {
            let (samples, sample_rate) = synths.synthesize(&model.config, &message)?;
            let wav = encode_wav(&samples, sample_rate)?;
            Ok::<_, anyhow::Error>((wav, samples.len(), sample_rate))
        })
        .await
        .map_err(|e| anyhow!("Task join error: {e}"))??;

        if samples == 0 {
            warn!(language, "Piper produced no samples");
        }
        let duration_ms = samples as u64 * 1000 / u64::from(sample_rate.max(1));
        info!(
            language,
            duration_ms,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Piper synthesis done"
        );
        Ok(SynthesizedAudio::new("wav", wav))
    }
}
