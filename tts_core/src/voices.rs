//! Voice map (`models/map.json`).
//!
//! Two layouts are accepted per language key:
//!
//! ```json
//! {
//!   "de_DE": "models/de_DE/de_DE-mls-medium.onnx.json",
//!   "en_GB": { "config": "models/en_GB/alba.onnx.json", "default_speaker": 0 },
//!   "en_US": {
//!     "default_voice": "amy",
//!     "voices": {
//!       "amy":  { "config": "models/en_US/amy.onnx.json", "display_name": "Amy" },
//!       "ryan": { "config": "models/en_US/ryan.onnx.json", "gender": "male" }
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use speech_cache::Voice;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceEntry {
    pub config: String,
    #[serde(default)]
    pub speaker_id: Option<i64>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawLanguage {
    MultiVoice {
        default_voice: String,
        voices: BTreeMap<String, VoiceEntry>,
    },
    Detailed {
        config: String,
        #[serde(default)]
        default_speaker: Option<i64>,
    },
    Path(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LanguageVoices {
    default_voice: String,
    voices: BTreeMap<String, VoiceEntry>,
}

/// Model reference resolved for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    pub voice_id: String,
    pub config: String,
}

/// Languages and voices available to the Piper engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceMap {
    languages: BTreeMap<String, LanguageVoices>,
}

// Voice id used for single-model (legacy) entries
const DEFAULT_VOICE_ID: &str = "default";

impl VoiceMap {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to load {}", path.as_ref().display()))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let raw: BTreeMap<String, RawLanguage> =
            serde_json::from_str(text).context("map.json must be a JSON object of language entries")?;

        let mut languages = BTreeMap::new();
        for (language, entry) in raw {
            let voices = match entry {
                RawLanguage::MultiVoice { default_voice, voices } => {
                    if !voices.contains_key(&default_voice) {
                        bail!("default voice '{default_voice}' for {language} is not in its voices");
                    }
                    LanguageVoices { default_voice, voices }
                }
                RawLanguage::Detailed { config, default_speaker } => single(config, default_speaker),
                RawLanguage::Path(config) => single(config, None),
            };
            languages.insert(language, voices);
        }
        Ok(Self { languages })
    }

    /// Sorted language keys.
    pub fn languages(&self) -> Vec<String> {
        self.languages.keys().cloned().collect()
    }

    pub fn contains(&self, language: &str) -> bool {
        self.languages.contains_key(language)
    }

    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
    }

    pub fn default_voice(&self, language: &str) -> Option<&str> {
        self.languages.get(language).map(|l| l.default_voice.as_str())
    }

    pub fn voices(&self, language: &str) -> Option<Vec<Voice>> {
        let entry = self.languages.get(language)?;
        Some(
            entry
                .voices
                .iter()
                .map(|(id, voice)| Voice::new(id, voice.display_name.as_deref().unwrap_or(id)))
                .collect(),
        )
    }

    /// Model for `language`, using `voice` or the language's default voice.
    pub fn resolve(&self, language: &str, voice: Option<&str>) -> anyhow::Result<ModelRef> {
        let entry = self
            .languages
            .get(language)
            .ok_or_else(|| anyhow!("Unknown language key: {language}"))?;
        let voice_id = voice.unwrap_or(&entry.default_voice);
        let voice = entry.voices.get(voice_id).ok_or_else(|| {
            anyhow!(
                "Unknown voice '{voice_id}' for language '{language}'. Available voices: {}",
                entry.voices.keys().cloned().collect::<Vec<_>>().join(", ")
            )
        })?;
        Ok(ModelRef {
            voice_id: voice_id.to_string(),
            config: voice.config.clone(),
        })
    }
}

fn single(config: String, speaker_id: Option<i64>) -> LanguageVoices {
    let entry = VoiceEntry {
        config,
        speaker_id,
        display_name: None,
        gender: None,
        quality: None,
    };
    LanguageVoices {
        default_voice: DEFAULT_VOICE_ID.to_string(),
        voices: BTreeMap::from([(DEFAULT_VOICE_ID.to_string(), entry)]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAP: &str = r#"{
        "de_DE": "models/de_DE/de_DE-mls-medium.onnx.json",
        "en_GB": { "config": "models/en_GB/alba.onnx.json", "default_speaker": 3 },
        "en_US": {
            "default_voice": "amy",
            "voices": {
                "amy":  { "config": "models/en_US/amy.onnx.json", "display_name": "Amy" },
                "ryan": { "config": "models/en_US/ryan.onnx.json", "gender": "male" }
            }
        }
    }"#;

    #[test]
    fn test_parses_all_layouts() {
        let map = VoiceMap::from_json(MAP).unwrap();
        assert_eq!(map.languages(), vec!["de_DE", "en_GB", "en_US"]);

        let de = map.resolve("de_DE", None).unwrap();
        assert_eq!(de.config, "models/de_DE/de_DE-mls-medium.onnx.json");
        assert_eq!(de.voice_id, "default");

        let gb = map.resolve("en_GB", None).unwrap();
        assert_eq!(gb.config, "models/en_GB/alba.onnx.json");
    }

    #[test]
    fn test_voice_selection() {
        let map = VoiceMap::from_json(MAP).unwrap();
        assert_eq!(map.default_voice("en_US"), Some("amy"));
        assert_eq!(
            map.resolve("en_US", Some("ryan")).unwrap().config,
            "models/en_US/ryan.onnx.json"
        );

        let err = map.resolve("en_US", Some("bob")).unwrap_err().to_string();
        assert!(err.contains("amy, ryan"));
        assert!(map.resolve("fr_FR", None).is_err());
    }

    #[test]
    fn test_voices_listing() {
        let map = VoiceMap::from_json(MAP).unwrap();
        let voices = map.voices("en_US").unwrap();
        assert_eq!(voices, vec![Voice::new("amy", "Amy"), Voice::new("ryan", "ryan")]);
        assert!(map.voices("xx").is_none());
    }

    #[test]
    fn test_rejects_bad_entries() {
        assert!(VoiceMap::from_json("[]").is_err());
        assert!(VoiceMap::from_json(r#"{"de_DE": 5}"#).is_err());
        assert!(VoiceMap::from_json(
            r#"{"en_US": {"default_voice": "x", "voices": {"amy": {"config": "a.json"}}}}"#
        )
        .is_err());
    }
}
