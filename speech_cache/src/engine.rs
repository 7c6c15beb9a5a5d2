//! Speech engine abstraction and registry.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::key::Options;

/// A voice an engine offers for some language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub voice_id: String,
    pub name: String,
}

impl Voice {
    pub fn new(voice_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            voice_id: voice_id.into(),
            name: name.into(),
        }
    }
}

/// Audio returned by an engine, `extension` without the leading dot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedAudio {
    pub extension: String,
    pub data: Bytes,
}

impl SynthesizedAudio {
    pub fn new(extension: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            extension: extension.into(),
            data: data.into(),
        }
    }
}

/// Text-to-speech backend
#[async_trait]
pub trait Engine: Send + Sync {
    /// Human readable engine name, written into audio tags.
    fn name(&self) -> &str;

    fn default_language(&self) -> Option<&str>;

    fn supported_languages(&self) -> Vec<String>;

    fn default_options(&self) -> Option<Options> {
        None
    }

    fn supported_options(&self) -> Vec<String> {
        Vec::new()
    }

    fn supported_voices(&self, _language: &str) -> Option<Vec<Voice>> {
        None
    }

    /// Synthesize `message`. Empty audio is treated as a failure by the caller.
    async fn synthesize(
        &self,
        message: &str,
        language: &str,
        options: Option<&Options>,
    ) -> anyhow::Result<SynthesizedAudio>;
}

/// Engines by id, in registration order.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    engines: Vec<(String, Arc<dyn Engine>)>,
    preferred: Option<String>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an engine. Ids are used in cache keys, so they must fit the file name grammar.
    pub fn register(&mut self, id: impl Into<String>, engine: Arc<dyn Engine>) -> Result<()> {
        let id = id.into();
        if !is_valid_engine_id(&id) {
            return Err(Error::EngineRegistration(format!(
                "invalid engine id '{id}' (expected lowercase letters, digits or '_')"
            )));
        }
        if self.get(&id).is_some() {
            return Err(Error::EngineRegistration(format!("engine '{id}' already registered")));
        }
        info!(engine_id = %id, name = engine.name(), "Registered TTS engine");
        self.engines.push((id, engine));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Engine>> {
        self.engines
            .iter()
            .find(|(engine_id, _)| engine_id == id)
            .map(|(_, engine)| Arc::clone(engine))
    }

    /// Prefer `id` as default engine when no engine is requested.
    pub fn set_default(&mut self, id: impl Into<String>) {
        self.preferred = Some(id.into());
    }

    /// The preferred engine if registered, otherwise the first one.
    pub fn default_engine(&self) -> Option<&str> {
        if let Some(preferred) = &self.preferred {
            if self.get(preferred).is_some() {
                return Some(preferred);
            }
        }
        self.engines.first().map(|(id, _)| id.as_str())
    }

    /// Resolve an explicit engine id, or fall back to the default engine.
    pub fn resolve(&self, id: Option<&str>) -> Result<(String, Arc<dyn Engine>)> {
        let id = match id {
            Some(id) => id,
            None => self
                .default_engine()
                .ok_or_else(|| Error::EngineNotFound("default".to_string()))?,
        };
        self.get(id)
            .map(|engine| (id.to_string(), engine))
            .ok_or_else(|| Error::EngineNotFound(id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Engine>)> {
        self.engines.iter().map(|(id, engine)| (id.as_str(), engine))
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Union of every engine's supported languages, sorted.
    pub fn languages(&self) -> Vec<String> {
        let mut languages: Vec<String> = self
            .engines
            .iter()
            .flat_map(|(_, engine)| engine.supported_languages())
            .collect();
        languages.sort();
        languages.dedup();
        languages
    }
}

fn is_valid_engine_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn split_tag(tag: &str) -> (String, Option<String>) {
    let mut parts = tag.split(['-', '_']);
    let language = parts.next().unwrap_or_default().to_ascii_lowercase();
    // Script subtags (`zh-Hant-TW`) are skipped, the region is the 2-letter or 3-digit part
    let region = parts
        .find(|part| part.len() == 2 || (part.len() == 3 && part.chars().all(|c| c.is_ascii_digit())))
        .map(str::to_ascii_uppercase);
    (language, region)
}

/// Supported tags that can serve `language`, best match first.
///
/// Only tags with the same primary language are kept. The exact tag comes
/// first, then tags for the requested `country` (or the region of
/// `language`), then region-less tags, then the remaining dialects.
pub fn language_matches(language: &str, supported: &[String], country: Option<&str>) -> Vec<String> {
    let (wanted_language, wanted_region) = split_tag(language);
    let wanted_region = country.map(str::to_ascii_uppercase).or(wanted_region);
    let wanted_tag = language.replace('_', "-").to_ascii_lowercase();

    let mut matches: Vec<(u8, &String)> = supported
        .iter()
        .filter_map(|tag| {
            let (tag_language, tag_region) = split_tag(tag);
            if tag_language != wanted_language {
                return None;
            }
            let score = if tag.replace('_', "-").to_ascii_lowercase() == wanted_tag {
                0
            } else if tag_region.is_some() && tag_region == wanted_region {
                1
            } else if tag_region.is_none() {
                2
            } else {
                3
            };
            Some((score, tag))
        })
        .collect();
    matches.sort_by_key(|(score, _)| *score);
    matches.into_iter().map(|(_, tag)| tag.clone()).collect()
}
