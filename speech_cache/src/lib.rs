//! Two-tier speech cache and synthesis coordination.
//!
//! Synthesized audio is kept in memory for a short window and optionally
//! persisted to a cache directory, keyed by message, language, options and
//! engine. Concurrent requests for the same key share one synthesis.

pub mod config;
pub mod disk;
pub mod engine;
pub mod error;
pub mod filename;
pub mod key;
pub mod manager;
pub mod memory;
pub mod options;
pub mod stats;
pub mod tags;

pub use config::CacheConfig;
pub use engine::{language_matches, Engine, EngineRegistry, SynthesizedAudio, Voice};
pub use error::{Error, ErrorStage, Result};
pub use key::{CacheKey, Options};
pub use manager::{CacheManager, SpeechRequest};
pub use memory::CachedAudio;
pub use options::process_options;
pub use stats::CacheStatsSnapshot;
pub use tags::{AudioTagger, AudioTags, Id3Tagger};

/// Path prefix of the URLs handed out for cached audio.
pub const URL_PREFIX: &str = "/api/tts_proxy/";

/// Option naming the audio format the caller wants; lets the file name be
/// published before synthesis finishes.
pub const ATTR_AUDIO_OUTPUT: &str = "audio_output";

/// Option selecting the voice; also used as the artist tag.
pub const ATTR_VOICE: &str = "voice";
