//! File name grammar for cached audio.
//!
//! Current form: `<sha1>_<language>_<options digest | ->_<engine>.<ext>`.
//! The legacy form accepts a looser language segment and entity-style engine
//! ids (`tts.google_translate`) so files written by older releases stay
//! readable.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::error::{Error, Result};
use crate::key::CacheKey;

static VOICE_FILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-f0-9]{40})_([a-z0-9-]+)_([a-f0-9]+|-)_([a-z0-9_]+)\.([a-z0-9]{3,4})$")
        .expect("tts file pattern")
});

static LEGACY_VOICE_FILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-f0-9]{40})_([^_/\\]+)_([^_/\\]+)_((?:tts\.)?[a-z0-9_]+)\.([a-z0-9]{3,4})$")
        .expect("legacy tts file pattern")
});

/// A file name split back into its cache key and extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFilename {
    pub key: CacheKey,
    pub extension: String,
    pub legacy: bool,
}

/// Parse a cached file name (case-insensitive).
pub fn parse(filename: &str) -> Result<ParsedFilename> {
    let lower = filename.to_lowercase();
    if let Some(caps) = VOICE_FILE.captures(&lower) {
        return Ok(from_captures(&caps, false));
    }
    if let Some(caps) = LEGACY_VOICE_FILE.captures(&lower) {
        return Ok(from_captures(&caps, true));
    }
    Err(Error::InvalidFilename(filename.to_string()))
}

fn from_captures(caps: &Captures<'_>, legacy: bool) -> ParsedFilename {
    ParsedFilename {
        key: CacheKey::from_parts(&caps[1], &caps[2], &caps[3], &caps[4]),
        extension: caps[5].to_string(),
        legacy,
    }
}

pub fn is_valid(filename: &str) -> bool {
    parse(filename).is_ok()
}

/// Extension of a file name without the dot; empty if there is none.
pub fn extension_of(filename: &str) -> &str {
    filename.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("")
}

/// Best-effort MIME type for an audio extension.
pub fn content_type(extension: &str) -> Option<&'static str> {
    let content_type = match extension.to_ascii_lowercase().as_str() {
        "mp3" => "audio/mpeg",
        "wav" => "audio/x-wav",
        "ogg" | "oga" => "audio/ogg",
        "opus" => "audio/opus",
        "flac" => "audio/flac",
        "m4a" | "mp4" => "audio/mp4",
        "aac" => "audio/aac",
        "webm" => "audio/webm",
        "raw" | "pcm" => "application/octet-stream",
        _ => return None,
    };
    Some(content_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = "7b502c3a1f48c8609ae212cdfb639dee39673f5e";

    #[test]
    fn test_parse_current_grammar() {
        let parsed = parse(&format!("{HELLO}_en_-_demo.mp3")).unwrap();
        assert_eq!(parsed.key.as_str(), format!("{HELLO}_en_-_demo"));
        assert_eq!(parsed.extension, "mp3");
        assert!(!parsed.legacy);
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        let upper = format!("{}_EN-US_09E6F21504_Demo.MP3", HELLO.to_uppercase());
        let parsed = parse(&upper).unwrap();
        assert_eq!(parsed.key.as_str(), format!("{HELLO}_en-us_09e6f21504_demo"));
        assert_eq!(parsed.extension, "mp3");
    }

    #[test]
    fn test_parse_legacy_grammar() {
        let parsed = parse(&format!("{HELLO}_en_-_tts.google_translate.mp3")).unwrap();
        assert!(parsed.legacy);
        assert_eq!(
            parsed.key.as_str(),
            format!("{HELLO}_en_-_tts.google_translate")
        );
        assert_eq!(parsed.extension, "mp3");
    }

    #[test]
    fn test_key_round_trips() {
        let key = CacheKey::derive("Hello world", "en_US", None, "piper_local");
        let parsed = parse(&key.filename("wav")).unwrap();
        assert_eq!(parsed.key, key);
    }

    #[test]
    fn test_rejects_bad_digest() {
        let name = format!("{}_en_-_demo.mp3", "z".repeat(40));
        assert!(matches!(parse(&name), Err(Error::InvalidFilename(_))));
        assert!(!is_valid(&format!("{}_en_-_demo.mp3", &HELLO[..39])));
    }

    #[test]
    fn test_rejects_malformed_names() {
        assert!(!is_valid(&format!("{HELLO}_en_-_demo")));
        assert!(!is_valid(&format!("{HELLO}_en_-_demo.mpeg3")));
        assert!(!is_valid(&format!("{HELLO}_en_-_demo.mp3.tmp")));
        assert!(!is_valid(&format!("{HELLO}_../x_-_demo.mp3")));
        assert!(!is_valid("notes.txt"));
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type("mp3"), Some("audio/mpeg"));
        assert_eq!(content_type("WAV"), Some("audio/x-wav"));
        assert_eq!(content_type("xyz"), None);
        assert_eq!(extension_of("abc.ogg"), "ogg");
        assert_eq!(extension_of("abc"), "");
    }
}
