//! Cache key derivation.
//!
//! A key is `<sha1(message)>_<language>_<options digest or "->_<engine>`,
//! lowercased. The same shape is used as the stem of the cached file name,
//! see [`crate::filename`].

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;
use sha1::{Digest, Sha1};
use sha2::Sha256;

/// Per-request synthesis options, sorted by name.
pub type Options = BTreeMap<String, Value>;

/// Placeholder used in place of the options digest when no options are set.
pub const NO_OPTIONS: &str = "-";

// The options digest only disambiguates within one message/language/engine
// bucket, 5 bytes is plenty.
const OPTIONS_DIGEST_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a (message, language, options, engine) tuple.
    pub fn derive(message: &str, language: &str, options: Option<&Options>, engine: &str) -> Self {
        let message_digest = hex::encode(Sha1::digest(message.as_bytes()));
        let options_digest = match options {
            Some(options) if !options.is_empty() => hash_options(options),
            _ => NO_OPTIONS.to_string(),
        };
        Self::from_parts(
            &message_digest,
            &normalize_language(language),
            &options_digest,
            engine,
        )
    }

    /// Assemble a key from already-digested parts (e.g. parsed from a file name).
    pub(crate) fn from_parts(message_digest: &str, language: &str, options: &str, engine: &str) -> Self {
        Self(format!("{message_digest}_{language}_{options}_{engine}").to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name for this key with the given extension.
    pub fn filename(&self, extension: &str) -> String {
        format!("{}.{}", self.0, extension).to_lowercase()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// `en_US` -> `en-us`
pub fn normalize_language(language: &str) -> String {
    language.replace('_', "-").to_lowercase()
}

/// Short hex digest of an options mapping.
pub fn hash_options(options: &Options) -> String {
    let mut hasher = Sha256::new();
    // BTreeMap iterates in key order, which keeps the digest stable
    for (name, value) in options {
        hasher.update(name.as_bytes());
        hasher.update(option_text(value).as_bytes());
    }
    hex::encode(&hasher.finalize()[..OPTIONS_DIGEST_LEN])
}

fn option_text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s),
        other => Cow::Owned(other.to_string()),
    }
}
