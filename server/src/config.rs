// Configuration for the server and its speech cache

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use speech_cache::CacheConfig;

/// Bounds for `TTS_TIME_MEMORY`, in seconds.
pub const MIN_TIME_MEMORY_SECS: u64 = 60;
pub const MAX_TIME_MEMORY_SECS: u64 = 57600;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub rate_limit_per_minute: u32,
    pub request_timeout_secs: u64,
    pub max_body_bytes: usize,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub use_cache: bool,
    pub cache_dir: PathBuf,
    pub base_dir: Option<PathBuf>,
    pub time_memory_secs: u64,
    pub base_url: Option<String>,
    pub voice_map: PathBuf,
    pub default_engine: Option<String>,
    pub default_language: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8085,
            rate_limit_per_minute: 60,
            request_timeout_secs: 60,
            max_body_bytes: 64 * 1024,
            cors_allowed_origins: None,
            use_cache: true,
            cache_dir: PathBuf::from(speech_cache::config::DEFAULT_CACHE_DIR),
            base_dir: None,
            time_memory_secs: 300,
            base_url: None,
            voice_map: PathBuf::from("models/map.json"),
            default_engine: None,
            default_language: None,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect()
            });

        let time_memory_secs = env_parse("TTS_TIME_MEMORY")
            .unwrap_or(defaults.time_memory_secs)
            .clamp(MIN_TIME_MEMORY_SECS, MAX_TIME_MEMORY_SECS);

        Self {
            port: env_parse("PORT").unwrap_or(defaults.port),
            rate_limit_per_minute: env_parse("RATE_LIMIT_PER_MINUTE")
                .unwrap_or(defaults.rate_limit_per_minute),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS")
                .unwrap_or(defaults.request_timeout_secs),
            max_body_bytes: env_parse("MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            cors_allowed_origins,
            use_cache: env_string("TTS_CACHE")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.use_cache),
            cache_dir: env_string("TTS_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            base_dir: env_string("TTS_BASE_DIR").map(PathBuf::from),
            time_memory_secs,
            base_url: env_string("TTS_BASE_URL"),
            voice_map: env_string("TTS_VOICE_MAP")
                .map(PathBuf::from)
                .unwrap_or(defaults.voice_map),
            default_engine: env_string("TTS_DEFAULT_ENGINE"),
            default_language: env_string("TTS_DEFAULT_LANGUAGE"),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Settings for the speech cache manager.
    pub fn cache_config(&self) -> CacheConfig {
        let mut config = CacheConfig::default()
            .with_use_cache(self.use_cache)
            .with_cache_dir(self.cache_dir.clone())
            .with_time_memory(Duration::from_secs(self.time_memory_secs));
        if let Some(base_dir) = &self.base_dir {
            config = config.with_base_dir(base_dir.clone());
        }
        if let Some(base_url) = &self.base_url {
            config = config.with_base_url(base_url.clone());
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool(" OFF "), Some(false));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_cache_config_from_server_config() {
        let config = ServerConfig {
            use_cache: false,
            cache_dir: PathBuf::from("speech"),
            base_dir: Some(PathBuf::from("/srv")),
            time_memory_secs: 120,
            base_url: Some("http://example.local:8085/".to_string()),
            ..ServerConfig::default()
        };
        let cache = config.cache_config();
        assert!(!cache.use_cache);
        assert_eq!(cache.cache_dir, PathBuf::from("speech"));
        assert_eq!(cache.base_dir, PathBuf::from("/srv"));
        assert_eq!(cache.time_memory, Duration::from_secs(120));
        assert_eq!(cache.base_url.as_deref(), Some("http://example.local:8085"));
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8085);
        assert!(config.use_cache);
        assert_eq!(config.voice_map, PathBuf::from("models/map.json"));
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
    }
}
