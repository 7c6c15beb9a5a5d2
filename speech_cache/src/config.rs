// Cache manager configuration

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CACHE_DIR: &str = "tts";
pub const DEFAULT_TIME_MEMORY: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Persist synthesized audio to disk unless a request says otherwise.
    pub use_cache: bool,
    /// Relative paths are resolved against `base_dir`.
    pub cache_dir: PathBuf,
    pub base_dir: PathBuf,
    /// How long resolved audio stays in memory.
    pub time_memory: Duration,
    /// Prefix for absolute URLs, e.g. `http://localhost:8085`.
    pub base_url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            use_cache: true,
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            base_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            time_memory: DEFAULT_TIME_MEMORY,
            base_url: None,
        }
    }
}

impl CacheConfig {
    pub fn with_use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn with_time_memory(mut self, time_memory: Duration) -> Self {
        self.time_memory = time_memory;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        self.base_url = Some(base_url.trim_end_matches('/').to_string());
        self
    }

    /// Absolute URL for a path returned by the manager, or the path itself.
    pub fn absolute_url(&self, path: &str) -> String {
        match &self.base_url {
            Some(base) => format!("{base}{path}"),
            None => path.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert!(config.use_cache);
        assert_eq!(config.cache_dir, PathBuf::from("tts"));
        assert_eq!(config.time_memory, Duration::from_secs(300));
        assert!(config.base_url.is_none());
    }

    #[test]
    fn test_absolute_url() {
        let config = CacheConfig::default().with_base_url("http://tts.local:8085/");
        assert_eq!(
            config.absolute_url("/api/tts_proxy/a.mp3"),
            "http://tts.local:8085/api/tts_proxy/a.mp3"
        );
        assert_eq!(
            CacheConfig::default().absolute_url("/api/tts_proxy/a.mp3"),
            "/api/tts_proxy/a.mp3"
        );
    }
}
