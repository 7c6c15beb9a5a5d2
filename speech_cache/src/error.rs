//! Error types for the speech cache

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the cache manager.
///
/// `Clone` because a single failed synthesis is handed to every caller
/// waiting on the same in-flight operation.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Can't init cache dir {}: {source}", path.display())]
    CacheInit {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("Can't read cached audio for {key}: {reason}")]
    CacheRead { key: String, reason: String },

    #[error("Can't write {filename}: {source}")]
    CacheWrite {
        filename: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("Language '{0}' not supported")]
    UnsupportedLanguage(String),

    #[error("Invalid options found: {}", options.join(", "))]
    UnsupportedOption { options: Vec<String> },

    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    #[error("Wrong tts file format: {0}")]
    InvalidFilename(String),

    #[error("{0} not in cache")]
    NotCached(String),

    #[error("Provider {0} not found")]
    EngineNotFound(String),

    #[error("Can't register engine: {0}")]
    EngineRegistration(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Which stage of request processing produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStage {
    Validation,
    Synthesis,
    CacheIo,
    NotFound,
    Internal,
}

impl Error {
    pub fn stage(&self) -> ErrorStage {
        match self {
            Error::UnsupportedLanguage(_)
            | Error::UnsupportedOption { .. }
            | Error::EngineRegistration(_) => ErrorStage::Validation,
            Error::Synthesis(_) => ErrorStage::Synthesis,
            Error::CacheInit { .. } | Error::CacheRead { .. } | Error::CacheWrite { .. } => {
                ErrorStage::CacheIo
            }
            Error::InvalidFilename(_) | Error::NotCached(_) | Error::EngineNotFound(_) => {
                ErrorStage::NotFound
            }
            Error::Task(_) => ErrorStage::Internal,
        }
    }

    pub(crate) fn io_init(path: PathBuf, source: std::io::Error) -> Self {
        Error::CacheInit {
            path,
            source: Arc::new(source),
        }
    }

    pub(crate) fn io_write(filename: &str, source: std::io::Error) -> Self {
        Error::CacheWrite {
            filename: filename.to_string(),
            source: Arc::new(source),
        }
    }
}
