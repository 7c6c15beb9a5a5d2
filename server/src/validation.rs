use crate::error::ApiError;

/// Maximum message length for speech requests
const MAX_MESSAGE_LENGTH: usize = 5000;
/// Longest accepted language tag
const MAX_LANGUAGE_LENGTH: usize = 35;

/// Validate a speech request before it reaches the cache manager.
///
/// Returns the engine id to use.
pub fn validate_speech_request<'a>(
    engine_id: Option<&'a str>,
    platform: Option<&'a str>,
    message: Option<&str>,
    language: Option<&str>,
) -> Result<&'a str, ApiError> {
    let engine = engine_id
        .filter(|e| !e.is_empty())
        .or(platform.filter(|p| !p.is_empty()));
    let (engine, message) = match (engine, message.filter(|m| !m.is_empty())) {
        (Some(engine), Some(message)) => (engine, message),
        _ => {
            return Err(ApiError::InvalidInput(
                "Must specify platform and message".to_string(),
            ))
        }
    };

    if message.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Message too long (max {} characters)",
            MAX_MESSAGE_LENGTH
        )));
    }

    if let Some(lang) = language {
        if !is_valid_language_code(lang) {
            return Err(ApiError::InvalidInput(format!(
                "Invalid language code format: {}. Expected e.g. en, en-US or de_DE",
                lang
            )));
        }
    }

    Ok(engine)
}

/// Language tag shape: 2-3 letter primary language, then `-` or `_`
/// separated alphanumeric subtags.
fn is_valid_language_code(code: &str) -> bool {
    if code.len() > MAX_LANGUAGE_LENGTH {
        return false;
    }
    let mut parts = code.split(['-', '_']);
    let primary_ok = parts
        .next()
        .is_some_and(|p| (2..=3).contains(&p.len()) && p.chars().all(|c| c.is_ascii_lowercase()));
    primary_ok && parts.all(|p| (1..=8).contains(&p.len()) && p.chars().all(|c| c.is_ascii_alphanumeric()))
}
