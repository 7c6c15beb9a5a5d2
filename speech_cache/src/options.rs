//! Request language and option validation.

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::key::Options;

/// Resolve the language and effective options for a request.
///
/// The language falls back to the engine default and must be one the engine
/// lists. Request options are merged over the engine defaults; every option
/// name outside the engine's allow-list is reported in one error.
pub fn process_options(
    engine: &dyn Engine,
    language: Option<&str>,
    options: Option<&Options>,
) -> Result<(String, Option<Options>)> {
    let language = match language.filter(|l| !l.is_empty()) {
        Some(language) => language.to_string(),
        None => engine
            .default_language()
            .map(str::to_string)
            .ok_or_else(|| Error::UnsupportedLanguage("None".to_string()))?,
    };
    if !engine.supported_languages().iter().any(|l| *l == language) {
        return Err(Error::UnsupportedLanguage(language));
    }

    let defaults = engine.default_options().filter(|d| !d.is_empty());
    let requested = options.filter(|o| !o.is_empty());
    let merged = match (defaults, requested) {
        (Some(mut defaults), Some(requested)) => {
            defaults.extend(requested.iter().map(|(k, v)| (k.clone(), v.clone())));
            Some(defaults)
        }
        (None, Some(requested)) => Some(requested.clone()),
        (defaults, None) => defaults,
    };

    if let Some(merged) = &merged {
        let supported = engine.supported_options();
        let invalid: Vec<String> = merged
            .keys()
            .filter(|name| !supported.contains(name))
            .cloned()
            .collect();
        if !invalid.is_empty() {
            return Err(Error::UnsupportedOption { options: invalid });
        }
    }

    Ok((language, merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SynthesizedAudio;
    use async_trait::async_trait;
    use serde_json::json;

    struct Configurable {
        defaults: Option<Options>,
        supported: Vec<String>,
    }

    #[async_trait]
    impl Engine for Configurable {
        fn name(&self) -> &str {
            "Configurable"
        }

        fn default_language(&self) -> Option<&str> {
            Some("en")
        }

        fn supported_languages(&self) -> Vec<String> {
            vec!["en".into(), "de".into()]
        }

        fn default_options(&self) -> Option<Options> {
            self.defaults.clone()
        }

        fn supported_options(&self) -> Vec<String> {
            self.supported.clone()
        }

        async fn synthesize(
            &self,
            _message: &str,
            _language: &str,
            _options: Option<&Options>,
        ) -> anyhow::Result<SynthesizedAudio> {
            anyhow::bail!("not used")
        }
    }

    fn engine(defaults: &[(&str, serde_json::Value)], supported: &[&str]) -> Configurable {
        let defaults: Options = defaults.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        Configurable {
            defaults: (!defaults.is_empty()).then_some(defaults),
            supported: supported.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_language_defaults_and_validation() {
        let e = engine(&[], &[]);
        assert_eq!(process_options(&e, None, None).unwrap(), ("en".to_string(), None));
        assert_eq!(process_options(&e, Some("de"), None).unwrap().0, "de");
        assert!(matches!(
            process_options(&e, Some("fr"), None),
            Err(Error::UnsupportedLanguage(l)) if l == "fr"
        ));
    }

    #[test]
    fn test_request_options_override_defaults() {
        let e = engine(&[("voice", json!("a")), ("speed", json!(1))], &["voice", "speed"]);
        let mut request = Options::new();
        request.insert("voice".into(), json!("b"));

        let (_, merged) = process_options(&e, None, Some(&request)).unwrap();
        let merged = merged.unwrap();
        assert_eq!(merged["voice"], json!("b"));
        assert_eq!(merged["speed"], json!(1));
    }

    #[test]
    fn test_defaults_used_without_request_options() {
        let e = engine(&[("voice", json!("a"))], &["voice"]);
        let (_, options) = process_options(&e, None, Some(&Options::new())).unwrap();
        assert_eq!(options.unwrap()["voice"], json!("a"));
    }

    #[test]
    fn test_all_unsupported_options_reported() {
        let e = engine(&[], &["voice"]);
        let mut request = Options::new();
        request.insert("pitch".into(), json!(2));
        request.insert("speed".into(), json!(1));
        request.insert("voice".into(), json!("a"));

        match process_options(&e, None, Some(&request)) {
            Err(Error::UnsupportedOption { options }) => {
                assert_eq!(options, vec!["pitch".to_string(), "speed".to_string()])
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
