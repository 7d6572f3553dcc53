use crate::error::ApiError;

/// Maximum text length for TTS requests
const MAX_TEXT_LENGTH: usize = 5000;
/// Longest accepted language key
const MAX_LANGUAGE_KEY: usize = 32;

/// Transport-level checks done before a request reaches the pipeline.
///
/// Semantic checks (reference audio, supported languages, speed) belong to
/// `tts_core::validate`.
pub fn validate_tts_request(text: &str, language: Option<&str>) -> Result<(), ApiError> {
    if text.chars().count() > MAX_TEXT_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Text too long (max {} characters)",
            MAX_TEXT_LENGTH
        )));
    }

    if let Some(lang) = language {
        if !is_valid_language_key(lang) {
            return Err(ApiError::InvalidInput(format!(
                "Invalid language key format: {}",
                lang
            )));
        }
    }

    Ok(())
}

/// Language keys are short identifiers such as `en`, `all_zh` or `de_DE`
fn is_valid_language_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_LANGUAGE_KEY
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_tts_request_valid() {
        assert!(validate_tts_request("Hello", Some("de_DE")).is_ok());
        assert!(validate_tts_request("Test", Some("all_zh")).is_ok());
        assert!(validate_tts_request("Test", None).is_ok());
    }

    #[test]
    fn test_validate_tts_request_too_long() {
        let long_text = "a".repeat(6000);
        let result = validate_tts_request(&long_text, Some("de_DE"));
        assert!(result.is_err());
        if let Err(ApiError::InvalidInput(msg)) = result {
            assert!(msg.contains("too long"));
        }
    }

    #[test]
    fn test_validate_tts_request_invalid_language_key() {
        assert!(validate_tts_request("Hello", Some("")).is_err());
        assert!(validate_tts_request("Hello", Some("en US")).is_err());
        assert!(validate_tts_request("Hello", Some("../etc")).is_err());
        assert!(validate_tts_request("Hello", Some(&"x".repeat(40))).is_err());
    }
}
