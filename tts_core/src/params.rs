//! Request parameters and their validation.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TtsError};
use crate::wav::AudioFormat;

/// Accepted speaking-rate multipliers.
pub const SPEED_RANGE: std::ops::RangeInclusive<f32> = 0.6..=1.65;

/// Language codes understood by the default GPT-SoVITS style backends.
pub const DEFAULT_LANGUAGES: &[&str] = &[
    "all_zh", "en", "all_ja", "all_yue", "all_ko", "zh", "ja", "yue", "ko", "auto", "auto_yue",
];

const DEFAULT_LANGUAGE: &str = "all_zh";

/// How the engine should split input text before synthesis. Opaque to this
/// crate and handed to the engine unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CutMethod {
    #[default]
    None,
    FourSentences,
    FiftyChars,
    ChinesePeriod,
    EnglishPeriod,
    Punctuation,
}

/// Set of language keys an engine can synthesize.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LanguageSet(BTreeSet<String>);

impl LanguageSet {
    pub fn new<I, S>(langs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(langs.into_iter().map(Into::into).collect())
    }

    /// The GPT-SoVITS language table.
    pub fn gpt_sovits() -> Self {
        Self::new(DEFAULT_LANGUAGES.iter().copied())
    }

    pub fn contains(&self, lang: &str) -> bool {
        self.0.contains(lang)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sorted list of language keys
    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

/// Raw, unvalidated synthesis parameters as supplied by a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisParams {
    pub text: String,
    pub ref_audio_path: PathBuf,
    pub language: String,
    pub prompt_text: Option<String>,
    pub prompt_language: String,
    pub speed: f32,
    pub cut_method: CutMethod,
    pub top_k: u32,
    pub top_p: f32,
    pub temperature: f32,
    /// Declared output sample rate. `None` adopts whatever the engine emits
    /// first.
    pub target_sample_rate: Option<u32>,
    pub bit_depth: u16,
}

impl Default for SynthesisParams {
    fn default() -> Self {
        Self {
            text: String::new(),
            ref_audio_path: PathBuf::new(),
            language: DEFAULT_LANGUAGE.to_string(),
            prompt_text: None,
            prompt_language: DEFAULT_LANGUAGE.to_string(),
            speed: 1.0,
            cut_method: CutMethod::None,
            top_k: 15,
            top_p: 1.0,
            temperature: 1.0,
            target_sample_rate: None,
            bit_depth: 16,
        }
    }
}

impl SynthesisParams {
    pub fn new(text: impl Into<String>, ref_audio_path: impl Into<PathBuf>) -> Self {
        Self {
            text: text.into(),
            ref_audio_path: ref_audio_path.into(),
            ..Self::default()
        }
    }
}

/// Parameters that passed validation. Only [`validate`] constructs one.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    params: SynthesisParams,
    reference_free: bool,
}

impl SynthesisRequest {
    pub fn params(&self) -> &SynthesisParams {
        &self.params
    }

    pub fn text(&self) -> &str {
        &self.params.text
    }

    /// True when no usable prompt text accompanies the reference audio.
    pub fn reference_free(&self) -> bool {
        self.reference_free
    }
}

/// Validate request parameters against the supported language set.
///
/// Checks run in a fixed order and the first failure is reported.
pub fn validate(params: SynthesisParams, languages: &LanguageSet) -> Result<SynthesisRequest> {
    if !params.ref_audio_path.exists() {
        return Err(TtsError::InvalidInput(format!(
            "Reference audio not found: {}",
            params.ref_audio_path.display()
        )));
    }
    if params.text.trim().is_empty() {
        return Err(TtsError::InvalidInput("Text cannot be empty".to_string()));
    }
    if !languages.contains(&params.language) {
        return Err(TtsError::InvalidInput(format!(
            "Unsupported language: {}",
            params.language
        )));
    }
    if !languages.contains(&params.prompt_language) {
        return Err(TtsError::InvalidInput(format!(
            "Unsupported prompt language: {}",
            params.prompt_language
        )));
    }
    if !params.speed.is_finite() || !SPEED_RANGE.contains(&params.speed) {
        return Err(TtsError::InvalidInput(format!(
            "Speed {} out of range ({}-{})",
            params.speed,
            SPEED_RANGE.start(),
            SPEED_RANGE.end()
        )));
    }
    if params.bit_depth != 16 {
        return Err(TtsError::InvalidInput(format!(
            "Unsupported bit depth {} (only 16-bit PCM)",
            params.bit_depth
        )));
    }
    if let Some(reason) = params
        .target_sample_rate
        .and_then(|rate| AudioFormat::mono16(rate).unsupported_reason())
    {
        return Err(TtsError::InvalidInput(format!(
            "Invalid target sample rate: {reason}"
        )));
    }
    if params.top_k == 0 {
        return Err(TtsError::InvalidInput("top_k must be at least 1".to_string()));
    }
    if !(params.top_p > 0.0 && params.top_p <= 1.0) {
        return Err(TtsError::InvalidInput(format!(
            "top_p {} must be in (0, 1]",
            params.top_p
        )));
    }
    if !(params.temperature > 0.0 && params.temperature.is_finite()) {
        return Err(TtsError::InvalidInput(format!(
            "temperature {} must be positive",
            params.temperature
        )));
    }

    let reference_free = params
        .prompt_text
        .as_deref()
        .map_or(true, |p| p.trim().is_empty());

    Ok(SynthesisRequest {
        params,
        reference_free,
    })
}
