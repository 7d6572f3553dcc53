use std::{collections::HashMap, fs, path::Path};

use anyhow::Context;
use piper_rs::synth::{PiperSpeechStreamParallel, PiperSpeechSynthesizer};
use tracing::{debug, info};

use crate::engine::{EngineError, RawSegment, SegmentSource, SynthesisEngine};
use crate::params::{LanguageSet, SynthesisRequest};

// Loaded synthesizer and its output rate
struct LoadedVoice {
    synth: PiperSpeechSynthesizer,
    sample_rate: u32,
}

/// Piper ONNX voices, one per language key.
///
/// Piper has no voice cloning, so the reference audio and prompt text of a
/// request are accepted but not used. Each sentence Piper emits becomes one
/// segment.
pub struct PiperEngine {
    // language key -> voice config path
    voices: HashMap<String, String>,
    // config path -> loaded synthesizer
    loaded: HashMap<String, LoadedVoice>,
}

// Manual Debug implementation since PiperSpeechSynthesizer doesn't implement Debug
impl std::fmt::Debug for PiperEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PiperEngine")
            .field("voices", &self.voices)
            .field("loaded", &self.loaded.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PiperEngine {
    /// Create from a prebuilt language -> config path map
    pub fn new(voices: HashMap<String, String>) -> Self {
        Self {
            voices,
            loaded: HashMap::new(),
        }
    }

    /// Load from a voices map such as `models/map.json`.
    ///
    /// Each entry is either a config path string or an object with a
    /// `config` key.
    pub fn new_from_mapfile<P: AsRef<Path>>(p: P) -> anyhow::Result<Self> {
        let text = fs::read_to_string(p.as_ref())
            .with_context(|| format!("Failed to load {}", p.as_ref().display()))?;
        Self::from_map_json(&text)
    }

    fn from_map_json(text: &str) -> anyhow::Result<Self> {
        let json: serde_json::Value =
            serde_json::from_str(text).with_context(|| "voices map is not valid JSON")?;
        let obj = json
            .as_object()
            .ok_or_else(|| anyhow::anyhow!("voices map must be a JSON object"))?;

        let mut voices = HashMap::new();
        for (lang, v) in obj {
            let config = match v {
                serde_json::Value::String(path) => path.clone(),
                serde_json::Value::Object(o) => o
                    .get("config")
                    .and_then(|x| x.as_str())
                    .ok_or_else(|| anyhow::anyhow!("missing 'config' for key {}", lang))?
                    .to_string(),
                _ => {
                    return Err(anyhow::anyhow!(
                        "invalid entry for key {} (expected string or object)",
                        lang
                    ))
                }
            };
            voices.insert(lang.clone(), config);
        }
        Ok(Self::new(voices))
    }

    /// Read sample rate from model config JSON
    fn read_sample_rate<P: AsRef<Path>>(cfg_path: P) -> anyhow::Result<u32> {
        let text = fs::read_to_string(cfg_path.as_ref()).with_context(|| {
            format!("Failed to read config file: {}", cfg_path.as_ref().display())
        })?;
        let json: serde_json::Value =
            serde_json::from_str(&text).with_context(|| "Config file is not valid JSON")?;

        let sample_rate = json
            .get("audio")
            .and_then(|a| a.get("sample_rate"))
            .and_then(|sr| sr.as_u64())
            .ok_or_else(|| anyhow::anyhow!("Missing or invalid 'audio.sample_rate' in config"))?;

        Ok(sample_rate as u32)
    }

    fn voice(&mut self, lang: &str) -> anyhow::Result<&LoadedVoice> {
        let cfg_path = self
            .voices
            .get(lang)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Unknown language key: {lang}"))?;

        if !self.loaded.contains_key(&cfg_path) {
            let sample_rate = Self::read_sample_rate(&cfg_path)?;
            let model = piper_rs::from_config_path(Path::new(&cfg_path))
                .map_err(|e| anyhow::anyhow!("piper load error: {e}"))?;
            let synth = PiperSpeechSynthesizer::new(model)
                .map_err(|e| anyhow::anyhow!("piper init error: {e}"))?;
            info!(%lang, %cfg_path, sample_rate, "loaded piper voice");
            self.loaded
                .insert(cfg_path.clone(), LoadedVoice { synth, sample_rate });
        }
        self.loaded
            .get(&cfg_path)
            .ok_or_else(|| anyhow::anyhow!("voice {cfg_path} vanished from cache"))
    }
}

/// Convert f32 [-1.0, 1.0] samples to i16
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    const I16_MAX_F32: f32 = i16::MAX as f32;
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * I16_MAX_F32) as i16)
        .collect()
}

impl SynthesisEngine for PiperEngine {
    fn languages(&self) -> LanguageSet {
        LanguageSet::new(self.voices.keys().cloned())
    }

    fn synthesize<'a>(
        &'a mut self,
        request: &SynthesisRequest,
    ) -> Result<SegmentSource<'a>, EngineError> {
        let params = request.params();
        if !request.reference_free() {
            debug!("piper ignores prompt text and reference audio");
        }
        let voice = self
            .voice(&params.language)
            .map_err(|e| EngineError::Fatal(e.to_string()))?;
        let sample_rate = voice.sample_rate;

        let iter: PiperSpeechStreamParallel = voice
            .synth
            .synthesize_parallel(params.text.clone(), None)
            .map_err(|e| EngineError::Fatal(format!("piper synth error: {e}")))?;

        Ok(Box::new(iter.map(move |part| match part {
            Ok(audio) => Ok(RawSegment::new(sample_rate, f32_to_i16(&audio.into_vec()))),
            Err(e) => Err(EngineError::Segment(format!("chunk error: {e}"))),
        })))
    }
}
