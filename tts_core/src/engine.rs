//! Synthesis engine seam.
//!
//! The speech model is an external collaborator: anything that can turn a
//! validated request into a finite, non-restartable sequence of
//! `(sample_rate, samples)` results plugs in here.

use thiserror::Error;

use crate::params::{LanguageSet, SynthesisRequest};

/// One chunk of synthesized audio for one unit of input text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSegment {
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}

impl RawSegment {
    pub fn new(sample_rate: u32, samples: Vec<i16>) -> Self {
        Self {
            sample_rate,
            samples,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// This segment is lost, later segments may still succeed.
    #[error("segment error: {0}")]
    Segment(String),

    /// The whole request is lost.
    #[error("fatal engine error: {0}")]
    Fatal(String),
}

/// Lazy segment results for one request. `None` means the engine is exhausted.
pub type SegmentSource<'a> = Box<dyn Iterator<Item = Result<RawSegment, EngineError>> + 'a>;

/// A speech synthesis backend.
///
/// `synthesize` borrows the engine mutably for as long as its segments are
/// being pulled, so one engine instance serves at most one request at a time.
pub trait SynthesisEngine {
    /// Language keys this engine accepts.
    fn languages(&self) -> LanguageSet;

    fn synthesize<'a>(
        &'a mut self,
        request: &SynthesisRequest,
    ) -> Result<SegmentSource<'a>, EngineError>;
}

impl<E: SynthesisEngine + ?Sized> SynthesisEngine for Box<E> {
    fn languages(&self) -> LanguageSet {
        (**self).languages()
    }

    fn synthesize<'a>(
        &'a mut self,
        request: &SynthesisRequest,
    ) -> Result<SegmentSource<'a>, EngineError> {
        (**self).synthesize(request)
    }
}

/// In-memory engine that replays a fixed script of segment results.
///
/// Useful for tests and demos where no model is available.
#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    script: Vec<Result<RawSegment, EngineError>>,
    languages: LanguageSet,
    start_error: Option<EngineError>,
    requests: Vec<SynthesisRequest>,
}

impl ScriptedEngine {
    pub fn new(script: Vec<Result<RawSegment, EngineError>>) -> Self {
        Self {
            script,
            languages: LanguageSet::gpt_sovits(),
            start_error: None,
            requests: Vec::new(),
        }
    }

    /// Script made only of successful segments at one sample rate.
    pub fn from_samples(sample_rate: u32, segments: Vec<Vec<i16>>) -> Self {
        Self::new(
            segments
                .into_iter()
                .map(|s| Ok(RawSegment::new(sample_rate, s)))
                .collect(),
        )
    }

    pub fn with_languages(mut self, languages: LanguageSet) -> Self {
        self.languages = languages;
        self
    }

    /// Make every `synthesize` call fail before producing any segment.
    pub fn failing_with(mut self, error: EngineError) -> Self {
        self.start_error = Some(error);
        self
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> &[SynthesisRequest] {
        &self.requests
    }
}

impl SynthesisEngine for ScriptedEngine {
    fn languages(&self) -> LanguageSet {
        self.languages.clone()
    }

    fn synthesize<'a>(
        &'a mut self,
        request: &SynthesisRequest,
    ) -> Result<SegmentSource<'a>, EngineError> {
        self.requests.push(request.clone());
        if let Some(e) = &self.start_error {
            return Err(e.clone());
        }
        Ok(Box::new(self.script.clone().into_iter()))
    }
}
