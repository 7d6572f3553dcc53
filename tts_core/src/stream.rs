//! Streaming synthesis pipeline.
//!
//! A request is validated, handed to the engine, and the engine's segments
//! are pulled one at a time. Each segment is encoded into a container and
//! yielded before the next one is requested, so the engine never runs more
//! than one segment ahead of the consumer. A segment the engine fails to
//! produce is logged and skipped; the rest of the utterance still streams.

use std::iter::FusedIterator;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::encoder::{Container, SegmentEncoder};
use crate::engine::{EngineError, SegmentSource, SynthesisEngine};
use crate::error::{Result, TtsError};
use crate::params::{validate, SynthesisParams};
use crate::wav::AudioFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Validating,
    Synthesizing,
    EmittingSegment,
    SegmentFailed,
    Done,
    Terminated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Largest tolerated `skipped / attempted` ratio. Exceeding it turns the
    /// end of the stream into `TooManyFailedSegments`.
    pub max_skipped_ratio: f64,
    /// Rate every segment must carry, unless the request declares its own.
    pub target_sample_rate: Option<u32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_skipped_ratio: 1.0,
            target_sample_rate: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub emitted: usize,
    pub skipped: usize,
    pub frames: u64,
}

#[derive(Debug, Clone, Default)]
pub struct StreamPipeline {
    config: PipelineConfig,
}

impl StreamPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Validate `params` and, only if they pass, start synthesis on `engine`.
    pub fn start<'a, E>(&self, engine: &'a mut E, params: SynthesisParams) -> Result<ContainerStream<'a>>
    where
        E: SynthesisEngine + ?Sized,
    {
        let mut state = PipelineState::Validating;
        debug!(?state, "validating synthesis request");
        let request = validate(params, &engine.languages())?;

        let target = request
            .params()
            .target_sample_rate
            .or(self.config.target_sample_rate);
        state = PipelineState::Synthesizing;
        info!(
            ?state,
            chars = request.text().chars().count(),
            language = %request.params().language,
            reference_free = request.reference_free(),
            "starting synthesis"
        );
        let source = engine.synthesize(&request).map_err(|e| match e {
            EngineError::Segment(reason) | EngineError::Fatal(reason) => TtsError::Engine(reason),
        })?;

        Ok(ContainerStream {
            source,
            encoder: SegmentEncoder::new(target),
            max_skipped_ratio: self.config.max_skipped_ratio,
            state,
            stats: StreamStats::default(),
            attempted: 0,
            failures: Vec::new(),
        })
    }
}

/// Lazy, finite, non-restartable sequence of containers for one request.
pub struct ContainerStream<'a> {
    source: SegmentSource<'a>,
    encoder: SegmentEncoder,
    max_skipped_ratio: f64,
    state: PipelineState,
    stats: StreamStats,
    attempted: usize,
    failures: Vec<TtsError>,
}

impl ContainerStream<'_> {
    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Format established by the first emitted segment or the declared target.
    pub fn format(&self) -> Option<AudioFormat> {
        self.encoder.format()
    }

    /// Segment failures absorbed so far.
    pub fn failures(&self) -> &[TtsError] {
        &self.failures
    }

    fn skip(&mut self, error: TtsError) {
        warn!("{error}, skipping segment");
        self.stats.skipped += 1;
        self.failures.push(error);
        self.state = PipelineState::SegmentFailed;
    }

    fn finish(&mut self) -> Option<Result<Container>> {
        self.state = PipelineState::Done;
        let StreamStats { emitted, skipped, frames } = self.stats;
        info!(emitted, skipped, frames, "synthesis finished");
        self.state = PipelineState::Terminated;

        if self.attempted > 0 && skipped as f64 / self.attempted as f64 > self.max_skipped_ratio {
            return Some(Err(TtsError::TooManyFailedSegments {
                skipped,
                attempted: self.attempted,
            }));
        }
        None
    }
}

impl Iterator for ContainerStream<'_> {
    type Item = Result<Container>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if matches!(self.state, PipelineState::Done | PipelineState::Terminated) {
                self.state = PipelineState::Terminated;
                return None;
            }

            self.state = PipelineState::Synthesizing;
            let index = self.attempted;
            let segment = match self.source.next() {
                None => return self.finish(),
                Some(Err(EngineError::Fatal(reason))) => {
                    self.state = PipelineState::Terminated;
                    return Some(Err(TtsError::Engine(reason)));
                }
                Some(Err(EngineError::Segment(reason))) => {
                    self.attempted += 1;
                    self.skip(TtsError::SegmentSynthesisFailed { index, reason });
                    continue;
                }
                Some(Ok(segment)) => segment,
            };
            self.attempted += 1;

            self.state = PipelineState::EmittingSegment;
            match self.encoder.encode(segment) {
                Ok(container) => {
                    self.stats.emitted += 1;
                    self.stats.frames += container.frame_count();
                    debug!(index, frames = container.frame_count(), "segment encoded");
                    return Some(Ok(container));
                }
                Err(e @ TtsError::FormatMismatch { .. }) => {
                    self.state = PipelineState::Terminated;
                    return Some(Err(e));
                }
                Err(e) => self.skip(TtsError::SegmentSynthesisFailed {
                    index,
                    reason: e.to_string(),
                }),
            }
        }
    }
}

impl FusedIterator for ContainerStream<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{RawSegment, ScriptedEngine};

    fn params() -> (tempfile::NamedTempFile, SynthesisParams) {
        let file = tempfile::NamedTempFile::new().unwrap();
        let params = SynthesisParams::new("Hello. World.", file.path());
        (file, params)
    }

    #[test]
    fn test_yields_one_container_per_segment() {
        let (_ref, params) = params();
        let mut engine = ScriptedEngine::from_samples(32000, vec![vec![100, -100], vec![50, 50, 50]]);
        let pipeline = StreamPipeline::default();
        let mut stream = pipeline.start(&mut engine, params).unwrap();

        let first = stream.next().unwrap().unwrap();
        assert_eq!(first.frame_count(), 2);
        assert_eq!(stream.state(), PipelineState::EmittingSegment);
        let second = stream.next().unwrap().unwrap();
        assert_eq!(second.frame_count(), 3);
        assert!(stream.next().is_none());
        assert_eq!(stream.state(), PipelineState::Terminated);
        assert!(stream.next().is_none());
        assert_eq!(
            stream.stats(),
            StreamStats { emitted: 2, skipped: 0, frames: 5 }
        );
    }

    #[test]
    fn test_invalid_params_never_reach_engine() {
        let mut engine = ScriptedEngine::from_samples(32000, vec![vec![1]]);
        let params = SynthesisParams::new("text", "/no/such/reference.wav");
        {
            let result = StreamPipeline::default().start(&mut engine, params);
            assert!(matches!(result, Err(TtsError::InvalidInput(_))));
        }
        assert!(engine.requests().is_empty());
    }

    #[test]
    fn test_reference_free_passed_to_engine() {
        let (_ref, mut params) = params();
        params.prompt_text = Some("spoken prompt".to_string());
        let mut engine = ScriptedEngine::from_samples(32000, vec![]);
        let stream = StreamPipeline::default().start(&mut engine, params).unwrap();
        drop(stream);
        assert_eq!(engine.requests().len(), 1);
        assert!(!engine.requests()[0].reference_free());
    }

    #[test]
    fn test_failed_segment_is_skipped() {
        let (_ref, params) = params();
        let mut engine = ScriptedEngine::new(vec![
            Ok(RawSegment::new(16000, vec![1, 2])),
            Err(EngineError::Segment("oom".to_string())),
            Ok(RawSegment::new(16000, vec![3])),
        ]);
        let mut stream = StreamPipeline::default().start(&mut engine, params).unwrap();
        let frames: Vec<u64> = stream
            .by_ref()
            .map(|c| c.unwrap().frame_count())
            .collect();
        assert_eq!(frames, vec![2, 1]);
        assert_eq!(stream.stats().skipped, 1);
        assert!(matches!(
            stream.failures(),
            [TtsError::SegmentSynthesisFailed { index: 1, .. }]
        ));
    }

    #[test]
    fn test_fatal_error_terminates() {
        let (_ref, params) = params();
        let mut engine = ScriptedEngine::new(vec![
            Ok(RawSegment::new(16000, vec![1])),
            Err(EngineError::Fatal("model unloaded".to_string())),
            Ok(RawSegment::new(16000, vec![2])),
        ]);
        let mut stream = StreamPipeline::default().start(&mut engine, params).unwrap();
        assert!(stream.next().unwrap().is_ok());
        assert!(matches!(stream.next(), Some(Err(TtsError::Engine(_)))));
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_engine_start_failure() {
        let (_ref, params) = params();
        let mut engine = ScriptedEngine::from_samples(16000, vec![])
            .failing_with(EngineError::Fatal("no weights".to_string()));
        let result = StreamPipeline::default().start(&mut engine, params);
        assert!(matches!(result, Err(TtsError::Engine(_))));
    }

    #[test]
    fn test_rate_mismatch_is_fatal() {
        let (_ref, params) = params();
        let mut engine = ScriptedEngine::from_samples(32000, vec![vec![1], vec![2]]);
        let pipeline = StreamPipeline::new(PipelineConfig {
            target_sample_rate: Some(44100),
            ..PipelineConfig::default()
        });
        let mut stream = pipeline.start(&mut engine, params).unwrap();
        assert!(matches!(
            stream.next(),
            Some(Err(TtsError::FormatMismatch { .. }))
        ));
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_request_rate_overrides_config() {
        let (_ref, mut params) = params();
        params.target_sample_rate = Some(32000);
        let mut engine = ScriptedEngine::from_samples(32000, vec![vec![1]]);
        let pipeline = StreamPipeline::new(PipelineConfig {
            target_sample_rate: Some(44100),
            ..PipelineConfig::default()
        });
        let results: Vec<_> = pipeline.start(&mut engine, params).unwrap().collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
    }

    #[test]
    fn test_skip_ratio_limit() {
        let (_ref, params) = params();
        let mut engine = ScriptedEngine::new(vec![
            Err(EngineError::Segment("a".to_string())),
            Err(EngineError::Segment("b".to_string())),
            Ok(RawSegment::new(16000, vec![1])),
        ]);
        let pipeline = StreamPipeline::new(PipelineConfig {
            max_skipped_ratio: 0.5,
            ..PipelineConfig::default()
        });
        let results: Vec<_> = pipeline.start(&mut engine, params).unwrap().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(TtsError::TooManyFailedSegments { skipped: 2, attempted: 3 })
        ));
    }

    #[test]
    fn test_empty_engine_output() {
        let (_ref, params) = params();
        let mut engine = ScriptedEngine::from_samples(16000, vec![]);
        let mut stream = StreamPipeline::default().start(&mut engine, params).unwrap();
        assert!(stream.next().is_none());
        assert_eq!(stream.stats(), StreamStats::default());
        assert_eq!(stream.format(), None);
    }
}
