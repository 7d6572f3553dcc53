//! Streaming speech synthesis delivered as self-contained WAV containers.
//!
//! A request flows through four stages:
//!
//! 1. [`params::validate`] checks the request before any synthesis happens.
//! 2. [`stream::StreamPipeline`] pulls segments from a [`SynthesisEngine`]
//!    one at a time.
//! 3. [`encoder::SegmentEncoder`] wraps each segment into a playable
//!    [`Container`].
//! 4. A [`sink::ContainerSink`] writes the containers out, either as raw PCM
//!    or assembled into a single WAV file.

pub mod encoder;
pub mod engine;
pub mod error;
pub mod params;
pub mod piper;
pub mod sink;
pub mod stream;
pub mod wav;

pub use encoder::{Container, SegmentEncoder};
pub use engine::{EngineError, RawSegment, ScriptedEngine, SegmentSource, SynthesisEngine};
pub use error::{Result, TtsError};
pub use params::{validate, CutMethod, LanguageSet, SynthesisParams, SynthesisRequest};
pub use piper::PiperEngine;
pub use sink::{
    drain_into, save_pcm_stream, save_wav_stream, ContainerSink, RawPcmSink, SharedSink,
    SinkSummary, SinkTarget, WavAssembler,
};
pub use stream::{ContainerStream, PipelineConfig, PipelineState, StreamPipeline, StreamStats};
pub use wav::{inspect_wav, AudioFormat, WavHeader};
