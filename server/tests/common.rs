//! Common utilities for integration tests

use std::path::PathBuf;

use axum::Router;
use server::config::ServerConfig;
use server::{app, AppState};
use tempfile::TempDir;
use tts_core::ScriptedEngine;

/// Test app plus the scratch directory backing its reference audio and output
pub struct TestApp {
    pub router: Router,
    pub dir: TempDir,
}

impl TestApp {
    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("out")
    }
}

/// Create a test app instance backed by a scripted engine
pub fn create_test_app(engine: ScriptedEngine) -> TestApp {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    std::fs::write(dir.path().join("ref.wav"), b"reference").expect("Failed to write ref audio");

    let config = ServerConfig {
        output_dir: dir.path().join("out"),
        default_ref_audio: Some(dir.path().join("ref.wav")),
        ..ServerConfig::default()
    };
    let state = AppState::new(Box::new(engine), config);
    TestApp {
        router: app(state),
        dir,
    }
}

/// Engine emitting the two-segment utterance used throughout the tests
pub fn two_segment_engine() -> ScriptedEngine {
    ScriptedEngine::from_samples(32000, vec![vec![100, -100], vec![50, 50, 50]])
}
