// Configuration for the server, read from the environment

use std::path::PathBuf;
use std::time::Duration;

use tts_core::PipelineConfig;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub request_timeout_secs: u64,
    pub voices_map: PathBuf,
    pub output_dir: PathBuf,
    pub default_ref_audio: Option<PathBuf>,
    pub target_sample_rate: Option<u32>,
    pub max_skipped_ratio: f64,
    pub cors_allowed_origins: Option<Vec<String>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8085,
            request_timeout_secs: 120,
            voices_map: PathBuf::from("models/map.json"),
            output_dir: PathBuf::from("output"),
            default_ref_audio: None,
            target_sample_rate: None,
            max_skipped_ratio: 1.0,
            cors_allowed_origins: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            });

        Self {
            port: env_parse("PORT").unwrap_or(defaults.port),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS")
                .unwrap_or(defaults.request_timeout_secs),
            voices_map: env_parse("VOICES_MAP").unwrap_or(defaults.voices_map),
            output_dir: env_parse("OUTPUT_DIR").unwrap_or(defaults.output_dir),
            default_ref_audio: env_parse("DEFAULT_REF_AUDIO"),
            target_sample_rate: env_parse("TARGET_SAMPLE_RATE"),
            max_skipped_ratio: env_parse("MAX_SKIPPED_RATIO").unwrap_or(defaults.max_skipped_ratio),
            cors_allowed_origins,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_skipped_ratio: self.max_skipped_ratio,
            target_sample_rate: self.target_sample_rate,
        }
    }
}
