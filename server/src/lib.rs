pub mod config;
pub mod error;
pub mod validation;

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

use tts_core::sink::DEFAULT_SAMPLE_RATE;
use tts_core::{
    drain_into, AudioFormat, ContainerSink, CutMethod, RawPcmSink, StreamPipeline, StreamStats,
    SynthesisEngine, SynthesisParams, WavAssembler,
};

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::validation::validate_tts_request;

pub type SharedEngine = Arc<Mutex<Box<dyn SynthesisEngine + Send>>>;

#[derive(Clone)]
pub struct AppState {
    pub engine: SharedEngine,
    pub languages: Arc<Vec<String>>,
    pub pipeline: StreamPipeline,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(engine: Box<dyn SynthesisEngine + Send>, config: ServerConfig) -> Self {
        let languages = Arc::new(engine.languages().to_vec());
        Self {
            engine: Arc::new(Mutex::new(engine)),
            languages,
            pipeline: StreamPipeline::new(config.pipeline_config()),
            config,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Wav,
    Pcm,
}

#[derive(Debug, Deserialize)]
pub struct TtsRequest {
    text: String,
    ref_audio_path: Option<PathBuf>,
    language: Option<String>,
    prompt_text: Option<String>,
    prompt_language: Option<String>,
    speed: Option<f32>,
    cut_method: Option<CutMethod>,
    sample_rate: Option<u32>,
    #[serde(default)]
    format: OutputFormat,
}

impl TtsRequest {
    fn into_params(self, config: &ServerConfig) -> SynthesisParams {
        let mut params = SynthesisParams::new(
            self.text,
            self.ref_audio_path
                .or_else(|| config.default_ref_audio.clone())
                .unwrap_or_default(),
        );
        if let Some(lang) = self.language {
            // The prompt is assumed to share the text's language unless told otherwise
            params.prompt_language = self.prompt_language.unwrap_or_else(|| lang.clone());
            params.language = lang;
        } else if let Some(prompt_lang) = self.prompt_language {
            params.prompt_language = prompt_lang;
        }
        params.prompt_text = self.prompt_text;
        params.speed = self.speed.unwrap_or(params.speed);
        params.cut_method = self.cut_method.unwrap_or_default();
        params.target_sample_rate = self.sample_rate;
        params
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TtsResponse {
    pub audio_base64: String,
    pub sample_rate: u32,
    pub duration_ms: u64,
    pub segments: usize,
    pub skipped: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileResponse {
    pub path: String,
    pub format: OutputFormat,
    pub sample_rate: Option<u32>,
    pub frames: u64,
    pub bytes: u64,
    pub segments: usize,
    pub skipped: usize,
}

/// Build the router with all routes and middleware.
pub fn app(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        .layer(cors)
        .into_inner();

    let api = Router::new()
        .route("/health", get(health_check))
        .route("/languages", get(list_languages))
        .route("/tts", post(tts_endpoint))
        .route("/tts/stream", post(tts_stream_endpoint))
        .route("/tts/file", post(tts_file_endpoint));

    Router::new()
        .merge(api.clone()) // root paths
        .nest("/api", api) // /api prefix
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(middleware_stack)
        .with_state(state)
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
        .allow_credentials(false);

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .flatten()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();
    if origins.is_empty() {
        base.allow_origin(tower_http::cors::Any)
    } else {
        base.allow_origin(tower_http::cors::AllowOrigin::list(origins))
    }
}

// Request ID middleware for tracing
async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let value = HeaderValue::from_str(&request_id).ok();
    if let Some(v) = &value {
        request.headers_mut().insert("x-request-id", v.clone());
    }
    let mut response = next.run(request).await;
    if let Some(v) = value {
        response.headers_mut().insert("x-request-id", v);
    }
    response
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn list_languages(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.languages.as_ref().clone())
}

/// Run `job` against the engine on the blocking pool. The engine lock is held
/// for the whole job, so requests against one engine are serialized.
async fn with_engine<T, F>(state: &AppState, job: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&mut (dyn SynthesisEngine + Send), &StreamPipeline) -> Result<T, ApiError>
        + Send
        + 'static,
{
    let engine = Arc::clone(&state.engine);
    let pipeline = state.pipeline.clone();
    tokio::task::spawn_blocking(move || {
        let mut engine = engine
            .lock()
            .map_err(|_| ApiError::InternalError("Engine lock poisoned".to_string()))?;
        job(&mut **engine, &pipeline)
    })
    .await
    .map_err(|e| ApiError::InternalError(format!("Task join error: {e}")))?
}

fn empty_format(params: &SynthesisParams, config: &ServerConfig) -> AudioFormat {
    AudioFormat::mono16(
        params
            .target_sample_rate
            .or(config.target_sample_rate)
            .unwrap_or(DEFAULT_SAMPLE_RATE),
    )
}

/// Synthesize and assemble one WAV file in memory.
pub async fn tts_endpoint(
    State(state): State<AppState>,
    Json(req): Json<TtsRequest>,
) -> Result<Json<TtsResponse>, ApiError> {
    validate_tts_request(&req.text, req.language.as_deref())?;
    let params = req.into_params(&state.config);
    let empty = empty_format(&params, &state.config);

    let (bytes, stats) = with_engine(&state, move |engine, pipeline| {
        let mut stream = pipeline.start(engine, params)?;
        let mut sink = WavAssembler::create(Cursor::new(Vec::new()))?.with_empty_format(empty);
        drain_into(stream.by_ref(), &mut sink)?;
        Ok((sink.into_inner().into_inner(), stream.stats()))
    })
    .await?;

    let header = tts_core::WavHeader::parse(&bytes)?;
    let sample_rate = header.format.sample_rate;
    let duration_ms = header.frame_count() * 1000 / sample_rate as u64;
    info!(frames = header.frame_count(), segments = stats.emitted, "tts request complete");

    Ok(Json(TtsResponse {
        audio_base64: tts_core::wav::encode_base64(&bytes),
        sample_rate,
        duration_ms,
        segments: stats.emitted,
        skipped: stats.skipped,
    }))
}

/// Stream containers to the client as they are synthesized.
///
/// With `"format": "wav"` every chunk of the body is one independently
/// playable WAV container; with `"format": "pcm"` the body is bare PCM.
pub async fn tts_stream_endpoint(
    State(state): State<AppState>,
    Json(req): Json<TtsRequest>,
) -> Result<Response, ApiError> {
    validate_tts_request(&req.text, req.language.as_deref())?;
    let format = req.format;
    let params = req.into_params(&state.config);

    // One segment in flight: the engine is never more than one segment ahead
    let (tx, mut rx) = mpsc::channel::<Result<Bytes, String>>(1);
    let (started_tx, started_rx) = oneshot::channel::<Result<(), ApiError>>();

    let engine = Arc::clone(&state.engine);
    let pipeline = state.pipeline.clone();
    tokio::task::spawn_blocking(move || {
        let mut engine = match engine.lock() {
            Ok(e) => e,
            Err(_) => {
                let _ = started_tx.send(Err(ApiError::InternalError(
                    "Engine lock poisoned".to_string(),
                )));
                return;
            }
        };
        let stream = match pipeline.start(&mut **engine, params) {
            Ok(s) => s,
            Err(e) => {
                let _ = started_tx.send(Err(e.into()));
                return;
            }
        };
        if started_tx.send(Ok(())).is_err() {
            return;
        }

        for item in stream {
            let chunk = item
                .map(|c| match format {
                    OutputFormat::Wav => Bytes::from(c.into_bytes()),
                    OutputFormat::Pcm => Bytes::copy_from_slice(c.payload()),
                })
                .map_err(|e| e.to_string());
            let failed = chunk.is_err();
            if tx.blocking_send(chunk).is_err() {
                // Receiver dropped, stop pulling segments
                info!("client went away, stopping synthesis");
                break;
            }
            if failed {
                break;
            }
        }
    });

    started_rx
        .await
        .map_err(|_| ApiError::InternalError("Synthesis task ended unexpectedly".to_string()))??;

    let body = async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            match chunk {
                Ok(bytes) => yield Ok(bytes),
                Err(e) => {
                    warn!("stream aborted: {e}");
                    yield Err(std::io::Error::new(std::io::ErrorKind::Other, e));
                }
            }
        }
    };

    let content_type = match format {
        OutputFormat::Wav => "application/octet-stream",
        OutputFormat::Pcm => "audio/pcm",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], Body::from_stream(body)).into_response())
}

/// Assemble the stream into a file under the configured output directory.
pub async fn tts_file_endpoint(
    State(state): State<AppState>,
    Json(req): Json<TtsRequest>,
) -> Result<Json<FileResponse>, ApiError> {
    validate_tts_request(&req.text, req.language.as_deref())?;
    let format = req.format;
    let params = req.into_params(&state.config);
    let empty = empty_format(&params, &state.config);

    tokio::fs::create_dir_all(&state.config.output_dir)
        .await
        .map_err(|e| ApiError::InternalError(format!("Cannot create output dir: {e}")))?;
    let extension = match format {
        OutputFormat::Wav => "wav",
        OutputFormat::Pcm => "pcm",
    };
    let path = state
        .config
        .output_dir
        .join(format!("{}.{extension}", uuid::Uuid::new_v4()));

    let out_path = path.clone();
    let (summary, stats): (tts_core::SinkSummary, StreamStats) =
        with_engine(&state, move |engine, pipeline| {
            let mut stream = pipeline.start(engine, params)?;
            let file = std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&out_path)
                .map_err(tts_core::TtsError::from)?;
            let mut sink: Box<dyn ContainerSink> = match format {
                OutputFormat::Wav => Box::new(WavAssembler::create(file)?.with_empty_format(empty)),
                OutputFormat::Pcm => Box::new(RawPcmSink::new(std::io::BufWriter::new(file))),
            };
            let summary = drain_into(stream.by_ref(), &mut sink)?;
            Ok((summary, stream.stats()))
        })
        .await?;

    info!(path = %path.display(), frames = summary.frames, "assembled file");
    Ok(Json(FileResponse {
        path: path.display().to_string(),
        format,
        sample_rate: summary.format.map(|f| f.sample_rate),
        frames: summary.frames,
        bytes: summary.bytes,
        segments: stats.emitted,
        skipped: stats.skipped,
    }))
}
