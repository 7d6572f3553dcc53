use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tts_core::TtsError;

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("TTS error: {0}")]
    TtsError(#[from] TtsError),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::TtsError(e) => match e {
                TtsError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                TtsError::FormatMismatch { .. } | TtsError::MalformedContainer(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                TtsError::SinkBusy(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match self {
            ApiError::InvalidInput(msg) | ApiError::InternalError(msg) => msg,
            ApiError::TtsError(TtsError::InvalidInput(msg)) => msg,
            ApiError::TtsError(e) => e.to_string(),
        };
        if status.is_server_error() {
            tracing::error!("{}", error_message);
        }

        let body = Json(ErrorResponse {
            error: error_message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tts_core::AudioFormat;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(TtsError::InvalidInput("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(TtsError::FormatMismatch {
                expected: AudioFormat::mono16(32000),
                actual: AudioFormat::mono16(16000),
            })
            .status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from(TtsError::SinkBusy("x".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(TtsError::Engine("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
