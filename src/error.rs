use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::format::FormatError;
use crate::params::ValidationError;

/// Main error type for the transcoding server
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("{0}")]
    Format(#[from] FormatError),

    #[error("File too big: maximum allowed size is {limit} bytes")]
    SizeLimit { limit: u64 },

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("Transcoding failed: {0}")]
    Transcode(#[from] FfmpegError),

    #[error("Request cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Resource(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl TranscodeError {
    /// HTTP status reported to the caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            // The build lacks the codec: nothing the caller can change.
            TranscodeError::Transcode(FfmpegError::EncoderNotFound(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            TranscodeError::Format(_)
            | TranscodeError::SizeLimit { .. }
            | TranscodeError::Validation(_)
            | TranscodeError::Transcode(_) => StatusCode::BAD_REQUEST,
            TranscodeError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            TranscodeError::Resource(_)
            | TranscodeError::Config(_)
            | TranscodeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label used for metrics and log fields.
    pub fn category(&self) -> &'static str {
        match self {
            TranscodeError::Format(_) => "format",
            TranscodeError::SizeLimit { .. } => "size_limit",
            TranscodeError::Validation(_) => "validation",
            TranscodeError::Transcode(_) => "transcode",
            TranscodeError::Cancelled => "cancelled",
            TranscodeError::Resource(_) => "resource",
            TranscodeError::Config(_) => "config",
            TranscodeError::Internal(_) => "internal",
        }
    }

    /// Whether the fault was caused by the caller's input rather than the server.
    pub fn is_client_fault(&self) -> bool {
        self.status_code().is_client_error() && !matches!(self, TranscodeError::Cancelled)
    }
}

impl IntoResponse for TranscodeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match self {
            TranscodeError::Cancelled => status.into_response(),
            _ if status.is_server_error() => {
                tracing::error!(error = %self, "request failed with server fault");
                (status, "Internal server error").into_response()
            }
            _ => (status, self.to_string()).into_response(),
        }
    }
}

/// FFmpeg-specific errors
#[derive(Error, Debug)]
pub enum FfmpegError {
    #[error("FFmpeg initialization failed: {0}")]
    InitFailed(String),

    #[error("Failed to open input: {0}")]
    OpenInput(String),

    #[error("No audio stream found in source")]
    NoAudioStream,

    #[error("Failed to create decoder: {0}")]
    DecoderCreate(String),

    #[error("Failed to find encoder: {0}")]
    EncoderNotFound(String),

    #[error("Failed to create encoder: {0}")]
    EncoderCreate(String),

    #[error("Failed to create resampler: {0}")]
    ResamplerCreate(String),

    #[error("Failed to create muxer: {0}")]
    MuxerCreate(String),

    #[error("Failed to write header: {0}")]
    WriteHeader(String),

    #[error("Failed to write packet: {0}")]
    WritePacket(String),

    #[error("Failed to write trailer: {0}")]
    WriteTrailer(String),

    #[error("Failed to decode packet: {0}")]
    DecodePacket(String),

    #[error("Failed to encode frame: {0}")]
    EncodeFrame(String),

    #[error("Failed to convert samples: {0}")]
    Resample(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, TranscodeError>;
