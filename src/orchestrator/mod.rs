//! Transcode request orchestration
//!
//! One `TranscodeRequest` per POST walks through
//! `Received → FormatDetected → SizeChecked → ParamsValidated →
//! ArtifactAcquired → Transcoding → Completed | Failed → Cleaned`.
//! Every transition is logged at debug level inside the request span.
//! The artifact is released on every path: by the response body after the
//! last byte, by `fail`, or by `Drop` when the handler future is abandoned.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io::Cursor;
use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::extract::{FromRequest, Multipart};
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use regex::Regex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::artifact::{ArtifactBody, TempArtifact};
use crate::error::{Result, TranscodeError};
use crate::form::FILE_FIELD;
use crate::format::registry::extension_of;
use crate::format::{Format, FormatError, FormatRegistry};
use crate::metrics::Metrics;
use crate::params;
use crate::state::AppState;
use crate::transcode::{self, PipelineStats};

/// Lifecycle of a transcode request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    FormatDetected,
    SizeChecked,
    ParamsValidated,
    ArtifactAcquired,
    Transcoding,
    Completed,
    Failed,
    Cleaned,
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestState::Received => "received",
            RequestState::FormatDetected => "format_detected",
            RequestState::SizeChecked => "size_checked",
            RequestState::ParamsValidated => "params_validated",
            RequestState::ArtifactAcquired => "artifact_acquired",
            RequestState::Transcoding => "transcoding",
            RequestState::Completed => "completed",
            RequestState::Failed => "failed",
            RequestState::Cleaned => "cleaned",
        };
        f.write_str(name)
    }
}

/// Multipart form contents of one request
#[derive(Debug)]
pub struct Upload {
    /// Text fields, last value wins
    pub fields: HashMap<String, String>,
    pub file_name: Option<String>,
    pub data: Bytes,
}

/// State of a single conversion
pub struct TranscodeRequest {
    id: Uuid,
    state: RequestState,
    artifact: Option<TempArtifact>,
    metrics: Arc<Metrics>,
}

impl TranscodeRequest {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: RequestState::Received,
            artifact: None,
            metrics,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    fn advance(&mut self, next: RequestState) {
        tracing::debug!(from = %self.state, to = %next, "request state");
        self.state = next;
    }

    /// Run the request to completion and produce the HTTP response.
    ///
    /// `deadline` bounds the whole request, upload included.
    async fn process(
        &mut self,
        state: &AppState,
        path: &str,
        request: Request<Body>,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<Response> {
        let input = detect_input(&state.registry, path)?;
        self.advance(RequestState::FormatDetected);

        let limit = state.config.upload_limit(input);
        let upload = until_deadline(
            read_upload(request, limit, input, &state.registry),
            deadline,
            cancel,
        )
        .await?;
        tracing::debug!(
            bytes = upload.data.len(),
            file_name = upload.file_name.as_deref().unwrap_or(""),
            "upload received"
        );
        self.advance(RequestState::SizeChecked);

        let output = params::resolve_output(&state.registry, &upload.fields)?;
        let config = params::validate(output, &upload.fields)?;
        self.advance(RequestState::ParamsValidated);

        let (artifact, sink) = TempArtifact::acquire(&state.config.scratch_dir)?;
        self.artifact = Some(artifact);
        self.advance(RequestState::ArtifactAcquired);

        self.advance(RequestState::Transcoding);
        let stats = {
            let _active = self.metrics.start_transcode();
            let batch_size = state.config.batch_size;
            let token = cancel.clone();
            let data = upload.data;
            let task = tokio::task::spawn_blocking(move || {
                transcode::transcode(Cursor::new(data), input, &config, sink, batch_size, &token)
            });
            join_pipeline(task, deadline, cancel).await?
        };
        tracing::debug!(
            frames_decoded = stats.frames_decoded,
            samples = stats.samples_out,
            "transcode finished"
        );
        self.advance(RequestState::Completed);

        let mut artifact = self
            .artifact
            .take()
            .ok_or_else(|| TranscodeError::Internal("artifact missing after transcode".to_string()))?;
        let (file, size) = artifact.finalize()?;
        let file_name = output_file_name(upload.file_name.as_deref(), output);

        let response = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, output.mime_type)
            .header(
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={}", file_name),
            )
            .header(header::CONTENT_LENGTH, size)
            .body(Body::from_stream(ArtifactBody::new(
                file,
                artifact,
                self.metrics.clone(),
            )))
            .map_err(|e| TranscodeError::Internal(format!("Failed to build response: {}", e)))?;

        self.metrics.record_completed();
        tracing::info!(
            input = input.name,
            output = output.name,
            size,
            file_name = %file_name,
            "transcode delivered"
        );
        // From here the response body owns the artifact.
        self.advance(RequestState::Cleaned);
        Ok(response)
    }

    /// Record a failure and release whatever the request holds.
    fn fail(&mut self, err: &TranscodeError) {
        self.advance(RequestState::Failed);
        match err {
            TranscodeError::Cancelled => {
                tracing::info!("request cancelled");
                self.metrics.record_cancelled();
            }
            e if e.is_client_fault() => {
                tracing::info!(category = e.category(), error = %e, "request rejected");
                self.metrics.record_failure(e.category());
            }
            e => self.metrics.record_failure(e.category()),
        }
        self.cleanup();
    }

    fn cleanup(&mut self) {
        if let Some(mut artifact) = self.artifact.take() {
            artifact.release();
        }
        self.advance(RequestState::Cleaned);
    }
}

impl Drop for TranscodeRequest {
    fn drop(&mut self) {
        if self.state != RequestState::Cleaned {
            // Handler future dropped mid-flight: client went away.
            tracing::info!(state = %self.state, "request abandoned");
            self.metrics.record_cancelled();
            self.cleanup();
        }
    }
}

/// Await `fut`, giving up at `deadline` or when `cancel` fires.
///
/// Expiry cancels the request token so any work started under it stops too.
async fn until_deadline<T>(
    fut: impl Future<Output = Result<T>>,
    deadline: Option<Instant>,
    cancel: &CancellationToken,
) -> Result<T> {
    let expired = async {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        result = fut => result,
        _ = cancel.cancelled() => Err(TranscodeError::Cancelled),
        _ = expired => {
            tracing::warn!("request timed out");
            cancel.cancel();
            Err(TranscodeError::Cancelled)
        }
    }
}

/// Wait for the blocking pipeline, cancelling it at `deadline`.
///
/// The task is always joined, so its sink is closed before the caller
/// releases the artifact. A failure after cancellation is `Cancelled`.
async fn join_pipeline(
    mut task: JoinHandle<Result<PipelineStats>>,
    deadline: Option<Instant>,
    cancel: &CancellationToken,
) -> Result<PipelineStats> {
    let joined = match deadline {
        Some(deadline) => tokio::select! {
            joined = &mut task => joined,
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!("transcode timed out");
                cancel.cancel();
                task.await
            }
        },
        None => task.await,
    };

    match joined {
        Ok(Ok(stats)) => Ok(stats),
        Ok(Err(_)) if cancel.is_cancelled() => Err(TranscodeError::Cancelled),
        Ok(Err(e)) => Err(e),
        Err(e) => Err(TranscodeError::Internal(format!("Transcode task failed: {}", e))),
    }
}

/// Handle one conversion request end to end.
pub async fn handle(state: Arc<AppState>, path: &str, request: Request<Body>) -> Response {
    let mut transcode_request = TranscodeRequest::new(state.metrics.clone());
    let span = tracing::info_span!("transcode", request_id = %transcode_request.id());
    let deadline = state.config.request_timeout().map(|timeout| Instant::now() + timeout);

    async move {
        tracing::debug!(path, "request received");
        let cancel = state.shutdown.child_token();
        // Cancels the pipeline if this future is dropped on disconnect.
        let _guard = cancel.clone().drop_guard();

        match transcode_request
            .process(&state, path, request, &cancel, deadline)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                transcode_request.fail(&err);
                err.into_response()
            }
        }
    }
    .instrument(span)
    .await
}

/// Input format from the request path; it must be decodable.
pub fn detect_input(registry: &FormatRegistry, path: &str) -> std::result::Result<&'static Format, FormatError> {
    registry
        .lookup_by_path(path)
        .filter(|f| f.can_decode())
        .ok_or_else(|| {
            let ext = extension_of(path).unwrap_or(path).trim_start_matches('/');
            FormatError::UnsupportedInput(ext.to_string())
        })
}

/// Parse the multipart body, enforcing the upload limit when one is set.
///
/// A limited body is collected before parsing so an oversized upload is
/// refused before any field is looked at.
pub async fn read_upload(
    request: Request<Body>,
    limit: Option<u64>,
    input: &Format,
    registry: &FormatRegistry,
) -> Result<Upload> {
    let request = match limit {
        Some(limit) => {
            let (parts, body) = request.into_parts();
            let limited = Limited::new(body, usize::try_from(limit).unwrap_or(usize::MAX));
            let bytes = limited
                .collect()
                .await
                .map_err(|e| -> TranscodeError {
                    if e.downcast_ref::<LengthLimitError>().is_some() {
                        TranscodeError::SizeLimit { limit }
                    } else {
                        FormatError::MalformedForm(e.to_string()).into()
                    }
                })?
                .to_bytes();
            Request::from_parts(parts, Body::from(bytes))
        }
        None => request,
    };

    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| FormatError::MalformedForm(e.body_text()))?;

    let multipart_error =
        |e: axum::extract::multipart::MultipartError| -> TranscodeError {
            FormatError::MalformedForm(e.body_text()).into()
        };

    let mut fields = HashMap::new();
    let mut file: Option<(Option<String>, Bytes)> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);

        if name == FILE_FIELD || file_name.is_some() {
            if file.is_some() {
                return Err(FormatError::MultipleFiles.into());
            }
            let data = field.bytes().await.map_err(multipart_error)?;
            file = Some((file_name, data));
        } else {
            let value = field.text().await.map_err(multipart_error)?;
            fields.insert(name, value);
        }
    }

    let (file_name, data) = file.ok_or(FormatError::MissingFile)?;

    if let Some(name) = file_name.as_deref() {
        if let Some(uploaded) = registry.lookup_by_path(name) {
            if uploaded != input {
                return Err(FormatError::Mismatch {
                    file: name.to_string(),
                    expected: input.name.to_string(),
                }
                .into());
            }
        }
    }

    Ok(Upload {
        fields,
        file_name,
        data,
    })
}

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9_-]+").expect("static pattern"))
}

/// Name of the delivered file: sanitised upload stem plus the output extension.
pub fn output_file_name(upload_name: Option<&str>, output: &Format) -> String {
    let stem = upload_name
        .map(|name| name.rsplit(['/', '\\']).next().unwrap_or(name))
        .map(|name| match name.rfind('.') {
            Some(idx) => &name[..idx],
            None => name,
        })
        .map(|stem| {
            unsafe_chars()
                .replace_all(&stem.to_lowercase(), "_")
                .trim_matches('_')
                .to_string()
        })
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "result".to_string());

    format!("{}{}", stem, output.default_extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{FLAC, MP3, WAV};
    use crate::integration::fixtures::Part;

    fn registry() -> FormatRegistry {
        FormatRegistry::builtin().unwrap()
    }

    fn multipart_request(parts: &[Part]) -> Request<Body> {
        let (content_type, body) = crate::integration::fixtures::multipart_body(parts);
        Request::builder()
            .method("POST")
            .uri("/song.wav")
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap()
    }

    #[test]
    fn test_detect_input() {
        let registry = registry();
        assert_eq!(detect_input(&registry, "/music/Song.WAV").unwrap(), &WAV);
        assert_eq!(detect_input(&registry, "/a.flac").unwrap(), &FLAC);
        assert_eq!(
            detect_input(&registry, "/song.ogg"),
            Err(FormatError::UnsupportedInput(".ogg".to_string()))
        );
        assert!(detect_input(&registry, "/").is_err());
    }

    #[test]
    fn test_output_file_name() {
        assert_eq!(output_file_name(Some("My Song.wav"), &MP3), "my_song.mp3");
        assert_eq!(output_file_name(Some("C:\\dir\\Track 01.mp3"), &WAV), "track_01.wav");
        assert_eq!(output_file_name(Some("a.b.c.flac"), &WAV), "a_b_c.wav");
        assert_eq!(output_file_name(Some(".wav"), &MP3), "result.mp3");
        assert_eq!(output_file_name(Some("!!!.wav"), &MP3), "result.mp3");
        assert_eq!(output_file_name(None, &WAV), "result.wav");
    }

    #[test]
    fn test_request_state_transitions() {
        let mut request = TranscodeRequest::new(Arc::new(Metrics::new()));
        assert_eq!(request.state(), RequestState::Received);
        request.advance(RequestState::FormatDetected);
        request.fail(&TranscodeError::Format(FormatError::MissingFile));
        assert_eq!(request.state(), RequestState::Cleaned);
        assert_eq!(request.metrics.failures("format"), 1);
    }

    #[test]
    fn test_drop_releases_artifact() {
        let dir = tempfile::TempDir::new().unwrap();
        let metrics = Arc::new(Metrics::new());
        {
            let mut request = TranscodeRequest::new(metrics.clone());
            let (artifact, _sink) = TempArtifact::acquire(dir.path()).unwrap();
            request.artifact = Some(artifact);
            request.advance(RequestState::Transcoding);
            assert_eq!(crate::artifact::count_artifacts(dir.path()).unwrap(), 1);
        }
        assert_eq!(crate::artifact::count_artifacts(dir.path()).unwrap(), 0);
        assert_eq!(metrics.cancelled(), 1);
    }

    fn stall_until_cancelled(token: CancellationToken) -> JoinHandle<Result<PipelineStats>> {
        tokio::task::spawn_blocking(move || {
            while !token.is_cancelled() {
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
            Err(TranscodeError::Transcode(crate::error::FfmpegError::DecodePacket(
                "interrupted".to_string(),
            )))
        })
    }

    #[tokio::test]
    async fn test_join_pipeline_times_out() {
        let cancel = CancellationToken::new();
        let task = stall_until_cancelled(cancel.clone());
        let deadline = Instant::now() + std::time::Duration::from_millis(50);

        let err = join_pipeline(task, Some(deadline), &cancel).await.unwrap_err();
        assert!(matches!(err, TranscodeError::Cancelled));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_join_pipeline_passes_through() {
        let cancel = CancellationToken::new();
        let task = tokio::task::spawn_blocking(|| Ok(PipelineStats::default()));
        let deadline = Instant::now() + std::time::Duration::from_secs(60);
        assert_eq!(
            join_pipeline(task, Some(deadline), &cancel).await.unwrap(),
            PipelineStats::default()
        );

        let task = tokio::task::spawn_blocking(|| {
            Err(TranscodeError::Transcode(crate::error::FfmpegError::NoAudioStream))
        });
        let err = join_pipeline(task, None, &cancel).await.unwrap_err();
        assert!(matches!(err, TranscodeError::Transcode(_)));
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_until_deadline_bounds_stalled_future() {
        let cancel = CancellationToken::new();
        let deadline = Instant::now() + std::time::Duration::from_millis(20);
        let stalled = std::future::pending::<Result<()>>();

        let err = until_deadline(stalled, Some(deadline), &cancel).await.unwrap_err();
        assert!(matches!(err, TranscodeError::Cancelled));
        assert!(cancel.is_cancelled());

        let ready = until_deadline(async { Ok(7) }, None, &CancellationToken::new()).await;
        assert_eq!(ready.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_read_upload_collects_fields() {
        let request = multipart_request(&[
            Part::Text("format", "mp3"),
            Part::Text("mp3-bit-rate-mode", "VBR"),
            Part::File("form-file", "song.wav", b"RIFFdata"),
        ]);
        let upload = read_upload(request, None, &WAV, &registry()).await.unwrap();
        assert_eq!(upload.fields.get("format").map(String::as_str), Some("mp3"));
        assert_eq!(upload.file_name.as_deref(), Some("song.wav"));
        assert_eq!(&upload.data[..], b"RIFFdata");
    }

    #[tokio::test]
    async fn test_read_upload_missing_file() {
        let request = multipart_request(&[Part::Text("format", "mp3")]);
        let err = read_upload(request, None, &WAV, &registry()).await.unwrap_err();
        assert!(matches!(err, TranscodeError::Format(FormatError::MissingFile)));
    }

    #[tokio::test]
    async fn test_read_upload_multiple_files() {
        let request = multipart_request(&[
            Part::File("form-file", "a.wav", b"one"),
            Part::File("other", "b.wav", b"two"),
        ]);
        let err = read_upload(request, None, &WAV, &registry()).await.unwrap_err();
        assert!(matches!(err, TranscodeError::Format(FormatError::MultipleFiles)));
    }

    #[tokio::test]
    async fn test_read_upload_extension_mismatch() {
        let request = multipart_request(&[Part::File("form-file", "song.mp3", b"data")]);
        let err = read_upload(request, None, &WAV, &registry()).await.unwrap_err();
        assert!(matches!(
            err,
            TranscodeError::Format(FormatError::Mismatch { .. })
        ));

        // Unregistered extensions are taken at the path's word.
        let request = multipart_request(&[Part::File("form-file", "song.bin", b"data")]);
        assert!(read_upload(request, None, &WAV, &registry()).await.is_ok());
    }

    #[tokio::test]
    async fn test_read_upload_size_limit() {
        let request = multipart_request(&[Part::File("form-file", "song.wav", b"01234567890")]);
        let err = read_upload(request, Some(10), &WAV, &registry()).await.unwrap_err();
        assert!(matches!(err, TranscodeError::SizeLimit { limit: 10 }));
    }

    #[tokio::test]
    async fn test_read_upload_not_multipart() {
        let request = Request::builder()
            .method("POST")
            .uri("/song.wav")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("hello"))
            .unwrap();
        let err = read_upload(request, None, &WAV, &registry()).await.unwrap_err();
        assert!(matches!(
            err,
            TranscodeError::Format(FormatError::MalformedForm(_))
        ));
    }
}
