//! End-to-end integration tests
//!
//! Each test builds the full router over a private scratch directory and
//! drives it with `oneshot`, checking status, headers, delivered audio and
//! that no artifact is left behind.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use axum::response::Response;
    use axum::Router;
    use bytes::Bytes;
    use futures::StreamExt;
    use tempfile::TempDir;
    use tower::util::ServiceExt;

    use crate::artifact::count_artifacts;
    use crate::config::ServerConfig;
    use crate::http::create_router;
    use crate::integration::fixtures::{multipart_body, parse_wav, sine_wav, Part};
    use crate::state::AppState;
    use crate::transcode::encoder::is_mp3_encoder_available;

    struct TestServer {
        app: Router,
        state: Arc<AppState>,
        scratch: TempDir,
    }

    impl TestServer {
        fn new() -> Self {
            Self::with_config(|_| {})
        }

        fn with_config(configure: impl FnOnce(&mut ServerConfig)) -> Self {
            crate::ffmpeg::init().unwrap();
            let scratch = TempDir::new().unwrap();
            let mut config = ServerConfig {
                scratch_dir: scratch.path().to_path_buf(),
                ..Default::default()
            };
            configure(&mut config);

            let state = Arc::new(AppState::new(config).unwrap());
            Self {
                app: create_router(state.clone()),
                state,
                scratch,
            }
        }

        async fn post(&self, path: &str, parts: &[Part<'_>]) -> Response {
            let (content_type, body) = multipart_body(parts);
            let request = Request::builder()
                .method(Method::POST)
                .uri(path)
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from(body))
                .unwrap();
            self.app.clone().oneshot(request).await.unwrap()
        }

        fn leftover_artifacts(&self) -> usize {
            count_artifacts(self.scratch.path()).unwrap()
        }
    }

    async fn body_bytes(response: Response) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        String::from_utf8(body_bytes(response).await.to_vec()).unwrap()
    }

    fn header_str<'a>(response: &'a Response, name: header::HeaderName) -> &'a str {
        response.headers().get(name).unwrap().to_str().unwrap()
    }

    #[tokio::test]
    async fn test_wav_to_mp3_vbr() {
        if !is_mp3_encoder_available() {
            eprintln!("skipping: no MP3 encoder in this FFmpeg build");
            return;
        }
        let server = TestServer::new();
        let wav = sine_wav(44100, 2, 16, 44100);

        let response = server
            .post(
                "/tone.wav",
                &[
                    Part::Text("format", ".mp3"),
                    Part::Text("mp3-channel-mode", "1"),
                    Part::Text("mp3-bit-rate-mode", "VBR"),
                    Part::Text("mp3-vbr-quality", "4"),
                    Part::File("form-file", "Tone.wav", &wav),
                ],
            )
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_str(&response, header::CONTENT_TYPE), "audio/mpeg");
        assert_eq!(
            header_str(&response, header::CONTENT_DISPOSITION),
            "attachment; filename=tone.mp3"
        );
        let length: usize = header_str(&response, header::CONTENT_LENGTH).parse().unwrap();
        assert!(length > 0);

        let body = body_bytes(response).await;
        assert_eq!(body.len(), length);
        assert_eq!(server.leftover_artifacts(), 0);
        assert_eq!(server.state.metrics.completed(), 1);
        assert_eq!(server.state.metrics.bytes_delivered(), length as u64);
    }

    #[tokio::test]
    async fn test_wav_to_mp3_cbr_mono_with_quality() {
        if !is_mp3_encoder_available() {
            eprintln!("skipping: no MP3 encoder in this FFmpeg build");
            return;
        }
        let server = TestServer::new();
        let wav = sine_wav(44100, 1, 16, 22050);

        let response = server
            .post(
                "/tone.wav",
                &[
                    Part::Text("format", "mp3"),
                    Part::Text("mp3-channel-mode", "3"),
                    Part::Text("mp3-bit-rate-mode", "cbr"),
                    Part::Text("mp3-bit-rate", "128"),
                    Part::Text("mp3-use-quality", "true"),
                    Part::Text("mp3-quality", "5"),
                    Part::File("form-file", "tone.wav", &wav),
                ],
            )
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(!body_bytes(response).await.is_empty());
        assert_eq!(server.leftover_artifacts(), 0);
    }

    #[tokio::test]
    async fn test_wav_roundtrip_preserves_samples_and_channels() {
        let server = TestServer::new();
        let wav = sine_wav(8000, 2, 16, 5000);

        for depth in ["16", "24"] {
            let response = server
                .post(
                    "/input.wav",
                    &[
                        Part::Text("format", "wav"),
                        Part::Text("wav-bit-depth", depth),
                        Part::File("form-file", "input.wav", &wav),
                    ],
                )
                .await;

            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(header_str(&response, header::CONTENT_TYPE), "audio/wav");
            let info = parse_wav(&body_bytes(response).await).unwrap();
            assert_eq!(info.channels, 2);
            assert_eq!(info.sample_rate, 8000);
            assert_eq!(info.frames, 5000);
            assert_eq!(info.bits.to_string(), depth);
        }
        assert_eq!(server.leftover_artifacts(), 0);
    }

    #[tokio::test]
    async fn test_empty_wav_converts_to_empty_wav() {
        let server = TestServer::new();
        let wav = sine_wav(8000, 2, 16, 0);

        let response = server
            .post(
                "/silence.wav",
                &[
                    Part::Text("format", "wav"),
                    Part::Text("wav-bit-depth", "16"),
                    Part::File("form-file", "silence.wav", &wav),
                ],
            )
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let info = parse_wav(&body_bytes(response).await).unwrap();
        assert_eq!(info.channels, 2);
        assert_eq!(info.frames, 0);
        assert_eq!(server.leftover_artifacts(), 0);
    }

    #[tokio::test]
    async fn test_missing_bit_depth_names_field() {
        let server = TestServer::new();
        let wav = sine_wav(8000, 1, 16, 800);

        let response = server
            .post(
                "/input.wav",
                &[
                    Part::Text("format", "wav"),
                    Part::File("form-file", "input.wav", &wav),
                ],
            )
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("wav-bit-depth"));
        assert_eq!(server.leftover_artifacts(), 0);
        assert_eq!(server.state.metrics.failures("validation"), 1);
    }

    #[tokio::test]
    async fn test_upload_over_limit_rejected_before_validation() {
        let server = TestServer::with_config(|config| {
            config.limits.insert("wav".to_string(), 10);
        });

        // No output fields at all: the size check must trip first.
        let response = server
            .post("/small.wav", &[Part::File("form-file", "small.wav", b"01234567890")])
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("10 bytes"));
        assert_eq!(server.state.metrics.failures("size_limit"), 1);
        assert_eq!(server.leftover_artifacts(), 0);
    }

    #[tokio::test]
    async fn test_unknown_input_format() {
        let server = TestServer::new();
        let response = server
            .post(
                "/song.ogg",
                &[
                    Part::Text("format", "wav"),
                    Part::File("form-file", "song.ogg", b"OggS"),
                ],
            )
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("Unsupported input format"));
        assert_eq!(server.leftover_artifacts(), 0);
    }

    #[tokio::test]
    async fn test_output_format_errors() {
        let server = TestServer::new();
        let wav = sine_wav(8000, 1, 16, 800);

        let response = server
            .post(
                "/in.wav",
                &[Part::Text("format", "ogg"), Part::File("form-file", "in.wav", &wav)],
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("Unsupported output format"));

        let response = server
            .post(
                "/in.wav",
                &[Part::Text("format", "flac"), Part::File("form-file", "in.wav", &wav)],
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("cannot be used as an output format"));

        let response = server
            .post("/in.wav", &[Part::File("form-file", "in.wav", &wav)])
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(server.leftover_artifacts(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_input_fails_and_cleans_up() {
        let server = TestServer::new();
        let response = server
            .post(
                "/broken.wav",
                &[
                    Part::Text("format", "wav"),
                    Part::Text("wav-bit-depth", "16"),
                    Part::File("form-file", "broken.wav", b"definitely not a riff file"),
                ],
            )
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(server.leftover_artifacts(), 0);
        assert_eq!(server.state.metrics.failures("transcode"), 1);
    }

    #[tokio::test]
    async fn test_cancelled_by_shutdown() {
        let server = TestServer::new();
        server.state.shutdown();
        let wav = sine_wav(8000, 1, 16, 8000);

        let response = server
            .post(
                "/in.wav",
                &[
                    Part::Text("format", "wav"),
                    Part::Text("wav-bit-depth", "16"),
                    Part::File("form-file", "in.wav", &wav),
                ],
            )
            .await;

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert!(body_bytes(response).await.is_empty());
        assert_eq!(server.leftover_artifacts(), 0);
        assert_eq!(server.state.metrics.cancelled(), 1);
    }

    #[tokio::test]
    async fn test_stalled_upload_times_out() {
        let server = TestServer::with_config(|config| {
            config.request_timeout_secs = Some(1);
        });
        let (content_type, body) = multipart_body(&[Part::Text("format", "wav")]);
        // Send the first field, then never finish the body.
        let head = Bytes::from(body[..body.len() / 2].to_vec());
        let stream = futures::stream::iter([Ok::<_, std::io::Error>(head)])
            .chain(futures::stream::pending());
        let request = Request::builder()
            .method(Method::POST)
            .uri("/slow.wav")
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from_stream(stream))
            .unwrap();

        let response = server.app.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(server.state.metrics.cancelled(), 1);
        assert_eq!(server.leftover_artifacts(), 0);
    }

    #[tokio::test]
    async fn test_long_transcode_times_out() {
        if !is_mp3_encoder_available() {
            eprintln!("skipping: no MP3 encoder in this FFmpeg build");
            return;
        }
        let server = TestServer::with_config(|config| {
            config.request_timeout_secs = Some(1);
            config.limits.clear();
        });
        // Twenty minutes of audio at the slowest encoder settings.
        let wav = sine_wav(22050, 1, 16, 22050 * 60 * 20);

        let response = server
            .post(
                "/long.wav",
                &[
                    Part::Text("format", "mp3"),
                    Part::Text("mp3-channel-mode", "1"),
                    Part::Text("mp3-bit-rate-mode", "CBR"),
                    Part::Text("mp3-bit-rate", "320"),
                    Part::Text("mp3-use-quality", "true"),
                    Part::Text("mp3-quality", "0"),
                    Part::File("form-file", "long.wav", &wav),
                ],
            )
            .await;

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert!(body_bytes(response).await.is_empty());
        assert_eq!(server.state.metrics.cancelled(), 1);
        assert_eq!(server.state.metrics.completed(), 0);
        assert!(server
            .state
            .metrics
            .export_prometheus()
            .contains("transcoder_transcodes_started_total 1"));
        assert_eq!(server.leftover_artifacts(), 0);
    }

    #[tokio::test]
    async fn test_dropped_response_releases_artifact() {
        let server = TestServer::new();
        let wav = sine_wav(8000, 1, 16, 8000);

        let response = server
            .post(
                "/in.wav",
                &[
                    Part::Text("format", "wav"),
                    Part::Text("wav-bit-depth", "8"),
                    Part::File("form-file", "in.wav", &wav),
                ],
            )
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        // The body still owns the artifact until it is consumed or dropped.
        assert_eq!(server.leftover_artifacts(), 1);
        drop(response);
        assert_eq!(server.leftover_artifacts(), 0);
        assert_eq!(server.state.metrics.bytes_delivered(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_isolated() {
        let server = TestServer::new();
        let mono = sine_wav(8000, 1, 16, 3000);
        let stereo = sine_wav(8000, 2, 16, 4000);

        let request = |wav: &[u8]| {
            let (content_type, body) = multipart_body(&[
                Part::Text("format", "wav"),
                Part::Text("wav-bit-depth", "32"),
                Part::File("form-file", "in.wav", wav),
            ]);
            Request::builder()
                .method(Method::POST)
                .uri("/in.wav")
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from(body))
                .unwrap()
        };

        let (a, b, c) = tokio::join!(
            server.app.clone().oneshot(request(&mono)),
            server.app.clone().oneshot(request(&stereo)),
            server.app.clone().oneshot(request(&mono)),
        );
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
        assert_eq!(server.leftover_artifacts(), 3);

        let a = parse_wav(&body_bytes(a).await).unwrap();
        let b = parse_wav(&body_bytes(b).await).unwrap();
        let c = parse_wav(&body_bytes(c).await).unwrap();
        assert_eq!((a.channels, a.frames), (1, 3000));
        assert_eq!((b.channels, b.frames), (2, 4000));
        assert_eq!(a, c);
        assert_eq!(server.leftover_artifacts(), 0);
    }

    #[tokio::test]
    async fn test_ancillary_endpoints() {
        let server = TestServer::new();

        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = server.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "OK");

        let request = Request::builder().uri("/version").body(Body::empty()).unwrap();
        let response = server.app.clone().oneshot(request).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
        assert!(json["ffmpeg"].as_str().unwrap().starts_with("libavcodec"));

        let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let response = server.app.clone().oneshot(request).await.unwrap();
        let text = body_text(response).await;
        assert!(text.contains("transcoder_requests_total 3"));
    }
}
