//! HTTP request handlers
//!
//! The conversion endpoint is method-dispatched: GET serves the upload form,
//! POST runs a conversion, anything else is refused with 405.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Method, Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use crate::orchestrator;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "OK"
}

/// Version endpoint
pub async fn version_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "ffmpeg": crate::ffmpeg::version_info(),
        "mp3_encoder": crate::transcode::encoder::is_mp3_encoder_available(),
    }))
}

/// `/` and `/{*path}`: form page on GET, conversion on POST.
pub async fn handle_request(State(state): State<Arc<AppState>>, request: Request<Body>) -> Response {
    match *request.method() {
        Method::GET | Method::HEAD => form_page(&state),
        Method::POST => {
            let path = request.uri().path().to_string();
            orchestrator::handle(state, &path, request).await
        }
        _ => method_not_allowed(),
    }
}

fn form_page(state: &AppState) -> Response {
    (
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        )],
        state.form_page.clone(),
    )
        .into_response()
}

fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, HeaderValue::from_static("GET, HEAD, POST"))],
        "Method not allowed",
    )
        .into_response()
}
