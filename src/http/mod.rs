//! HTTP server module
//!
//! This module handles HTTP request routing and handling:
//! - Axum router: form page, conversion endpoint, health/version/metrics
//! - Method dispatch for the conversion path
//! - Request logging middleware
//! - CORS middleware

pub mod handlers;
pub mod middleware;
pub mod routes;

pub use routes::create_router;
