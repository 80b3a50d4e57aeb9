//! Application state management
//!
//! This module defines the AppState structure that holds:
//! - Server configuration
//! - The format registry
//! - The pre-rendered upload form
//! - Metrics and the server-wide shutdown token

use bytes::Bytes;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::form::render_form_page;
use crate::format::{FormatRegistry, RegistryError};
use crate::metrics::Metrics;

/// Application state shared across all handlers
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,

    /// Known formats, read-only after startup
    pub registry: Arc<FormatRegistry>,

    /// Upload form served on GET
    pub form_page: Bytes,

    pub metrics: Arc<Metrics>,

    /// Cancelled on server shutdown; every request token is a child of it
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create a new AppState with the built-in formats
    pub fn new(config: ServerConfig) -> Result<Self, RegistryError> {
        let registry = FormatRegistry::builtin()?;
        Ok(Self::with_registry(config, registry, CancellationToken::new()))
    }

    pub fn with_registry(
        config: ServerConfig,
        registry: FormatRegistry,
        shutdown: CancellationToken,
    ) -> Self {
        let form_page = render_form_page(&registry, &config);
        Self {
            config,
            registry: Arc::new(registry),
            form_page,
            metrics: Arc::new(Metrics::new()),
            shutdown,
        }
    }

    /// Cancel every in-flight request
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
