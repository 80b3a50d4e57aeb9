//! Server configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::format::Format;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Directory holding per-request scratch files
    pub scratch_dir: PathBuf,

    /// Samples per encoder frame for encoders without a fixed frame size
    pub batch_size: usize,

    /// Abort a transcode that runs longer than this
    pub request_timeout_secs: Option<u64>,

    /// Maximum upload size in bytes, keyed by input format name. 0 = unlimited.
    pub limits: BTreeMap<String, u64>,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    pub log_format: LogFormat,
}

/// Default per-format upload limits
pub fn default_limits() -> BTreeMap<String, u64> {
    BTreeMap::from([
        ("wav".to_string(), 10 * 1024 * 1024),
        ("mp3".to_string(), 1024 * 1024),
        ("flac".to_string(), 10 * 1024 * 1024),
    ])
}

pub fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("audio-transcoder")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            scratch_dir: default_scratch_dir(),
            batch_size: 1024,
            request_timeout_secs: Some(300),
            limits: default_limits(),
            cors_enabled: true,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Upload limit for `format`, `None` when unlimited
    pub fn upload_limit(&self, format: &Format) -> Option<u64> {
        self.limits
            .get(format.name)
            .copied()
            .filter(|limit| *limit > 0)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
