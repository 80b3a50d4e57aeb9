//! Configuration file support
//!
//! Loads server configuration from TOML files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::{default_limits, default_scratch_dir, LogFormat, ServerConfig};

/// Configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Server settings
    pub server: ServerSettings,
    /// Transcoding settings
    pub transcode: Option<TranscodeSettings>,
    /// Logging settings
    pub logging: Option<LoggingSettings>,
    /// Upload limits
    pub limits: Option<LimitsSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Enable CORS
    pub cors_enabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeSettings {
    /// Scratch directory for in-flight artifacts
    pub scratch_dir: Option<PathBuf>,
    /// Samples per encoder frame
    pub batch_size: Option<usize>,
    /// Per-request timeout in seconds (0 disables)
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: Option<LogFormat>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsSettings {
    /// Maximum upload size in bytes per input format name
    pub max_upload_bytes: BTreeMap<String, u64>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: ConfigFile = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Generate default configuration file
    pub fn default_config() -> Self {
        Self {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 8080,
                cors_enabled: Some(true),
            },
            transcode: Some(TranscodeSettings {
                scratch_dir: Some(default_scratch_dir()),
                batch_size: Some(1024),
                request_timeout_secs: Some(300),
            }),
            logging: Some(LoggingSettings {
                level: "info".to_string(),
                format: Some(LogFormat::Pretty),
            }),
            limits: Some(LimitsSettings {
                max_upload_bytes: default_limits(),
            }),
        }
    }

    /// Convert to ServerConfig
    pub fn into_server_config(self) -> ServerConfig {
        let defaults = ServerConfig::default();
        let transcode = self.transcode.unwrap_or(TranscodeSettings {
            scratch_dir: None,
            batch_size: None,
            request_timeout_secs: None,
        });

        ServerConfig {
            host: self.server.host,
            port: self.server.port,
            scratch_dir: transcode.scratch_dir.unwrap_or(defaults.scratch_dir),
            batch_size: transcode.batch_size.unwrap_or(defaults.batch_size),
            request_timeout_secs: transcode
                .request_timeout_secs
                .or(defaults.request_timeout_secs),
            limits: self
                .limits
                .map(|l| l.max_upload_bytes)
                .unwrap_or(defaults.limits),
            cors_enabled: self.server.cors_enabled.unwrap_or(true),
            log_level: self
                .logging
                .as_ref()
                .map(|l| l.level.clone())
                .unwrap_or(defaults.log_level),
            log_format: self
                .logging
                .and_then(|l| l.format)
                .unwrap_or(defaults.log_format),
        }
    }
}

/// Generate default configuration file at the specified path
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigFile::default_config();
    config.to_file(path)?;
    Ok(())
}
