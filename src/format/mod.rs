//! Audio format registry
//!
//! Static table of the container formats the server understands:
//! - Extension aliases and the canonical (default) extension
//! - MIME type used for delivered files
//! - FFmpeg demuxer/muxer names
//! - Capability flags and the encode parameter schema

pub mod registry;

use thiserror::Error;

use crate::params::schema::{ParamSpec, MP3_PARAMS, WAV_PARAMS};

pub use registry::{FormatRegistry, RegistryError};

/// Identity of a registered format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatKind {
    Wav,
    Mp3,
    Flac,
}

/// What the server can do with a format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub decode: bool,
    pub encode: bool,
}

impl Capabilities {
    pub const DECODE_ONLY: Capabilities = Capabilities {
        decode: true,
        encode: false,
    };
    pub const DECODE_ENCODE: Capabilities = Capabilities {
        decode: true,
        encode: true,
    };
}

/// A registered audio format
#[derive(Debug)]
pub struct Format {
    pub kind: FormatKind,
    /// Short name, also the key for per-format upload limits
    pub name: &'static str,
    pub default_extension: &'static str,
    /// All accepted extensions, lower-case with leading dot
    pub extensions: &'static [&'static str],
    pub mime_type: &'static str,
    /// FFmpeg demuxer short name
    pub demuxer: &'static str,
    /// FFmpeg muxer short name
    pub muxer: &'static str,
    pub capabilities: Capabilities,
    /// Encode parameters accepted for this format (empty if not encodable)
    pub params: &'static [ParamSpec],
}

impl PartialEq for Format {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Eq for Format {}

impl Format {
    pub fn can_decode(&self) -> bool {
        self.capabilities.decode
    }

    pub fn can_encode(&self) -> bool {
        self.capabilities.encode
    }
}

pub static WAV: Format = Format {
    kind: FormatKind::Wav,
    name: "wav",
    default_extension: ".wav",
    extensions: &[".wav", ".wave"],
    mime_type: "audio/wav",
    demuxer: "wav",
    muxer: "wav",
    capabilities: Capabilities::DECODE_ENCODE,
    params: WAV_PARAMS,
};

pub static MP3: Format = Format {
    kind: FormatKind::Mp3,
    name: "mp3",
    default_extension: ".mp3",
    extensions: &[".mp3"],
    mime_type: "audio/mpeg",
    demuxer: "mp3",
    muxer: "mp3",
    capabilities: Capabilities::DECODE_ENCODE,
    params: MP3_PARAMS,
};

pub static FLAC: Format = Format {
    kind: FormatKind::Flac,
    name: "flac",
    default_extension: ".flac",
    extensions: &[".flac"],
    mime_type: "audio/flac",
    demuxer: "flac",
    muxer: "flac",
    capabilities: Capabilities::DECODE_ONLY,
    params: &[],
};

/// Formats registered at startup
pub fn builtin_formats() -> Vec<&'static Format> {
    vec![&WAV, &MP3, &FLAC]
}

/// Input or output format problems reported to the client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Unsupported input format: {0}")]
    UnsupportedInput(String),

    #[error("Unsupported output format: {0}")]
    UnsupportedOutput(String),

    #[error("Format {0} cannot be used as an output format")]
    NotEncodable(String),

    #[error("Output format not provided")]
    MissingOutput,

    #[error("No file provided")]
    MissingFile,

    #[error("Only one file can be converted per request")]
    MultipleFiles,

    #[error("File {file} does not match input format {expected}")]
    Mismatch { file: String, expected: String },

    #[error("Invalid form: {0}")]
    MalformedForm(String),
}
