//! Encode parameters
//!
//! This module turns raw form fields into a typed, validated output
//! configuration:
//! - `schema`: per-format constraint tables
//! - `validator`: ordered required/malformed/unsupported checks
//! - `EncodeConfig`: the validated result, one variant per output format

pub mod schema;
pub mod validator;

use thiserror::Error;

use crate::format::{Format, MP3, WAV};

pub use validator::{resolve_output, validate};

/// Validated output configuration.
///
/// Only the validator builds these; every numeric field is within the
/// ranges of [`schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeConfig {
    Wav(WavConfig),
    Mp3(Mp3Config),
}

impl EncodeConfig {
    /// The output format this configuration encodes into
    pub fn format(&self) -> &'static Format {
        match self {
            EncodeConfig::Wav(_) => &WAV,
            EncodeConfig::Mp3(_) => &MP3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavConfig {
    pub bit_depth: BitDepth,
}

/// Supported WAV sample bit depths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitDepth {
    Eight,
    Sixteen,
    TwentyFour,
    ThirtyTwo,
}

impl BitDepth {
    pub fn from_bits(bits: i64) -> Option<Self> {
        match bits {
            8 => Some(BitDepth::Eight),
            16 => Some(BitDepth::Sixteen),
            24 => Some(BitDepth::TwentyFour),
            32 => Some(BitDepth::ThirtyTwo),
            _ => None,
        }
    }

    pub fn bits(&self) -> u32 {
        match self {
            BitDepth::Eight => 8,
            BitDepth::Sixteen => 16,
            BitDepth::TwentyFour => 24,
            BitDepth::ThirtyTwo => 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mp3Config {
    pub channel_mode: ChannelMode,
    pub bit_rate_mode: BitRateMode,
    /// LAME algorithm quality (0 best, 9 fastest) when overridden
    pub quality: Option<u8>,
}

/// MP3 channel mode, numbered as LAME's MPEG mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Stereo,
    JointStereo,
    Mono,
}

impl ChannelMode {
    pub fn from_lame(value: i64) -> Option<Self> {
        match value {
            0 => Some(ChannelMode::Stereo),
            1 => Some(ChannelMode::JointStereo),
            3 => Some(ChannelMode::Mono),
            _ => None,
        }
    }

    pub fn lame_value(&self) -> i64 {
        match self {
            ChannelMode::Stereo => 0,
            ChannelMode::JointStereo => 1,
            ChannelMode::Mono => 3,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChannelMode::Stereo => "stereo",
            ChannelMode::JointStereo => "joint stereo",
            ChannelMode::Mono => "mono",
        }
    }

    pub fn channels(&self) -> u16 {
        match self {
            ChannelMode::Mono => 1,
            ChannelMode::Stereo | ChannelMode::JointStereo => 2,
        }
    }
}

/// MP3 bit rate strategy with its mode-specific value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitRateMode {
    /// Constant bit rate in kbps
    Cbr { kbps: u16 },
    /// Average bit rate in kbps
    Abr { kbps: u16 },
    /// Variable bit rate, LAME -V quality 0..=9
    Vbr { quality: u8 },
}

/// Why a field was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    #[error("required")]
    Required,

    #[error("malformed value {0:?}")]
    Malformed(String),

    #[error("unsupported value {value:?}, expected {allowed}")]
    Unsupported { value: String, allowed: String },
}

/// First failing field of a submitted form
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: Reason,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: Reason) -> Self {
        Self { field, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_depth_bits() {
        for bits in [8, 16, 24, 32] {
            assert_eq!(BitDepth::from_bits(bits).unwrap().bits() as i64, bits);
        }
        assert!(BitDepth::from_bits(12).is_none());
    }

    #[test]
    fn test_channel_mode_lame_numbering() {
        for mode in [ChannelMode::Stereo, ChannelMode::JointStereo, ChannelMode::Mono] {
            assert_eq!(ChannelMode::from_lame(mode.lame_value()), Some(mode));
        }
        assert!(ChannelMode::from_lame(2).is_none());
        assert_eq!(ChannelMode::Mono.channels(), 1);
    }

    #[test]
    fn test_validation_error_message_names_field() {
        let err = ValidationError::new("wav-bit-depth", Reason::Required);
        assert_eq!(err.to_string(), "wav-bit-depth: required");

        let err = ValidationError::new(
            "mp3-bit-rate",
            Reason::Unsupported {
                value: "321".to_string(),
                allowed: "between 8 and 320".to_string(),
            },
        );
        assert_eq!(
            err.to_string(),
            "mp3-bit-rate: unsupported value \"321\", expected between 8 and 320"
        );
    }

    #[test]
    fn test_config_format() {
        let wav = EncodeConfig::Wav(WavConfig {
            bit_depth: BitDepth::Sixteen,
        });
        assert_eq!(wav.format().name, "wav");
    }
}
