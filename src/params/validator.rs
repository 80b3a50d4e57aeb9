//! Form field validation
//!
//! Checks run field by field in a fixed order and the first failure wins:
//! missing (or empty) → `Required`, unparseable → `Malformed`, outside the
//! constraint table → `Unsupported`.

use std::collections::HashMap;

use super::schema::{
    ParamSpec, MP3_BIT_RATE, MP3_BIT_RATE_MODE, MP3_CHANNEL_MODE, MP3_QUALITY, MP3_USE_QUALITY,
    MP3_VBR_QUALITY, WAV_BIT_DEPTH,
};
use super::{
    BitDepth, BitRateMode, ChannelMode, EncodeConfig, Mp3Config, Reason, ValidationError,
    WavConfig,
};
use crate::format::{Format, FormatError, FormatKind, FormatRegistry};

/// Form field naming the output format's extension
pub const FORMAT_FIELD: &str = "format";

/// Resolve the requested output format from the `format` field.
pub fn resolve_output(
    registry: &FormatRegistry,
    raw: &HashMap<String, String>,
) -> Result<&'static Format, FormatError> {
    let ext = raw
        .get(FORMAT_FIELD)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or(FormatError::MissingOutput)?;

    match registry.lookup_by_extension(ext) {
        Some(format) if format.can_encode() => Ok(format),
        Some(format) => Err(FormatError::NotEncodable(format.name.to_string())),
        None => Err(FormatError::UnsupportedOutput(ext.to_string())),
    }
}

/// Validate raw form fields for `format` into an encode configuration.
pub fn validate(
    format: &Format,
    raw: &HashMap<String, String>,
) -> Result<EncodeConfig, ValidationError> {
    match format.kind {
        FormatKind::Wav if format.can_encode() => validate_wav(raw).map(EncodeConfig::Wav),
        FormatKind::Mp3 if format.can_encode() => validate_mp3(raw).map(EncodeConfig::Mp3),
        _ => Err(ValidationError::new(
            FORMAT_FIELD,
            Reason::Unsupported {
                value: format.default_extension.to_string(),
                allowed: "an output format".to_string(),
            },
        )),
    }
}

fn validate_wav(raw: &HashMap<String, String>) -> Result<WavConfig, ValidationError> {
    let bits = int_field(raw, &WAV_BIT_DEPTH)?;
    let bit_depth = BitDepth::from_bits(bits)
        .ok_or_else(|| unsupported(&WAV_BIT_DEPTH, &bits.to_string()))?;
    Ok(WavConfig { bit_depth })
}

fn validate_mp3(raw: &HashMap<String, String>) -> Result<Mp3Config, ValidationError> {
    let mode = int_field(raw, &MP3_CHANNEL_MODE)?;
    let channel_mode = ChannelMode::from_lame(mode)
        .ok_or_else(|| unsupported(&MP3_CHANNEL_MODE, &mode.to_string()))?;

    // Only the sub-field belonging to the selected mode is consulted.
    let bit_rate_mode = match token_field(raw, &MP3_BIT_RATE_MODE)? {
        "VBR" => BitRateMode::Vbr {
            quality: int_field(raw, &MP3_VBR_QUALITY)? as u8,
        },
        "CBR" => BitRateMode::Cbr {
            kbps: int_field(raw, &MP3_BIT_RATE)? as u16,
        },
        "ABR" => BitRateMode::Abr {
            kbps: int_field(raw, &MP3_BIT_RATE)? as u16,
        },
        other => return Err(unsupported(&MP3_BIT_RATE_MODE, other)),
    };

    let quality = if flag_field(raw, &MP3_USE_QUALITY)? {
        Some(int_field(raw, &MP3_QUALITY)? as u8)
    } else {
        None
    };

    Ok(Mp3Config {
        channel_mode,
        bit_rate_mode,
        quality,
    })
}

fn required<'a>(
    raw: &'a HashMap<String, String>,
    spec: &ParamSpec,
) -> Result<&'a str, ValidationError> {
    match raw.get(spec.key) {
        Some(value) if !value.is_empty() => Ok(value.as_str()),
        _ => Err(ValidationError::new(spec.key, Reason::Required)),
    }
}

fn int_field(raw: &HashMap<String, String>, spec: &ParamSpec) -> Result<i64, ValidationError> {
    let text = required(raw, spec)?;
    let value: i64 = text
        .parse()
        .map_err(|_| ValidationError::new(spec.key, Reason::Malformed(text.to_string())))?;
    if !spec.constraint.allows(value) {
        return Err(unsupported(spec, text));
    }
    Ok(value)
}

fn token_field(
    raw: &HashMap<String, String>,
    spec: &ParamSpec,
) -> Result<&'static str, ValidationError> {
    let text = required(raw, spec)?;
    spec.constraint
        .token(text)
        .ok_or_else(|| unsupported(spec, text))
}

/// Optional switch: absent or empty means off.
fn flag_field(raw: &HashMap<String, String>, spec: &ParamSpec) -> Result<bool, ValidationError> {
    match raw.get(spec.key).map(String::as_str) {
        None | Some("") => Ok(false),
        Some(text) => parse_bool(text)
            .ok_or_else(|| ValidationError::new(spec.key, Reason::Malformed(text.to_string()))),
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

fn unsupported(spec: &ParamSpec, value: &str) -> ValidationError {
    ValidationError::new(
        spec.key,
        Reason::Unsupported {
            value: value.to_string(),
            allowed: spec.constraint.describe(),
        },
    )
}
