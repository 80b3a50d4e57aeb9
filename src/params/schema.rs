//! Constraint tables for encode parameters
//!
//! Each form field an output format accepts is described once here; the
//! validator checks submitted values against these tables and the form page
//! renders its options from them.

/// Allowed values for a single field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    /// Integer from a fixed set
    OneOf(&'static [i64]),
    /// Inclusive integer range
    Range { min: i64, max: i64 },
    /// Case-insensitive token from a fixed set
    Tokens(&'static [&'static str]),
    /// Optional boolean switch
    Flag,
}

impl Constraint {
    pub fn allows(&self, value: i64) -> bool {
        match *self {
            Constraint::OneOf(values) => values.contains(&value),
            Constraint::Range { min, max } => (min..=max).contains(&value),
            Constraint::Tokens(_) | Constraint::Flag => false,
        }
    }

    /// Canonical token matching `value`, ignoring case.
    pub fn token(&self, value: &str) -> Option<&'static str> {
        match *self {
            Constraint::Tokens(tokens) => tokens
                .iter()
                .copied()
                .find(|t| t.eq_ignore_ascii_case(value)),
            _ => None,
        }
    }

    /// Human readable description of the allowed values
    pub fn describe(&self) -> String {
        match *self {
            Constraint::OneOf(values) => {
                let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                format!("one of {}", values.join(", "))
            }
            Constraint::Range { min, max } => format!("between {} and {}", min, max),
            Constraint::Tokens(tokens) => format!("one of {}", tokens.join(", ")),
            Constraint::Flag => "true or false".to_string(),
        }
    }
}

/// One encode parameter accepted from the form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub key: &'static str,
    pub label: &'static str,
    pub constraint: Constraint,
}

pub const WAV_BIT_DEPTH: ParamSpec = ParamSpec {
    key: "wav-bit-depth",
    label: "bit depth",
    constraint: Constraint::OneOf(&[8, 16, 24, 32]),
};

/// Values follow LAME's MPEG mode numbering: 0 stereo, 1 joint stereo, 3 mono.
pub const MP3_CHANNEL_MODE: ParamSpec = ParamSpec {
    key: "mp3-channel-mode",
    label: "channel mode",
    constraint: Constraint::OneOf(&[0, 1, 3]),
};

pub const MP3_BIT_RATE_MODE: ParamSpec = ParamSpec {
    key: "mp3-bit-rate-mode",
    label: "bit rate mode",
    constraint: Constraint::Tokens(&["VBR", "CBR", "ABR"]),
};

/// Kilobits per second, shared by CBR and ABR.
pub const MP3_BIT_RATE: ParamSpec = ParamSpec {
    key: "mp3-bit-rate",
    label: "bit rate",
    constraint: Constraint::Range { min: 8, max: 320 },
};

pub const MP3_VBR_QUALITY: ParamSpec = ParamSpec {
    key: "mp3-vbr-quality",
    label: "vbr quality",
    constraint: Constraint::Range { min: 0, max: 9 },
};

pub const MP3_USE_QUALITY: ParamSpec = ParamSpec {
    key: "mp3-use-quality",
    label: "quality",
    constraint: Constraint::Flag,
};

pub const MP3_QUALITY: ParamSpec = ParamSpec {
    key: "mp3-quality",
    label: "mp3 quality",
    constraint: Constraint::Range { min: 0, max: 9 },
};

pub const WAV_PARAMS: &[ParamSpec] = &[WAV_BIT_DEPTH];

pub const MP3_PARAMS: &[ParamSpec] = &[
    MP3_CHANNEL_MODE,
    MP3_BIT_RATE_MODE,
    MP3_BIT_RATE,
    MP3_VBR_QUALITY,
    MP3_USE_QUALITY,
    MP3_QUALITY,
];
