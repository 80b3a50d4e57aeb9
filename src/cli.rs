//! Command line interface
//!
//! Without a subcommand the binary runs the HTTP server. `encode wav|mp3`
//! converts files on disk with the same parameter rules as the upload form.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::format::{Format, MP3, WAV};
use crate::params::schema::{
    MP3_BIT_RATE, MP3_BIT_RATE_MODE, MP3_CHANNEL_MODE, MP3_QUALITY, MP3_USE_QUALITY,
    MP3_VBR_QUALITY, WAV_BIT_DEPTH,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Server configuration file
    #[arg(default_value = "config.toml")]
    pub config: String,

    /// Write a default configuration file and exit
    #[arg(
        long,
        value_name = "PATH",
        num_args = 0..=1,
        default_missing_value = "config.toml"
    )]
    pub init_config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Convert audio files on disk instead of serving
    #[command(subcommand)]
    Encode(EncodeCommand),
}

#[derive(Subcommand, Debug)]
pub enum EncodeCommand {
    /// Encode audio files to WAV
    Wav {
        #[command(flatten)]
        batch: BatchArgs,

        /// Bits per sample: 8, 16, 24 or 32
        #[arg(long, default_value_t = 24)]
        bit_depth: u32,
    },
    /// Encode audio files to MP3
    Mp3 {
        #[command(flatten)]
        batch: BatchArgs,

        /// 0 stereo, 1 joint stereo, 3 mono
        #[arg(long, default_value_t = 1)]
        channel_mode: u32,

        /// cbr, abr or vbr
        #[arg(long, default_value = "vbr")]
        bit_rate_mode: String,

        /// kbit/s in [8, 320] for cbr and abr, quality in [0, 9] for vbr
        #[arg(long, default_value_t = 4)]
        bit_rate: u32,

        /// Encoder quality in [0, 9], encoder default when unset
        #[arg(long)]
        quality: Option<u32>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct BatchArgs {
    /// Output directory, defaults to each input's own directory
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Descend into subdirectories
    #[arg(long)]
    pub recursive: bool,

    /// Samples per frame for encoders without a fixed frame size
    #[arg(long, default_value_t = 1024)]
    pub batch_size: usize,

    /// Files or directories to convert
    #[arg(required = true, num_args = 1..)]
    pub paths: Vec<PathBuf>,
}

impl EncodeCommand {
    pub fn batch(&self) -> &BatchArgs {
        match self {
            EncodeCommand::Wav { batch, .. } | EncodeCommand::Mp3 { batch, .. } => batch,
        }
    }

    pub fn output_format(&self) -> &'static Format {
        match self {
            EncodeCommand::Wav { .. } => &WAV,
            EncodeCommand::Mp3 { .. } => &MP3,
        }
    }

    /// The flags as form fields, ready for `params::validate`.
    pub fn fields(&self) -> HashMap<String, String> {
        let mut fields = HashMap::new();
        match self {
            EncodeCommand::Wav { bit_depth, .. } => {
                fields.insert(WAV_BIT_DEPTH.key.to_string(), bit_depth.to_string());
            }
            EncodeCommand::Mp3 {
                channel_mode,
                bit_rate_mode,
                bit_rate,
                quality,
                ..
            } => {
                fields.insert(MP3_CHANNEL_MODE.key.to_string(), channel_mode.to_string());
                fields.insert(MP3_BIT_RATE_MODE.key.to_string(), bit_rate_mode.clone());
                // One flag carries either the bit rate or the VBR quality.
                let rate_key = if bit_rate_mode.eq_ignore_ascii_case("vbr") {
                    MP3_VBR_QUALITY.key
                } else {
                    MP3_BIT_RATE.key
                };
                fields.insert(rate_key.to_string(), bit_rate.to_string());
                if let Some(quality) = quality {
                    fields.insert(MP3_USE_QUALITY.key.to_string(), "true".to_string());
                    fields.insert(MP3_QUALITY.key.to_string(), quality.to_string());
                }
            }
        }
        fields
    }
}
