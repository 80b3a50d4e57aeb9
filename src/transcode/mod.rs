//! Audio transcoding module
//!
//! This module handles one decode → encode run per request:
//! - Decoder bound to the uploaded bytes (`decoder`)
//! - Sample format / channel layout conversion (`resampler`)
//! - Fixed-size frame batching (`fifo`)
//! - WAV and MP3 encoders bound to the artifact sink (`encoder`)
//! - The runner tying them together (`pipeline`)

pub mod decoder;
pub mod encoder;
pub mod fifo;
pub mod pipeline;
pub mod resampler;

use std::io::{Read, Seek, Write};

use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::Sample;
use tokio_util::sync::CancellationToken;

use crate::error::{FfmpegError, Result};
use crate::format::Format;
use crate::params::EncodeConfig;

pub use decoder::SourceDecoder;
pub use encoder::{SinkEncoder, SourceParams};
pub use pipeline::{run, PipelineStats};

/// Sample layout of the frames an encoder consumes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSpec {
    pub format: Sample,
    pub layout: ChannelLayout,
    pub rate: u32,
}

/// Producer of decoded PCM frames
pub trait AudioSource {
    /// Next decoded frame, `None` once the stream is exhausted.
    fn next_frame(&mut self) -> std::result::Result<Option<ffmpeg::util::frame::Audio>, FfmpegError>;
}

/// Consumer of PCM frames in a fixed sample layout
pub trait AudioSink {
    fn frame_spec(&self) -> FrameSpec;

    /// Samples per frame the sink requires, `None` if any size is accepted.
    fn frame_size(&self) -> Option<usize>;

    fn write_frame(&mut self, frame: &mut ffmpeg::util::frame::Audio) -> std::result::Result<(), FfmpegError>;

    /// Flush buffered output and close the container.
    fn finish(&mut self) -> std::result::Result<(), FfmpegError>;
}

/// Decode `input` as `input_format` and encode it per `config` into `sink`.
///
/// Blocking; run it on a blocking thread.
pub fn transcode<R, W>(
    input: R,
    input_format: &Format,
    config: &EncodeConfig,
    sink: W,
    batch_size: usize,
    cancel: &CancellationToken,
) -> Result<PipelineStats>
where
    R: Read + Seek,
    W: Write + Seek,
{
    let mut decoder = SourceDecoder::open(input, input_format)?;
    let source = SourceParams {
        sample_rate: decoder.sample_rate(),
        layout: decoder.channel_layout(),
    };
    let mut encoder = SinkEncoder::open(sink, config, source)?;

    pipeline::run(&mut decoder, &mut encoder, batch_size, cancel)
}
