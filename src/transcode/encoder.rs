//! Output encoders for the transcoding pipeline
//!
//! Builds an FFmpeg encoder from a validated `EncodeConfig` and binds it to a
//! muxer writing into the request's sink:
//! - WAV: PCM at the requested bit depth, source rate and layout
//! - MP3: libmp3lame with channel mode, bit rate strategy and quality

use std::io::{Seek, Write};

use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::{Sample, Type};

use super::{AudioSink, FrameSpec};
use crate::error::FfmpegError;
use crate::ffmpeg::helpers::{
    encoder_codec_parameters, encoder_set_compression_level, encoder_set_vbr_quality,
};
use crate::ffmpeg::io::SinkOutput;
use crate::params::{BitDepth, BitRateMode, ChannelMode, EncodeConfig, Mp3Config, WavConfig};

/// Preferred MP3 encoder implementation
pub const MP3_ENCODER: &str = "libmp3lame";

/// Decoded stream properties the encoder has to match
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceParams {
    pub sample_rate: u32,
    pub layout: ChannelLayout,
}

/// Everything needed to open an encoder, derived from an `EncodeConfig`
struct EncoderPlan {
    codec: ffmpeg::Codec,
    format: Sample,
    layout: ChannelLayout,
    bit_rate: Option<usize>,
    vbr_quality: Option<u8>,
    compression_level: Option<u8>,
    options: ffmpeg::Dictionary<'static>,
}

/// Encoder bound to a muxer writing into `W`
pub struct SinkEncoder<W: Write + Seek> {
    // Declared before `output` so the codec context closes first.
    encoder: ffmpeg::encoder::audio::Encoder,
    output: SinkOutput<W>,
    spec: FrameSpec,
    frame_size: Option<usize>,
    encoder_time_base: ffmpeg::Rational,
    stream_time_base: ffmpeg::Rational,
    next_pts: i64,
    packets: u64,
}

impl<W: Write + Seek> SinkEncoder<W> {
    /// Open the encoder described by `config` and write the container header.
    pub fn open(writer: W, config: &EncodeConfig, source: SourceParams) -> Result<Self, FfmpegError> {
        let plan = match config {
            EncodeConfig::Wav(wav) => wav_plan(wav, source)?,
            EncodeConfig::Mp3(mp3) => mp3_plan(mp3)?,
        };
        let muxer = config.format().muxer;
        let mut output = SinkOutput::create(writer, muxer)?;

        let encoder_time_base = ffmpeg::Rational::new(1, source.sample_rate as i32);
        let mut context = codec::Context::new_with_codec(plan.codec);
        context.set_time_base(encoder_time_base);

        let mut audio_enc = context.encoder().audio().map_err(|e| {
            FfmpegError::EncoderCreate(format!("Cannot get audio encoder handle: {}", e))
        })?;

        audio_enc.set_rate(source.sample_rate as i32);
        audio_enc.set_format(plan.format);
        audio_enc.set_channel_layout(plan.layout);
        if let Some(bit_rate) = plan.bit_rate {
            audio_enc.set_bit_rate(bit_rate);
        }
        if let Some(quality) = plan.vbr_quality {
            encoder_set_vbr_quality(&mut audio_enc, quality);
        }
        if let Some(level) = plan.compression_level {
            encoder_set_compression_level(&mut audio_enc, level);
        }

        let encoder = audio_enc.open_as_with(plan.codec, plan.options).map_err(|e| {
            FfmpegError::EncoderCreate(format!(
                "Failed to open {} encoder: {}",
                plan.codec.name(),
                e
            ))
        })?;

        {
            let mut stream = output
                .output_mut()
                .add_stream(plan.codec)
                .map_err(|e| FfmpegError::MuxerCreate(format!("Failed to add stream: {}", e)))?;
            stream.set_parameters(encoder_codec_parameters(&encoder));
            stream.set_time_base(encoder_time_base);
        }

        output
            .output_mut()
            .write_header()
            .map_err(|e| FfmpegError::WriteHeader(format!("{} muxer: {}", muxer, e)))?;

        // The muxer may pick its own stream time base in write_header
        let stream_time_base = output
            .output()
            .stream(0)
            .map(|s| s.time_base())
            .unwrap_or(encoder_time_base);

        let frame_size = match encoder.frame_size() {
            0 => None,
            n => Some(n as usize),
        };

        tracing::debug!(
            codec = plan.codec.name(),
            muxer,
            format = ?plan.format,
            channels = plan.layout.channels(),
            sample_rate = source.sample_rate,
            ?frame_size,
            "encoder opened"
        );

        Ok(Self {
            encoder,
            output,
            spec: FrameSpec {
                format: plan.format,
                layout: plan.layout,
                rate: source.sample_rate,
            },
            frame_size,
            encoder_time_base,
            stream_time_base,
            next_pts: 0,
            packets: 0,
        })
    }

    fn drain_packets(&mut self) -> Result<(), FfmpegError> {
        loop {
            let mut packet = ffmpeg::codec::packet::Packet::empty();
            match self.encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    packet.set_stream(0);
                    packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
                    packet
                        .write_interleaved(self.output.output_mut())
                        .map_err(|e| FfmpegError::WritePacket(e.to_string()))?;
                    self.packets += 1;
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                    return Ok(())
                }
                Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(e) => {
                    return Err(FfmpegError::EncodeFrame(format!(
                        "receive_packet error: {}",
                        e
                    )))
                }
            }
        }
    }
}

impl<W: Write + Seek> AudioSink for SinkEncoder<W> {
    fn frame_spec(&self) -> FrameSpec {
        self.spec
    }

    fn frame_size(&self) -> Option<usize> {
        self.frame_size
    }

    fn write_frame(&mut self, frame: &mut ffmpeg::util::frame::Audio) -> Result<(), FfmpegError> {
        frame.set_pts(Some(self.next_pts));
        self.next_pts += frame.samples() as i64;

        self.encoder
            .send_frame(frame)
            .map_err(|e| FfmpegError::EncodeFrame(format!("send_frame error: {}", e)))?;
        self.drain_packets()
    }

    fn finish(&mut self) -> Result<(), FfmpegError> {
        match self.encoder.send_eof() {
            Ok(()) | Err(ffmpeg::Error::Eof) => {}
            Err(e) => return Err(FfmpegError::EncodeFrame(format!("send_eof error: {}", e))),
        }
        self.drain_packets()?;

        self.output
            .output_mut()
            .write_trailer()
            .map_err(|e| FfmpegError::WriteTrailer(e.to_string()))?;
        tracing::debug!(packets = self.packets, "encoder finished");
        self.output.flush()
    }
}

fn wav_plan(config: &WavConfig, source: SourceParams) -> Result<EncoderPlan, FfmpegError> {
    let (id, format) = match config.bit_depth {
        BitDepth::Eight => (codec::Id::PCM_U8, Sample::U8(Type::Packed)),
        BitDepth::Sixteen => (codec::Id::PCM_S16LE, Sample::I16(Type::Packed)),
        // 24-bit PCM is fed as 32-bit samples; the encoder keeps the top 24 bits.
        BitDepth::TwentyFour => (codec::Id::PCM_S24LE, Sample::I32(Type::Packed)),
        BitDepth::ThirtyTwo => (codec::Id::PCM_S32LE, Sample::I32(Type::Packed)),
    };
    let codec = codec::encoder::find(id).ok_or_else(|| {
        FfmpegError::EncoderNotFound(format!("{:?} encoder not found in this FFmpeg build", id))
    })?;

    Ok(EncoderPlan {
        codec,
        format,
        layout: source.layout,
        bit_rate: None,
        vbr_quality: None,
        compression_level: None,
        options: ffmpeg::Dictionary::new(),
    })
}

fn mp3_plan(config: &Mp3Config) -> Result<EncoderPlan, FfmpegError> {
    let codec = find_mp3_encoder().ok_or_else(|| {
        FfmpegError::EncoderNotFound("MP3 encoder not found in this FFmpeg build".into())
    })?;

    let mut options = ffmpeg::Dictionary::new();
    let layout = match config.channel_mode {
        ChannelMode::Mono => ChannelLayout::MONO,
        ChannelMode::Stereo => {
            options.set("joint_stereo", "0");
            ChannelLayout::STEREO
        }
        ChannelMode::JointStereo => {
            options.set("joint_stereo", "1");
            ChannelLayout::STEREO
        }
    };

    let (bit_rate, vbr_quality) = match config.bit_rate_mode {
        BitRateMode::Cbr { kbps } => (Some(kbps as usize * 1000), None),
        BitRateMode::Abr { kbps } => {
            options.set("abr", "1");
            (Some(kbps as usize * 1000), None)
        }
        BitRateMode::Vbr { quality } => (None, Some(quality)),
    };

    Ok(EncoderPlan {
        codec,
        format: mp3_sample_format(codec),
        layout,
        bit_rate,
        vbr_quality,
        compression_level: config.quality,
        options,
    })
}

fn find_mp3_encoder() -> Option<ffmpeg::Codec> {
    codec::encoder::find_by_name(MP3_ENCODER).or_else(|| codec::encoder::find(codec::Id::MP3))
}

/// Planar float when the encoder takes it, otherwise its first listed format.
fn mp3_sample_format(codec: ffmpeg::Codec) -> Sample {
    const PREFERRED: Sample = Sample::F32(Type::Planar);
    let formats: Vec<Sample> = codec
        .audio()
        .ok()
        .and_then(|audio| audio.formats())
        .map(|formats| formats.collect())
        .unwrap_or_default();

    if formats.is_empty() || formats.contains(&PREFERRED) {
        PREFERRED
    } else {
        formats[0]
    }
}

/// Whether this FFmpeg build can produce MP3 output.
pub fn is_mp3_encoder_available() -> bool {
    find_mp3_encoder().is_some()
}
