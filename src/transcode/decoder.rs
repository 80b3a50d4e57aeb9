//! Audio decoder for the transcoding pipeline
//!
//! Opens the uploaded bytes with the input format's demuxer and decodes the
//! best audio stream into raw PCM `AVFrame`s.

use std::io::{Read, Seek};

use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::channel_layout::ChannelLayout;

use super::AudioSource;
use crate::error::FfmpegError;
use crate::ffmpeg::helpers::{codec_params_channels, codec_params_sample_rate, default_layout};
use crate::ffmpeg::io::SourceInput;
use crate::format::Format;

/// Decoder bound to a demuxed byte stream
pub struct SourceDecoder<R: Read + Seek> {
    // Declared before `source` so the codec context closes first.
    decoder: ffmpeg::decoder::Audio,
    source: SourceInput<R>,
    stream_index: usize,
    input_done: bool,
    packets: u64,
    skipped: u64,
}

impl<R: Read + Seek> SourceDecoder<R> {
    /// Open `reader` as `format` and prepare a decoder for its audio stream.
    pub fn open(reader: R, format: &Format) -> Result<Self, FfmpegError> {
        let source = SourceInput::open(reader, format.demuxer)?;

        let stream = source
            .input()
            .streams()
            .best(ffmpeg::media::Type::Audio)
            .ok_or(FfmpegError::NoAudioStream)?;
        let stream_index = stream.index();

        let params = stream.parameters();
        if codec_params_sample_rate(&params) == 0 || codec_params_channels(&params) == 0 {
            return Err(FfmpegError::DecoderCreate(format!(
                "Audio stream {} has no sample rate or channel count",
                stream_index
            )));
        }

        let context =
            ffmpeg::codec::Context::from_parameters(params).map_err(|e| {
                FfmpegError::DecoderCreate(format!(
                    "Failed to create codec context for stream {}: {}",
                    stream_index, e
                ))
            })?;

        let decoder = context.decoder().audio().map_err(|e| {
            FfmpegError::DecoderCreate(format!(
                "Failed to open audio decoder for stream {}: {}",
                stream_index, e
            ))
        })?;

        tracing::debug!(
            demuxer = format.demuxer,
            stream_index,
            codec = ?decoder.id(),
            sample_rate = decoder.rate(),
            channels = decoder.channels(),
            "decoder opened"
        );

        Ok(Self {
            decoder,
            source,
            stream_index,
            input_done: false,
            packets: 0,
            skipped: 0,
        })
    }

    /// Sample rate of decoded frames.
    pub fn sample_rate(&self) -> u32 {
        self.decoder.rate()
    }

    /// Channel count of decoded frames.
    pub fn channels(&self) -> u16 {
        self.decoder.channels()
    }

    /// Channel layout of decoded frames, defaulted when the stream has none.
    pub fn channel_layout(&self) -> ChannelLayout {
        let layout = self.decoder.channel_layout();
        if layout.bits() == 0 {
            default_layout(self.channels())
        } else {
            layout
        }
    }

    /// Packets read from the audio stream so far
    pub fn packets(&self) -> u64 {
        self.packets
    }

    fn receive_frame(&mut self) -> Result<Option<ffmpeg::util::frame::Audio>, FfmpegError> {
        let mut frame = ffmpeg::util::frame::Audio::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => Ok(Some(frame)),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(None),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(FfmpegError::DecodePacket(format!(
                "receive_frame error on stream {}: {}",
                self.stream_index, e
            ))),
        }
    }

    fn send_packet(&mut self, packet: &ffmpeg::codec::packet::Packet) -> Result<(), FfmpegError> {
        match self.decoder.send_packet(packet) {
            Ok(()) => Ok(()),
            // Corrupt frame inside an otherwise valid stream: drop it and go on
            Err(ffmpeg::Error::InvalidData) => {
                self.skipped += 1;
                tracing::debug!(
                    stream_index = self.stream_index,
                    "send_packet: skipping invalid packet"
                );
                Ok(())
            }
            Err(e) => Err(FfmpegError::DecodePacket(format!(
                "send_packet error on stream {}: {}",
                self.stream_index, e
            ))),
        }
    }

    fn send_eof(&mut self) -> Result<(), FfmpegError> {
        match self.decoder.send_eof() {
            Ok(()) => Ok(()),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(()),
            Err(ffmpeg::Error::Eof) => Ok(()),
            Err(e) => Err(FfmpegError::DecodePacket(format!(
                "send_eof error on stream {}: {}",
                self.stream_index, e
            ))),
        }
    }
}

impl<R: Read + Seek> AudioSource for SourceDecoder<R> {
    fn next_frame(&mut self) -> Result<Option<ffmpeg::util::frame::Audio>, FfmpegError> {
        loop {
            if let Some(frame) = self.receive_frame()? {
                return Ok(Some(frame));
            }
            if self.input_done {
                if self.skipped > 0 {
                    tracing::debug!(skipped = self.skipped, "decoder skipped invalid packets");
                }
                return Ok(None);
            }

            let mut packet = ffmpeg::codec::packet::Packet::empty();
            match packet.read(self.source.input_mut()) {
                Ok(()) => {
                    if packet.stream() != self.stream_index {
                        continue;
                    }
                    self.packets += 1;
                    self.send_packet(&packet)?;
                }
                Err(ffmpeg::Error::Eof) => {
                    self.send_eof()?;
                    self.input_done = true;
                }
                Err(e) => {
                    return Err(FfmpegError::DecodePacket(format!(
                        "Failed to read packet: {}",
                        e
                    )))
                }
            }
        }
    }
}
