//! Sample format and channel layout conversion
//!
//! Converts decoded PCM frames into the sample format and layout the output
//! encoder accepts. The sample rate is never changed.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::software::resampling;

use super::FrameSpec;
use crate::error::FfmpegError;
use crate::ffmpeg::helpers::frame_channel_layout;

/// Audio converter wrapping FFmpeg's `SwrContext`
pub struct AudioResampler {
    context: resampling::Context,
    target: FrameSpec,
}

impl AudioResampler {
    /// Create a converter from the format described by `src_frame` to
    /// `target`. The target's rate must match the source rate.
    pub fn new(src_frame: &ffmpeg::util::frame::Audio, target: FrameSpec) -> Result<Self, FfmpegError> {
        if src_frame.rate() != target.rate {
            return Err(FfmpegError::Resample(format!(
                "Sample rate change {} -> {} is not supported",
                src_frame.rate(),
                target.rate
            )));
        }

        let context = resampling::Context::get(
            src_frame.format(),
            frame_channel_layout(src_frame),
            src_frame.rate(),
            target.format,
            target.layout,
            target.rate,
        )
        .map_err(|e| {
            FfmpegError::ResamplerCreate(format!("Failed to create resampling context: {}", e))
        })?;

        tracing::debug!(
            from_format = ?src_frame.format(),
            from_channels = src_frame.channels(),
            to_format = ?target.format,
            to_channels = target.layout.channels(),
            rate = target.rate,
            "resampler created"
        );

        Ok(Self { context, target })
    }

    /// Convert one input frame. Returns `None` when the converter buffered
    /// everything and produced no output yet.
    pub fn convert(
        &mut self,
        frame: &ffmpeg::util::frame::Audio,
    ) -> Result<Option<ffmpeg::util::frame::Audio>, FfmpegError> {
        // swr_convert_frame allocates the output buffer from the context config.
        let mut out = ffmpeg::util::frame::Audio::empty();

        self.context
            .run(frame, &mut out)
            .map_err(|e| FfmpegError::Resample(format!("Resampling error: {}", e)))?;

        if out.samples() == 0 {
            return Ok(None);
        }
        Ok(Some(out))
    }

    /// Drain samples still held inside the converter.
    ///
    /// Without a rate change the context normally holds nothing and FFmpeg
    /// reports an error for the empty flush; that is treated as "no output".
    pub fn flush(&mut self) -> Option<ffmpeg::util::frame::Audio> {
        let mut out = ffmpeg::util::frame::Audio::empty();
        if let Err(e) = self.context.flush(&mut out) {
            tracing::debug!("Resampler flush returned non-fatal error: {}", e);
            return None;
        }

        if out.samples() == 0 {
            return None;
        }
        Some(out)
    }

    pub fn target(&self) -> FrameSpec {
        self.target
    }
}

/// Whether `frame` has to pass through a resampler to match `target`.
pub fn needs_conversion(frame: &ffmpeg::util::frame::Audio, target: &FrameSpec) -> bool {
    frame.format() != target.format
        || frame.rate() != target.rate
        || frame_channel_layout(frame) != target.layout
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg_next::util::channel_layout::ChannelLayout;
    use ffmpeg_next::util::format::sample::{Sample, Type};

    fn frame(format: Sample, layout: ChannelLayout, samples: usize) -> ffmpeg::util::frame::Audio {
        let mut frame = ffmpeg::util::frame::Audio::new(format, samples, layout);
        frame.set_rate(8000);
        for plane in 0..frame.planes() {
            crate::ffmpeg::helpers::audio_plane_data_mut(&mut frame, plane).fill(0);
        }
        frame
    }

    fn spec(format: Sample, layout: ChannelLayout) -> FrameSpec {
        FrameSpec {
            format,
            layout,
            rate: 8000,
        }
    }

    #[test]
    fn test_needs_conversion() {
        let f = frame(Sample::I16(Type::Packed), ChannelLayout::STEREO, 32);
        assert!(!needs_conversion(&f, &spec(Sample::I16(Type::Packed), ChannelLayout::STEREO)));
        assert!(needs_conversion(&f, &spec(Sample::F32(Type::Planar), ChannelLayout::STEREO)));
        assert!(needs_conversion(&f, &spec(Sample::I16(Type::Packed), ChannelLayout::MONO)));
    }

    #[test]
    fn test_convert_packed_to_planar_keeps_samples() {
        crate::ffmpeg::init().unwrap();
        let input = frame(Sample::I16(Type::Packed), ChannelLayout::STEREO, 256);
        let target = spec(Sample::F32(Type::Planar), ChannelLayout::STEREO);
        let mut resampler = AudioResampler::new(&input, target).unwrap();

        let mut total = 0;
        if let Some(out) = resampler.convert(&input).unwrap() {
            assert_eq!(out.format(), target.format);
            total += out.samples();
        }
        if let Some(out) = resampler.flush() {
            total += out.samples();
        }
        assert_eq!(total, 256);
    }

    #[test]
    fn test_rate_change_rejected() {
        let input = frame(Sample::I16(Type::Packed), ChannelLayout::MONO, 16);
        let target = FrameSpec {
            format: Sample::I16(Type::Packed),
            layout: ChannelLayout::MONO,
            rate: 44100,
        };
        assert!(matches!(
            AudioResampler::new(&input, target),
            Err(FfmpegError::Resample(_))
        ));
    }
}
