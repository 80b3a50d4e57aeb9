//! Sample FIFO between resampler and encoder
//!
//! Decoders emit frames of whatever size the container dictates while most
//! encoders want a fixed number of samples per frame (1152 for MP3). The FIFO
//! buffers converted samples and hands them out in chunks of exactly the
//! requested size, the last chunk possibly shorter.

use ffmpeg_next as ffmpeg;

use super::FrameSpec;
use crate::error::FfmpegError;
use crate::ffmpeg::helpers::{audio_plane_data, audio_plane_data_mut};

pub struct SampleFifo {
    spec: FrameSpec,
    /// One buffer per plane: per channel for planar formats, one for packed
    planes: Vec<Vec<u8>>,
    /// Bytes one sample occupies in each plane
    stride: usize,
    samples: usize,
}

impl SampleFifo {
    pub fn new(spec: FrameSpec) -> Self {
        let channels = spec.layout.channels().max(1) as usize;
        let (plane_count, stride) = if spec.format.is_planar() {
            (channels, spec.format.bytes())
        } else {
            (1, spec.format.bytes() * channels)
        };

        Self {
            spec,
            planes: vec![Vec::new(); plane_count],
            stride,
            samples: 0,
        }
    }

    /// Samples per channel currently buffered
    pub fn len(&self) -> usize {
        self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }

    /// Append a frame; it must already be in the FIFO's sample format.
    pub fn push(&mut self, frame: &ffmpeg::util::frame::Audio) -> Result<(), FfmpegError> {
        if frame.format() != self.spec.format || frame.channels() as i32 != self.spec.layout.channels() {
            return Err(FfmpegError::Resample(format!(
                "Frame {:?}/{}ch does not match FIFO {:?}/{}ch",
                frame.format(),
                frame.channels(),
                self.spec.format,
                self.spec.layout.channels()
            )));
        }

        let n = frame.samples();
        let bytes = n * self.stride;
        for (index, plane) in self.planes.iter_mut().enumerate() {
            let data = audio_plane_data(frame, index);
            if data.len() < bytes {
                return Err(FfmpegError::Resample(format!(
                    "Plane {} holds {} bytes, expected {}",
                    index,
                    data.len(),
                    bytes
                )));
            }
            plane.extend_from_slice(&data[..bytes]);
        }
        self.samples += n;
        Ok(())
    }

    /// Take exactly `count` samples, or `None` if fewer are buffered.
    pub fn pop(&mut self, count: usize) -> Option<ffmpeg::util::frame::Audio> {
        if count == 0 || self.samples < count {
            return None;
        }
        Some(self.take(count))
    }

    /// Take everything that is left as one (short) frame.
    pub fn pop_remaining(&mut self) -> Option<ffmpeg::util::frame::Audio> {
        if self.samples == 0 {
            return None;
        }
        Some(self.take(self.samples))
    }

    fn take(&mut self, count: usize) -> ffmpeg::util::frame::Audio {
        let bytes = count * self.stride;
        let mut out = ffmpeg::util::frame::Audio::new(self.spec.format, count, self.spec.layout);
        out.set_rate(self.spec.rate);

        for (index, plane) in self.planes.iter_mut().enumerate() {
            let dst = audio_plane_data_mut(&mut out, index);
            dst[..bytes].copy_from_slice(&plane[..bytes]);
            plane.drain(..bytes);
        }
        self.samples -= count;
        out
    }
}
