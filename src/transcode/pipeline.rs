//! Pipeline runner
//!
//! Moves decoded audio from an `AudioSource` into an `AudioSink`:
//! decode → convert (format/layout only) → FIFO → fixed-size frames → encode.
//! The cancellation token is polled before every source read, so a cancelled
//! run stops within one packet.

use ffmpeg_next as ffmpeg;
use tokio_util::sync::CancellationToken;

use super::fifo::SampleFifo;
use super::resampler::{needs_conversion, AudioResampler};
use super::{AudioSink, AudioSource};
use crate::error::{Result, TranscodeError};

/// Counters from one completed run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames produced by the decoder
    pub frames_decoded: u64,
    /// Samples per channel read from the source
    pub samples_in: u64,
    /// Samples per channel handed to the encoder
    pub samples_out: u64,
    /// Frames handed to the encoder
    pub frames_encoded: u64,
}

/// Run one decode → encode pass.
///
/// `batch_size` is the number of samples per encoder frame for encoders that
/// accept any frame size; encoders with a fixed frame size get exactly that.
/// On error or cancellation the sink is left unfinished; the caller discards
/// whatever it wrote.
pub fn run<S, K>(
    source: &mut S,
    sink: &mut K,
    batch_size: usize,
    cancel: &CancellationToken,
) -> Result<PipelineStats>
where
    S: AudioSource + ?Sized,
    K: AudioSink + ?Sized,
{
    let target = sink.frame_spec();
    let chunk = sink.frame_size().unwrap_or(batch_size).max(1);
    let mut fifo = SampleFifo::new(target);
    let mut resampler: Option<AudioResampler> = None;
    let mut stats = PipelineStats::default();

    loop {
        if cancel.is_cancelled() {
            return Err(TranscodeError::Cancelled);
        }

        let Some(frame) = source.next_frame()? else {
            break;
        };
        stats.frames_decoded += 1;
        stats.samples_in += frame.samples() as u64;

        if resampler.is_none() && needs_conversion(&frame, &target) {
            resampler = Some(AudioResampler::new(&frame, target)?);
        }
        match resampler.as_mut() {
            Some(r) => {
                if let Some(converted) = r.convert(&frame)? {
                    fifo.push(&converted)?;
                }
            }
            None => fifo.push(&frame)?,
        }

        drain_full(&mut fifo, sink, chunk, &mut stats)?;
    }

    // A stream with no samples still yields a valid, empty container.
    if stats.frames_decoded == 0 {
        tracing::debug!("source produced no audio");
    }

    if let Some(tail) = resampler.as_mut().and_then(|r| r.flush()) {
        fifo.push(&tail)?;
    }
    drain_full(&mut fifo, sink, chunk, &mut stats)?;
    if let Some(mut last) = fifo.pop_remaining() {
        encode(sink, &mut last, &mut stats)?;
    }

    if cancel.is_cancelled() {
        return Err(TranscodeError::Cancelled);
    }
    sink.finish()?;

    tracing::debug!(
        frames_decoded = stats.frames_decoded,
        frames_encoded = stats.frames_encoded,
        samples_in = stats.samples_in,
        samples_out = stats.samples_out,
        chunk,
        "pipeline complete"
    );

    Ok(stats)
}

fn drain_full<K: AudioSink + ?Sized>(
    fifo: &mut SampleFifo,
    sink: &mut K,
    chunk: usize,
    stats: &mut PipelineStats,
) -> Result<()> {
    while let Some(mut frame) = fifo.pop(chunk) {
        encode(sink, &mut frame, stats)?;
    }
    Ok(())
}

fn encode<K: AudioSink + ?Sized>(
    sink: &mut K,
    frame: &mut ffmpeg::util::frame::Audio,
    stats: &mut PipelineStats,
) -> Result<()> {
    let samples = frame.samples() as u64;
    sink.write_frame(frame)?;
    stats.frames_encoded += 1;
    stats.samples_out += samples;
    Ok(())
}
