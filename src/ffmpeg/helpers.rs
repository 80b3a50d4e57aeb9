//! Safe wrappers around FFmpeg FFI calls.
//!
//! All `unsafe` field access needed by the pipeline is contained here;
//! callers outside this module never touch raw FFmpeg structs directly.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::channel_layout::ChannelLayout;

/// `FF_QP2LAMBDA` from libavutil: one quantiser step in lambda units.
const QP2LAMBDA: i32 = 118;

// ── Codec-parameter field accessors ─────────────────────────────────────────

/// Read `sample_rate` from an `AVCodecParameters` struct.
pub fn codec_params_sample_rate(params: &ffmpeg::codec::parameters::Parameters) -> u32 {
    // SAFETY: `params.as_ptr()` is valid for the lifetime of `params`;
    // `sample_rate` is a plain integer field.
    unsafe { (*params.as_ptr()).sample_rate as u32 }
}

/// Read `ch_layout.nb_channels` from an `AVCodecParameters` struct.
pub fn codec_params_channels(params: &ffmpeg::codec::parameters::Parameters) -> u16 {
    unsafe { (*params.as_ptr()).ch_layout.nb_channels as u16 }
}

/// Allocate a fresh `AVCodecParameters`, copy the encoder context into it,
/// and return it as a safe `ffmpeg::codec::Parameters`.
///
/// Used to describe the encoded stream to the muxer.
pub fn encoder_codec_parameters(
    encoder: &ffmpeg::codec::encoder::Audio,
) -> ffmpeg::codec::Parameters {
    use std::ops::Deref;
    use std::rc::Rc;
    let ctx: &ffmpeg::codec::Context = encoder.deref();
    // SAFETY: `avcodec_parameters_from_context` copies fields out of a live,
    // opened encoder context into a freshly allocated parameter struct.
    unsafe {
        let params = ffmpeg::ffi::avcodec_parameters_alloc();
        ffmpeg::ffi::avcodec_parameters_from_context(params, ctx.as_ptr());
        ffmpeg::codec::Parameters::wrap(params, None::<Rc<dyn std::any::Any>>)
    }
}

// ── Encoder settings without safe setters ───────────────────────────────────

/// Switch an unopened encoder to fixed-quality (VBR) mode.
///
/// `quality` is the codec's native scale; for libmp3lame that is the `-V`
/// level 0..=9.
pub fn encoder_set_vbr_quality(encoder: &mut ffmpeg::codec::encoder::Audio, quality: u8) {
    // SAFETY: plain scalar fields on an encoder context that is not opened
    // yet; libavcodec reads them in avcodec_open2.
    unsafe {
        let ctx = encoder.as_mut_ptr();
        (*ctx).flags |= ffmpeg::ffi::AV_CODEC_FLAG_QSCALE as i32;
        (*ctx).global_quality = quality as i32 * QP2LAMBDA;
    }
}

/// Set the encoder's algorithmic quality/speed trade-off.
pub fn encoder_set_compression_level(encoder: &mut ffmpeg::codec::encoder::Audio, level: u8) {
    unsafe {
        (*encoder.as_mut_ptr()).compression_level = level as i32;
    }
}

// ── AVIO context management ──────────────────────────────────────────────────

/// Detach the `AVIOContext` (`pb`) from an output context so that freeing
/// the format context cannot free the caller-owned AVIO context.
pub fn detach_avio(output: &mut ffmpeg::format::context::Output) {
    // SAFETY: `output.as_mut_ptr()` is valid for the lifetime of `output`.
    unsafe {
        let ctx = output.as_mut_ptr();
        if !ctx.is_null() && !(*ctx).pb.is_null() {
            (*ctx).pb = std::ptr::null_mut();
        }
    }
}

/// Input counterpart of [`detach_avio`].
pub fn detach_input_avio(input: &mut ffmpeg::format::context::Input) {
    unsafe {
        let ctx = input.as_mut_ptr();
        if !ctx.is_null() && !(*ctx).pb.is_null() {
            (*ctx).pb = std::ptr::null_mut();
        }
    }
}

// ── Channel layouts ──────────────────────────────────────────────────────────

/// Layout of a frame, falling back to the default layout for its channel
/// count when the source left it unspecified (common for WAV).
pub fn frame_channel_layout(frame: &ffmpeg::util::frame::Audio) -> ChannelLayout {
    let layout = frame.channel_layout();
    if layout.bits() == 0 {
        default_layout(frame.channels())
    } else {
        layout
    }
}

/// Conventional layout for a bare channel count.
pub fn default_layout(channels: u16) -> ChannelLayout {
    match channels {
        1 => ChannelLayout::MONO,
        3 => ChannelLayout::SURROUND,
        4 => ChannelLayout::QUAD,
        5 => ChannelLayout::_5POINT0,
        6 => ChannelLayout::_5POINT1,
        8 => ChannelLayout::_7POINT1,
        _ => ChannelLayout::STEREO,
    }
}

// ── Audio plane access ───────────────────────────────────────────────────────

/// Extract an audio plane slice from an `AVFrame`.
///
/// Works around `ffmpeg-next`'s `Audio::data(index)` which stops counting
/// planes when `linesize[1] == 0`; planar audio frames usually only populate
/// `linesize[0]` for every plane.
pub fn audio_plane_data(frame: &ffmpeg::util::frame::Audio, index: usize) -> &[u8] {
    unsafe {
        let f = frame.as_ptr();
        let channels = (*f).ch_layout.nb_channels as usize;

        // Packed audio has a single data plane
        if frame.format().is_planar() {
            if index >= channels {
                return &[];
            }
        } else if index > 0 {
            return &[];
        }

        let ptrs = (*f).extended_data;
        if ptrs.is_null() {
            return &[];
        }

        let plane_ptr = *ptrs.add(index);
        if plane_ptr.is_null() {
            return &[];
        }

        let size = (*f).linesize[0] as usize;
        std::slice::from_raw_parts(plane_ptr, size)
    }
}

/// Mutable version of `audio_plane_data`.
pub fn audio_plane_data_mut(frame: &mut ffmpeg::util::frame::Audio, index: usize) -> &mut [u8] {
    unsafe {
        let f = frame.as_mut_ptr();
        let channels = (*f).ch_layout.nb_channels as usize;

        if frame.format().is_planar() {
            if index >= channels {
                return &mut [];
            }
        } else if index > 0 {
            return &mut [];
        }

        let ptrs = (*f).extended_data;
        if ptrs.is_null() {
            return &mut [];
        }

        let plane_ptr = *ptrs.add(index);
        if plane_ptr.is_null() {
            return &mut [];
        }

        let size = (*f).linesize[0] as usize;
        std::slice::from_raw_parts_mut(plane_ptr, size)
    }
}
