//! FFmpeg module - wrappers and utilities for FFmpeg library access
//!
//! This module handles:
//! - FFmpeg initialization and log routing
//! - Custom AVIOContexts binding demuxers and muxers to Rust byte streams
//! - Small safe accessors for fields `ffmpeg-next` does not expose

pub mod helpers;
pub mod io;

pub use ffmpeg_next as ffmpeg;

use crate::error::FfmpegError;

/// Initialize FFmpeg library
///
/// This should be called once at application startup.
pub fn init() -> Result<(), FfmpegError> {
    ffmpeg::init()
        .map_err(|e| FfmpegError::InitFailed(format!("ffmpeg::init() failed: {}", e)))?;

    tracing::info!("FFmpeg initialized");

    Ok(())
}

/// Route FFmpeg's own log output through `tracing`, keeping warnings and
/// errors only.
///
/// Must be called after `init()` and before any worker thread touches FFmpeg.
pub fn install_log_filter() {
    // SAFETY: both calls modify global FFmpeg state; they run once at startup
    // before any pipeline thread exists.
    unsafe {
        ffmpeg::ffi::av_log_set_level(ffmpeg::ffi::AV_LOG_WARNING as i32);
        ffmpeg::ffi::av_log_set_callback(Some(ffmpeg_log_callback));
    }
}

unsafe extern "C" fn ffmpeg_log_callback(
    avcl: *mut std::ffi::c_void,
    level: std::ffi::c_int,
    fmt: *const std::ffi::c_char,
    vl: ffmpeg::ffi::va_list,
) {
    use std::ffi::CStr;

    if level > ffmpeg::ffi::av_log_get_level() {
        return;
    }

    let mut buf = [0 as std::ffi::c_char; 1024];
    let mut print_prefix: std::ffi::c_int = 1;
    ffmpeg::ffi::av_log_format_line(
        avcl,
        level,
        fmt,
        vl,
        buf.as_mut_ptr(),
        buf.len() as std::ffi::c_int,
        &mut print_prefix,
    );

    let msg = CStr::from_ptr(buf.as_ptr()).to_string_lossy();
    let msg = msg.trim_end();
    if msg.is_empty() {
        return;
    }

    if level <= ffmpeg::ffi::AV_LOG_ERROR as std::ffi::c_int {
        tracing::error!(target: "ffmpeg", "{}", msg);
    } else {
        tracing::warn!(target: "ffmpeg", "{}", msg);
    }
}

/// Version of the linked libavcodec, e.g. `libavcodec 62.11.100`
pub fn version_info() -> String {
    let v = ffmpeg::codec::version();
    format!("libavcodec {}.{}.{}", v >> 16, (v >> 8) & 0xff, v & 0xff)
}

/// Whether this FFmpeg build has an encoder registered under `name`.
pub fn encoder_available(name: &str) -> bool {
    ffmpeg::encoder::find_by_name(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info_format() {
        let info = version_info();
        assert!(info.starts_with("libavcodec "));
        assert_eq!(info.split('.').count(), 3);
    }

    #[test]
    fn test_pcm_encoders_available() {
        init().unwrap();
        assert!(encoder_available("pcm_s16le"));
        assert!(encoder_available("pcm_u8"));
        assert!(!encoder_available("no_such_encoder"));
    }
}
