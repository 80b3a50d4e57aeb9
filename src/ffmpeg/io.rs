//! Custom AVIOContexts over Rust byte streams
//!
//! `SourceInput` lets a demuxer read from any `Read + Seek` (the uploaded
//! bytes), `SinkOutput` lets a muxer write to any `Write + Seek` (the
//! request's artifact). Both own their AVIO context, its buffer and the boxed
//! stream, and tear them down in the right order on drop.
//!
//! # Thread safety
//! Neither type is `Send`. Each one is created and consumed on the single
//! blocking thread that runs the pipeline.

use std::ffi::{c_void, CString};
use std::io::{Read, Seek, SeekFrom, Write};
use std::mem::ManuallyDrop;
use std::ptr;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::context::{Input, Output};

use super::helpers::{detach_avio, detach_input_avio};
use crate::error::FfmpegError;

const AVIO_BUFFER_SIZE: usize = 32 * 1024;
const AVSEEK_SIZE: i32 = 0x10000;

/// Demuxer context reading from a Rust stream
pub struct SourceInput<R: Read + Seek> {
    input: ManuallyDrop<Input>,
    avio: *mut ffmpeg::ffi::AVIOContext,
    reader: *mut R,
}

/// Muxer context writing into a Rust stream
pub struct SinkOutput<W: Write + Seek> {
    output: ManuallyDrop<Output>,
    avio: *mut ffmpeg::ffi::AVIOContext,
    writer: *mut W,
}

// C-compatible callbacks for FFmpeg

unsafe extern "C" fn read_packet<R: Read>(opaque: *mut c_void, buf: *mut u8, buf_size: i32) -> i32 {
    let reader = &mut *(opaque as *mut R);
    let slice = std::slice::from_raw_parts_mut(buf, buf_size.max(0) as usize);
    match reader.read(slice) {
        Ok(0) => ffmpeg::ffi::AVERROR_EOF,
        Ok(n) => n as i32,
        Err(_) => -1,
    }
}

unsafe extern "C" fn write_packet<W: Write>(
    opaque: *mut c_void,
    buf: *const u8,
    buf_size: i32,
) -> i32 {
    let writer = &mut *(opaque as *mut W);
    let slice = std::slice::from_raw_parts(buf, buf_size.max(0) as usize);
    match writer.write_all(slice) {
        Ok(()) => buf_size,
        Err(_) => -1,
    }
}

unsafe extern "C" fn seek_stream<S: Seek>(opaque: *mut c_void, offset: i64, whence: i32) -> i64 {
    let stream = &mut *(opaque as *mut S);

    // AVSEEK_SIZE: report total length without moving
    if whence & AVSEEK_SIZE != 0 {
        let size = stream_len(stream);
        return size.map(|s| s as i64).unwrap_or(-1);
    }

    // AVSEEK_FORCE may be or'ed in
    let seek_from = match whence & 0xffff {
        0 => SeekFrom::Start(offset as u64),
        1 => SeekFrom::Current(offset),
        2 => SeekFrom::End(offset),
        _ => return -1,
    };
    match stream.seek(seek_from) {
        Ok(pos) => pos as i64,
        Err(_) => -1,
    }
}

fn stream_len<S: Seek>(stream: &mut S) -> std::io::Result<u64> {
    let pos = stream.stream_position()?;
    let len = stream.seek(SeekFrom::End(0))?;
    if pos != len {
        stream.seek(SeekFrom::Start(pos))?;
    }
    Ok(len)
}

/// Allocate an AVIO context with an `av_malloc`'d buffer around `opaque`.
unsafe fn alloc_avio(
    opaque: *mut c_void,
    write_flag: i32,
    read: Option<unsafe extern "C" fn(*mut c_void, *mut u8, i32) -> i32>,
    write: Option<unsafe extern "C" fn(*mut c_void, *const u8, i32) -> i32>,
    seek: Option<unsafe extern "C" fn(*mut c_void, i64, i32) -> i64>,
) -> Result<*mut ffmpeg::ffi::AVIOContext, FfmpegError> {
    let buffer = ffmpeg::ffi::av_malloc(AVIO_BUFFER_SIZE) as *mut u8;
    if buffer.is_null() {
        return Err(FfmpegError::InitFailed(
            "Failed to allocate AVIO buffer".to_string(),
        ));
    }

    let avio = ffmpeg::ffi::avio_alloc_context(
        buffer,
        AVIO_BUFFER_SIZE as i32,
        write_flag,
        opaque,
        read,
        write,
        seek,
    );
    if avio.is_null() {
        ffmpeg::ffi::av_free(buffer as *mut c_void);
        return Err(FfmpegError::InitFailed(
            "Failed to allocate AVIO context".to_string(),
        ));
    }

    Ok(avio)
}

/// Free an AVIO context and whatever buffer it currently holds.
///
/// FFmpeg may have replaced the original buffer, so the one to free is read
/// back from the context.
unsafe fn free_avio(mut avio: *mut ffmpeg::ffi::AVIOContext) {
    if avio.is_null() {
        return;
    }
    ffmpeg::ffi::av_freep(&mut (*avio).buffer as *mut *mut u8 as *mut c_void);
    ffmpeg::ffi::avio_context_free(&mut avio);
}

fn c_name(name: &str) -> Result<CString, FfmpegError> {
    CString::new(name).map_err(|_| FfmpegError::InitFailed(format!("Invalid format name {:?}", name)))
}

impl<R: Read + Seek> SourceInput<R> {
    /// Open `reader` with the named demuxer and probe its streams.
    pub fn open(reader: R, demuxer: &str) -> Result<Self, FfmpegError> {
        let demuxer_name = c_name(demuxer)?;

        unsafe {
            let input_format = ffmpeg::ffi::av_find_input_format(demuxer_name.as_ptr());
            if input_format.is_null() {
                return Err(FfmpegError::OpenInput(format!(
                    "Demuxer {} not available",
                    demuxer
                )));
            }

            let reader_ptr = Box::into_raw(Box::new(reader));
            let avio = match alloc_avio(
                reader_ptr as *mut c_void,
                0,
                Some(read_packet::<R>),
                None,
                Some(seek_stream::<R>),
            ) {
                Ok(avio) => avio,
                Err(e) => {
                    drop(Box::from_raw(reader_ptr));
                    return Err(e);
                }
            };

            let mut ctx = ffmpeg::ffi::avformat_alloc_context();
            if ctx.is_null() {
                free_avio(avio);
                drop(Box::from_raw(reader_ptr));
                return Err(FfmpegError::OpenInput(
                    "Failed to allocate input context".to_string(),
                ));
            }
            (*ctx).pb = avio;
            (*ctx).flags |= ffmpeg::ffi::AVFMT_FLAG_CUSTOM_IO as i32;

            // On failure avformat_open_input frees ctx but leaves the custom pb alone.
            let ret = ffmpeg::ffi::avformat_open_input(
                &mut ctx,
                ptr::null_mut(),
                input_format,
                ptr::null_mut(),
            );
            if ret < 0 {
                free_avio(avio);
                drop(Box::from_raw(reader_ptr));
                return Err(FfmpegError::OpenInput(format!(
                    "{} demuxer rejected input: {}",
                    demuxer,
                    ffmpeg::Error::from(ret)
                )));
            }

            let mut source = Self {
                input: ManuallyDrop::new(Input::wrap(ctx)),
                avio,
                reader: reader_ptr,
            };

            let ret = ffmpeg::ffi::avformat_find_stream_info(source.input.as_mut_ptr(), ptr::null_mut());
            if ret < 0 {
                return Err(FfmpegError::OpenInput(format!(
                    "Failed to read stream info: {}",
                    ffmpeg::Error::from(ret)
                )));
            }

            Ok(source)
        }
    }

    pub fn input(&self) -> &Input {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut Input {
        &mut self.input
    }
}

impl<R: Read + Seek> Drop for SourceInput<R> {
    fn drop(&mut self) {
        // SAFETY: pb is detached first so closing the input cannot touch the
        // custom context; the context and reader are freed exactly once here.
        unsafe {
            detach_input_avio(&mut self.input);
            ManuallyDrop::drop(&mut self.input);
            free_avio(self.avio);
            drop(Box::from_raw(self.reader));
        }
    }
}

impl<W: Write + Seek> SinkOutput<W> {
    /// Create a muxer context for the named muxer writing into `writer`.
    pub fn create(writer: W, muxer: &str) -> Result<Self, FfmpegError> {
        let muxer_name = c_name(muxer)?;

        unsafe {
            let writer_ptr = Box::into_raw(Box::new(writer));
            let avio = match alloc_avio(
                writer_ptr as *mut c_void,
                1,
                None,
                Some(write_packet::<W>),
                Some(seek_stream::<W>),
            ) {
                Ok(avio) => avio,
                Err(e) => {
                    drop(Box::from_raw(writer_ptr));
                    return Err(e);
                }
            };

            let mut output_ptr: *mut ffmpeg::ffi::AVFormatContext = ptr::null_mut();
            let ret = ffmpeg::ffi::avformat_alloc_output_context2(
                &mut output_ptr,
                ptr::null_mut(),
                muxer_name.as_ptr(),
                ptr::null_mut(),
            );
            if ret < 0 || output_ptr.is_null() {
                free_avio(avio);
                drop(Box::from_raw(writer_ptr));
                return Err(FfmpegError::MuxerCreate(format!(
                    "Muxer {} not available",
                    muxer
                )));
            }

            (*output_ptr).pb = avio;
            (*output_ptr).flags |= ffmpeg::ffi::AVFMT_FLAG_CUSTOM_IO as i32;

            Ok(Self {
                output: ManuallyDrop::new(Output::wrap(output_ptr)),
                avio,
                writer: writer_ptr,
            })
        }
    }

    pub fn output(&self) -> &Output {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut Output {
        &mut self.output
    }

    /// Push buffered bytes through to the writer.
    pub fn flush(&mut self) -> Result<(), FfmpegError> {
        unsafe {
            ffmpeg::ffi::avio_flush(self.avio);
            (*self.writer)
                .flush()
                .map_err(|e| FfmpegError::WriteTrailer(format!("Flush failed: {}", e)))
        }
    }
}

impl<W: Write + Seek> Drop for SinkOutput<W> {
    fn drop(&mut self) {
        // SAFETY: same ordering as SourceInput: detach, free the format
        // context, then the AVIO context, then the writer it pointed at.
        unsafe {
            detach_avio(&mut self.output);
            ManuallyDrop::drop(&mut self.output);
            free_avio(self.avio);
            drop(Box::from_raw(self.writer));
        }
    }
}
