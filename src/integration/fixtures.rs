//! Test fixtures for integration tests
//!
//! Audio inputs are synthesised in memory so the tests need no binary assets.

use std::f64::consts::PI;

/// Multipart boundary used by [`multipart_body`]
pub const BOUNDARY: &str = "----transcoder-test-boundary";

/// One part of a multipart/form-data body
#[derive(Debug, Clone, Copy)]
pub enum Part<'a> {
    /// Text field: name, value
    Text(&'a str, &'a str),
    /// File field: name, file name, contents
    File(&'a str, &'a str, &'a [u8]),
}

/// Canonical PCM WAV holding a 440 Hz sine on every channel.
pub fn sine_wav(rate: u32, channels: u16, bits: u16, frames: usize) -> Vec<u8> {
    let block_align = channels as usize * (bits as usize / 8);
    let data_len = frames * block_align;

    let mut out = Vec::with_capacity(44 + data_len);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&((36 + data_len) as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&rate.to_le_bytes());
    out.extend_from_slice(&(rate * block_align as u32).to_le_bytes());
    out.extend_from_slice(&(block_align as u16).to_le_bytes());
    out.extend_from_slice(&bits.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data_len as u32).to_le_bytes());

    for i in 0..frames {
        let value = (2.0 * PI * 440.0 * i as f64 / rate as f64).sin() * 0.5;
        for _ in 0..channels {
            match bits {
                8 => out.push(((value * 127.0) + 128.0) as u8),
                16 => out.extend_from_slice(&((value * i16::MAX as f64) as i16).to_le_bytes()),
                24 => {
                    let sample = (value * 8_388_607.0) as i32;
                    out.extend_from_slice(&sample.to_le_bytes()[..3]);
                }
                _ => out.extend_from_slice(&((value * i32::MAX as f64) as i32).to_le_bytes()),
            }
        }
    }
    out
}

/// Fields of a WAV header relevant to the tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavInfo {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits: u16,
    /// Samples per channel in the data chunk
    pub frames: usize,
}

/// Walk the RIFF chunks of a WAV file. `None` if it is not a PCM WAV.
pub fn parse_wav(bytes: &[u8]) -> Option<WavInfo> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return None;
    }

    let mut pos = 12;
    let mut format: Option<(u16, u32, u16)> = None;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let len = u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().ok()?) as usize;
        let body = pos + 8;

        if id == b"fmt " {
            let channels = u16::from_le_bytes(bytes[body + 2..body + 4].try_into().ok()?);
            let rate = u32::from_le_bytes(bytes[body + 4..body + 8].try_into().ok()?);
            let bits = u16::from_le_bytes(bytes[body + 14..body + 16].try_into().ok()?);
            format = Some((channels, rate, bits));
        } else if id == b"data" {
            let (channels, sample_rate, bits) = format?;
            let block_align = channels as usize * (bits as usize / 8);
            let available = len.min(bytes.len() - body);
            return Some(WavInfo {
                channels,
                sample_rate,
                bits,
                frames: available / block_align.max(1),
            });
        }
        // Chunks are padded to even sizes.
        pos = body + len + (len & 1);
    }
    None
}

/// Encode `parts` as multipart/form-data; returns the content type and body.
pub fn multipart_body(parts: &[Part]) -> (String, Vec<u8>) {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, file_name, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        name, file_name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
                body.extend_from_slice(data);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    (format!("multipart/form-data; boundary={}", BOUNDARY), body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sine_wav_header() {
        let wav = sine_wav(44100, 2, 16, 1000);
        assert_eq!(wav.len(), 44 + 4000);
        let info = parse_wav(&wav).unwrap();
        assert_eq!(
            info,
            WavInfo {
                channels: 2,
                sample_rate: 44100,
                bits: 16,
                frames: 1000
            }
        );
    }

    #[test]
    fn test_sine_wav_24_bit() {
        let wav = sine_wav(8000, 1, 24, 10);
        assert_eq!(wav.len(), 44 + 30);
        assert_eq!(parse_wav(&wav).unwrap().bits, 24);
    }

    #[test]
    fn test_parse_wav_rejects_garbage() {
        assert!(parse_wav(b"not a wav file at all").is_none());
    }

    #[test]
    fn test_multipart_body_layout() {
        let (content_type, body) =
            multipart_body(&[Part::Text("format", "wav"), Part::File("form-file", "a.wav", b"xy")]);
        assert!(content_type.ends_with(BOUNDARY));
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("name=\"format\"\r\n\r\nwav\r\n"));
        assert!(text.contains("filename=\"a.wav\""));
        assert!(text.ends_with(&format!("--{}--\r\n", BOUNDARY)));
    }
}
