// PCM16 <-> f32 conversion and the base64 transport encoding
//
// The live transport carries linear PCM16, little-endian, base64-encoded
// inside JSON messages. These are pure functions; all state lives in the
// capture and playback layers.

use base64::Engine;

use crate::error::DecodeError;

/// One decoded unit of playback audio, de-interleaved per channel.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// One sample vector per channel, equal lengths.
    pub channels: Vec<Vec<f32>>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioChunk {
    /// Number of sample frames (per-channel length).
    pub fn frames(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn channel_count(&self) -> u16 {
        self.channels.len() as u16
    }

    /// Playback duration in seconds.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Convert normalized f32 samples to little-endian PCM16 bytes.
///
/// Samples are scaled by 32768 and truncated into i16 range, so inputs
/// slightly outside [-1, 1] clamp instead of wrapping.
pub fn samples_to_transport_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let scaled = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        bytes.extend_from_slice(&scaled.to_le_bytes());
    }
    bytes
}

/// Reinterpret little-endian PCM16 bytes as normalized samples,
/// de-interleaved by channel.
pub fn transport_bytes_to_samples(
    bytes: &[u8],
    sample_rate: u32,
    channel_count: u16,
) -> Result<AudioChunk, DecodeError> {
    let stride = 2 * channel_count as usize;
    if stride == 0 || bytes.len() % stride != 0 {
        return Err(DecodeError::Misaligned {
            len: bytes.len(),
            stride,
            channels: channel_count,
        });
    }

    let frames = bytes.len() / stride;
    let mut channels = vec![Vec::with_capacity(frames); channel_count as usize];

    for frame in bytes.chunks_exact(stride) {
        for (ch, sample_bytes) in frame.chunks_exact(2).enumerate() {
            let sample = i16::from_le_bytes([sample_bytes[0], sample_bytes[1]]);
            channels[ch].push(sample as f32 / 32768.0);
        }
    }

    Ok(AudioChunk {
        channels,
        sample_rate,
    })
}

/// Base64-encode PCM bytes for the JSON transport.
pub fn encode_for_transport(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode base64 transport text back to PCM bytes.
pub fn decode_from_transport(text: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(text)?)
}
