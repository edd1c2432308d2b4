//! PCM conversion and transport encoding.
//!
//! Capture side: native-rate float samples are mapped to 16-bit PCM at the
//! agent's input rate with nearest-neighbour index mapping. There is no
//! anti-alias filter; speech survives the mild aliasing fine.
//!
//! Playback side: little-endian PCM16 bytes are expanded back to floats.

use crate::error::{Result, SessionError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Resample `samples` from `source_rate` to `target_rate` and quantize to PCM16.
///
/// Output length is `round(len / (source_rate / target_rate))`; output index
/// `i` reads source index `floor(i * source_rate / target_rate)`.
pub fn resample_to_pcm16(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<i16> {
    if samples.is_empty() || source_rate == 0 || target_rate == 0 {
        return Vec::new();
    }

    let ratio = f64::from(source_rate) / f64::from(target_rate);
    let out_len = (samples.len() as f64 / ratio).round() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let idx = ((i as f64 * ratio).floor() as usize).min(last);
            quantize(samples[idx])
        })
        .collect()
}

/// Clamp to `[-1, 1]` and scale to the signed 16-bit range.
///
/// The float-to-int cast saturates, so `1.0` lands on `i16::MAX`.
fn quantize(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32768.0) as i16
}

/// Expand PCM16 samples to floats (`sample / 32768`).
pub fn pcm16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| f32::from(s) / 32768.0).collect()
}

/// Serialize PCM16 samples as little-endian bytes.
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Parse little-endian PCM16 bytes.
///
/// # Errors
///
/// Returns [`SessionError::Decode`] if the byte count is odd.
pub fn bytes_to_pcm16(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(SessionError::Decode(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Encode bytes as standard base64.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard base64 text.
///
/// # Errors
///
/// Returns [`SessionError::Decode`] on malformed input.
pub fn decode(text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text)
        .map_err(|e| SessionError::Decode(format!("invalid base64 payload: {e}")))
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
pub fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    let ch = usize::from(channels);
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Regroups arbitrarily sized device callbacks into fixed-size blocks.
#[derive(Debug)]
pub struct BlockAccumulator {
    block_size: usize,
    pending: Vec<f32>,
}

impl BlockAccumulator {
    /// Create an accumulator emitting blocks of `block_size` frames.
    pub fn new(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            pending: Vec::with_capacity(block_size),
        }
    }

    /// Append samples, calling `emit` once per completed block.
    ///
    /// Leftover samples are held for the next call.
    pub fn push(&mut self, mut samples: &[f32], mut emit: impl FnMut(&[f32])) {
        while !samples.is_empty() {
            let room = self.block_size - self.pending.len();
            let take = room.min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.pending.len() == self.block_size {
                emit(self.pending.as_slice());
                self.pending.clear();
            }
        }
    }

    /// Number of samples waiting for the next block.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
