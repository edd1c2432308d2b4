//! Message types passed between session stages.

use crate::audio::codec;
use serde::Serialize;

/// A block of captured audio, converted to PCM16 at the agent's input rate
/// and encoded for the wire. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmChunk {
    /// Base64 of little-endian PCM16 samples.
    pub data: String,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of PCM16 samples in `data`.
    pub sample_count: usize,
}

impl PcmChunk {
    /// Encode PCM16 samples into a chunk.
    pub fn from_samples(samples: &[i16], sample_rate: u32) -> Self {
        Self {
            data: codec::encode(&codec::pcm16_to_bytes(samples)),
            sample_rate,
            sample_count: samples.len(),
        }
    }

    /// MIME type announced to the agent.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }
}

/// Who produced a piece of transcript text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    /// The human operator.
    User,
    /// The remote agent.
    Agent,
}

/// Incremental transcript text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptFragment {
    pub speaker: Speaker,
    pub text: String,
}

/// Running transcript with separate accumulators per speaker.
///
/// Fragments are only ever appended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Transcript {
    pub user: String,
    pub agent: String,
}

impl Transcript {
    /// Append a fragment to the matching accumulator.
    pub fn push(&mut self, fragment: &TranscriptFragment) {
        match fragment.speaker {
            Speaker::User => self.user.push_str(&fragment.text),
            Speaker::Agent => self.agent.push_str(&fragment.text),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.agent.is_empty()
    }
}
