//! PCM chunks and their base64 wire encoding

use crate::error::AudioError;
use base64::{engine::general_purpose, Engine as _};

const BYTES_PER_SAMPLE: usize = std::mem::size_of::<f32>();

/// A block of mono f32 samples belonging to one synthesized stream.
///
/// Immutable once built; the stream buffer owns it from push until it has
/// been fully rendered or discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmChunk {
    stream_id: String,
    seq: f64,
    samples: Vec<f32>,
}

impl PcmChunk {
    pub fn new(stream_id: impl Into<String>, seq: f64, samples: Vec<f32>) -> Self {
        Self {
            stream_id: stream_id.into(),
            seq,
            samples,
        }
    }

    /// Decode a base64 payload into a chunk
    pub fn from_base64(stream_id: impl Into<String>, seq: f64, pcm: &str) -> Result<Self, AudioError> {
        Ok(Self::new(stream_id, seq, decode_pcm(pcm)?))
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Sender timestamp / sequence value
    pub fn seq(&self) -> f64 {
        self.seq
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Decode base64 of little-endian IEEE-754 f32 samples.
///
/// The decoded byte length must be a multiple of 4; anything else is
/// rejected rather than truncated.
pub fn decode_pcm(pcm: &str) -> Result<Vec<f32>, AudioError> {
    let bytes = general_purpose::STANDARD
        .decode(pcm.trim())
        .map_err(|e| AudioError::MalformedChunk(format!("invalid base64: {}", e)))?;

    if bytes.len() % BYTES_PER_SAMPLE != 0 {
        return Err(AudioError::MalformedChunk(format!(
            "decoded length {} bytes is not a multiple of {}",
            bytes.len(),
            BYTES_PER_SAMPLE
        )));
    }

    Ok(bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Encode samples as base64 of little-endian f32
pub fn encode_pcm(samples: &[f32]) -> String {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    general_purpose::STANDARD.encode(bytes)
}
