//! presence-audio: real-time PCM streaming for the presence pipeline
//!
//! Provides:
//! - Base64 float32 chunk decoding
//! - A single-producer / single-consumer stream buffer with silence-fill on underrun
//! - Rolling-window loudness extraction
//! - Device (cpal) and headless render clocks

pub mod error;
pub mod intensity;
pub mod pcm;
pub mod playback;
pub mod renderer;
pub mod stream_buffer;

pub use error::AudioError;
pub use intensity::{intensity_of, rms, IntensityExtractor};
pub use pcm::{decode_pcm, encode_pcm, PcmChunk};
pub use playback::{start_output, DeviceOutput, HeadlessOutput, OutputKind, PlaybackHandle};
pub use renderer::Renderer;
pub use stream_buffer::{stream_buffer, StreamConsumer, StreamProducer, StreamStats};
