//! # Audio Processing Module
//!
//! Audio types and pure transformations used on the way from the generator to the wire.
//!
//! ## Key Components:
//! - **AudioChunk**: One batch of generated float samples
//! - **Frame Batcher**: Groups generation frames into chunk-sized batches
//! - **Framer**: PCM16 serialization and WAV container encoding
//!
//! ## Output Audio Format:
//! - **Sample Rate**: 22.05kHz (22,050 Hz)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers

pub mod batcher;    // Frame-to-chunk batching for generators
pub mod framer;     // PCM16 / WAV encoding

/// One incrementally produced batch of audio.
///
/// ## Ownership:
/// The generator worker owns a chunk until it pushes it into the hand-off channel;
/// after that the consumer owns it. Chunks are moved, never shared.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Float samples, nominally in [-1.0, 1.0]
    pub samples: Vec<f32>,

    /// Samples per second
    pub sample_rate: u32,

    /// Interleaved channel count (the wire format only carries mono)
    pub channels: u16,
}

impl AudioChunk {
    /// Create a mono chunk.
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
        }
    }

    /// Playback length of this chunk in seconds.
    pub fn duration_seconds(&self) -> f64 {
        framer::duration(self.samples.len(), self.sample_rate)
    }
}
