//! # Speech Generator Interface
//!
//! The neural model that turns text into audio lives behind two small traits:
//! - [`GeneratorLoader`]: pays the (expensive, blocking) initialization cost once
//! - [`SpeechGenerator`]: runs one blocking generation, pushing chunks into a sink
//!
//! The server never looks inside a generator. It only relies on the contract below.
//!
//! ## Generation Contract:
//! 1. `generate` is called on a dedicated blocking worker, never on the connection loop
//! 2. It calls `sink.push(chunk)` zero or more times, in playback order
//! 3. It returns `Ok(())` when done, or `Err` with a human-readable reason
//! 4. When `push` returns an error the consumer is gone; the generator should stop

use crate::audio::AudioChunk;
use crate::config::GenerationConfig;
use std::fmt;
use std::sync::Arc;

/// Everything a generator needs for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    pub config: GenerationConfig,
    /// Decoded reference recording, for generators that support voice cloning
    pub reference_audio: Option<Vec<u8>>,
}

/// Why a sink refused a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    /// The request was cancelled (timeout, error, or client disconnect)
    Cancelled,

    /// The consumer dropped its end of the channel
    Closed,
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Cancelled => write!(f, "generation cancelled"),
            SinkError::Closed => write!(f, "chunk consumer closed"),
        }
    }
}

impl std::error::Error for SinkError {}

/// Destination for generated chunks.
pub trait AudioSink {
    /// Hand one chunk to the consumer. Blocks while the consumer is behind.
    fn push(&mut self, chunk: AudioChunk) -> Result<(), SinkError>;
}

/// Collecting sink, handy for offline use and tests.
impl AudioSink for Vec<AudioChunk> {
    fn push(&mut self, chunk: AudioChunk) -> Result<(), SinkError> {
        Vec::push(self, chunk);
        Ok(())
    }
}

/// A loaded text-to-speech model.
///
/// ## Thread Safety:
/// One generator instance is shared by every connection (`Arc<dyn SpeechGenerator>`)
/// and `generate` may run on several workers at once, hence `Send + Sync`.
pub trait SpeechGenerator: Send + Sync {
    /// Short backend name for logs and health output
    fn name(&self) -> &str;

    /// Output sample rate of this generator
    fn sample_rate(&self) -> u32;

    /// Run one generation to completion. Blocking.
    fn generate(&self, request: &SynthesisRequest, sink: &mut dyn AudioSink) -> anyhow::Result<()>;
}

/// Builds the generator the first time it is needed. Blocking.
pub trait GeneratorLoader: Send + Sync {
    fn load(&self) -> anyhow::Result<Arc<dyn SpeechGenerator>>;
}
