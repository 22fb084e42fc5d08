//! Scripted generators for unit tests.

use crate::audio::AudioChunk;
use crate::synthesis::generator::{
    AudioSink, GeneratorLoader, SinkError, SpeechGenerator, SynthesisRequest,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One step of a scripted generation.
#[derive(Debug, Clone)]
pub enum Step {
    /// Push a chunk with these samples
    Chunk(Vec<f32>),
    /// Block the worker
    Sleep(Duration),
    /// Return an error
    Fail(String),
    /// Panic inside the worker
    Panic,
}

/// Plays back the same script for every request.
pub struct ScriptedGenerator {
    script: Vec<Step>,
    sample_rate: u32,
    pub calls: AtomicUsize,
    /// Set when the sink refused a chunk
    pub saw_sink_error: AtomicBool,
}

impl ScriptedGenerator {
    pub fn new(script: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script,
            sample_rate: 22050,
            calls: AtomicUsize::new(0),
            saw_sink_error: AtomicBool::new(false),
        })
    }

    /// `count` chunks of `len` samples, chunk `i` filled with `i / 100`.
    pub fn chunks(count: usize, len: usize) -> Arc<Self> {
        Self::new(
            (0..count)
                .map(|i| Step::Chunk(vec![i as f32 / 100.0; len]))
                .collect(),
        )
    }
}

impl SpeechGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn generate(&self, _request: &SynthesisRequest, sink: &mut dyn AudioSink) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for step in &self.script {
            match step {
                Step::Chunk(samples) => {
                    let pushed: Result<(), SinkError> =
                        sink.push(AudioChunk::mono(samples.clone(), self.sample_rate));
                    if let Err(err) = pushed {
                        self.saw_sink_error.store(true, Ordering::SeqCst);
                        return Err(err.into());
                    }
                }
                Step::Sleep(duration) => std::thread::sleep(*duration),
                Step::Fail(message) => return Err(anyhow::anyhow!("{}", message)),
                Step::Panic => panic!("scripted generator panic"),
            }
        }
        Ok(())
    }
}

/// Hands out an already built generator.
pub struct StaticLoader(pub Arc<dyn SpeechGenerator>);

impl GeneratorLoader for StaticLoader {
    fn load(&self) -> anyhow::Result<Arc<dyn SpeechGenerator>> {
        Ok(self.0.clone())
    }
}
