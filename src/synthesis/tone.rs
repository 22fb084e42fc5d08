//! # Tone Generator
//!
//! A small deterministic synthesizer used as the built-in `tone` backend. It renders one
//! frame per input character (a sine tone for letters and digits, silence for anything
//! else) and batches frames into chunks the same way a neural audio writer would, so the
//! whole request pipeline can run without model weights.
//!
//! The same text and config always produce the same samples.

use crate::audio::batcher::FrameBatcher;
use crate::audio::AudioChunk;
use crate::config::AppConfig;
use crate::synthesis::generator::{AudioSink, GeneratorLoader, SpeechGenerator, SynthesisRequest};
use std::f32::consts::TAU;
use std::sync::Arc;
use tracing::{debug, info};

/// Samples faded in and out at the edges of every voiced frame.
const EDGE_FADE_SAMPLES: usize = 32;

/// Lowest speed accepted; slower requests are clamped to it.
const MIN_SPEED: f32 = 0.25;

pub struct ToneGenerator {
    sample_rate: u32,
    /// Samples per frame at speed 1.0
    frame_samples: usize,
}

impl ToneGenerator {
    pub fn new(sample_rate: u32, frame_duration_ms: u32) -> Self {
        let frame_samples = (sample_rate as usize * frame_duration_ms as usize / 1000).max(1);
        Self {
            sample_rate,
            frame_samples,
        }
    }

    /// Frame length after applying the requested speed.
    fn frame_len(&self, speed: f32) -> usize {
        let speed = if speed.is_finite() { speed.max(MIN_SPEED) } else { 1.0 };
        ((self.frame_samples as f32 / speed).round() as usize).max(1)
    }

    fn amplitude(emotion: &str) -> f32 {
        match emotion {
            "excited" | "happy" | "angry" => 0.45,
            "sad" | "calm" => 0.2,
            _ => 0.3,
        }
    }

    /// Pitch for one character. Only alphanumerics are voiced.
    fn pitch(c: char) -> Option<f32> {
        if c.is_alphanumeric() {
            let step = (c.to_lowercase().next().unwrap_or(c) as u32 % 24) as f32;
            Some(110.0 * 2f32.powf(step / 12.0))
        } else {
            None
        }
    }

    /// Render one frame, continuing the oscillator from `phase`.
    fn render_frame(&self, c: char, len: usize, amplitude: f32, phase: &mut f32) -> Vec<f32> {
        let Some(freq) = Self::pitch(c) else {
            return vec![0.0; len];
        };

        let step = TAU * freq / self.sample_rate as f32;
        let fade = EDGE_FADE_SAMPLES.min(len / 2).max(1);

        (0..len)
            .map(|i| {
                let edge = i.min(len - 1 - i);
                let envelope = if edge < fade { edge as f32 / fade as f32 } else { 1.0 };
                let sample = amplitude * envelope * phase.sin();
                *phase = (*phase + step) % TAU;
                sample
            })
            .collect()
    }
}

impl SpeechGenerator for ToneGenerator {
    fn name(&self) -> &str {
        "tone"
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn generate(&self, request: &SynthesisRequest, sink: &mut dyn AudioSink) -> anyhow::Result<()> {
        let config = &request.config;
        let frame_len = self.frame_len(config.speed);
        let amplitude = Self::amplitude(&config.emotion);
        let mut batcher = FrameBatcher::new(config.chunk_size as usize);
        let mut phase = 0.0f32;

        // One frame per character stands in for one generated token
        for c in request.text.chars().take(config.max_tokens as usize) {
            let frame = self.render_frame(c, frame_len, amplitude, &mut phase);
            if let Some(samples) = batcher.push_frame(frame) {
                sink.push(AudioChunk::mono(samples, self.sample_rate))?;
            }
        }

        if let Some(samples) = batcher.finish() {
            sink.push(AudioChunk::mono(samples, self.sample_rate))?;
        }

        debug!(
            "Tone generator rendered {} frames of {} samples",
            batcher.frames_seen(),
            frame_len
        );
        Ok(())
    }
}

/// Loader for the `tone` backend.
pub struct ToneLoader {
    sample_rate: u32,
    frame_duration_ms: u32,
}

impl ToneLoader {
    pub fn new(sample_rate: u32, frame_duration_ms: u32) -> Self {
        Self {
            sample_rate,
            frame_duration_ms,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.audio.sample_rate, config.generator.frame_duration_ms)
    }
}

impl GeneratorLoader for ToneLoader {
    fn load(&self) -> anyhow::Result<Arc<dyn SpeechGenerator>> {
        if self.sample_rate == 0 {
            return Err(anyhow::anyhow!("Tone generator needs a non-zero sample rate"));
        }

        info!(
            "Loading tone generator ({} Hz, {}ms frames)",
            self.sample_rate, self.frame_duration_ms
        );
        Ok(Arc::new(ToneGenerator::new(self.sample_rate, self.frame_duration_ms)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationConfig;

    fn request(text: &str, config: GenerationConfig) -> SynthesisRequest {
        SynthesisRequest {
            text: text.to_string(),
            config,
            reference_audio: None,
        }
    }

    #[test]
    fn test_one_frame_per_character_batched_by_chunk_size() {
        let generator = ToneGenerator::new(22050, 40);
        let mut config = GenerationConfig::default();
        config.chunk_size = 2;

        let mut chunks: Vec<AudioChunk> = Vec::new();
        generator.generate(&request("Hola!", config), &mut chunks).unwrap();

        // 5 frames in chunks of 2 → 2 + 2 + 1
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].samples.len(), 2 * 882);
        assert_eq!(chunks[2].samples.len(), 882);
        assert!(chunks.iter().all(|c| c.sample_rate == 22050 && c.channels == 1));
        // '!' is silent
        assert!(chunks[2].samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_output_is_deterministic_and_in_range() {
        let generator = ToneGenerator::new(22050, 40);
        let mut first: Vec<AudioChunk> = Vec::new();
        let mut second: Vec<AudioChunk> = Vec::new();
        generator.generate(&request("Buenos días", GenerationConfig::default()), &mut first).unwrap();
        generator.generate(&request("Buenos días", GenerationConfig::default()), &mut second).unwrap();

        assert_eq!(first, second);
        assert!(first
            .iter()
            .flat_map(|c| c.samples.iter())
            .all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn test_speed_and_max_tokens() {
        let generator = ToneGenerator::new(22050, 40);
        let mut config = GenerationConfig::default();
        config.speed = 2.0;
        config.max_tokens = 3;

        let mut chunks: Vec<AudioChunk> = Vec::new();
        generator.generate(&request("abcdefgh", config), &mut chunks).unwrap();

        let total: usize = chunks.iter().map(|c| c.samples.len()).sum();
        assert_eq!(total, 3 * 441);
    }

    #[test]
    fn test_loader_rejects_zero_sample_rate() {
        assert!(ToneLoader::new(0, 40).load().is_err());
        assert_eq!(ToneLoader::new(22050, 40).load().unwrap().name(), "tone");
    }
}
