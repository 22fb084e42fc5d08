//! # Speech Synthesis Module
//!
//! Everything between "here is some text" and "here are audio chunks".
//!
//! ## Key Components:
//! - **Generator**: The traits a speech model implements to plug into the server
//! - **Engine**: Shared, lazily initialized owner of the loaded generator
//! - **Tone**: Built-in deterministic backend used when no neural model is configured

pub mod engine;      // Shared generator service with one-time initialization
pub mod generator;   // SpeechGenerator / GeneratorLoader traits
pub mod tone;        // Built-in tone backend

#[cfg(test)]
pub(crate) mod testing;

use crate::config::AppConfig;
use generator::GeneratorLoader;
use std::sync::Arc;

/// Pick the loader for the configured backend.
pub fn loader_from_config(config: &AppConfig) -> anyhow::Result<Arc<dyn GeneratorLoader>> {
    match config.generator.backend.as_str() {
        "tone" => Ok(Arc::new(tone::ToneLoader::from_config(config))),
        other => Err(anyhow::anyhow!("Unknown generator backend: {}", other)),
    }
}
