//! # TTS Engine
//!
//! The shared generation service. One engine is constructed at startup and handed to
//! every connection; it owns the generator and makes sure the generator is loaded at
//! most once per process, however many connections ask for it at the same time.
//!
//! ## Lifecycle:
//! 1. **Uninitialized**: Created with a loader, nothing loaded yet
//! 2. **Initialized**: First successful `ensure_initialized` loaded the generator
//! 3. **Shut down**: `shutdown` called; new requests are refused
//!
//! Once initialized, the engine never reports itself as uninitialized again.

use crate::error::{ServiceError, ServiceResult};
use crate::synthesis::generator::{GeneratorLoader, SpeechGenerator};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{error, info};

pub struct TtsEngine {
    loader: Arc<dyn GeneratorLoader>,

    /// Set exactly once; concurrent callers wait on the same initialization
    generator: OnceCell<Arc<dyn SpeechGenerator>>,

    shutting_down: AtomicBool,
}

impl TtsEngine {
    pub fn new(loader: Arc<dyn GeneratorLoader>) -> Self {
        Self {
            loader,
            generator: OnceCell::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Whether the generator has been loaded.
    pub fn is_initialized(&self) -> bool {
        self.generator.initialized()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Name of the loaded backend, if any.
    pub fn backend_name(&self) -> Option<String> {
        self.generator.get().map(|generator| generator.name().to_string())
    }

    /// Return the generator, loading it first if this is the first request.
    ///
    /// ## Concurrency:
    /// Only one caller runs the loader; everyone else awaits its result. A failed load
    /// leaves the engine uninitialized so a later request can try again. The loader is
    /// blocking, so it runs on the blocking pool rather than on the connection loop.
    pub async fn ensure_initialized(&self) -> ServiceResult<Arc<dyn SpeechGenerator>> {
        if self.is_shutting_down() {
            return Err(ServiceError::ShuttingDown);
        }

        let generator = self
            .generator
            .get_or_try_init(|| async {
                info!("Initializing TTS models...");
                let start = Instant::now();
                let loader = self.loader.clone();

                let loaded = tokio::task::spawn_blocking(move || loader.load())
                    .await
                    .map_err(|err| ServiceError::Initialization(err.to_string()))?
                    .map_err(|err| {
                        error!("TTS model initialization failed: {:#}", err);
                        ServiceError::Initialization(format!("{:#}", err))
                    })?;

                info!(
                    "TTS models initialized ({}) in {:.2}s",
                    loaded.name(),
                    start.elapsed().as_secs_f64()
                );
                Ok::<_, ServiceError>(loaded)
            })
            .await?;

        Ok(generator.clone())
    }

    /// Stop accepting new requests. Requests already generating run to completion.
    pub fn shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::SeqCst) {
            info!("TTS engine shutting down");
        }
    }
}
