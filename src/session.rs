//! # TTS Session
//!
//! Per-connection request processing. One session owns one connection's inbound queue and
//! handles its messages strictly one after another, so chunks of one request can never
//! interleave with another request's output on the same connection.
//!
//! ## Request Lifecycle:
//! ```text
//! Idle -> Received -> Generating -> Responding -> Idle      (tts_request)
//!                               \-> Streaming  -> Idle      (tts_stream_request)
//! any non-terminal state -> ErrorReported -> Idle
//! ```
//!
//! ## Error Handling:
//! Every failure that is the client's or the generator's fault becomes one error envelope
//! and the connection stays usable. Only a [`TransportError`] (the peer is gone) ends the
//! session loop.

use crate::audio::{framer, AudioChunk};
use crate::bridge::{BridgeEvent, GenerationTask, WorkerExit};
use crate::config::{AppConfig, GenerationConfig, SUPPORTED_EMOTIONS, SUPPORTED_LANGUAGES};
use crate::error::{ProtocolError, ServiceError, TransportError, ValidationError};
use crate::protocol::{self, ChunkMetadata, Envelope, ResponseMetadata, TtsRequestData};
use crate::state::ServiceMetrics;
use crate::synthesis::engine::TtsEngine;
use crate::synthesis::generator::SynthesisRequest;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Where a session is in its current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the next message
    Idle,
    /// A request was decoded and is being validated
    Received,
    /// The generation task is running, nothing sent yet
    Generating,
    /// Full request: all chunks collected, sending the WAV response
    Responding,
    /// Streaming request: at least the stream has been opened
    Streaming,
    /// An error envelope is being sent
    ErrorReported,
}

impl SessionState {
    /// The transition table.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, next),
            (Idle, Received)
                | (Received, Generating)
                | (Generating, Responding)
                | (Generating, Streaming)
                | (Responding, Idle)
                | (Streaming, Idle)
                | (ErrorReported, Idle)
                | (Idle | Received | Generating | Responding | Streaming, ErrorReported)
        )
    }
}

/// Per-connection tuning taken from the application config.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Longest wait for the next chunk from the worker
    pub chunk_timeout: Duration,
    /// Bound of the worker-to-session channel
    pub channel_capacity: usize,
    /// Defaults for fields a request leaves out
    pub defaults: GenerationConfig,
    /// Sample rate reported when a generator produced no chunk to read it from
    pub sample_rate: u32,
}

impl SessionOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            chunk_timeout: config.streaming.chunk_timeout(),
            channel_capacity: config.streaming.channel_capacity,
            defaults: config.generation.clone(),
            sample_rate: config.audio.sample_rate,
        }
    }
}

/// How one generation ended, from the session's point of view.
enum Outcome {
    Delivered,
    Failed(ServiceError),
    Disconnected(TransportError),
}

pub struct TtsSession {
    id: Uuid,
    engine: Arc<TtsEngine>,
    options: SessionOptions,
    metrics: Arc<ServiceMetrics>,
    state: SessionState,
    requests_handled: u64,
}

impl TtsSession {
    pub fn new(engine: Arc<TtsEngine>, options: SessionOptions, metrics: Arc<ServiceMetrics>) -> Self {
        Self {
            id: Uuid::new_v4(),
            engine,
            options,
            metrics,
            state: SessionState::Idle,
            requests_handled: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Process inbound messages until the connection closes.
    ///
    /// `inbound` closes when the peer disconnects; a failed send on `outbound` means the
    /// same thing and ends the loop early.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<String>,
        outbound: mpsc::Sender<Envelope>,
    ) {
        info!("Session {} started", self.id);

        while let Some(raw) = inbound.recv().await {
            if let Err(err) = self.handle_message(&raw, &outbound).await {
                warn!("Session {} lost its connection: {}", self.id, err);
                break;
            }
        }

        info!(
            "Session {} ended after {} requests",
            self.id, self.requests_handled
        );
    }

    /// Handle one inbound text frame, sending every resulting envelope to `out`.
    pub async fn handle_message(
        &mut self,
        raw: &str,
        out: &mpsc::Sender<Envelope>,
    ) -> Result<(), TransportError> {
        let envelope = match protocol::decode(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("Session {} received an undecodable message: {}", self.id, err);
                return self.report(out, err.into()).await;
            }
        };

        debug!("Session {} received {}", self.id, envelope.kind());

        match envelope {
            Envelope::Ping(_) => self.send(out, Envelope::pong(self.engine.is_initialized())).await,
            Envelope::TtsRequest(data) => self.handle_request(data, false, out).await,
            Envelope::TtsStreamRequest(data) => self.handle_request(data, true, out).await,
            other => {
                let err = ProtocolError::UnknownType(other.kind().to_string());
                warn!("Session {} received server-only message {}", self.id, other.kind());
                self.report(out, err.into()).await
            }
        }
    }

    async fn handle_request(
        &mut self,
        data: TtsRequestData,
        streaming: bool,
        out: &mpsc::Sender<Envelope>,
    ) -> Result<(), TransportError> {
        self.requests_handled += 1;
        self.metrics.request_received(streaming);
        self.transition(SessionState::Received);

        let request = match self.validate(data) {
            Ok(request) => request,
            Err(err) => return self.report(out, err.into()).await,
        };

        info!(
            "Session {} {} request: {} chars, language={}, emotion={}",
            self.id,
            if streaming { "streaming" } else { "full" },
            request.text.chars().count(),
            request.config.language,
            request.config.emotion
        );

        self.transition(SessionState::Generating);
        let generator = match self.engine.ensure_initialized().await {
            Ok(generator) => generator,
            Err(err) => return self.report(out, err).await,
        };

        let config = request.config.clone();
        let fallback_rate = match generator.sample_rate() {
            0 => self.options.sample_rate,
            rate => rate,
        };
        let mut task = GenerationTask::start(generator, request, self.options.channel_capacity);

        let outcome = if streaming {
            self.stream_chunks(&mut task, out).await
        } else {
            self.respond_full(&mut task, &config, fallback_rate, out).await
        };

        let result = match outcome {
            Outcome::Delivered => {
                self.transition(SessionState::Idle);
                Ok(())
            }
            Outcome::Failed(err) => {
                task.cancel();
                self.report(out, err).await
            }
            Outcome::Disconnected(err) => {
                task.cancel();
                Err(err)
            }
        };

        // The error, if any, is already on its way; now wait for the worker
        if let WorkerExit::Panicked(reason) = task.finish().await {
            error!("Session {} generation worker panicked: {}", self.id, reason);
        }

        result
    }

    /// Check the payload and complete its config.
    fn validate(&self, data: TtsRequestData) -> Result<SynthesisRequest, ValidationError> {
        let text = match data.text {
            Some(text) if !text.is_empty() => text,
            _ => return Err(ValidationError::MissingText),
        };

        let config = data
            .config
            .unwrap_or_default()
            .fill_defaults(&self.options.defaults);

        if !SUPPORTED_LANGUAGES.contains(&config.language.as_str()) {
            warn!("Unsupported language '{}', passing it through", config.language);
        }
        if !SUPPORTED_EMOTIONS.contains(&config.emotion.as_str()) {
            warn!("Unsupported emotion '{}', passing it through", config.emotion);
        }

        let reference_audio = match data.reference_audio.as_deref() {
            None | Some("") => None,
            Some(encoded) => Some(
                STANDARD
                    .decode(encoded)
                    .map_err(|err| ValidationError::InvalidReferenceAudio(err.to_string()))?,
            ),
        };

        Ok(SynthesisRequest {
            text,
            config,
            reference_audio,
        })
    }

    /// Collect every chunk, then send one WAV response.
    async fn respond_full(
        &mut self,
        task: &mut GenerationTask,
        config: &GenerationConfig,
        fallback_rate: u32,
        out: &mpsc::Sender<Envelope>,
    ) -> Outcome {
        let mut batches: Vec<Vec<f32>> = Vec::new();
        let mut sample_rate = None;

        loop {
            // Nothing is sent until the end, so watch the connection while waiting
            let next = tokio::select! {
                next = self.next_chunk(task) => next,
                _ = out.closed() => {
                    return Outcome::Disconnected(TransportError("connection closed".to_string()));
                }
            };

            match next {
                Ok(Some(chunk)) => {
                    sample_rate.get_or_insert(chunk.sample_rate);
                    batches.push(chunk.samples);
                }
                Ok(None) => break,
                Err(err) => return Outcome::Failed(err),
            }
        }

        let sample_count: usize = batches.iter().map(Vec::len).sum();
        if sample_count == 0 {
            return Outcome::Failed(ServiceError::Generation("No audio generated".to_string()));
        }

        self.transition(SessionState::Responding);
        let sample_rate = sample_rate.unwrap_or(fallback_rate);
        let wav = match framer::to_container(&batches, sample_rate) {
            Ok(wav) => wav,
            Err(err) => return Outcome::Failed(ServiceError::from(err)),
        };

        let duration = framer::duration(sample_count, sample_rate);
        let metadata = ResponseMetadata {
            duration,
            sample_rate,
            channels: 1,
            language: config.language.clone(),
            emotion: config.emotion.clone(),
            speed: config.speed,
        };

        if let Err(err) = self.send(out, Envelope::success(STANDARD.encode(&wav), metadata)).await {
            return Outcome::Disconnected(err);
        }

        info!(
            "Session {} sent {:.2}s of audio ({} chunks) in {:.2}s",
            self.id,
            duration,
            task.chunks_received(),
            task.elapsed().as_secs_f64()
        );
        self.metrics.request_completed(duration);
        Outcome::Delivered
    }

    /// Forward each chunk as soon as it arrives.
    async fn stream_chunks(
        &mut self,
        task: &mut GenerationTask,
        out: &mpsc::Sender<Envelope>,
    ) -> Outcome {
        let mut streamed_seconds = 0.0;

        loop {
            let chunk = match self.next_chunk(task).await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(err) => return Outcome::Failed(err),
            };

            if self.state == SessionState::Generating {
                self.transition(SessionState::Streaming);
            }

            let pcm = framer::to_pcm16(&chunk.samples);
            let metadata = ChunkMetadata {
                chunk_size: pcm.len(),
                duration: chunk.duration_seconds(),
                sample_rate: chunk.sample_rate,
                channels: chunk.channels,
            };
            streamed_seconds += metadata.duration;

            if let Err(err) = self.send(out, Envelope::stream_chunk(STANDARD.encode(&pcm), metadata)).await {
                return Outcome::Disconnected(err);
            }
            self.metrics.chunk_sent();
        }

        // A generation that produced nothing still opens and closes the stream
        if self.state == SessionState::Generating {
            self.transition(SessionState::Streaming);
        }

        if let Err(err) = self.send(out, Envelope::stream_complete()).await {
            return Outcome::Disconnected(err);
        }

        info!(
            "Session {} streamed {:.2}s of audio in {} chunks",
            self.id,
            streamed_seconds,
            task.chunks_received()
        );
        self.metrics.request_completed(streamed_seconds);
        Outcome::Delivered
    }

    /// Next chunk from the worker, `None` once it is done.
    async fn next_chunk(&self, task: &mut GenerationTask) -> Result<Option<AudioChunk>, ServiceError> {
        match task.next_event(self.options.chunk_timeout).await? {
            BridgeEvent::Chunk(chunk) if chunk.channels != 1 => Err(ServiceError::Generation(
                format!("expected mono audio, got {} channels", chunk.channels),
            )),
            BridgeEvent::Chunk(chunk) => Ok(Some(chunk)),
            BridgeEvent::Done => Ok(None),
            BridgeEvent::Error(reason) => Err(ServiceError::Generation(reason)),
        }
    }

    /// Send one error envelope and return to `Idle`.
    async fn report(
        &mut self,
        out: &mpsc::Sender<Envelope>,
        err: ServiceError,
    ) -> Result<(), TransportError> {
        match err {
            ServiceError::WorkerLost | ServiceError::Internal(_) => {
                error!("Session {} request failed: {}", self.id, err)
            }
            _ => warn!("Session {} request failed: {}", self.id, err),
        }

        // Decode failures arrive while idle and are not requests
        let during_request = self.state != SessionState::Idle;
        self.metrics.error_reported(err.kind(), during_request);
        self.transition(SessionState::ErrorReported);
        let sent = self.send(out, Envelope::error(err.to_string())).await;
        self.transition(SessionState::Idle);
        sent
    }

    async fn send(&self, out: &mpsc::Sender<Envelope>, envelope: Envelope) -> Result<(), TransportError> {
        out.send(envelope)
            .await
            .map_err(|_| TransportError("connection closed".to_string()))
    }

    fn transition(&mut self, next: SessionState) {
        if self.state.can_transition_to(next) {
            self.state = next;
        } else {
            warn!(
                "Session {} refused illegal transition {:?} -> {:?}",
                self.id, self.state, next
            );
        }
    }
}
