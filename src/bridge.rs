//! # Generation Bridge
//!
//! Runs one blocking generation on a dedicated worker and hands its chunks to the async
//! connection loop through a bounded channel.
//!
//! ## Key Rust Concepts:
//!
//! ### spawn_blocking
//! The generator is CPU bound and blocking. Running it on the connection's async task
//! would stall every other frame on that connection (pings included), so it runs on
//! tokio's blocking pool instead and talks back through a channel.
//!
//! ### Bounded mpsc Channel
//! - **Producer**: The worker, through [`ChunkSink`], using `blocking_send`
//! - **Consumer**: The connection loop, through [`GenerationTask::next_event`]
//! - **Backpressure**: When the consumer falls behind, the worker blocks instead of
//!   piling chunks up in memory
//!
//! ### Sentinels
//! After `generate` returns the worker pushes exactly one terminal event: `Done` or
//! `Error(reason)`. A worker that panics pushes nothing; its sender is dropped during
//! unwinding, the channel closes, and the consumer sees [`BridgeError::WorkerLost`].
//!
//! ## Cancellation:
//! The worker cannot be interrupted mid-call. Instead a shared flag is raised and the
//! sink refuses the next chunk, which makes a well-behaved generator return early.
//! [`GenerationTask::finish`] also closes the receiving side so a worker blocked on a
//! full channel is released, then waits for the worker to exit.

use crate::audio::AudioChunk;
use crate::error::ServiceError;
use crate::synthesis::generator::{AudioSink, SinkError, SpeechGenerator, SynthesisRequest};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// One item received from the worker, in generation order.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    Chunk(AudioChunk),

    /// Generation finished normally
    Done,

    /// The generator reported a failure
    Error(String),
}

/// Why the consumer could not get the next event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeError {
    /// Nothing arrived within the wait window
    Timeout,

    /// The channel closed without a sentinel; the worker died
    WorkerLost,
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Timeout => write!(f, "timed out waiting for the next chunk"),
            BridgeError::WorkerLost => write!(f, "generation worker exited without reporting"),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<BridgeError> for ServiceError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Timeout => ServiceError::Timeout,
            BridgeError::WorkerLost => ServiceError::WorkerLost,
        }
    }
}

/// How the worker exited, as observed by [`GenerationTask::finish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    Completed,
    Panicked(String),
}

/// Lifecycle of one task as seen from the consumer side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

/// Sink handed to the generator. Lives on the worker thread.
pub struct ChunkSink {
    tx: mpsc::Sender<BridgeEvent>,
    cancelled: Arc<AtomicBool>,
}

impl AudioSink for ChunkSink {
    fn push(&mut self, chunk: AudioChunk) -> Result<(), SinkError> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(SinkError::Cancelled);
        }

        self.tx
            .blocking_send(BridgeEvent::Chunk(chunk))
            .map_err(|_| SinkError::Closed)
    }
}

/// Handle to one running generation.
///
/// Dropping the handle without calling [`finish`](Self::finish) still cancels the
/// worker; it just doesn't wait for it.
pub struct GenerationTask {
    id: Uuid,
    events: mpsc::Receiver<BridgeEvent>,
    worker: Option<JoinHandle<()>>,
    cancelled: Arc<AtomicBool>,
    state: TaskState,
    started_at: Instant,
    chunks_received: usize,
}

impl GenerationTask {
    /// Start `generator` on the blocking pool. Must be called inside a tokio runtime.
    ///
    /// `capacity` bounds how many chunks may wait in the channel (minimum 1).
    pub fn start(
        generator: Arc<dyn SpeechGenerator>,
        request: SynthesisRequest,
        capacity: usize,
    ) -> Self {
        let id = Uuid::new_v4();
        let (tx, events) = mpsc::channel(capacity.max(1));
        let cancelled = Arc::new(AtomicBool::new(false));

        let sink_cancelled = cancelled.clone();
        let span = tracing::Span::current();

        let worker = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let mut sink = ChunkSink {
                tx: tx.clone(),
                cancelled: sink_cancelled.clone(),
            };

            let sentinel = match generator.generate(&request, &mut sink) {
                Ok(()) => BridgeEvent::Done,
                Err(err) => {
                    if sink_cancelled.load(Ordering::SeqCst) {
                        debug!("Generation {} stopped after cancellation: {:#}", id, err);
                    } else {
                        warn!("Generation {} failed: {:#}", id, err);
                    }
                    BridgeEvent::Error(format!("{:#}", err))
                }
            };
            drop(sink);

            if tx.blocking_send(sentinel).is_err() {
                debug!("Generation {} finished after its consumer went away", id);
            }
        });

        debug!("Generation {} started (channel capacity {})", id, capacity.max(1));

        Self {
            id,
            events,
            worker: Some(worker),
            cancelled,
            state: TaskState::Running,
            started_at: Instant::now(),
            chunks_received: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn chunks_received(&self) -> usize {
        self.chunks_received
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Wait up to `timeout` for the next event.
    ///
    /// ## Returns:
    /// - `Ok(Chunk)` zero or more times, then exactly one `Ok(Done)` or `Ok(Error(_))`
    /// - `Err(Timeout)` if the worker produced nothing in time
    /// - `Err(WorkerLost)` if the channel closed without a sentinel
    pub async fn next_event(&mut self, timeout: Duration) -> Result<BridgeEvent, BridgeError> {
        match tokio::time::timeout(timeout, self.events.recv()).await {
            Ok(Some(event)) => {
                match &event {
                    BridgeEvent::Chunk(_) => self.chunks_received += 1,
                    BridgeEvent::Done => self.state = TaskState::Completed,
                    BridgeEvent::Error(_) => self.state = TaskState::Failed,
                }
                Ok(event)
            }
            Ok(None) => {
                self.state = TaskState::Failed;
                Err(BridgeError::WorkerLost)
            }
            Err(_) => {
                self.state = TaskState::TimedOut;
                Err(BridgeError::Timeout)
            }
        }
    }

    /// Ask the worker to stop at its next chunk.
    pub fn cancel(&mut self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) && self.state == TaskState::Running {
            self.state = TaskState::Cancelled;
        }
    }

    /// Cancel if still running, release the worker, and wait for it to exit.
    pub async fn finish(mut self) -> WorkerExit {
        self.cancelled.store(true, Ordering::SeqCst);
        self.events.close();

        let Some(worker) = self.worker.take() else {
            return WorkerExit::Completed;
        };

        match worker.await {
            Ok(()) => {
                debug!(
                    "Generation {} joined after {:.2}s ({} chunks)",
                    self.id,
                    self.started_at.elapsed().as_secs_f64(),
                    self.chunks_received
                );
                WorkerExit::Completed
            }
            Err(err) => {
                error!("Generation worker {} terminated abnormally: {}", self.id, err);
                WorkerExit::Panicked(err.to_string())
            }
        }
    }
}

impl Drop for GenerationTask {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationConfig;
    use crate::synthesis::testing::{ScriptedGenerator, Step};

    const WAIT: Duration = Duration::from_secs(5);

    fn request() -> SynthesisRequest {
        SynthesisRequest {
            text: "Hola".to_string(),
            config: GenerationConfig::default(),
            reference_audio: None,
        }
    }

    #[tokio::test]
    async fn test_chunks_arrive_in_order_then_done() {
        let generator = ScriptedGenerator::chunks(5, 10);
        let mut task = GenerationTask::start(generator, request(), 2);

        for i in 0..5 {
            match task.next_event(WAIT).await.unwrap() {
                BridgeEvent::Chunk(chunk) => assert_eq!(chunk.samples, vec![i as f32 / 100.0; 10]),
                other => panic!("expected chunk {}, got {:?}", i, other),
            }
        }
        assert_eq!(task.next_event(WAIT).await.unwrap(), BridgeEvent::Done);
        assert_eq!(task.state(), TaskState::Completed);
        assert_eq!(task.chunks_received(), 5);
        assert_eq!(task.finish().await, WorkerExit::Completed);
    }

    #[tokio::test]
    async fn test_generator_error_becomes_error_sentinel() {
        let generator = ScriptedGenerator::new(vec![
            Step::Chunk(vec![0.5; 4]),
            Step::Fail("model exploded".to_string()),
        ]);
        let mut task = GenerationTask::start(generator, request(), 4);

        assert!(matches!(task.next_event(WAIT).await, Ok(BridgeEvent::Chunk(_))));
        assert_eq!(
            task.next_event(WAIT).await.unwrap(),
            BridgeEvent::Error("model exploded".to_string())
        );
        assert_eq!(task.state(), TaskState::Failed);
        assert_eq!(task.finish().await, WorkerExit::Completed);
    }

    #[tokio::test]
    async fn test_stalled_worker_times_out_and_is_cancelled() {
        let generator = ScriptedGenerator::new(vec![
            Step::Sleep(Duration::from_millis(300)),
            Step::Chunk(vec![0.1; 4]),
            Step::Chunk(vec![0.2; 4]),
        ]);
        let mut task = GenerationTask::start(generator.clone(), request(), 4);

        let err = task.next_event(Duration::from_millis(30)).await.unwrap_err();
        assert_eq!(err, BridgeError::Timeout);
        assert_eq!(task.state(), TaskState::TimedOut);

        assert_eq!(task.finish().await, WorkerExit::Completed);
        // The chunk after the stall was refused by the sink
        assert!(generator.saw_sink_error.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_finish_releases_worker_blocked_on_full_channel() {
        let generator = ScriptedGenerator::chunks(50, 8);
        let mut task = GenerationTask::start(generator.clone(), request(), 1);

        assert!(matches!(task.next_event(WAIT).await, Ok(BridgeEvent::Chunk(_))));

        let exit = tokio::time::timeout(WAIT, task.finish()).await;
        assert_eq!(exit.unwrap(), WorkerExit::Completed);
        assert!(generator.saw_sink_error.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panicking_worker_is_reported_as_lost() {
        let generator = ScriptedGenerator::new(vec![Step::Chunk(vec![0.3; 4]), Step::Panic]);
        let mut task = GenerationTask::start(generator, request(), 4);

        assert!(matches!(task.next_event(WAIT).await, Ok(BridgeEvent::Chunk(_))));
        assert_eq!(task.next_event(WAIT).await.unwrap_err(), BridgeError::WorkerLost);
        assert!(matches!(task.finish().await, WorkerExit::Panicked(_)));
    }

    #[tokio::test]
    async fn test_cancel_marks_running_task() {
        let generator = ScriptedGenerator::new(vec![Step::Sleep(Duration::from_millis(50))]);
        let mut task = GenerationTask::start(generator, request(), 1);

        task.cancel();
        assert_eq!(task.state(), TaskState::Cancelled);
        assert_eq!(task.finish().await, WorkerExit::Completed);
    }
}
