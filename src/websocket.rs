//! # WebSocket TTS Handler
//!
//! Clients connect to `/ws` and exchange JSON envelopes with the server: `tts_request`,
//! `tts_stream_request` and `ping` in, `tts_response`, `tts_stream_chunk`,
//! `tts_stream_complete` and `pong` out.
//!
//! ## Connection Layout:
//! ```text
//!  socket ──> TtsWebSocket actor ──(inbound, bounded)───> TtsSession::run task
//!  socket <── TtsWebSocket actor <──(outbound, bounded)─── TtsSession::run task
//! ```
//! The actor only moves frames. All request handling happens in the session task, one
//! message at a time, so a long generation never blocks WebSocket pings and two requests
//! on the same connection never interleave their output. A client that queues more than
//! `websocket.max_pending_messages` messages behind a busy session is disconnected with a
//! policy-violation close.
//!
//! ## Heartbeat:
//! The server pings every `websocket.ping_interval_secs`; a client that sends nothing
//! (no pong, no ping, no message) for `ping_interval + ping_timeout` is disconnected.

use crate::error::ServiceError;
use crate::protocol::{self, Envelope};
use crate::session::{SessionOptions, TtsSession};
use crate::state::{AppState, ServiceMetrics};
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn, Instrument};

/// Outbound envelopes that may queue up before the session waits for the socket.
const OUTBOUND_CAPACITY: usize = 16;

/// One WebSocket connection.
pub struct TtsWebSocket {
    /// Taken when the actor starts and moved into the session task
    session: Option<TtsSession>,

    /// Frames from the client to the session; dropped to end the session
    inbound: Option<mpsc::Sender<String>>,
    max_pending: usize,

    metrics: Arc<ServiceMetrics>,
    ping_interval: Duration,
    client_timeout: Duration,
    last_heartbeat: Instant,
}

impl TtsWebSocket {
    pub fn new(state: &AppState) -> Self {
        let session = TtsSession::new(
            state.engine.clone(),
            SessionOptions::from_config(&state.config),
            state.metrics.clone(),
        );

        Self {
            session: Some(session),
            inbound: None,
            max_pending: state.config.websocket.max_pending_messages,
            metrics: state.metrics.clone(),
            ping_interval: state.config.websocket.ping_interval(),
            client_timeout: state.config.websocket.client_timeout(),
            last_heartbeat: Instant::now(),
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.ping_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!("WebSocket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }

            ctx.ping(b"");
        });
    }

    /// Hand one text frame to the session.
    fn forward(&mut self, text: String, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(inbound) = &self.inbound else {
            ctx.stop();
            return;
        };

        match inbound.try_send(text) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Client queued more than {} messages, closing connection",
                    self.max_pending
                );
                self.inbound = None;
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Policy,
                    description: Some("Too many pending messages".to_string()),
                }));
                ctx.stop();
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Session task is gone, closing connection");
                ctx.stop();
            }
        }
    }
}

impl Actor for TtsWebSocket {
    type Context = ws::WebsocketContext<Self>;

    /// Called when the WebSocket connection starts.
    fn started(&mut self, ctx: &mut Self::Context) {
        self.metrics.connection_opened();

        let (inbound_tx, inbound_rx) = mpsc::channel(self.max_pending);
        let (outbound_tx, outbound_rx) = mpsc::channel::<Envelope>(OUTBOUND_CAPACITY);
        self.inbound = Some(inbound_tx);
        ctx.add_stream(ReceiverStream::new(outbound_rx));

        if let Some(session) = self.session.take() {
            let span = tracing::info_span!("connection", id = %session.id());
            info!(parent: &span, "WebSocket connection started");
            tokio::spawn(session.run(inbound_rx, outbound_tx).instrument(span));
        }

        self.start_heartbeat(ctx);
    }

    /// Called when the WebSocket connection stops.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // Closing the inbound queue ends the session loop; the outbound receiver was
        // dropped with the context, so a session mid-response sees a transport error
        self.inbound = None;
        self.metrics.connection_closed();
        info!("WebSocket connection stopped");
    }
}

/// Handle incoming WebSocket frames.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for TtsWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.forward(text.to_string(), ctx);
            }
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                match String::from_utf8(data.to_vec()) {
                    Ok(text) => self.forward(text, ctx),
                    Err(_) => {
                        debug!("Binary frame is not UTF-8 ({} bytes)", data.len());
                        // The codec answers "Invalid JSON format" for anything unparsable
                        self.forward(String::new(), ctx);
                    }
                }
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("WebSocket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// Envelopes produced by the session, written to the socket in order.
impl StreamHandler<Envelope> for TtsWebSocket {
    fn handle(&mut self, envelope: Envelope, ctx: &mut Self::Context) {
        match protocol::encode(&envelope) {
            Ok(json) => ctx.text(json),
            Err(err) => error!("Failed to encode {} envelope: {}", envelope.kind(), err),
        }
    }

    /// The session ended on its own (transport failure); close the socket.
    fn finished(&mut self, ctx: &mut Self::Context) {
        debug!("Session output closed");
        ctx.stop();
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Refuses the upgrade with 503 once the engine is shutting down; otherwise hands the
/// connection to a new [`TtsWebSocket`] actor.
pub async fn tts_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    if state.engine.is_shutting_down() {
        return Err(ServiceError::ShuttingDown.into());
    }

    debug!(
        "New WebSocket connection request from: {:?}",
        req.connection_info().peer_addr()
    );

    ws::start(TtsWebSocket::new(&state), &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::framer;
    use crate::client::TtsClient;
    use crate::config::{AppConfig, PartialGenerationConfig};
    use crate::synthesis::engine::TtsEngine;
    use crate::synthesis::testing::{ScriptedGenerator, StaticLoader, Step};
    use crate::synthesis::tone::ToneLoader;
    use actix_web::{App, HttpServer};
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::Message;

    /// Start a real server on an ephemeral port and return its WebSocket URL.
    fn spawn_server(state: AppState) -> String {
        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(crate::configure_routes)
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();

        let addr = server.addrs()[0];
        actix_web::rt::spawn(server.run());
        format!("ws://{}/ws", addr)
    }

    fn test_state() -> AppState {
        let config = AppConfig::default();
        let engine = Arc::new(TtsEngine::new(Arc::new(ToneLoader::from_config(&config))));
        AppState::new(config, engine)
    }

    #[actix_web::test]
    async fn test_full_and_streaming_requests_over_websocket() {
        let url = spawn_server(test_state());
        let mut client = TtsClient::connect(&url).await.unwrap();

        let pong = client.ping().await.unwrap();
        assert!(!pong.tts_initialized);

        let config = PartialGenerationConfig {
            chunk_size: Some(2),
            ..Default::default()
        };
        let full = client.synthesize("Hola", Some(config.clone()), None).await.unwrap();
        assert_eq!(full.sample_rate, 22050);
        assert_eq!(full.samples.len(), 4 * 882);
        assert!((full.metadata.duration - full.samples.len() as f64 / 22050.0).abs() < 1e-9);

        let mut streamed = Vec::new();
        let summary = client
            .stream("Hola", Some(config), None, |pcm, _| streamed.extend_from_slice(pcm))
            .await
            .unwrap();
        assert_eq!(summary.chunks, 2);
        assert_eq!(streamed.len(), full.samples.len() * 2);

        assert!(client.ping().await.unwrap().tts_initialized);
        client.close().await.unwrap();
    }

    #[actix_web::test]
    async fn test_raw_frames_and_errors() {
        let url = spawn_server(test_state());
        let (mut socket, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

        socket.send(Message::Text("{not json".into())).await.unwrap();
        let reply = next_envelope(&mut socket).await;
        assert_eq!(reply, Envelope::error("Invalid JSON format"));

        socket
            .send(Message::Binary(br#"{"type": "ping"}"#.to_vec().into()))
            .await
            .unwrap();
        let reply = next_envelope(&mut socket).await;
        assert_eq!(reply, Envelope::pong(false));

        socket
            .send(Message::Text(r#"{"type": "tts_request", "data": {"text": ""}}"#.into()))
            .await
            .unwrap();
        let reply = next_envelope(&mut socket).await;
        assert_eq!(reply, Envelope::error("No text provided"));
    }

    #[actix_web::test]
    async fn test_reference_audio_is_sent_and_validated() {
        let url = spawn_server(test_state());
        let mut client = TtsClient::connect(&url).await.unwrap();

        let voice_sample = framer::to_container(&[vec![0.25f32; 64]], 22050).unwrap();
        let full = client
            .synthesize("Hola", None, Some(voice_sample.as_slice()))
            .await
            .unwrap();
        assert!(!full.samples.is_empty());

        let summary = client
            .stream("Hola", None, Some(voice_sample.as_slice()), |_, _| {})
            .await
            .unwrap();
        assert!(summary.chunks > 0);
        client.close().await.unwrap();

        let (mut socket, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        let raw = json!({
            "type": "tts_stream_request",
            "data": {"text": "Hola", "reference_audio": "%%% not base64 %%%"}
        });
        socket.send(Message::Text(raw.to_string())).await.unwrap();
        let reply = next_envelope(&mut socket).await;
        match reply {
            Envelope::TtsResponse(data) => assert!(data.message.starts_with("Invalid reference_audio")),
            other => panic!("expected an error response, got {:?}", other),
        }
    }

    #[actix_web::test]
    async fn test_client_flooding_a_busy_session_is_disconnected() {
        let mut config = AppConfig::default();
        config.websocket.max_pending_messages = 2;
        let generator = ScriptedGenerator::new(vec![
            Step::Sleep(Duration::from_secs(1)),
            Step::Chunk(vec![0.1; 16]),
        ]);
        let engine = Arc::new(TtsEngine::new(Arc::new(StaticLoader(generator))));
        let url = spawn_server(AppState::new(config, engine));

        let (mut socket, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        let busy = json!({"type": "tts_request", "data": {"text": "Hola"}});
        socket.send(Message::Text(busy.to_string())).await.unwrap();

        // Two fit in the queue behind the running request; the third overflows it
        for _ in 0..3 {
            socket
                .send(Message::Text(r#"{"type": "ping"}"#.into()))
                .await
                .unwrap();
        }

        loop {
            match socket.next().await {
                Some(Ok(Message::Close(Some(frame)))) => {
                    assert_eq!(frame.code, CloseCode::Policy);
                    break;
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                other => panic!("expected a policy close, got {:?}", other),
            }
        }
    }

    #[actix_web::test]
    async fn test_upgrade_refused_while_shutting_down() {
        let state = test_state();
        state.engine.shutdown();
        let url = spawn_server(state);

        assert!(tokio_tungstenite::connect_async(url.as_str()).await.is_err());
    }

    async fn next_envelope<S>(socket: &mut S) -> Envelope
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => return protocol::decode(&text).unwrap(),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                other => panic!("unexpected frame: {:?}", other),
            }
        }
    }
}
