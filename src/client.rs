//! # TTS Client
//!
//! A small async client for the `/ws` endpoint, built on `tokio-tungstenite`. Used by the
//! end-to-end tests and usable from any tokio program:
//!
//! ```rust,ignore
//! let mut client = TtsClient::connect("ws://127.0.0.1:8001/ws").await?;
//! let audio = client.synthesize("Hola, ¿cómo estás?", None, None).await?;
//! std::fs::write("hola.wav", &audio.wav)?;
//! ```
//!
//! Requests on one connection are answered in order, so the client simply sends a
//! request and reads until its terminal message.

use crate::audio::framer;
use crate::config::PartialGenerationConfig;
use crate::protocol::{
    self, ChunkMetadata, Envelope, PongData, ResponseMetadata, Status, TtsRequestData,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Result of a full (non-streaming) request.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    /// The WAV file as received
    pub wav: Vec<u8>,
    pub sample_rate: u32,
    pub samples: Vec<i16>,
    pub metadata: ResponseMetadata,
}

/// Totals of a streaming request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSummary {
    pub chunks: usize,
    pub bytes: usize,
    pub duration: f64,
}

pub struct TtsClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TtsClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (socket, _) = connect_async(url)
            .await
            .with_context(|| format!("Failed to connect to {}", url))?;
        debug!("Connected to {}", url);
        Ok(Self { socket })
    }

    pub async fn ping(&mut self) -> Result<PongData> {
        self.send(&Envelope::Ping(Default::default())).await?;

        match self.receive().await? {
            Envelope::Pong(pong) => Ok(pong),
            other => Err(unexpected(other)),
        }
    }

    /// Request complete audio for `text`.
    ///
    /// `reference_audio` is a voice sample for generators that clone voices; it is sent
    /// base64 encoded.
    pub async fn synthesize(
        &mut self,
        text: &str,
        config: Option<PartialGenerationConfig>,
        reference_audio: Option<&[u8]>,
    ) -> Result<SynthesizedAudio> {
        self.send(&Envelope::TtsRequest(request_data(text, config, reference_audio)))
            .await?;

        let response = match self.receive().await? {
            Envelope::TtsResponse(response) => response,
            other => return Err(unexpected(other)),
        };

        if response.status != Status::Success {
            return Err(anyhow!("Server error: {}", response.message));
        }
        let metadata = response
            .metadata
            .ok_or_else(|| anyhow!("Response is missing metadata"))?;

        let wav = STANDARD
            .decode(&response.audio)
            .context("Response audio is not valid base64")?;
        let (sample_rate, samples) =
            framer::read_container(&wav).context("Response audio is not a valid WAV file")?;

        Ok(SynthesizedAudio {
            wav,
            sample_rate,
            samples,
            metadata,
        })
    }

    /// Request streamed audio for `text`, calling `on_chunk` with each decoded PCM16 chunk.
    pub async fn stream<F>(
        &mut self,
        text: &str,
        config: Option<PartialGenerationConfig>,
        reference_audio: Option<&[u8]>,
        mut on_chunk: F,
    ) -> Result<StreamSummary>
    where
        F: FnMut(&[u8], &ChunkMetadata),
    {
        self.send(&Envelope::TtsStreamRequest(request_data(text, config, reference_audio)))
            .await?;

        let mut summary = StreamSummary::default();
        loop {
            match self.receive().await? {
                Envelope::TtsStreamChunk(chunk) => {
                    let pcm = STANDARD
                        .decode(&chunk.audio)
                        .context("Chunk audio is not valid base64")?;
                    on_chunk(&pcm, &chunk.metadata);

                    summary.chunks += 1;
                    summary.bytes += pcm.len();
                    summary.duration += chunk.metadata.duration;
                }
                Envelope::TtsStreamComplete(_) => return Ok(summary),
                Envelope::TtsResponse(response) if response.status == Status::Error => {
                    return Err(anyhow!(
                        "Server error after {} chunks: {}",
                        summary.chunks,
                        response.message
                    ));
                }
                other => return Err(unexpected(other)),
            }
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.socket.close(None).await.context("Failed to close connection")?;
        Ok(())
    }

    async fn send(&mut self, envelope: &Envelope) -> Result<()> {
        let json = protocol::encode(envelope)?;
        self.socket
            .send(Message::Text(json))
            .await
            .context("Failed to send message")?;
        Ok(())
    }

    /// Next envelope, skipping control frames.
    async fn receive(&mut self) -> Result<Envelope> {
        loop {
            let message = self
                .socket
                .next()
                .await
                .ok_or_else(|| anyhow!("Connection closed by server"))?
                .context("Failed to read message")?;

            match message {
                Message::Text(text) => return Ok(protocol::decode(&text)?),
                Message::Close(frame) => return Err(anyhow!("Connection closed: {:?}", frame)),
                _ => continue,
            }
        }
    }
}

fn request_data(
    text: &str,
    config: Option<PartialGenerationConfig>,
    reference_audio: Option<&[u8]>,
) -> TtsRequestData {
    TtsRequestData {
        text: Some(text.to_string()),
        config,
        reference_audio: reference_audio.map(|bytes| STANDARD.encode(bytes)),
    }
}

fn unexpected(envelope: Envelope) -> anyhow::Error {
    match envelope {
        Envelope::TtsResponse(response) if response.status == Status::Error => {
            anyhow!("Server error: {}", response.message)
        }
        other => anyhow!("Unexpected {} message", other.kind()),
    }
}
