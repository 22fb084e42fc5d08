//! # WebSocket Message Protocol
//!
//! Every message on the wire is one JSON envelope `{"type": ..., "data": {...}}`.
//! This module defines the envelope, its payloads, and the codec that turns text
//! frames into envelopes and back. It does no I/O.
//!
//! ## Message Types:
//! - **Client → Server**: `tts_request`, `tts_stream_request`, `ping`
//! - **Server → Client**: `tts_response`, `tts_stream_chunk`, `tts_stream_complete`, `pong`
//!
//! Errors are reported as a `tts_response` with `status: "error"` and an empty `audio`.

use crate::config::PartialGenerationConfig;
use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Closed set of envelope types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    TtsRequest,
    TtsStreamRequest,
    TtsResponse,
    TtsStreamChunk,
    TtsStreamComplete,
    Ping,
    Pong,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::TtsRequest => "tts_request",
            MessageKind::TtsStreamRequest => "tts_stream_request",
            MessageKind::TtsResponse => "tts_response",
            MessageKind::TtsStreamChunk => "tts_stream_chunk",
            MessageKind::TtsStreamComplete => "tts_stream_complete",
            MessageKind::Ping => "ping",
            MessageKind::Pong => "pong",
        }
    }

    /// Whether a client is allowed to send this kind to the server.
    pub fn is_client_message(&self) -> bool {
        matches!(
            self,
            MessageKind::TtsRequest | MessageKind::TtsStreamRequest | MessageKind::Ping
        )
    }
}

impl FromStr for MessageKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tts_request" => Ok(MessageKind::TtsRequest),
            "tts_stream_request" => Ok(MessageKind::TtsStreamRequest),
            "tts_response" => Ok(MessageKind::TtsResponse),
            "tts_stream_chunk" => Ok(MessageKind::TtsStreamChunk),
            "tts_stream_complete" => Ok(MessageKind::TtsStreamComplete),
            "ping" => Ok(MessageKind::Ping),
            "pong" => Ok(MessageKind::Pong),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of the `status` field in server messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
    Streaming,
    Completed,
    Alive,
}

/// One protocol event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Envelope {
    /// Generate a complete WAV file
    TtsRequest(TtsRequestData),

    /// Generate audio and stream it chunk by chunk
    TtsStreamRequest(TtsRequestData),

    /// Complete audio, or an error report
    TtsResponse(TtsResponseData),

    /// One PCM16 chunk of a streaming request
    TtsStreamChunk(StreamChunkData),

    /// End of a successful stream
    TtsStreamComplete(StreamCompleteData),

    /// Health check from client
    Ping(PingData),

    /// Health check reply
    Pong(PongData),
}

/// Payload of `tts_request` and `tts_stream_request`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TtsRequestData {
    #[serde(default)]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<PartialGenerationConfig>,

    /// Base64 encoded reference recording for voice cloning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_audio: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsResponseData {
    /// Base64 WAV file; empty on error
    pub audio: String,
    pub status: Status,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Seconds of audio in the file
    pub duration: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub language: String,
    pub emotion: String,
    pub speed: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunkData {
    /// Base64 PCM16 little-endian mono
    pub audio: String,
    pub status: Status,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Length of the decoded PCM payload in bytes
    pub chunk_size: usize,
    pub duration: f64,
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamCompleteData {
    pub status: Status,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PingData {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PongData {
    pub status: Status,
    pub tts_initialized: bool,
}

impl Envelope {
    pub fn kind(&self) -> MessageKind {
        match self {
            Envelope::TtsRequest(_) => MessageKind::TtsRequest,
            Envelope::TtsStreamRequest(_) => MessageKind::TtsStreamRequest,
            Envelope::TtsResponse(_) => MessageKind::TtsResponse,
            Envelope::TtsStreamChunk(_) => MessageKind::TtsStreamChunk,
            Envelope::TtsStreamComplete(_) => MessageKind::TtsStreamComplete,
            Envelope::Ping(_) => MessageKind::Ping,
            Envelope::Pong(_) => MessageKind::Pong,
        }
    }

    /// Error report sent in place of a response.
    pub fn error(message: impl Into<String>) -> Self {
        Envelope::TtsResponse(TtsResponseData {
            audio: String::new(),
            status: Status::Error,
            message: message.into(),
            metadata: None,
        })
    }

    pub fn success(audio: String, metadata: ResponseMetadata) -> Self {
        Envelope::TtsResponse(TtsResponseData {
            audio,
            status: Status::Success,
            message: "Audio generated successfully".to_string(),
            metadata: Some(metadata),
        })
    }

    pub fn stream_chunk(audio: String, metadata: ChunkMetadata) -> Self {
        Envelope::TtsStreamChunk(StreamChunkData {
            audio,
            status: Status::Streaming,
            metadata,
        })
    }

    pub fn stream_complete() -> Self {
        Envelope::TtsStreamComplete(StreamCompleteData {
            status: Status::Completed,
            message: "Audio streaming completed".to_string(),
        })
    }

    pub fn pong(tts_initialized: bool) -> Self {
        Envelope::Pong(PongData {
            status: Status::Alive,
            tts_initialized,
        })
    }

    /// `true` for a `tts_response` carrying `status: "error"`.
    pub fn is_error(&self) -> bool {
        matches!(self, Envelope::TtsResponse(data) if data.status == Status::Error)
    }
}

/// Decode one text frame into an envelope.
///
/// ## Error Mapping:
/// - Not JSON at all → [`ProtocolError::InvalidFormat`]
/// - `type` missing or not one of the known kinds → [`ProtocolError::UnknownType`]
/// - Not an object, or `data` of the wrong shape → [`ProtocolError::MalformedPayload`]
///
/// A missing or `null` `data` is read as `{}`, and fields this server does not know
/// about are ignored.
pub fn decode(text: &str) -> Result<Envelope, ProtocolError> {
    let value: Value = serde_json::from_str(text).map_err(|_| ProtocolError::InvalidFormat)?;

    let mut object = match value {
        Value::Object(object) => object,
        _ => {
            return Err(ProtocolError::MalformedPayload(
                "expected a JSON object".to_string(),
            ))
        }
    };

    let kind = match object.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    let kind: MessageKind = kind.parse()?;

    let data = match object.remove("data") {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(data) => data,
    };

    let mut envelope = Map::with_capacity(2);
    envelope.insert("type".to_string(), Value::String(kind.as_str().to_string()));
    envelope.insert("data".to_string(), data);

    serde_json::from_value(Value::Object(envelope))
        .map_err(|err| ProtocolError::MalformedPayload(format!("{}: {}", kind, err)))
}

/// Encode an envelope as a text frame.
pub fn encode(envelope: &Envelope) -> Result<String, serde_json::Error> {
    serde_json::to_string(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_tts_request() {
        let envelope =
            decode(r#"{"type": "tts_request", "data": {"text": "Hola", "config": {}}}"#).unwrap();

        match envelope {
            Envelope::TtsRequest(data) => {
                assert_eq!(data.text.as_deref(), Some("Hola"));
                assert_eq!(data.config, Some(PartialGenerationConfig::default()));
                assert!(data.reference_audio.is_none());
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_decode_tolerates_unknown_fields_and_missing_data() {
        let envelope = decode(
            r#"{"type": "tts_stream_request", "id": 7,
                "data": {"text": "hi", "voice_hint": "x", "config": {"speed": 1.5, "future": 1}}}"#,
        )
        .unwrap();
        match envelope {
            Envelope::TtsStreamRequest(data) => {
                assert_eq!(data.config.unwrap().speed, Some(1.5));
            }
            other => panic!("Wrong message type: {:?}", other),
        }

        assert_eq!(decode(r#"{"type": "ping"}"#).unwrap(), Envelope::Ping(PingData {}));
        assert_eq!(
            decode(r#"{"type": "ping", "data": null}"#).unwrap().kind(),
            MessageKind::Ping
        );
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode("{not json"), Err(ProtocolError::InvalidFormat));
        assert_eq!(
            decode(r#"{"type": "sing", "data": {}}"#),
            Err(ProtocolError::UnknownType("sing".to_string()))
        );
        assert_eq!(
            decode(r#"{"data": {}}"#),
            Err(ProtocolError::UnknownType(String::new()))
        );
        assert!(matches!(
            decode("[1, 2, 3]"),
            Err(ProtocolError::MalformedPayload(_))
        ));
        assert!(matches!(
            decode(r#"{"type": "tts_request", "data": {"text": 42}}"#),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_missing_text_is_not_a_decode_error() {
        match decode(r#"{"type": "tts_request", "data": {}}"#).unwrap() {
            Envelope::TtsRequest(data) => assert!(data.text.is_none()),
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_error_envelope_shape() {
        let json: Value = serde_json::from_str(&encode(&Envelope::error("No text provided")).unwrap())
            .unwrap();
        assert_eq!(
            json,
            json!({
                "type": "tts_response",
                "data": {"audio": "", "status": "error", "message": "No text provided"}
            })
        );
    }

    #[test]
    fn test_server_message_shapes() {
        let json: Value = serde_json::to_value(Envelope::pong(true)).unwrap();
        assert_eq!(
            json,
            json!({"type": "pong", "data": {"status": "alive", "tts_initialized": true}})
        );

        let json: Value = serde_json::to_value(Envelope::stream_complete()).unwrap();
        assert_eq!(json["type"], "tts_stream_complete");
        assert_eq!(json["data"]["status"], "completed");

        let chunk = Envelope::stream_chunk(
            "AAA=".to_string(),
            ChunkMetadata {
                chunk_size: 2,
                duration: 0.5,
                sample_rate: 22050,
                channels: 1,
            },
        );
        let json: Value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["data"]["status"], "streaming");
        assert_eq!(json["data"]["metadata"]["chunk_size"], 2);

        // Server messages decode on the client side
        assert_eq!(decode(&encode(&chunk).unwrap()).unwrap(), chunk);
    }

    #[test]
    fn test_message_kind_direction() {
        assert!(MessageKind::TtsRequest.is_client_message());
        assert!(MessageKind::Ping.is_client_message());
        assert!(!MessageKind::Pong.is_client_message());
        assert!(!MessageKind::TtsStreamChunk.is_client_message());
        assert_eq!("tts_stream_complete".parse::<MessageKind>(), Ok(MessageKind::TtsStreamComplete));
    }
}
