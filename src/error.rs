//! # Error Handling
//!
//! This module defines the error taxonomy of the TTS service and how each error is
//! reported, either to a WebSocket client as an error envelope or to an HTTP client
//! as a JSON error response.
//!
//! ## Error Categories:
//! - **ProtocolError**: The client sent something we could not decode
//! - **ValidationError**: The message decoded but the request is not usable
//! - **ServiceError**: Generation failed, timed out, or the service is unavailable
//! - **TransportError**: The peer went away; terminal for that connection only
//!
//! None of these is retried by the server. A client that wants another attempt
//! sends a fresh request.

use actix_web::{HttpResponse, ResponseError};  // Web framework error handling
use serde_json::json;                          // For creating JSON error responses
use std::fmt;                                  // For implementing Display trait

/// Errors raised while decoding an inbound message.
///
/// The `Display` output of each variant is exactly the message sent back to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// The message is not syntactically valid JSON
    InvalidFormat,

    /// The `type` field is missing or names a kind this server does not accept
    UnknownType(String),

    /// The `type` is known but the payload has the wrong shape
    MalformedPayload(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidFormat => write!(f, "Invalid JSON format"),
            ProtocolError::UnknownType(kind) => write!(f, "Unknown message type: {}", kind),
            ProtocolError::MalformedPayload(detail) => {
                write!(f, "Invalid message payload: {}", detail)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

/// A well-formed request that cannot be served as sent.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// `text` is absent or empty
    MissingText,

    /// `reference_audio` is not valid base64
    InvalidReferenceAudio(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingText => write!(f, "No text provided"),
            ValidationError::InvalidReferenceAudio(detail) => {
                write!(f, "Invalid reference_audio: {}", detail)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// The connection to the peer is gone. Nothing can be reported to it any more.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportError(pub String);

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transport error: {}", self.0)
    }
}

impl std::error::Error for TransportError {}

/// Everything that can go wrong while serving a request.
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(ServiceError::Generation("model returned no frames".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceError {
    Protocol(ProtocolError),

    Validation(ValidationError),

    /// Loading the generator failed; the next request tries again
    Initialization(String),

    /// The generator reported a failure
    Generation(String),

    /// No chunk arrived within the wait window
    Timeout,

    /// The worker died without reporting (panic inside the generator)
    WorkerLost,

    /// The engine has been shut down and accepts no new work
    ShuttingDown,

    /// Internal failure that is not the client's fault (encoding, I/O)
    Internal(String),
}

impl ServiceError {
    /// Machine-readable error kind, used in logs and HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Protocol(_) => "protocol_error",
            ServiceError::Validation(_) => "validation_error",
            ServiceError::Initialization(_) => "initialization_error",
            ServiceError::Generation(_) => "generation_error",
            ServiceError::Timeout => "timeout_error",
            ServiceError::WorkerLost => "worker_lost",
            ServiceError::ShuttingDown => "shutting_down",
            ServiceError::Internal(_) => "internal_error",
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::Protocol(err) => write!(f, "{}", err),
            ServiceError::Validation(err) => write!(f, "{}", err),
            ServiceError::Initialization(msg) => {
                write!(f, "Failed to initialize TTS models: {}", msg)
            }
            ServiceError::Generation(msg) => write!(f, "Generation error: {}", msg),
            ServiceError::Timeout => write!(f, "Generation timeout"),
            ServiceError::WorkerLost => write!(f, "Generation worker terminated unexpectedly"),
            ServiceError::ShuttingDown => write!(f, "TTS engine is shutting down"),
            ServiceError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<ProtocolError> for ServiceError {
    fn from(err: ProtocolError) -> Self {
        ServiceError::Protocol(err)
    }
}

impl From<ValidationError> for ServiceError {
    fn from(err: ValidationError) -> Self {
        ServiceError::Validation(err)
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        ServiceError::Internal(err.to_string())
    }
}

/// HTTP rendering, used by the WebSocket upgrade endpoint.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "shutting_down",
///     "message": "TTS engine is shutting down",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for ServiceError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;

        match self {
            ServiceError::Protocol(_) | ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ServiceError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Initialization(_)
            | ServiceError::Generation(_)
            | ServiceError::WorkerLost
            | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Type alias for Results that use the service error type.
pub type ServiceResult<T> = Result<T, ServiceError>;
