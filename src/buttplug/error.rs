// src/buttplug/error.rs

//! Error types for the protocol core.

use thiserror::Error;

use super::message::MessageKind;

/// Failure to decode an inbound frame. The whole frame is rejected.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed message batch: {0}")]
    Json(#[from] serde_json::Error),
    #[error("batch entry {position} is not a JSON object")]
    NotAnObject { position: usize },
    #[error("batch entry {position} is an empty object")]
    EmptyObject { position: usize },
    #[error("unknown message type `{0}`")]
    UnknownMessageType(String),
    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport is not open")]
    NotOpen,
    #[error("failed to open transport: {0}")]
    Open(String),
    #[error("failed to send frame: {0}")]
    Send(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("already connected")]
    AlreadyConnected,
    #[error("already connecting")]
    AlreadyConnecting,
    #[error("not connected to a Buttplug server")]
    NotConnected,
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("sensor read was abandoned before a reading arrived")]
    ReadCanceled,
    #[error("failed to encode outbound batch: {0}")]
    Encode(#[source] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
