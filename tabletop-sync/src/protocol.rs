//! Push-channel wire protocol.
//!
//! Frames are JSON text, adjacently tagged:
//! ```text
//! peer → server           {"type": "updatePlacement",  "payload": <PlacementUpdate>}
//! server → new peer, once  {"type": "initialState",     "payload": {"cards": {...}}}
//! server → other peers     {"type": "placementChanged", "payload": <PlacementUpdate>}
//! server → all peers       {"type": "stateReset",       "payload": {"cards": {...}}}
//! server → offending peer  {"type": "error",            "payload": {"message": "..."}}
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tabletop_core::{ModelError, PlacementUpdate, Snapshot};
use thiserror::Error;
use uuid::Uuid;

/// Identity of one live push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Messages a peer may send to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ClientMessage {
    UpdatePlacement(PlacementUpdate),
}

impl ClientMessage {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Serialization)
    }

    /// Parse and shape-check an inbound frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let msg: Self = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
        match &msg {
            ClientMessage::UpdatePlacement(update) => update.validate()?,
        }
        Ok(msg)
    }

    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::NotUtf8)?;
        Self::decode(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Messages the server pushes to peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ServerMessage {
    InitialState(Snapshot),
    PlacementChanged(PlacementUpdate),
    StateReset(Snapshot),
    Error(ErrorPayload),
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorPayload {
            message: message.into(),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::InitialState(_) => "initialState",
            ServerMessage::PlacementChanged(_) => "placementChanged",
            ServerMessage::StateReset(_) => "stateReset",
            ServerMessage::Error(_) => "error",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Serialization)
    }

    /// Encode once for delivery to many peers.
    pub fn encode_shared(&self) -> Result<Frame, ProtocolError> {
        self.encode().map(Arc::from)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Malformed)
    }
}

/// A pre-encoded frame shared by every outbox it is queued on.
pub type Frame = Arc<str>;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(#[source] serde_json::Error),
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("invalid placement: {0}")]
    Invalid(#[from] ModelError),
    #[error("frame is not valid UTF-8")]
    NotUtf8,
}
