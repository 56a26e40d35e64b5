//! Signal protocol messages
//!
//! Every frame is a JSON object whose `type` field names the event. Control
//! events are parsed into [`ClientMessage`]; relay events keep everything
//! except `type` and `targetId` as an opaque payload.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use tether_core::{ConnectionId, IceServer};

use crate::error::SignalError;

/// Control events sent by clients
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Claim (or re-claim) a connection identifier
    Register {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        preferred_id: Option<String>,
    },

    /// Ask a host for a session
    RequestConnection {
        target_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        viewer_name: Option<String>,
        /// Forwarded to the host as-is, never checked here
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },

    /// Host's answer to a connection request
    ConnectionResponse { request_id: String, accepted: bool },

    /// Keepalive
    Ping { timestamp: u64 },
}

/// Events relayed verbatim between two registered peers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelayKind {
    HostReady,
    RequestCamera,
    CameraResponse,
    CameraReady,
    WebrtcOffer,
    WebrtcAnswer,
    WebrtcIceCandidate,
    EndSession,
}

impl RelayKind {
    pub const ALL: [RelayKind; 8] = [
        RelayKind::HostReady,
        RelayKind::RequestCamera,
        RelayKind::CameraResponse,
        RelayKind::CameraReady,
        RelayKind::WebrtcOffer,
        RelayKind::WebrtcAnswer,
        RelayKind::WebrtcIceCandidate,
        RelayKind::EndSession,
    ];

    /// Event name on the wire
    pub fn as_str(self) -> &'static str {
        match self {
            RelayKind::HostReady => "host-ready",
            RelayKind::RequestCamera => "request-camera",
            RelayKind::CameraResponse => "camera-response",
            RelayKind::CameraReady => "camera-ready",
            RelayKind::WebrtcOffer => "webrtc-offer",
            RelayKind::WebrtcAnswer => "webrtc-answer",
            RelayKind::WebrtcIceCandidate => "webrtc-ice-candidate",
            RelayKind::EndSession => "end-session",
        }
    }
}

impl fmt::Display for RelayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelayKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RelayKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown relay event: {}", s))
    }
}

/// A relay event as received from its sender
#[derive(Clone, Debug, PartialEq)]
pub struct RelaySignal {
    pub kind: RelayKind,
    pub target_id: String,
    pub payload: Map<String, Value>,
}

impl RelaySignal {
    pub fn new(kind: RelayKind, target_id: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            kind,
            target_id: target_id.into(),
            payload,
        }
    }

    /// Re-address the payload as coming from `from_id`
    pub fn relayed_from(self, from_id: ConnectionId) -> RelayedSignal {
        RelayedSignal {
            kind: self.kind,
            from_id,
            payload: self.payload,
        }
    }
}

/// A relay event as delivered to its target
#[derive(Clone, Debug, PartialEq)]
pub struct RelayedSignal {
    pub kind: RelayKind,
    pub from_id: ConnectionId,
    pub payload: Map<String, Value>,
}

impl RelayedSignal {
    fn to_value(&self) -> Value {
        let mut object = self.payload.clone();
        object.insert("type".into(), Value::String(self.kind.as_str().into()));
        object.insert("fromId".into(), Value::String(self.from_id.to_string()));
        Value::Object(object)
    }
}

/// Anything a client may send
#[derive(Clone, Debug)]
pub enum Inbound {
    Control(ClientMessage),
    Relay(RelaySignal),
}

impl Inbound {
    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(json)?;
        let relay_kind = value
            .get("type")
            .and_then(Value::as_str)
            .and_then(|t| t.parse::<RelayKind>().ok());

        match (relay_kind, value) {
            (Some(kind), Value::Object(mut payload)) => {
                payload.remove("type");
                let target_id = match payload.remove("targetId") {
                    Some(Value::String(id)) => id,
                    _ => return Err(serde::de::Error::missing_field("targetId")),
                };
                Ok(Inbound::Relay(RelaySignal::new(kind, target_id, payload)))
            }
            (_, value) => serde_json::from_value(value).map(Inbound::Control),
        }
    }
}

/// Messages produced by the server
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Registration succeeded
    Registered {
        connection_id: ConnectionId,
        ice_servers: Vec<IceServer>,
    },

    /// Synchronous result of a `request-connection`
    ConnectionRequestResult {
        target_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorCode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Pushed to a host when a viewer asks for a session
    ConnectionRequest {
        request_id: String,
        viewer_id: ConnectionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        viewer_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },

    /// Pushed to a viewer when the host accepts
    ConnectionAccepted { host_id: ConnectionId },

    /// Pushed to a viewer when the host rejects or goes away
    ConnectionRejected {
        host_id: ConnectionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Pushed to a paired peer after its partner is reclaimed
    PeerDisconnected { peer_id: ConnectionId, reason: String },

    /// Error response
    Error { code: ErrorCode, message: String },

    /// Pong response
    Pong { timestamp: u64 },
}

/// Error codes
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Target identifier is not registered
    PeerNotFound,

    /// Target is already paired
    PeerBusy,

    /// Caller has not registered yet
    NotRegistered,

    /// Caller targeted its own identifier
    SelfConnection,

    /// Frame could not be parsed
    InvalidMessage,

    /// Internal server error
    InternalError,
}

impl ServerMessage {
    /// Create an error message
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// Wrap the outcome of a connection request
    pub fn request_result(target_id: String, result: Result<String, SignalError>) -> Self {
        match result {
            Ok(request_id) => Self::ConnectionRequestResult {
                target_id,
                request_id: Some(request_id),
                error: None,
                message: None,
            },
            Err(e) => Self::ConnectionRequestResult {
                target_id,
                request_id: None,
                error: Some(ErrorCode::from(&e)),
                message: Some(e.to_string()),
            },
        }
    }
}

/// Anything the server pushes to a client
#[derive(Clone, Debug)]
pub enum Outbound {
    Message(ServerMessage),
    Relayed(RelayedSignal),
}

impl Outbound {
    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Outbound::Message(msg) => serde_json::to_string(msg),
            Outbound::Relayed(signal) => serde_json::to_string(&signal.to_value()),
        }
    }
}

impl From<ServerMessage> for Outbound {
    fn from(msg: ServerMessage) -> Self {
        Outbound::Message(msg)
    }
}

impl From<RelayedSignal> for Outbound {
    fn from(signal: RelayedSignal) -> Self {
        Outbound::Relayed(signal)
    }
}
