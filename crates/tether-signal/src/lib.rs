//! Tether Signal Server
//!
//! Rendezvous and signaling relay for remote sessions. A host and a viewer
//! find each other through a short numeric identifier, complete a
//! request/accept handshake, and exchange opaque negotiation messages over
//! WebSocket until their direct peer-to-peer session is up.
//!
//! # Protocol
//!
//! 1. Both sides `register` and receive a connection identifier plus ICE servers
//! 2. The viewer sends `request-connection` with the host's identifier
//! 3. The host answers with `connection-response`
//! 4. Offers, answers and candidates are relayed between the pair
//! 5. `end-session` or a transport loss past the grace window releases both

pub mod broker;
pub mod error;
pub mod hub;
pub mod ice;
pub mod messages;
pub mod reclaimer;
pub mod registry;
pub mod relay;
pub mod server;

pub use broker::{ConnectionMetadata, RequestBroker, Resolution};
pub use error::{CredentialError, SignalError};
pub use hub::{PeerSnapshot, SignalHub};
pub use ice::{HttpIceProvider, IceCache, IceProvider};
pub use messages::{ClientMessage, ErrorCode, Inbound, Outbound, RelayKind, ServerMessage};
pub use reclaimer::{DisconnectReclaimer, ReclaimOutcome};
pub use registry::{PeerRegistry, PeerStatus, SessionId};
pub use server::SignalServer;

/// Default WebSocket port
pub const DEFAULT_PORT: u16 = 8080;
