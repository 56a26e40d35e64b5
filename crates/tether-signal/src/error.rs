//! Error types for the signal server

use thiserror::Error;

use tether_core::{ConnectionId, IdError};

use crate::messages::ErrorCode;

/// Handshake-path failures, returned to the requesting caller only
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalError {
    #[error("peer {0} not found")]
    PeerNotFound(String),

    #[error("peer {0} is busy")]
    PeerBusy(ConnectionId),

    #[error("register before requesting a connection")]
    NotRegistered,

    #[error("cannot connect to yourself")]
    SelfConnection,

    #[error(transparent)]
    Id(#[from] IdError),
}

impl From<&SignalError> for ErrorCode {
    fn from(e: &SignalError) -> Self {
        match e {
            SignalError::PeerNotFound(_) => ErrorCode::PeerNotFound,
            SignalError::PeerBusy(_) => ErrorCode::PeerBusy,
            SignalError::NotRegistered => ErrorCode::NotRegistered,
            SignalError::SelfConnection => ErrorCode::SelfConnection,
            SignalError::Id(_) => ErrorCode::InternalError,
        }
    }
}

/// Failures talking to the NAT-traversal credential service
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("credential request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("credential service returned status {0}")]
    Status(u16),

    #[error("failed to decode credential response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("no credential service configured")]
    NotConfigured,
}
