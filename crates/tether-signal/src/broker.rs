//! Connection request handshake
//!
//! A viewer asks for a host by identifier; the host answers once. Each
//! pending request is one-shot: it is deleted when answered or when either
//! side is reclaimed, and later answers referencing it are ignored.

use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, info};

use tether_core::{ConnectionId, IdError};

use crate::error::SignalError;
use crate::messages::ServerMessage;
use crate::registry::{PeerRegistry, PeerStatus, SessionId};

/// Bytes of entropy in a request identifier
const REQUEST_ID_BYTES: usize = 8;

/// Optional details a viewer attaches to its request
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionMetadata {
    pub viewer_name: Option<String>,
    /// Passed through to the host unchecked
    pub password: Option<String>,
}

/// An unanswered connection request
#[derive(Clone, Debug)]
pub struct PendingRequest {
    pub request_id: String,
    pub viewer_id: ConnectionId,
    pub host_id: ConnectionId,
    /// Sessions of both sides when the request was made
    pub viewer_session: SessionId,
    pub host_session: SessionId,
    pub created_at: Instant,
}

/// How a response was applied
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Host and viewer are now paired
    Accepted,
    /// Viewer was told no
    Rejected,
    /// Viewer was gone; nothing was sent
    Discarded,
}

/// Requests removed because a peer was reclaimed
#[derive(Debug, Default)]
pub struct Reaped {
    pub as_host: Vec<PendingRequest>,
    pub as_viewer: Vec<PendingRequest>,
}

/// Pending connection requests by request identifier
#[derive(Debug, Default)]
pub struct RequestBroker {
    pending: HashMap<String, PendingRequest>,
}

impl RequestBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the peer registered as `target_id` for a session on behalf of `viewer`
    pub fn request_connection(
        &mut self,
        registry: &PeerRegistry,
        viewer: SessionId,
        target_id: &str,
        metadata: ConnectionMetadata,
    ) -> Result<String, SignalError> {
        let viewer_id = registry
            .id_for_session(viewer)
            .ok_or(SignalError::NotRegistered)?
            .clone();

        let host = registry
            .lookup(target_id)
            .filter(|peer| peer.is_attached())
            .ok_or_else(|| SignalError::PeerNotFound(target_id.to_string()))?;

        if host.id() == &viewer_id {
            return Err(SignalError::SelfConnection);
        }
        if host.status() == PeerStatus::Busy {
            return Err(SignalError::PeerBusy(host.id().clone()));
        }

        let request_id = self.fresh_request_id()?;

        host.send(ServerMessage::ConnectionRequest {
            request_id: request_id.clone(),
            viewer_id: viewer_id.clone(),
            viewer_name: metadata.viewer_name,
            password: metadata.password,
        });

        info!(
            "Connection request {} from {} to {}",
            request_id,
            viewer_id,
            host.id()
        );

        self.pending.insert(
            request_id.clone(),
            PendingRequest {
                request_id: request_id.clone(),
                viewer_id,
                host_id: host.id().clone(),
                viewer_session: viewer,
                host_session: host.session(),
                created_at: Instant::now(),
            },
        );

        Ok(request_id)
    }

    /// Apply the host's answer to a pending request.
    ///
    /// Returns `None` when nothing happened: the request is unknown or
    /// already resolved, or `responder` is not the request's host.
    pub fn respond(
        &mut self,
        registry: &mut PeerRegistry,
        responder: SessionId,
        request_id: &str,
        accepted: bool,
    ) -> Option<Resolution> {
        let Some(request) = self.pending.get(request_id) else {
            debug!("Ignoring response to unknown request {}", request_id);
            return None;
        };

        if registry.id_for_session(responder) != Some(&request.host_id) {
            debug!(
                "Ignoring response to {} from session {:?} (not the host)",
                request_id, responder
            );
            return None;
        }

        let request = self.pending.remove(request_id)?;
        let host_id = request.host_id;

        let viewer_live = registry
            .get(&request.viewer_id)
            .is_some_and(|v| v.is_attached() && v.session() == request.viewer_session);
        if !viewer_live {
            debug!("Discarding request {}: viewer is gone", request_id);
            return Some(Resolution::Discarded);
        }

        let engaged_elsewhere = |id: &ConnectionId, partner: &ConnectionId| {
            registry
                .get(id)
                .and_then(|p| p.connected_to())
                .is_some_and(|other| other != partner)
        };
        let busy = engaged_elsewhere(&host_id, &request.viewer_id)
            || engaged_elsewhere(&request.viewer_id, &host_id);

        if accepted && !busy {
            registry.pair(&host_id, &request.viewer_id);
            if let Some(viewer) = registry.get(&request.viewer_id) {
                viewer.send(ServerMessage::ConnectionAccepted {
                    host_id: host_id.clone(),
                });
            }
            info!("Peers {} and {} paired", host_id, request.viewer_id);
            return Some(Resolution::Accepted);
        }

        if let Some(viewer) = registry.get(&request.viewer_id) {
            viewer.send(ServerMessage::ConnectionRejected {
                host_id: host_id.clone(),
                reason: busy.then(|| "busy".to_string()),
            });
        }
        info!("Request {} rejected by {}", request_id, host_id);
        Some(Resolution::Rejected)
    }

    /// Remove every request involving `id`
    pub fn reap(&mut self, id: &ConnectionId) -> Reaped {
        let doomed: Vec<String> = self
            .pending
            .values()
            .filter(|r| &r.host_id == id || &r.viewer_id == id)
            .map(|r| r.request_id.clone())
            .collect();

        let mut reaped = Reaped::default();
        for request_id in doomed {
            if let Some(request) = self.pending.remove(&request_id) {
                if &request.host_id == id {
                    reaped.as_host.push(request);
                } else {
                    reaped.as_viewer.push(request);
                }
            }
        }
        reaped
    }

    pub fn get(&self, request_id: &str) -> Option<&PendingRequest> {
        self.pending.get(request_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn fresh_request_id(&self) -> Result<String, IdError> {
        loop {
            let mut bytes = [0u8; REQUEST_ID_BYTES];
            getrandom::fill(&mut bytes).map_err(|e| IdError::Entropy(e.to_string()))?;
            let id = hex::encode(bytes);
            if !self.pending.contains_key(&id) {
                return Ok(id);
            }
        }
    }
}
