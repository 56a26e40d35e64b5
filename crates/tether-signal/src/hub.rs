//! Shared relay state
//!
//! Registry and broker live behind one mutex so every status flip, pairing
//! and deletion is a single atomic update. Pushes to peers happen while the
//! lock is held, which keeps delivery FIFO per sender and receiver.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use tether_core::{ConnectionId, IceServer};

use crate::broker::{ConnectionMetadata, RequestBroker, Resolution};
use crate::error::SignalError;
use crate::messages::{ErrorCode, Outbound, RelaySignal, ServerMessage};
use crate::reclaimer::{DisconnectReclaimer, ReclaimOutcome, ReclaimTicket};
use crate::registry::{PeerHandle, PeerRegistry, PeerStatus, SessionId};
use crate::relay::{self, Delivery};

#[derive(Debug, Default)]
struct HubState {
    registry: PeerRegistry,
    broker: RequestBroker,
}

/// Point-in-time view of one peer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerSnapshot {
    pub id: ConnectionId,
    pub status: PeerStatus,
    pub connected_to: Option<ConnectionId>,
    pub attached: bool,
}

/// Owner of all relay state
pub struct SignalHub {
    state: Mutex<HubState>,
    reclaimer: DisconnectReclaimer,
    next_session: AtomicU64,
    started_at: Instant,
}

impl SignalHub {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            reclaimer: DisconnectReclaimer::new(grace_period),
            next_session: AtomicU64::new(1),
            started_at: Instant::now(),
        }
    }

    /// Allocate a session and its outbound queue
    pub fn open_session(&self) -> (PeerHandle, mpsc::UnboundedReceiver<Outbound>) {
        let session = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        (PeerHandle::new(session, tx), rx)
    }

    /// Register the handle's session and reply `registered` (or `error`) to it
    pub fn register(
        &self,
        handle: &PeerHandle,
        preferred_id: Option<&str>,
        ice_servers: Vec<IceServer>,
    ) -> Result<ConnectionId, SignalError> {
        let mut state = self.state.lock();
        let result = state
            .registry
            .register(handle.clone(), preferred_id)
            .map(|registered| registered.id)
            .map_err(SignalError::from);

        handle.send(match &result {
            Ok(id) => ServerMessage::Registered {
                connection_id: id.clone(),
                ice_servers,
            },
            Err(e) => ServerMessage::error(ErrorCode::from(e), e.to_string()),
        });
        result
    }

    /// Ask for a session and reply `connection-request-result` to the viewer
    pub fn request_connection(
        &self,
        viewer: &PeerHandle,
        target_id: &str,
        metadata: ConnectionMetadata,
    ) -> Result<String, SignalError> {
        let mut state = self.state.lock();
        let HubState { registry, broker } = &mut *state;
        let result = broker.request_connection(registry, viewer.session(), target_id, metadata);
        viewer.send(ServerMessage::request_result(
            target_id.to_string(),
            result.clone(),
        ));
        result
    }

    pub fn respond(
        &self,
        responder: SessionId,
        request_id: &str,
        accepted: bool,
    ) -> Option<Resolution> {
        let mut state = self.state.lock();
        let HubState { registry, broker } = &mut *state;
        broker.respond(registry, responder, request_id, accepted)
    }

    pub fn forward(&self, sender: SessionId, signal: RelaySignal) -> Delivery {
        let mut state = self.state.lock();
        relay::forward(&mut state.registry, sender, signal)
    }

    /// Detach the session's peer and schedule its reclaim after the grace window
    pub fn disconnect(self: &Arc<Self>, session: SessionId) -> Option<ReclaimTicket> {
        let ticket = {
            let mut state = self.state.lock();
            self.reclaimer
                .on_transport_lost(&mut state.registry, session)?
        };

        let hub = Arc::clone(self);
        let scheduled = ticket.clone();
        let grace = self.reclaimer.grace();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            hub.reclaim(&scheduled);
        });

        Some(ticket)
    }

    /// Run a reclaim now
    pub fn reclaim(&self, ticket: &ReclaimTicket) -> ReclaimOutcome {
        let mut state = self.state.lock();
        let HubState { registry, broker } = &mut *state;
        self.reclaimer.reclaim(registry, broker, ticket)
    }

    pub fn peer(&self, id: &str) -> Option<PeerSnapshot> {
        let state = self.state.lock();
        state.registry.lookup(id).map(|peer| PeerSnapshot {
            id: peer.id().clone(),
            status: peer.status(),
            connected_to: peer.connected_to().cloned(),
            attached: peer.is_attached(),
        })
    }

    pub fn peer_count(&self) -> usize {
        self.state.lock().registry.len()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().broker.len()
    }

    pub fn grace_period(&self) -> Duration {
        self.reclaimer.grace()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for SignalHub {
    fn default() -> Self {
        Self::new(crate::reclaimer::DEFAULT_GRACE_PERIOD)
    }
}
