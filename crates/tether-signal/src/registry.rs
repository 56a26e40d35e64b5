//! Peer registry: connection identifiers to live peers

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info};

use tether_core::{ConnectionId, IdError};

use crate::messages::Outbound;

/// Identity of one transport session (one WebSocket connection)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

/// Outbound half of a peer's transport
#[derive(Clone, Debug)]
pub struct PeerHandle {
    session: SessionId,
    outbox: mpsc::UnboundedSender<Outbound>,
}

impl PeerHandle {
    pub fn new(session: SessionId, outbox: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { session, outbox }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Fire-and-forget push; false once the transport is gone
    pub fn send(&self, msg: impl Into<Outbound>) -> bool {
        self.outbox.send(msg.into()).is_ok()
    }
}

/// Pairing state of a peer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerStatus {
    Available,
    Busy,
}

/// A registered peer
#[derive(Debug)]
pub struct Peer {
    id: ConnectionId,
    handle: PeerHandle,
    /// False while the transport is lost and the entry waits out its grace window
    attached: bool,
    connected_to: Option<ConnectionId>,
    registered_at: Instant,
}

impl Peer {
    fn new(id: ConnectionId, handle: PeerHandle) -> Self {
        Self {
            id,
            handle,
            attached: true,
            connected_to: None,
            registered_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn session(&self) -> SessionId {
        self.handle.session
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Busy exactly when paired
    pub fn status(&self) -> PeerStatus {
        if self.connected_to.is_some() {
            PeerStatus::Busy
        } else {
            PeerStatus::Available
        }
    }

    pub fn connected_to(&self) -> Option<&ConnectionId> {
        self.connected_to.as_ref()
    }

    pub fn registered_at(&self) -> Instant {
        self.registered_at
    }

    /// Push a message to this peer's transport
    pub fn send(&self, msg: impl Into<Outbound>) -> bool {
        self.handle.send(msg)
    }
}

/// How a `register` call was satisfied
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Registration {
    /// The session already held a live entry
    Existing,
    /// A new entry was created
    Created,
    /// A detached entry was taken over by a new session
    Resumed,
}

/// Result of a `register` call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registered {
    pub id: ConnectionId,
    pub kind: Registration,
}

/// Registry of peers by connection identifier
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<ConnectionId, Peer>,
    /// Live sessions to the entry they own
    sessions: HashMap<SessionId, ConnectionId>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transport session, reusing its identifier if it already has one
    pub fn register(
        &mut self,
        handle: PeerHandle,
        preferred_id: Option<&str>,
    ) -> Result<Registered, IdError> {
        if let Some(id) = self.sessions.get(&handle.session) {
            return Ok(Registered {
                id: id.clone(),
                kind: Registration::Existing,
            });
        }

        if let Some(id) = preferred_id.and_then(ConnectionId::parse) {
            match self.peers.get_mut(&id) {
                None => return Ok(self.insert(id, handle)),
                Some(peer) if !peer.attached => {
                    self.sessions.insert(handle.session, id.clone());
                    peer.handle = handle;
                    peer.attached = true;
                    info!("Peer {} resumed on session {:?}", id, peer.session());
                    return Ok(Registered {
                        id,
                        kind: Registration::Resumed,
                    });
                }
                Some(_) => debug!("Preferred id {} is held by a live peer", id),
            }
        }

        loop {
            let id = ConnectionId::generate()?;
            if !self.peers.contains_key(&id) {
                return Ok(self.insert(id, handle));
            }
        }
    }

    fn insert(&mut self, id: ConnectionId, handle: PeerHandle) -> Registered {
        info!("Peer {} registered on session {:?}", id, handle.session);
        self.sessions.insert(handle.session, id.clone());
        self.peers.insert(id.clone(), Peer::new(id.clone(), handle));
        Registered {
            id,
            kind: Registration::Created,
        }
    }

    /// Find a peer; dashes and whitespace in `id` are ignored
    pub fn lookup(&self, id: &str) -> Option<&Peer> {
        ConnectionId::parse(id).and_then(|id| self.peers.get(&id))
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&Peer> {
        self.peers.get(id)
    }

    /// Identifier owned by a live session
    pub fn id_for_session(&self, session: SessionId) -> Option<&ConnectionId> {
        self.sessions.get(&session)
    }

    /// Mark a session's entry as detached, keeping its identifier and pairing
    pub fn detach(&mut self, session: SessionId) -> Option<ConnectionId> {
        let id = self.sessions.remove(&session)?;
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.attached = false;
        }
        Some(id)
    }

    /// Delete an entry. Related peers are not notified.
    pub fn remove(&mut self, id: &ConnectionId) -> Option<Peer> {
        let peer = self.peers.remove(id)?;
        if self.sessions.get(&peer.session()) == Some(id) {
            self.sessions.remove(&peer.session());
        }
        Some(peer)
    }

    /// Mark two peers as connected to each other
    pub fn pair(&mut self, a: &ConnectionId, b: &ConnectionId) -> bool {
        if a == b || !self.peers.contains_key(a) || !self.peers.contains_key(b) {
            return false;
        }
        if let Some(peer) = self.peers.get_mut(a) {
            peer.connected_to = Some(b.clone());
        }
        if let Some(peer) = self.peers.get_mut(b) {
            peer.connected_to = Some(a.clone());
        }
        true
    }

    /// Reset a peer to available, returning its former partner
    pub fn release(&mut self, id: &ConnectionId) -> Option<ConnectionId> {
        self.peers.get_mut(id)?.connected_to.take()
    }

    /// Number of peers, attached or in their grace window
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
