//! Reclaiming peers whose transport went away
//!
//! Losing a transport only detaches the peer's entry. After the grace window
//! the entry is compared against the snapshot taken at loss time: if another
//! session has since taken the identifier over, nothing happens.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use tether_core::ConnectionId;

use crate::broker::RequestBroker;
use crate::messages::ServerMessage;
use crate::registry::{PeerRegistry, SessionId};

/// Grace window before a lost peer is reclaimed
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Reason pushed to a paired peer
pub const PEER_DISCONNECTED_REASON: &str = "Peer disconnected";

/// Reason pushed to viewers waiting on a host that went away
pub const HOST_DISCONNECTED_REASON: &str = "Host disconnected";

/// Snapshot of a lost transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReclaimTicket {
    pub id: ConnectionId,
    pub session: SessionId,
    pub lost_at: Instant,
}

/// What a reclaim attempt did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReclaimOutcome {
    /// Entry, pairing and pending requests were torn down
    Reclaimed,
    /// The identifier was re-registered by another session; left alone
    Reactivated,
    /// Entry was already gone
    AlreadyRemoved,
}

#[derive(Clone, Debug)]
pub struct DisconnectReclaimer {
    grace: Duration,
}

impl Default for DisconnectReclaimer {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}

impl DisconnectReclaimer {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Detach the session's entry. Returns `None` if it never registered.
    pub fn on_transport_lost(
        &self,
        registry: &mut PeerRegistry,
        session: SessionId,
    ) -> Option<ReclaimTicket> {
        let id = registry.detach(session)?;
        debug!(
            "Peer {} lost its transport, reclaiming in {:?}",
            id, self.grace
        );
        Some(ReclaimTicket {
            id,
            session,
            lost_at: Instant::now(),
        })
    }

    /// Tear down the ticket's peer unless it was taken over in the meantime
    pub fn reclaim(
        &self,
        registry: &mut PeerRegistry,
        broker: &mut RequestBroker,
        ticket: &ReclaimTicket,
    ) -> ReclaimOutcome {
        let Some(peer) = registry.get(&ticket.id) else {
            return ReclaimOutcome::AlreadyRemoved;
        };
        if peer.session() != ticket.session {
            debug!("Peer {} re-registered, keeping it", ticket.id);
            return ReclaimOutcome::Reactivated;
        }

        let partner = peer.connected_to().cloned();
        if let Some(partner_id) = partner {
            let paired_back = registry
                .get(&partner_id)
                .is_some_and(|p| p.connected_to() == Some(&ticket.id));
            if paired_back {
                if let Some(partner) = registry.get(&partner_id) {
                    partner.send(ServerMessage::PeerDisconnected {
                        peer_id: ticket.id.clone(),
                        reason: PEER_DISCONNECTED_REASON.to_string(),
                    });
                }
                registry.release(&partner_id);
            }
        }

        let reaped = broker.reap(&ticket.id);
        for request in &reaped.as_host {
            if let Some(viewer) = registry.get(&request.viewer_id) {
                viewer.send(ServerMessage::ConnectionRejected {
                    host_id: ticket.id.clone(),
                    reason: Some(HOST_DISCONNECTED_REASON.to_string()),
                });
            }
        }

        registry.remove(&ticket.id);
        info!(
            "Peer {} reclaimed after {:?} ({} pending requests dropped)",
            ticket.id,
            ticket.lost_at.elapsed(),
            reaped.as_host.len() + reaped.as_viewer.len()
        );
        ReclaimOutcome::Reclaimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::ConnectionMetadata;
    use crate::messages::Outbound;
    use crate::registry::tests::handle;
    use crate::registry::PeerStatus;

    const HOST: SessionId = SessionId(1);
    const VIEWER: SessionId = SessionId(2);

    fn paired() -> (
        PeerRegistry,
        RequestBroker,
        ConnectionId,
        ConnectionId,
        tokio::sync::mpsc::UnboundedReceiver<Outbound>,
    ) {
        let mut registry = PeerRegistry::new();
        let mut broker = RequestBroker::new();
        let (h, _host_rx) = handle(HOST.0);
        let (v, viewer_rx) = handle(VIEWER.0);
        let host = registry.register(h, Some("111-111-111")).unwrap().id;
        let viewer = registry.register(v, Some("222-222-222")).unwrap().id;
        let rid = broker
            .request_connection(&registry, VIEWER, "111111111", ConnectionMetadata::default())
            .unwrap();
        broker.respond(&mut registry, HOST, &rid, true);
        (registry, broker, host, viewer, viewer_rx)
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Outbound>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(Outbound::Message(msg)) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_unregistered_session_has_no_ticket() {
        let reclaimer = DisconnectReclaimer::default();
        let mut registry = PeerRegistry::new();
        assert!(reclaimer
            .on_transport_lost(&mut registry, SessionId(7))
            .is_none());
    }

    #[test]
    fn test_reclaim_notifies_partner() {
        let reclaimer = DisconnectReclaimer::default();
        let (mut registry, mut broker, host, viewer, mut viewer_rx) = paired();
        drain(&mut viewer_rx);

        let ticket = reclaimer.on_transport_lost(&mut registry, HOST).unwrap();
        assert_eq!(ticket.id, host);
        // Pairing survives the grace window
        assert_eq!(registry.get(&viewer).unwrap().status(), PeerStatus::Busy);

        let outcome = reclaimer.reclaim(&mut registry, &mut broker, &ticket);
        assert_eq!(outcome, ReclaimOutcome::Reclaimed);
        assert!(registry.get(&host).is_none());
        assert_eq!(registry.get(&viewer).unwrap().status(), PeerStatus::Available);

        let msgs = drain(&mut viewer_rx);
        assert_eq!(msgs.len(), 1);
        match &msgs[0] {
            ServerMessage::PeerDisconnected { peer_id, reason } => {
                assert_eq!(peer_id, &host);
                assert_eq!(reason, PEER_DISCONNECTED_REASON);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_reregistration_wins() {
        let reclaimer = DisconnectReclaimer::default();
        let (mut registry, mut broker, host, viewer, mut viewer_rx) = paired();
        drain(&mut viewer_rx);

        let ticket = reclaimer.on_transport_lost(&mut registry, HOST).unwrap();
        let (h2, _rx) = handle(10);
        registry.register(h2, Some("111-111-111")).unwrap();

        let outcome = reclaimer.reclaim(&mut registry, &mut broker, &ticket);
        assert_eq!(outcome, ReclaimOutcome::Reactivated);
        assert_eq!(registry.get(&host).unwrap().connected_to(), Some(&viewer));
        assert_eq!(registry.get(&viewer).unwrap().connected_to(), Some(&host));
        assert!(drain(&mut viewer_rx).is_empty());
    }

    #[test]
    fn test_already_removed() {
        let reclaimer = DisconnectReclaimer::default();
        let (mut registry, mut broker, host, _viewer, _viewer_rx) = paired();

        let ticket = reclaimer.on_transport_lost(&mut registry, HOST).unwrap();
        registry.remove(&host);
        assert_eq!(
            reclaimer.reclaim(&mut registry, &mut broker, &ticket),
            ReclaimOutcome::AlreadyRemoved
        );
    }

    #[test]
    fn test_pending_requests_reaped() {
        let reclaimer = DisconnectReclaimer::default();
        let mut registry = PeerRegistry::new();
        let mut broker = RequestBroker::new();
        let (h, _host_rx) = handle(HOST.0);
        let (v, mut viewer_rx) = handle(VIEWER.0);
        let (o, _other_rx) = handle(3);
        let host = registry.register(h, Some("111-111-111")).unwrap().id;
        registry.register(v, Some("222-222-222")).unwrap();
        registry.register(o, Some("333-333-333")).unwrap();

        let waiting = broker
            .request_connection(&registry, VIEWER, "111-111-111", Default::default())
            .unwrap();
        let outgoing = broker
            .request_connection(&registry, HOST, "333-333-333", Default::default())
            .unwrap();

        let ticket = reclaimer.on_transport_lost(&mut registry, HOST).unwrap();
        reclaimer.reclaim(&mut registry, &mut broker, &ticket);

        assert!(broker.get(&waiting).is_none());
        assert!(broker.get(&outgoing).is_none());
        match drain(&mut viewer_rx).as_slice() {
            [ServerMessage::ConnectionRejected { host_id, reason }] => {
                assert_eq!(host_id, &host);
                assert_eq!(reason.as_deref(), Some(HOST_DISCONNECTED_REASON));
            }
            other => panic!("unexpected: {:?}", other),
        }

        // A late answer finds nothing
        assert_eq!(broker.respond(&mut registry, HOST, &waiting, true), None);
    }

    #[test]
    fn test_partner_moved_on_is_left_alone() {
        let reclaimer = DisconnectReclaimer::default();
        let (mut registry, mut broker, host, viewer, mut viewer_rx) = paired();
        drain(&mut viewer_rx);

        let ticket = reclaimer.on_transport_lost(&mut registry, HOST).unwrap();
        // Viewer ends the session one-sidedly and pairs with someone else
        registry.release(&viewer);
        let (o, _rx) = handle(3);
        let other = registry.register(o, Some("333-333-333")).unwrap().id;
        registry.pair(&viewer, &other);

        reclaimer.reclaim(&mut registry, &mut broker, &ticket);
        assert!(registry.get(&host).is_none());
        assert_eq!(registry.get(&viewer).unwrap().connected_to(), Some(&other));
        assert!(drain(&mut viewer_rx).is_empty());
    }
}
