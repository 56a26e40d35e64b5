//! Opaque message relay between registered peers

use tracing::debug;

use crate::messages::{RelayKind, RelaySignal};
use crate::registry::{PeerRegistry, SessionId};

/// What happened to a relayed message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Pushed to the target's transport
    Delivered,
    /// Target is not registered or its transport is gone; dropped
    TargetMissing,
    /// Sender has no identifier to relay from; dropped
    SenderUnregistered,
}

/// Forward `signal` from the peer owning `sender` to its target.
///
/// The payload is never inspected. `end-session` also resets both the target
/// and the sender to available, whether or not the target was found.
pub fn forward(registry: &mut PeerRegistry, sender: SessionId, signal: RelaySignal) -> Delivery {
    let Some(from_id) = registry.id_for_session(sender).cloned() else {
        debug!("Dropping {} from unregistered session {:?}", signal.kind, sender);
        return Delivery::SenderUnregistered;
    };

    let kind = signal.kind;
    let (target_id, delivered) = match registry.lookup(&signal.target_id) {
        Some(target) => {
            let id = target.id().clone();
            let delivered =
                target.is_attached() && target.send(signal.relayed_from(from_id.clone()));
            if !delivered {
                debug!("Dropping {} from {}: target {} is detached", kind, from_id, id);
            }
            (Some(id), delivered)
        }
        None => {
            debug!("Dropping {} from {}: target {} not found", kind, from_id, signal.target_id);
            (None, false)
        }
    };

    if kind == RelayKind::EndSession {
        if let Some(target_id) = &target_id {
            registry.release(target_id);
        }
        registry.release(&from_id);
        debug!("Session ended by {}", from_id);
    }

    if delivered {
        Delivery::Delivered
    } else {
        Delivery::TargetMissing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Outbound;
    use crate::registry::tests::handle;
    use crate::registry::PeerStatus;
    use serde_json::{json, Map, Value};
    use tether_core::ConnectionId;

    fn payload(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn setup() -> (
        PeerRegistry,
        ConnectionId,
        ConnectionId,
        tokio::sync::mpsc::UnboundedReceiver<Outbound>,
    ) {
        let mut registry = PeerRegistry::new();
        let (a, _rx_a) = handle(1);
        let (b, rx_b) = handle(2);
        let a = registry.register(a, Some("111-111-111")).unwrap().id;
        let b = registry.register(b, Some("222-222-222")).unwrap().id;
        (registry, a, b, rx_b)
    }

    #[test]
    fn test_forward_delivers_with_source() {
        let (mut registry, a, _b, mut rx_b) = setup();
        let signal = RelaySignal::new(
            RelayKind::WebrtcIceCandidate,
            "222222222",
            payload(json!({"candidate": {"candidate": "candidate:1 1 udp 1 1.2.3.4 5 typ host"}})),
        );

        assert_eq!(forward(&mut registry, SessionId(1), signal), Delivery::Delivered);

        match rx_b.try_recv().unwrap() {
            Outbound::Relayed(relayed) => {
                assert_eq!(relayed.kind, RelayKind::WebrtcIceCandidate);
                assert_eq!(relayed.from_id, a);
                assert!(relayed.payload["candidate"]["candidate"]
                    .as_str()
                    .unwrap()
                    .starts_with("candidate:"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_forward_preserves_order() {
        let (mut registry, _a, _b, mut rx_b) = setup();
        for n in 0..10 {
            let signal = RelaySignal::new(
                RelayKind::WebrtcIceCandidate,
                "222-222-222",
                payload(json!({ "candidate": n })),
            );
            forward(&mut registry, SessionId(1), signal);
        }
        for n in 0..10 {
            match rx_b.try_recv().unwrap() {
                Outbound::Relayed(relayed) => assert_eq!(relayed.payload["candidate"], n),
                other => panic!("unexpected: {:?}", other),
            }
        }
    }

    #[test]
    fn test_missing_target_dropped() {
        let (mut registry, _a, _b, mut rx_b) = setup();
        let signal = RelaySignal::new(RelayKind::HostReady, "999-999-999", Map::new());
        assert_eq!(
            forward(&mut registry, SessionId(1), signal),
            Delivery::TargetMissing
        );
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_unregistered_sender_dropped() {
        let (mut registry, _a, _b, mut rx_b) = setup();
        let signal = RelaySignal::new(RelayKind::CameraReady, "222-222-222", Map::new());
        assert_eq!(
            forward(&mut registry, SessionId(9), signal),
            Delivery::SenderUnregistered
        );
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_end_session_resets_both() {
        let (mut registry, a, b, mut rx_b) = setup();
        registry.pair(&a, &b);

        let signal = RelaySignal::new(RelayKind::EndSession, "222-222-222", Map::new());
        assert_eq!(forward(&mut registry, SessionId(1), signal), Delivery::Delivered);

        assert_eq!(registry.get(&a).unwrap().status(), PeerStatus::Available);
        assert_eq!(registry.get(&b).unwrap().status(), PeerStatus::Available);
        assert!(matches!(
            rx_b.try_recv().unwrap(),
            Outbound::Relayed(r) if r.kind == RelayKind::EndSession
        ));
    }

    #[test]
    fn test_end_session_resets_sender_when_target_gone() {
        let (mut registry, a, b, _rx_b) = setup();
        registry.pair(&a, &b);
        registry.remove(&b);

        let signal = RelaySignal::new(RelayKind::EndSession, "222-222-222", Map::new());
        assert_eq!(
            forward(&mut registry, SessionId(1), signal),
            Delivery::TargetMissing
        );
        assert_eq!(registry.get(&a).unwrap().status(), PeerStatus::Available);
    }

    #[test]
    fn test_detached_target_not_delivered() {
        let (mut registry, _a, b, mut rx_b) = setup();
        assert_eq!(registry.detach(SessionId(2)), Some(b));

        let signal = RelaySignal::new(RelayKind::WebrtcOffer, "222-222-222", Map::new());
        assert_eq!(
            forward(&mut registry, SessionId(1), signal),
            Delivery::TargetMissing
        );
        assert!(rx_b.try_recv().is_err());
    }
}
