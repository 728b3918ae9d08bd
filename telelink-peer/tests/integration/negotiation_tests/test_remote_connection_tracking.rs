use telelink_core::{
    BusinessRole, ClientId, ConnectionId, RoomId, SignalPayload, SignalingMessage,
};
use telelink_peer::negotiation::SignalOutcome;
use telelink_peer::timer::TimerEvent;

use crate::integration::init_tracing;
use crate::utils::{EnginePeer, FakeNetwork, TEST_ROOM, exchange, presence_of};

fn message_from(
    sender: &str,
    connection_id: ConnectionId,
    timestamp: u64,
    payload: SignalPayload,
) -> SignalingMessage {
    SignalingMessage {
        sender: ClientId::from(sender),
        room_id: RoomId::new(TEST_ROOM),
        connection_id,
        timestamp,
        payload,
    }
}

#[tokio::test]
async fn test_claim_from_rebuilt_remote_is_reported() {
    init_tracing();
    let network = FakeNetwork::new();
    let mut a = EnginePeer::new(&network, "client-a", BusinessRole::Patient);
    let mut b = EnginePeer::new(&network, "client-b", BusinessRole::Practitioner);
    let presence = presence_of(&[&a, &b]);
    a.engine.start(&presence, true).await;
    b.engine.start(&presence, true).await;
    a.engine.handle_timer(TimerEvent::RoleArrival).await;
    exchange(&mut a, &mut b).await;
    a.engine.handle_timer(TimerEvent::RoleConfirm).await;
    a.engine.handle_negotiation_needed().await.unwrap();
    exchange(&mut a, &mut b).await;
    assert!(a.transport.is_connected());

    // b tears down and comes back on a fresh transport.
    b.engine.destroy().await;
    let mut rebuilt = EnginePeer::new(&network, "client-b", BusinessRole::Practitioner);
    rebuilt.engine.start(&presence, true).await;
    rebuilt.engine.handle_timer(TimerEvent::RoleArrival).await;
    let claim = rebuilt.sent();
    assert_eq!(claim[0].connection_id, rebuilt.transport.id());

    let outcomes = a.deliver(claim).await;
    match &outcomes[0] {
        SignalOutcome::RemoteRebuilt(message) => {
            assert_eq!(message.connection_id, rebuilt.transport.id());
        }
        other => panic!("expected a rebuild, got {other:?}"),
    }
}

#[tokio::test]
async fn test_messages_from_retired_connection_are_dropped() {
    init_tracing();
    let network = FakeNetwork::new();
    let mut a = EnginePeer::new(&network, "client-a", BusinessRole::Patient);
    let retired = ConnectionId::new();
    let current = ConnectionId::new();

    let outcomes = a
        .deliver(vec![message_from("client-b", current, 2_000, SignalPayload::RoleClaim)])
        .await;
    assert!(matches!(outcomes[0], SignalOutcome::Applied));
    assert!(a.engine.snapshot().polite);

    let outcomes = a
        .deliver(vec![message_from("client-b", retired, 1_000, SignalPayload::RoleRelease)])
        .await;
    assert!(matches!(outcomes[0], SignalOutcome::Ignored));
    assert_eq!(
        a.engine.snapshot().remote_impolite,
        Some(ClientId::from("client-b"))
    );
}

#[tokio::test]
async fn test_candidates_wait_for_matching_description() {
    init_tracing();
    let network = FakeNetwork::new();
    let mut a = EnginePeer::new(&network, "client-a", BusinessRole::Patient);
    let mut b = EnginePeer::new(&network, "client-b", BusinessRole::Practitioner);

    b.engine.handle_negotiation_needed().await.unwrap();
    let offer = b.sent();
    b.pump_transport().await;
    let candidates = b.sent();
    assert_eq!(candidates.len(), 1);

    // A candidate for a connection we never heard of is discarded on bind.
    let unrelated = message_from(
        "client-c",
        ConnectionId::new(),
        candidates[0].timestamp,
        candidates[0].payload.clone(),
    );
    a.deliver(vec![unrelated]).await;
    a.deliver(candidates).await;
    assert_eq!(a.engine.snapshot().pending_candidates, 2);
    assert_eq!(a.transport.candidates_applied(), 0);

    let outcomes = a.deliver(offer).await;
    assert!(matches!(outcomes[0], SignalOutcome::Applied));
    assert_eq!(a.engine.snapshot().pending_candidates, 0);
    assert_eq!(a.transport.candidates_applied(), 1);
    assert_eq!(a.signaling.sent_kinds(), vec!["answer"]);
}

#[tokio::test]
async fn test_messages_for_other_rooms_are_ignored() {
    init_tracing();
    let network = FakeNetwork::new();
    let mut a = EnginePeer::new(&network, "client-a", BusinessRole::Patient);

    let mut claim = message_from("client-b", ConnectionId::new(), 1_000, SignalPayload::RoleClaim);
    claim.room_id = RoomId::new("another-room");
    let outcomes = a.deliver(vec![claim]).await;

    assert!(matches!(outcomes[0], SignalOutcome::Ignored));
    assert!(a.engine.snapshot().remote_impolite.is_none());
}
