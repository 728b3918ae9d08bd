use std::time::Duration;
use telelink_core::BusinessRole;
use telelink_peer::{LocalSignalingHub, PeerError, SessionPhase};

use crate::integration::{hub_peer, init_tracing, wait_for_status};
use crate::utils::FakeNetwork;

#[tokio::test(start_paused = true)]
async fn test_single_participant_waits_without_negotiating() {
    init_tracing();
    let hub = LocalSignalingHub::new();
    let network = FakeNetwork::new();
    let patient = hub_peer(&hub, &network, "patient-1", BusinessRole::Patient);

    patient.handle.connect().await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(!patient.handle.is_room_ready());
    assert!(!patient.handle.is_data_channel_available());
    assert_eq!(network.offers_created(), 0);
    assert!(!patient.handle.send_chat_message("anyone there?").await);

    let state = patient.handle.perfect_negotiation_state().await.unwrap();
    assert!(!state.polite);
    assert!(state.role_confirmed);
    assert!(!state.initial_triggered);
}

#[tokio::test(start_paused = true)]
async fn test_late_arrival_connects_to_waiting_peer() {
    init_tracing();
    let hub = LocalSignalingHub::new();
    let network = FakeNetwork::new();
    let practitioner = hub_peer(&hub, &network, "practitioner-1", BusinessRole::Practitioner);
    practitioner.handle.connect().await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    let patient = hub_peer(&hub, &network, "patient-1", BusinessRole::Patient);
    patient.handle.connect().await.unwrap();

    assert!(wait_for_status(&patient.handle, |s| s.data_channel_available).await);
    let state = patient.handle.perfect_negotiation_state().await.unwrap();
    assert!(state.polite);
}

#[tokio::test(start_paused = true)]
async fn test_reset_requires_active_session() {
    init_tracing();
    let hub = LocalSignalingHub::new();
    let network = FakeNetwork::new();
    let patient = hub_peer(&hub, &network, "patient-1", BusinessRole::Patient);

    let err = patient.handle.reset_peer_connection().await.unwrap_err();
    assert!(matches!(err, PeerError::InvalidState { .. }));

    patient.handle.connect().await.unwrap();
    patient.handle.disconnect().await;
    assert_eq!(patient.handle.status().phase, SessionPhase::Idle);
    assert!(patient.handle.perfect_negotiation_state().await.is_none());
    assert!(hub.participants(&telelink_core::RoomId::new(crate::utils::TEST_ROOM)).is_empty());
}
