use telelink_core::BusinessRole;
use telelink_core::time::now_millis;
use telelink_peer::LocalSignalingHub;

use crate::integration::{connected_pair, eventually, init_tracing};
use crate::utils::FakeNetwork;

#[tokio::test(start_paused = true)]
async fn test_chat_round_trip() {
    init_tracing();
    let hub = LocalSignalingHub::new();
    let network = FakeNetwork::new();
    let (patient, practitioner) = connected_pair(&hub, &network).await;

    assert!(practitioner.handle.send_chat_message("How are you feeling today?").await);
    assert!(eventually(|| !patient.observer.chats().is_empty()).await);

    let received = patient.observer.chats().remove(0);
    assert_eq!(received.content, "How are you feeling today?");
    assert_eq!(received.sender, practitioner.identity.client_id);
    assert_eq!(received.sender_role, BusinessRole::Practitioner);
    assert!(received.timestamp > 0);
    assert!(received.timestamp <= now_millis());

    assert!(patient.handle.send_chat_message("Much better, thanks").await);
    assert!(eventually(|| !practitioner.observer.chats().is_empty()).await);
    let reply = practitioner.observer.chats().remove(0);
    assert_eq!(reply.sender_role, BusinessRole::Patient);
    assert_eq!(reply.content, "Much better, thanks");
}

#[tokio::test(start_paused = true)]
async fn test_rapid_chat_messages_arrive_in_order() {
    init_tracing();
    let hub = LocalSignalingHub::new();
    let network = FakeNetwork::new();
    let (patient, practitioner) = connected_pair(&hub, &network).await;

    for i in 0..20 {
        assert!(patient.handle.send_chat_message(format!("reading {i}")).await);
    }
    assert!(eventually(|| practitioner.observer.chats().len() == 20).await);

    let contents: Vec<String> = practitioner
        .observer
        .chats()
        .into_iter()
        .map(|c| c.content)
        .collect();
    let expected: Vec<String> = (0..20).map(|i| format!("reading {i}")).collect();
    assert_eq!(contents, expected);
}
