use telelink_peer::{DeviceTag, LocalSignalingHub, OutgoingTrack, TrackKind, TrackUpdate};

use crate::integration::{connected_pair, eventually, init_tracing};
use crate::utils::FakeNetwork;

fn camera_track(track_id: &str) -> OutgoingTrack {
    OutgoingTrack {
        track_id: track_id.to_owned(),
        stream_id: "consult-video".to_owned(),
        kind: TrackKind::Video,
        codec: "video/VP8".to_owned(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_new_device_renegotiates_and_swap_does_not() {
    init_tracing();
    let hub = LocalSignalingHub::new();
    let network = FakeNetwork::new();
    let (patient, practitioner) = connected_pair(&hub, &network).await;
    let offers = network.offers_created();
    let answers = network.answers_applied();

    let added = patient
        .handle
        .replace_device_stream(camera_track("camera-1"), DeviceTag::Camera)
        .await
        .unwrap();
    assert_eq!(added, TrackUpdate::Added);
    assert!(eventually(|| network.answers_applied() == answers + 1).await);
    assert_eq!(network.offers_created(), offers + 1);

    let swapped = patient
        .handle
        .replace_device_stream(camera_track("camera-2"), DeviceTag::Camera)
        .await
        .unwrap();
    assert_eq!(swapped, TrackUpdate::Replaced);
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    assert_eq!(network.offers_created(), offers + 1);

    assert!(patient.handle.is_data_channel_available());
    assert!(practitioner.handle.send_chat_message("still here").await);
}

#[tokio::test(start_paused = true)]
async fn test_replace_device_stream_needs_a_transport() {
    init_tracing();
    let hub = LocalSignalingHub::new();
    let network = FakeNetwork::new();
    let (patient, _practitioner) = connected_pair(&hub, &network).await;

    patient.handle.disconnect().await;
    let result = patient
        .handle
        .replace_device_stream(camera_track("camera-1"), DeviceTag::Camera)
        .await;
    assert!(result.is_err());
}
