use crate::utils::{FakeNetwork, FakeTransport, RecordingSignaling};
use std::sync::Arc;
use telelink_core::{BusinessRole, PeerIdentity, PresenceRecord, RoomId, SignalingMessage};
use telelink_peer::SessionConfig;
use telelink_peer::negotiation::{NegotiationEngine, SignalOutcome};
use telelink_peer::timer::{TimerEvent, TimerSink};
use telelink_peer::transport::{TransportEpoch, TransportEvent, TransportEventSink};
use tokio::sync::mpsc;

pub const TEST_ROOM: &str = "consult-room";

/// One negotiation engine over a fake transport, with every outgoing signal
/// captured so a test controls delivery order.
pub struct EnginePeer {
    pub identity: PeerIdentity,
    pub engine: NegotiationEngine,
    pub transport: Arc<FakeTransport>,
    pub signaling: RecordingSignaling,
    events: mpsc::UnboundedReceiver<(TransportEpoch, TransportEvent)>,
    _timers: mpsc::UnboundedReceiver<(TransportEpoch, TimerEvent)>,
}

impl EnginePeer {
    pub fn new(network: &FakeNetwork, client: &str, role: BusinessRole) -> Self {
        let identity = PeerIdentity::new(client, role);
        let epoch = TransportEpoch(1);
        let (event_tx, events) = mpsc::unbounded_channel();
        let (timer_tx, timers) = mpsc::unbounded_channel();
        let transport = network.create_transport(TransportEventSink::new(epoch, event_tx));
        let signaling = RecordingSignaling::default();

        let engine = NegotiationEngine::new(
            identity.clone(),
            RoomId::new(TEST_ROOM),
            transport.clone(),
            Arc::new(signaling.clone()),
            TimerSink::new(epoch, timer_tx),
            &SessionConfig::local(),
        );

        Self {
            identity,
            engine,
            transport,
            signaling,
            events,
            _timers: timers,
        }
    }

    pub fn sent(&self) -> Vec<SignalingMessage> {
        self.signaling.take_sent()
    }

    pub async fn deliver(&mut self, messages: Vec<SignalingMessage>) -> Vec<SignalOutcome> {
        let mut outcomes = Vec::new();
        for message in messages {
            outcomes.push(self.engine.handle_signal(message).await.unwrap());
        }
        outcomes
    }

    /// Feed queued transport events the engine cares about back into it.
    pub async fn pump_transport(&mut self) {
        while let Ok((_, event)) = self.events.try_recv() {
            match event {
                TransportEvent::LocalCandidate(candidate) => {
                    self.engine.handle_local_candidate(candidate).await;
                }
                TransportEvent::NegotiationNeeded => {
                    self.engine.handle_negotiation_needed().await.unwrap();
                }
                _ => {}
            }
        }
    }
}

pub fn presence_of(peers: &[&EnginePeer]) -> Vec<PresenceRecord> {
    peers
        .iter()
        .map(|p| PresenceRecord::new(p.identity.client_id.clone(), p.identity.business_role))
        .collect()
}

/// Exchange signals until both sides go quiet.
pub async fn exchange(a: &mut EnginePeer, b: &mut EnginePeer) {
    for _ in 0..32 {
        a.pump_transport().await;
        b.pump_transport().await;
        let from_a = a.sent();
        let from_b = b.sent();
        if from_a.is_empty() && from_b.is_empty() {
            return;
        }
        b.deliver(from_a).await;
        a.deliver(from_b).await;
    }
    panic!("signaling did not settle");
}
