use crate::config::SessionConfig;
use crate::data_channel::{DataChannelManager, InboundMessage};
use crate::error::{PeerError, Result};
use crate::negotiation::{NegotiationEngine, SignalOutcome};
use crate::observer::{NoopObserver, SessionObserver};
use crate::signaling::{SignalingChannel, SignalingEvent};
use crate::supervisor::diagnostics::{ConnectionDiagnostics, SessionPhase, SessionStatus};
use crate::supervisor::health;
use crate::supervisor::session_command::SessionCommand;
use crate::supervisor::session_handle::SessionHandle;
use crate::timer::{ScheduledTask, TimerEvent, TimerSink};
use crate::transport::{
    PeerConnectionState, PeerTransport, RtcTransportFactory, TransportEpoch, TransportEvent,
    TransportEventSink, TransportFactory,
};
use std::sync::Arc;
use telelink_core::{
    PeerIdentity, PresenceRecord, RoomId, SignalingMessage, has_patient_and_practitioner,
    valid_participants,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

const COMMAND_BUFFER: usize = 64;

/// Transport plus the state that lives and dies with it.
struct PeerLink {
    transport: Arc<dyn PeerTransport>,
    engine: NegotiationEngine,
    channels: DataChannelManager,
    /// The client bound to this transport left the room at some point.
    remote_departed: bool,
}

pub struct SessionBuilder {
    identity: PeerIdentity,
    room_id: RoomId,
    signaling: Arc<dyn SignalingChannel>,
    config: SessionConfig,
    factory: Arc<dyn TransportFactory>,
    observer: Arc<dyn SessionObserver>,
}

impl SessionBuilder {
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn build(self) -> (PeerSession, SessionHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());

        let session = PeerSession {
            identity: self.identity,
            room_id: self.room_id,
            config: self.config,
            signaling: self.signaling,
            factory: self.factory,
            observer: self.observer,
            command_rx,
            signal_rx: None,
            transport_tx,
            transport_rx,
            timer_tx,
            timer_rx,
            status_tx,
            phase: SessionPhase::Idle,
            epoch: TransportEpoch::default(),
            link: None,
            participants: Vec::new(),
            room_ready: false,
            connection_state: PeerConnectionState::New,
            channel_available: false,
            grace_timer: None,
            heartbeat: None,
            reset_count: 0,
            last_error: None,
        };
        (session, SessionHandle::new(command_tx, status_rx))
    }

    /// Build and run the session on the current runtime.
    pub fn spawn(self) -> SessionHandle {
        let (session, handle) = self.build();
        tokio::spawn(session.run());
        handle
    }
}

/// Connection supervisor for one participant. Owns the transport, the
/// negotiation engine and the data channel, and processes one event at a
/// time.
pub struct PeerSession {
    identity: PeerIdentity,
    room_id: RoomId,
    config: SessionConfig,
    signaling: Arc<dyn SignalingChannel>,
    factory: Arc<dyn TransportFactory>,
    observer: Arc<dyn SessionObserver>,

    command_rx: mpsc::Receiver<SessionCommand>,
    signal_rx: Option<mpsc::UnboundedReceiver<SignalingEvent>>,
    transport_tx: mpsc::UnboundedSender<(TransportEpoch, TransportEvent)>,
    transport_rx: mpsc::UnboundedReceiver<(TransportEpoch, TransportEvent)>,
    timer_tx: mpsc::UnboundedSender<(TransportEpoch, TimerEvent)>,
    timer_rx: mpsc::UnboundedReceiver<(TransportEpoch, TimerEvent)>,
    status_tx: watch::Sender<SessionStatus>,

    phase: SessionPhase,
    epoch: TransportEpoch,
    link: Option<PeerLink>,
    participants: Vec<PresenceRecord>,
    room_ready: bool,
    /// Last state reported to the observer.
    connection_state: PeerConnectionState,
    channel_available: bool,
    grace_timer: Option<ScheduledTask>,
    heartbeat: Option<ScheduledTask>,
    reset_count: u32,
    last_error: Option<String>,
}

impl PeerSession {
    /// Sessions default to the webrtc transport and a no-op observer.
    pub fn builder(
        identity: PeerIdentity,
        room_id: RoomId,
        signaling: Arc<dyn SignalingChannel>,
    ) -> SessionBuilder {
        SessionBuilder {
            identity,
            room_id,
            signaling,
            config: SessionConfig::default(),
            factory: Arc::new(RtcTransportFactory),
            observer: Arc::new(NoopObserver),
        }
    }

    pub async fn run(mut self) {
        info!(client = %self.identity.client_id, room = %self.room_id, "session loop started");

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            info!("all session handles dropped, shutting down");
                            break;
                        }
                    }
                }

                event = next_signal(&mut self.signal_rx) => {
                    match event {
                        Some(event) => self.handle_signaling_event(event).await,
                        None => {
                            warn!(category = "signaling", "signaling subscription ended");
                            self.signal_rx = None;
                        }
                    }
                }

                Some((epoch, event)) = self.transport_rx.recv() => {
                    self.handle_transport_event(epoch, event).await;
                }

                Some((epoch, event)) = self.timer_rx.recv() => {
                    self.handle_timer(epoch, event).await;
                }
            }

            self.after_event().await;
        }

        self.disconnect().await;
        info!(client = %self.identity.client_id, "session loop finished");
    }

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Connect { reply } => {
                let result = self.connect().await;
                let _ = reply.send(result);
            }

            SessionCommand::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
            }

            SessionCommand::ResetPeerConnection { reply } => {
                let result = self.reset_peer_connection().await;
                let _ = reply.send(result);
            }

            SessionCommand::SendChat { content, reply } => {
                let sent = match &self.link {
                    Some(link) => link.channels.send_chat(content).await,
                    None => false,
                };
                let _ = reply.send(sent);
            }

            SessionCommand::SendMeasurement {
                device,
                kind,
                data,
                reply,
            } => {
                let sent = match &self.link {
                    Some(link) => link.channels.send_measurement(device, kind, data).await,
                    None => false,
                };
                let _ = reply.send(sent);
            }

            SessionCommand::ReplaceDeviceStream {
                device,
                track,
                reply,
            } => {
                let result = match &self.link {
                    Some(link) => link.transport.replace_track(device, track).await,
                    None => Err(PeerError::InvalidState {
                        operation: "replace_device_stream",
                        state: "no transport".to_owned(),
                    }),
                };
                if let Err(e) = &result {
                    warn!(category = "transport", ?device, "failed to replace device stream: {e}");
                }
                let _ = reply.send(result);
            }

            SessionCommand::Diagnostics { reply } => {
                let _ = reply.send(self.diagnostics());
            }

            SessionCommand::NegotiationState { reply } => {
                let _ = reply.send(self.link.as_ref().map(|link| link.engine.snapshot()));
            }
        }
    }

    async fn connect(&mut self) -> Result<()> {
        if self.phase != SessionPhase::Idle {
            debug!(phase = ?self.phase, "connect ignored, session already running");
            return Ok(());
        }
        info!(client = %self.identity.client_id, room = %self.room_id, "connecting");

        self.phase = SessionPhase::Connecting;
        self.reset_count = 0;
        self.last_error = None;
        self.connection_state = PeerConnectionState::New;
        self.publish_status();

        let subscription = match self.signaling.connect().await {
            Ok(rx) => rx,
            Err(e) => {
                error!(category = "signaling", "failed to connect signaling: {e}");
                self.abort_connect(e.to_string());
                return Err(e.into());
            }
        };
        self.signal_rx = Some(subscription);

        if let Err(e) = self.build_link().await {
            error!(category = "transport", "failed to create peer connection: {e}");
            self.signaling.disconnect().await;
            self.signal_rx = None;
            self.abort_connect(e.to_string());
            return Err(e);
        }

        self.phase = SessionPhase::Active;
        self.start_coordination().await;
        self.publish_status();
        Ok(())
    }

    fn abort_connect(&mut self, reason: String) {
        self.phase = SessionPhase::Idle;
        self.last_error = Some(reason);
        self.publish_status();
    }

    /// Best-effort teardown of everything. Repeated calls are no-ops.
    async fn disconnect(&mut self) {
        if self.phase == SessionPhase::Idle {
            return;
        }
        info!(client = %self.identity.client_id, room = %self.room_id, "disconnecting");

        if let Some(link) = self.link.take() {
            Self::teardown(link).await;
        }
        self.signaling.disconnect().await;
        self.signal_rx = None;
        self.grace_timer = None;
        self.heartbeat = None;

        self.phase = SessionPhase::Idle;
        self.participants.clear();
        self.room_ready = false;
        self.notify_connection_state(PeerConnectionState::Closed).await;
        self.refresh_channel_state().await;
        self.publish_status();
    }

    /// Replace the transport, engine and data channel with fresh ones.
    async fn reset_peer_connection(&mut self) -> Result<()> {
        if self.phase != SessionPhase::Active {
            return Err(PeerError::InvalidState {
                operation: "reset_peer_connection",
                state: format!("{:?}", self.phase),
            });
        }
        info!(category = "transport", epoch = %self.epoch, "resetting peer connection");
        self.reset_count += 1;
        self.grace_timer = None;

        if let Some(link) = self.link.take() {
            Self::teardown(link).await;
        }

        if let Err(e) = self.build_link().await {
            error!(category = "transport", "failed to rebuild peer connection: {e}");
            self.last_error = Some(e.to_string());
            self.refresh_channel_state().await;
            return Err(e);
        }

        // Observers see the old connection go away even though its own
        // state events were detached.
        self.notify_connection_state(PeerConnectionState::Disconnected)
            .await;
        self.refresh_channel_state().await;
        self.start_coordination().await;
        self.publish_status();
        Ok(())
    }

    async fn start_coordination(&mut self) {
        let records = self.signaling.valid_participants();
        self.apply_presence(records).await;
        if let Some(link) = self.link.as_mut() {
            link.engine
                .start(&self.participants, self.room_ready)
                .await;
        }
    }

    async fn build_link(&mut self) -> Result<()> {
        self.epoch = self.epoch.next();
        let sink = TransportEventSink::new(self.epoch, self.transport_tx.clone());
        let transport = self.factory.create(&self.config, sink).await?;
        let timers = TimerSink::new(self.epoch, self.timer_tx.clone());

        let engine = NegotiationEngine::new(
            self.identity.clone(),
            self.room_id.clone(),
            Arc::clone(&transport),
            Arc::clone(&self.signaling),
            timers.clone(),
            &self.config,
        );
        let channels = DataChannelManager::new(
            self.identity.clone(),
            self.config.data_channel_label.clone(),
            Arc::clone(&transport),
        );

        self.heartbeat = self
            .config
            .heartbeat_interval()
            .map(|period| timers.every(period, TimerEvent::Heartbeat));

        info!(
            category = "transport",
            epoch = %self.epoch,
            connection = %transport.connection_id(),
            "transport ready"
        );
        self.link = Some(PeerLink {
            transport,
            engine,
            channels,
            remote_departed: false,
        });
        Ok(())
    }

    async fn teardown(mut link: PeerLink) {
        link.channels.close().await;
        link.engine.destroy().await;
        link.transport.detach();
        if let Err(e) = link.transport.close().await {
            warn!(category = "transport", "closing transport: {e}");
        }
    }

    async fn handle_signaling_event(&mut self, event: SignalingEvent) {
        if self.phase != SessionPhase::Active {
            return;
        }
        match event {
            SignalingEvent::Presence(records) => {
                self.apply_presence(records).await;
                if self.returning_peer_needs_new_link() {
                    info!(category = "transport", room = %self.room_id, "peer returned to a link it already left, rebuilding");
                    if let Err(e) = self.reset_peer_connection().await {
                        self.record_error("transport", &e);
                    }
                    return;
                }
                if let Some(link) = self.link.as_mut() {
                    link.engine
                        .on_presence(&self.participants, self.room_ready)
                        .await;
                }
            }
            SignalingEvent::Message(message) => self.handle_signal(message).await,
        }
    }

    /// Tracks departures of the bound client. Once it has left, any remote
    /// showing up again needs a fresh transport unless the old link is
    /// still fully up.
    fn returning_peer_needs_new_link(&mut self) -> bool {
        let Some(link) = self.link.as_mut() else {
            return false;
        };
        let Some(bound) = link.engine.bound_client() else {
            return false;
        };
        let bound_present = self.participants.iter().any(|p| p.client_id == *bound);
        if !bound_present {
            link.remote_departed = true;
        }
        let remote_present = self
            .participants
            .iter()
            .any(|p| p.client_id != self.identity.client_id);
        if !link.remote_departed || !remote_present {
            return false;
        }

        let connection = link.transport.connection_state();
        if health::is_usable_after_departure(connection, link.channels.is_available()) {
            if bound_present {
                debug!(category = "transport", "bound peer back on a healthy link");
                link.remote_departed = false;
            }
            return false;
        }
        true
    }

    async fn handle_signal(&mut self, message: SignalingMessage) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        let kind = message.payload.kind();

        match link.engine.handle_signal(message).await {
            Ok(SignalOutcome::RemoteRebuilt(message)) => {
                if let Err(e) = self.reset_peer_connection().await {
                    self.record_error("transport", &e);
                    return;
                }
                let Some(link) = self.link.as_mut() else {
                    return;
                };
                if let Err(e) = link.engine.handle_signal(*message).await {
                    self.record_error("negotiation", &e);
                }
            }
            Ok(_) => {}
            Err(e) => {
                debug!(category = "negotiation", kind, "signal failed");
                self.record_error("negotiation", &e);
            }
        }
    }

    async fn apply_presence(&mut self, records: Vec<PresenceRecord>) {
        let participants = valid_participants(&records);
        let ready = has_patient_and_practitioner(&participants);
        let was_ready = self.room_ready;

        self.participants = participants;
        self.room_ready = ready;

        if ready != was_ready {
            info!(room = %self.room_id, ready, "room readiness changed");
            self.observer.on_room_ready(ready).await;
        }
        if was_ready && !ready {
            self.arm_grace_timer("peer left the room");
        }
    }

    async fn handle_transport_event(&mut self, epoch: TransportEpoch, event: TransportEvent) {
        if epoch != self.epoch {
            debug!(category = "transport", %epoch, current = %self.epoch, ?event, "dropping stale transport event");
            return;
        }
        let Some(link) = self.link.as_mut() else {
            return;
        };

        match event {
            TransportEvent::NegotiationNeeded => {
                if let Err(e) = link.engine.handle_negotiation_needed().await {
                    self.record_error("negotiation", &e);
                }
            }

            TransportEvent::LocalCandidate(candidate) => {
                link.engine.handle_local_candidate(candidate).await;
            }

            TransportEvent::ConnectionStateChanged(state) => {
                self.notify_connection_state(state).await;
                if health::is_degraded(state) {
                    self.arm_grace_timer("peer connection degraded");
                }
            }

            TransportEvent::IceConnectionStateChanged(state) => {
                debug!(category = "transport", ?state, "ice connection state changed");
            }

            TransportEvent::SignalingStateChanged(state) => {
                debug!(category = "transport", ?state, "signaling state changed");
            }

            TransportEvent::DataChannelReceived(channel) => {
                link.channels.adopt(channel).await;
            }

            TransportEvent::DataChannelOpen(id) => {
                if link.channels.owns(id) {
                    info!(category = "data_channel", channel = %id, "data channel open");
                }
            }

            TransportEvent::DataChannelClosed(id) => {
                link.channels.on_closed(id);
            }

            TransportEvent::DataChannelMessage(id, data) => {
                if let Some(message) = link.channels.handle_message(id, data).await {
                    self.deliver(message).await;
                }
            }

            TransportEvent::RemoteTrack(track) => {
                info!(category = "transport", track = %track.track_id, kind = ?track.kind, "remote track");
                self.observer.on_remote_stream(track).await;
            }
        }
    }

    async fn handle_timer(&mut self, epoch: TransportEpoch, event: TimerEvent) {
        if epoch != self.epoch {
            debug!(%epoch, ?event, "dropping stale timer");
            return;
        }

        match event {
            TimerEvent::RoleArrival | TimerEvent::RoleConfirm => {
                if let Some(link) = self.link.as_mut() {
                    link.engine.handle_timer(event).await;
                }
            }
            TimerEvent::ResetGrace => {
                self.grace_timer = None;
                self.on_grace_expired().await;
            }
            TimerEvent::Heartbeat => {
                if let Some(link) = &self.link {
                    if link.channels.is_available() {
                        link.channels.send_ping().await;
                    }
                }
            }
        }
    }

    fn arm_grace_timer(&mut self, reason: &str) {
        if self.grace_timer.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!(reason, "reset grace timer already running");
            return;
        }
        info!(reason, grace_ms = self.config.reset_grace_period_ms, "arming reset grace timer");
        let timers = TimerSink::new(self.epoch, self.timer_tx.clone());
        self.grace_timer = Some(timers.after(self.config.reset_grace_period(), TimerEvent::ResetGrace));
    }

    async fn on_grace_expired(&mut self) {
        let Some(link) = &self.link else {
            return;
        };
        let connection = link.transport.connection_state();
        let ice = link.transport.ice_connection_state();
        let signaling = link.transport.signaling_state();

        if !health::should_reset(connection, ice, signaling, self.room_ready) {
            debug!(
                ?connection,
                ?ice,
                room_ready = self.room_ready,
                "grace period over, leaving transport alone"
            );
            return;
        }

        warn!(category = "transport", ?connection, ?ice, room_ready = self.room_ready, "transport unrecoverable after grace period");
        if let Err(e) = self.reset_peer_connection().await {
            self.record_error("transport", &e);
        }
    }

    async fn deliver(&self, message: InboundMessage) {
        match message {
            InboundMessage::Chat(chat) => self.observer.on_chat_message(chat).await,
            InboundMessage::Measurement(measurement) => {
                self.observer.on_measurement(measurement).await
            }
            InboundMessage::Closing => {}
        }
    }

    async fn after_event(&mut self) {
        self.maybe_trigger_initial().await;
        self.refresh_channel_state().await;
        self.publish_status();
    }

    async fn maybe_trigger_initial(&mut self) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        if !link.engine.take_initial_trigger() {
            return;
        }
        if link.channels.create_data_channel().await.is_none() {
            warn!(category = "data_channel", "initial trigger could not create a data channel");
        }
    }

    async fn notify_connection_state(&mut self, state: PeerConnectionState) {
        if self.connection_state == state {
            return;
        }
        self.connection_state = state;
        info!(category = "transport", ?state, "peer connection state changed");
        self.observer.on_connection_state_change(state).await;
    }

    async fn refresh_channel_state(&mut self) {
        let available = self
            .link
            .as_ref()
            .is_some_and(|link| link.channels.is_available());
        if available == self.channel_available {
            return;
        }
        self.channel_available = available;
        info!(category = "data_channel", available, "data channel availability changed");
        self.observer.on_data_channel_state(available).await;
    }

    fn publish_status(&self) {
        let status = SessionStatus {
            phase: self.phase,
            connection_state: self.connection_state,
            room_ready: self.room_ready,
            data_channel_available: self.channel_available,
            reset_count: self.reset_count,
        };
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    fn record_error(&mut self, category: &'static str, err: &PeerError) {
        warn!(category, "{err}");
        self.last_error = Some(err.to_string());
    }

    fn diagnostics(&self) -> ConnectionDiagnostics {
        let link = self.link.as_ref();
        ConnectionDiagnostics {
            client_id: self.identity.client_id.clone(),
            business_role: self.identity.business_role,
            room_id: self.room_id.clone(),
            session_phase: self.phase,
            epoch: self.epoch.0,
            connection_id: link.map(|l| l.transport.connection_id()),
            connection_state: link.map(|l| l.transport.connection_state()),
            ice_connection_state: link.map(|l| l.transport.ice_connection_state()),
            signaling_state: link.map(|l| l.transport.signaling_state()),
            room_ready: self.room_ready,
            participants: self
                .participants
                .iter()
                .map(|p| p.client_id.clone())
                .collect(),
            data_channel_state: link.and_then(|l| l.channels.state()),
            round_trip_ms: link
                .and_then(|l| l.channels.round_trip())
                .map(|rtt| rtt.as_millis() as u64),
            reset_count: self.reset_count,
            last_error: self.last_error.clone(),
            negotiation: link.map(|l| l.engine.snapshot()),
        }
    }
}

async fn next_signal(
    rx: &mut Option<mpsc::UnboundedReceiver<SignalingEvent>>,
) -> Option<SignalingEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
