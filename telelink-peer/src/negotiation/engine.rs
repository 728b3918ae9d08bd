use crate::config::SessionConfig;
use crate::error::Result;
use crate::negotiation::negotiation_state::{NegotiationPhase, NegotiationState, OfferDecision};
use crate::negotiation::role_coordinator::{NegotiationRole, RoleCoordinator, RoleEffect};
use crate::signaling::SignalingChannel;
use crate::timer::{ScheduledTask, TimerEvent, TimerSink};
use crate::transport::{PeerTransport, SignalingState};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use telelink_core::{
    ClientId, ConnectionId, IceCandidate, PeerIdentity, PresenceRecord, RoomId,
    SessionDescription, SignalPayload, SignalingMessage,
};
use tracing::{debug, info, warn};

const MAX_PENDING_CANDIDATES: usize = 64;

/// Snapshot of the negotiation flags for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct PerfectNegotiationState {
    pub phase: NegotiationPhase,
    pub making_offer: bool,
    pub ignore_offer: bool,
    pub is_setting_remote_answer_pending: bool,
    pub role: NegotiationRole,
    pub polite: bool,
    pub role_requested: bool,
    pub role_confirmed: bool,
    pub remote_impolite: Option<ClientId>,
    pub signaling_state: SignalingState,
    pub initial_triggered: bool,
    pub pending_candidates: usize,
}

/// What became of an inbound signaling message.
#[derive(Debug)]
pub enum SignalOutcome {
    Applied,
    /// Dropped: from self, another room, a retired remote connection, or an
    /// offer ignored on collision.
    Ignored,
    /// The remote rebuilt its transport. The message must be handled again
    /// by a fresh engine once the local transport is rebuilt too.
    RemoteRebuilt(Box<SignalingMessage>),
}

enum Origin {
    Current,
    Stale,
    NewConnection,
}

/// Perfect Negotiation plus role coordination over one transport. Rebuilt
/// together with the transport.
pub struct NegotiationEngine {
    identity: PeerIdentity,
    room_id: RoomId,
    transport: Arc<dyn PeerTransport>,
    signaling: Arc<dyn SignalingChannel>,
    timers: TimerSink,
    arrival_timeout: Duration,
    confirm_timeout: Duration,

    state: NegotiationState,
    roles: RoleCoordinator,
    arrival_timer: Option<ScheduledTask>,
    confirm_timer: Option<ScheduledTask>,

    /// Latest connection and message timestamp seen per remote client.
    remote_connections: HashMap<ClientId, (ConnectionId, u64)>,
    /// Remote connection whose description is applied to our transport.
    bound_remote: Option<(ClientId, ConnectionId)>,
    pending_candidates: VecDeque<(ClientId, ConnectionId, IceCandidate)>,

    room_ready: bool,
    initial_triggered: bool,
    destroyed: bool,
}

impl NegotiationEngine {
    pub fn new(
        identity: PeerIdentity,
        room_id: RoomId,
        transport: Arc<dyn PeerTransport>,
        signaling: Arc<dyn SignalingChannel>,
        timers: TimerSink,
        config: &SessionConfig,
    ) -> Self {
        Self {
            roles: RoleCoordinator::new(identity.client_id.clone()),
            identity,
            room_id,
            transport,
            signaling,
            timers,
            arrival_timeout: config.role_arrival_timeout(),
            confirm_timeout: config.role_confirm_timeout(),
            state: NegotiationState::new(),
            arrival_timer: None,
            confirm_timer: None,
            remote_connections: HashMap::new(),
            bound_remote: None,
            pending_candidates: VecDeque::new(),
            room_ready: false,
            initial_triggered: false,
            destroyed: false,
        }
    }

    pub fn role(&self) -> NegotiationRole {
        self.roles.role()
    }

    pub fn is_confirmed_impolite(&self) -> bool {
        self.roles.is_confirmed_impolite()
    }

    /// Client whose description is applied to our transport.
    pub fn bound_client(&self) -> Option<&ClientId> {
        self.bound_remote.as_ref().map(|(client, _)| client)
    }

    /// Start role coordination from the current presence snapshot.
    pub async fn start(&mut self, participants: &[PresenceRecord], room_ready: bool) {
        self.room_ready = room_ready;
        let effects = self.roles.start(participants);
        self.apply(effects).await;
    }

    pub async fn on_presence(&mut self, participants: &[PresenceRecord], room_ready: bool) {
        self.room_ready = room_ready;
        let effects = self.roles.on_presence(participants);
        self.apply(effects).await;
    }

    pub async fn handle_timer(&mut self, event: TimerEvent) {
        let effects = match event {
            TimerEvent::RoleArrival => {
                self.arrival_timer = None;
                self.roles.on_arrival_timeout()
            }
            TimerEvent::RoleConfirm => {
                self.confirm_timer = None;
                self.roles.on_confirm_timeout()
            }
            _ => return,
        };
        self.apply(effects).await;
    }

    /// Fires once per engine, for the confirmed impolite peer in a ready
    /// room.
    pub fn take_initial_trigger(&mut self) -> bool {
        if self.initial_triggered
            || self.destroyed
            || !self.room_ready
            || !self.roles.is_confirmed_impolite()
        {
            return false;
        }
        self.initial_triggered = true;
        info!(category = "negotiation", client = %self.identity.client_id, "initial connection trigger");
        true
    }

    pub async fn handle_signal(&mut self, message: SignalingMessage) -> Result<SignalOutcome> {
        if self.destroyed
            || message.sender == self.identity.client_id
            || message.room_id != self.room_id
        {
            return Ok(SignalOutcome::Ignored);
        }

        let payload_kind = message.payload.kind();
        match self.classify(&message) {
            Origin::Stale => {
                debug!(
                    category = "negotiation",
                    sender = %message.sender,
                    connection = %message.connection_id,
                    kind = payload_kind,
                    "dropping message from retired remote connection"
                );
                return Ok(SignalOutcome::Ignored);
            }
            Origin::NewConnection if self.is_rebuild_signal(&message) => {
                info!(
                    category = "negotiation",
                    sender = %message.sender,
                    connection = %message.connection_id,
                    kind = payload_kind,
                    "remote rebuilt its transport"
                );
                return Ok(SignalOutcome::RemoteRebuilt(Box::new(message)));
            }
            _ => {}
        }
        let seen = self
            .remote_connections
            .entry(message.sender.clone())
            .or_insert((message.connection_id, message.timestamp));
        if seen.0 != message.connection_id || seen.1 < message.timestamp {
            *seen = (message.connection_id, message.timestamp);
        }

        let SignalingMessage {
            sender,
            connection_id,
            payload,
            ..
        } = message;

        match payload {
            SignalPayload::Offer { description } => {
                let effects = self.roles.on_offer(&sender);
                self.apply(effects).await;
                self.handle_offer(sender, connection_id, description).await
            }
            SignalPayload::Answer { description } => {
                self.handle_answer(sender, connection_id, description).await
            }
            SignalPayload::IceCandidate { candidate } => {
                self.handle_remote_candidate(sender, connection_id, candidate)
                    .await
            }
            SignalPayload::RoleClaim => {
                let effects = self.roles.on_claim(&sender);
                self.apply(effects).await;
                Ok(SignalOutcome::Applied)
            }
            SignalPayload::RoleRelease => {
                let effects = self.roles.on_release(&sender);
                self.apply(effects).await;
                Ok(SignalOutcome::Applied)
            }
            SignalPayload::RoleConflict { winner } => {
                let effects = self.roles.on_conflict(&sender, &winner);
                self.apply(effects).await;
                Ok(SignalOutcome::Applied)
            }
        }
    }

    pub async fn handle_negotiation_needed(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        let signaling_state = self.transport.signaling_state();
        if signaling_state != SignalingState::Stable || self.state.phase() != NegotiationPhase::Idle {
            debug!(category = "negotiation", state = ?signaling_state, "negotiation already in progress");
            return Ok(());
        }

        self.state.begin_offer();
        let offer = match self.create_local_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                self.state.offer_failed();
                return Err(e);
            }
        };

        debug!(category = "negotiation", client = %self.identity.client_id, "sending offer");
        if !self.send(SignalPayload::Offer { description: offer }).await {
            self.state.offer_failed();
            if let Err(e) = self.transport.rollback().await {
                warn!(category = "negotiation", "rollback after failed send: {e}");
            }
        }
        Ok(())
    }

    /// Trickle a local candidate. End-of-candidates is not forwarded.
    pub async fn handle_local_candidate(&mut self, candidate: Option<IceCandidate>) {
        let Some(candidate) = candidate else {
            debug!(category = "negotiation", "candidate gathering complete");
            return;
        };
        if self.destroyed {
            return;
        }
        self.send(SignalPayload::IceCandidate { candidate }).await;
    }

    /// Release the role if held and cancel timers. Idempotent.
    pub async fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        let effects = self.roles.destroy();
        self.apply(effects).await;
        self.destroyed = true;
        self.arrival_timer = None;
        self.confirm_timer = None;
        self.pending_candidates.clear();
        debug!(category = "negotiation", client = %self.identity.client_id, "engine destroyed");
    }

    pub fn snapshot(&self) -> PerfectNegotiationState {
        PerfectNegotiationState {
            phase: self.state.phase(),
            making_offer: self.state.making_offer(),
            ignore_offer: self.state.ignore_offer(),
            is_setting_remote_answer_pending: self.state.is_setting_remote_answer_pending(),
            role: self.roles.role(),
            polite: self.roles.is_polite(),
            role_requested: self.roles.role_requested(),
            role_confirmed: self.roles.role_confirmed(),
            remote_impolite: self.roles.remote_impolite().cloned(),
            signaling_state: self.transport.signaling_state(),
            initial_triggered: self.initial_triggered,
            pending_candidates: self.pending_candidates.len(),
        }
    }

    async fn handle_offer(
        &mut self,
        sender: ClientId,
        connection_id: ConnectionId,
        offer: SessionDescription,
    ) -> Result<SignalOutcome> {
        let polite = self.roles.is_polite();
        let decision = self
            .state
            .evaluate_offer(self.transport.signaling_state(), polite);

        match decision {
            OfferDecision::Ignore => {
                info!(category = "negotiation", sender = %sender, "ignoring colliding offer");
                return Ok(SignalOutcome::Ignored);
            }
            OfferDecision::AcceptWithRollback => {
                info!(category = "negotiation", sender = %sender, "offer collision, rolling back local offer");
                if let Err(e) = self.transport.rollback().await {
                    self.state.remote_offer_settled();
                    return Err(e);
                }
            }
            OfferDecision::Accept => {}
        }

        let result = self.answer_offer(&sender, connection_id, offer).await;
        self.state.remote_offer_settled();
        result.map(|_| SignalOutcome::Applied)
    }

    async fn answer_offer(
        &mut self,
        sender: &ClientId,
        connection_id: ConnectionId,
        offer: SessionDescription,
    ) -> Result<()> {
        self.transport.set_remote_description(offer).await?;
        self.bind_remote(sender, connection_id).await;

        let answer = self.transport.create_answer().await?;
        self.transport.set_local_description(answer.clone()).await?;
        debug!(category = "negotiation", sender = %sender, "sending answer");
        self.send(SignalPayload::Answer {
            description: answer,
        })
        .await;
        Ok(())
    }

    async fn handle_answer(
        &mut self,
        sender: ClientId,
        connection_id: ConnectionId,
        answer: SessionDescription,
    ) -> Result<SignalOutcome> {
        if !self.state.making_offer() {
            debug!(category = "negotiation", sender = %sender, "answer without a pending offer");
            return Ok(SignalOutcome::Ignored);
        }

        self.state.begin_remote_answer();
        let result = self.transport.set_remote_description(answer).await;
        self.state.answer_settled();
        result?;

        self.bind_remote(&sender, connection_id).await;
        Ok(SignalOutcome::Applied)
    }

    async fn handle_remote_candidate(
        &mut self,
        sender: ClientId,
        connection_id: ConnectionId,
        candidate: IceCandidate,
    ) -> Result<SignalOutcome> {
        let bound = matches!(&self.bound_remote, Some((c, id)) if *c == sender && *id == connection_id);
        if !bound {
            if self.pending_candidates.len() >= MAX_PENDING_CANDIDATES {
                warn!(category = "negotiation", "candidate queue full, dropping oldest");
                self.pending_candidates.pop_front();
            }
            self.pending_candidates
                .push_back((sender, connection_id, candidate));
            return Ok(SignalOutcome::Applied);
        }

        match self.transport.add_ice_candidate(candidate).await {
            Ok(()) => Ok(SignalOutcome::Applied),
            Err(e) if self.state.ignore_offer() => {
                debug!(category = "negotiation", "candidate for ignored offer rejected: {e}");
                Ok(SignalOutcome::Ignored)
            }
            Err(e) => Err(e),
        }
    }

    async fn bind_remote(&mut self, sender: &ClientId, connection_id: ConnectionId) {
        self.bound_remote = Some((sender.clone(), connection_id));

        let queued = std::mem::take(&mut self.pending_candidates);
        for (from, id, candidate) in queued {
            if from != *sender || id != connection_id {
                debug!(category = "negotiation", connection = %id, "discarding queued candidate for another connection");
                continue;
            }
            if let Err(e) = self.transport.add_ice_candidate(candidate).await {
                warn!(category = "negotiation", "queued candidate rejected: {e}");
            }
        }
    }

    async fn create_local_offer(&self) -> Result<SessionDescription> {
        let offer = self.transport.create_offer().await?;
        self.transport.set_local_description(offer.clone()).await?;
        Ok(offer)
    }

    fn classify(&self, message: &SignalingMessage) -> Origin {
        match self.remote_connections.get(&message.sender) {
            None => Origin::Current,
            Some((id, _)) if *id == message.connection_id => Origin::Current,
            Some((_, seen_at)) if message.timestamp < *seen_at => Origin::Stale,
            Some(_) => Origin::NewConnection,
        }
    }

    /// A new remote connection only matters when our transport already
    /// negotiated with the previous one.
    fn is_rebuild_signal(&self, message: &SignalingMessage) -> bool {
        let starts_over = matches!(message.payload, SignalPayload::Offer { .. })
            || message.payload.is_role_message();
        let engaged = matches!(&self.bound_remote, Some((c, _)) if *c == message.sender)
            || self.state.making_offer();
        starts_over && engaged
    }

    async fn apply(&mut self, effects: Vec<RoleEffect>) {
        for effect in effects {
            match effect {
                RoleEffect::Broadcast(payload) => {
                    self.send(payload).await;
                }
                RoleEffect::ArmArrivalTimer => {
                    self.arrival_timer = Some(
                        self.timers
                            .after(self.arrival_timeout, TimerEvent::RoleArrival),
                    );
                }
                RoleEffect::ArmConfirmTimer => {
                    self.confirm_timer = Some(
                        self.timers
                            .after(self.confirm_timeout, TimerEvent::RoleConfirm),
                    );
                }
                RoleEffect::CancelArrivalTimer => self.arrival_timer = None,
                RoleEffect::CancelConfirmTimer => self.confirm_timer = None,
                RoleEffect::RoleChanged(role) => {
                    info!(category = "role", client = %self.identity.client_id, ?role, "negotiation role changed");
                }
            }
        }
    }

    async fn send(&self, payload: SignalPayload) -> bool {
        let kind = payload.kind();
        let message = SignalingMessage::new(
            self.identity.client_id.clone(),
            self.room_id.clone(),
            self.transport.connection_id(),
            payload,
        );
        match self.signaling.send_message(message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(category = "signaling", kind, "failed to send signal: {e}");
                false
            }
        }
    }
}
