use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use telelink_core::{ConnectionId, IceCandidate, SdpKind, SessionDescription};
use telelink_peer::config::SessionConfig;
use telelink_peer::error::{PeerError, Result};
use telelink_peer::transport::{
    ChannelId, DataChannelState, DataPipe, DeviceTag, IceConnectionState, OutgoingTrack,
    PeerConnectionState, PeerTransport, SignalingState, TrackUpdate, TransportEvent,
    TransportEventSink, TransportFactory,
};
use uuid::Uuid;

/// In-memory stand-in for the network between peers. Transports find each
/// other through the connection id embedded in their session descriptions,
/// and connect once both sides hold matching descriptions in `stable`.
#[derive(Clone, Default)]
pub struct FakeNetwork {
    inner: Arc<Mutex<NetworkState>>,
}

#[derive(Default)]
struct NetworkState {
    transports: HashMap<ConnectionId, Arc<FakeTransport>>,
    offers_created: usize,
    answers_applied: usize,
    channels_created: usize,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_transport(&self, events: TransportEventSink) -> Arc<FakeTransport> {
        let transport = Arc::new(FakeTransport {
            id: ConnectionId::new(),
            network: self.clone(),
            sink: events,
            state: Mutex::new(FakeState::default()),
        });
        self.inner
            .lock()
            .unwrap()
            .transports
            .insert(transport.id, Arc::clone(&transport));
        transport
    }

    pub fn transport(&self, id: ConnectionId) -> Option<Arc<FakeTransport>> {
        self.inner.lock().unwrap().transports.get(&id).cloned()
    }

    pub fn transport_count(&self) -> usize {
        self.inner.lock().unwrap().transports.len()
    }

    pub fn offers_created(&self) -> usize {
        self.inner.lock().unwrap().offers_created
    }

    pub fn answers_applied(&self) -> usize {
        self.inner.lock().unwrap().answers_applied
    }

    pub fn channels_created(&self) -> usize {
        self.inner.lock().unwrap().channels_created
    }

    /// Drive a transport into `failed`, as ICE would after losing its path.
    pub fn fail(&self, id: ConnectionId) {
        if let Some(transport) = self.transport(id) {
            transport.fail();
        }
    }
}

#[async_trait]
impl TransportFactory for FakeNetwork {
    async fn create(
        &self,
        _config: &SessionConfig,
        events: TransportEventSink,
    ) -> Result<Arc<dyn PeerTransport>> {
        Ok(self.create_transport(events))
    }
}

struct FakeState {
    signaling: SignalingState,
    connection: PeerConnectionState,
    ice: IceConnectionState,
    has_local: bool,
    remote_connection: Option<ConnectionId>,
    connected: bool,
    gathered: bool,
    channels: Vec<Arc<FakeDataPipe>>,
    senders: HashSet<DeviceTag>,
    candidates_applied: usize,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            signaling: SignalingState::Stable,
            connection: PeerConnectionState::New,
            ice: IceConnectionState::New,
            has_local: false,
            remote_connection: None,
            connected: false,
            gathered: false,
            channels: Vec::new(),
            senders: HashSet::new(),
            candidates_applied: 0,
        }
    }
}

pub struct FakeTransport {
    id: ConnectionId,
    network: FakeNetwork,
    sink: TransportEventSink,
    state: Mutex<FakeState>,
}

fn description_sdp(id: ConnectionId) -> String {
    format!("v=0\r\nconnection={}\r\n", id.0)
}

fn sdp_owner(sdp: &str) -> Option<ConnectionId> {
    sdp.lines()
        .find_map(|line| line.trim().strip_prefix("connection="))
        .and_then(|id| id.parse::<Uuid>().ok())
        .map(ConnectionId)
}

fn candidate_owner(candidate: &IceCandidate) -> Option<ConnectionId> {
    candidate
        .candidate
        .strip_prefix("candidate:")
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|id| id.parse::<Uuid>().ok())
        .map(ConnectionId)
}

impl FakeTransport {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn candidates_applied(&self) -> usize {
        self.state.lock().unwrap().candidates_applied
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    fn invalid(operation: &'static str, state: SignalingState) -> PeerError {
        PeerError::InvalidState {
            operation,
            state: format!("{state:?}"),
        }
    }

    fn set_signaling(&self, state: &mut FakeState, next: SignalingState) {
        if state.signaling != next {
            state.signaling = next;
            self.sink.emit(TransportEvent::SignalingStateChanged(next));
        }
    }

    fn set_connection(&self, connection: PeerConnectionState, ice: IceConnectionState) {
        {
            let mut state = self.state.lock().unwrap();
            if state.connection == PeerConnectionState::Closed {
                return;
            }
            state.connection = connection;
            state.ice = ice;
        }
        self.sink.emit(TransportEvent::IceConnectionStateChanged(ice));
        self.sink
            .emit(TransportEvent::ConnectionStateChanged(connection));
    }

    fn fail(&self) {
        self.set_connection(PeerConnectionState::Failed, IceConnectionState::Failed);
    }

    /// The remote transport went away without telling us.
    fn remote_vanished(&self) {
        let connected = {
            let state = self.state.lock().unwrap();
            state.connection == PeerConnectionState::Connected
        };
        if connected {
            self.set_connection(
                PeerConnectionState::Disconnected,
                IceConnectionState::Disconnected,
            );
        }
    }

    fn ready_to_connect(&self) -> Option<ConnectionId> {
        let state = self.state.lock().unwrap();
        let ready = !state.connected
            && state.connection != PeerConnectionState::Closed
            && state.signaling == SignalingState::Stable
            && state.has_local;
        if ready { state.remote_connection } else { None }
    }

    fn try_connect(&self) {
        let Some(remote) = self.ready_to_connect() else {
            return;
        };
        let Some(peer) = self.network.transport(remote) else {
            return;
        };
        if peer.ready_to_connect() != Some(self.id) {
            return;
        }

        for transport in [self, peer.as_ref()] {
            transport.state.lock().unwrap().connected = true;
            transport.set_connection(PeerConnectionState::Connecting, IceConnectionState::Checking);
            transport.set_connection(PeerConnectionState::Connected, IceConnectionState::Connected);
        }
        self.pair_channels_with(&peer);
        peer.pair_channels_with(self);
    }

    fn pair_channels_with(&self, peer: &FakeTransport) {
        let unpaired: Vec<Arc<FakeDataPipe>> = self
            .state
            .lock()
            .unwrap()
            .channels
            .iter()
            .filter(|c| c.peer().is_none() && c.ready_state() == DataChannelState::Connecting)
            .cloned()
            .collect();
        for local in unpaired {
            peer.accept_remote_channel(&local);
        }
    }

    fn accept_remote_channel(&self, local: &Arc<FakeDataPipe>) {
        let remote = FakeDataPipe::new(&local.label, self.sink.clone());
        *remote.peer.lock().unwrap() = Some(Arc::downgrade(local));
        *local.peer.lock().unwrap() = Some(Arc::downgrade(&remote));
        self.state
            .lock()
            .unwrap()
            .channels
            .push(Arc::clone(&remote));

        self.sink
            .emit(TransportEvent::DataChannelReceived(remote.clone()));
        local.open();
        remote.open();
    }

    fn gather(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.gathered {
                return;
            }
            state.gathered = true;
        }
        let candidate = IceCandidate {
            candidate: format!("candidate:{} 1 udp 2122260223 127.0.0.1 9 typ host", self.id.0),
            sdp_mid: Some("0".to_owned()),
            sdp_m_line_index: Some(0),
            username_fragment: None,
        };
        self.sink
            .emit(TransportEvent::LocalCandidate(Some(candidate)));
        self.sink.emit(TransportEvent::LocalCandidate(None));
    }

    fn check_open(&self) -> Result<()> {
        if self.state.lock().unwrap().connection == PeerConnectionState::Closed {
            return Err(PeerError::TransportClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.check_open()?;
        self.network.inner.lock().unwrap().offers_created += 1;
        Ok(SessionDescription::offer(description_sdp(self.id)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.check_open()?;
        let signaling = self.state.lock().unwrap().signaling;
        if signaling != SignalingState::HaveRemoteOffer {
            return Err(Self::invalid("create_answer", signaling));
        }
        Ok(SessionDescription::answer(description_sdp(self.id)))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.check_open()?;
        {
            let mut state = self.state.lock().unwrap();
            let next = match (description.kind, state.signaling) {
                (SdpKind::Offer, SignalingState::Stable | SignalingState::HaveLocalOffer) => {
                    SignalingState::HaveLocalOffer
                }
                (SdpKind::Answer, SignalingState::HaveRemoteOffer) => SignalingState::Stable,
                (_, current) => return Err(Self::invalid("set_local_description", current)),
            };
            state.has_local = true;
            self.set_signaling(&mut state, next);
        }
        self.gather();
        self.try_connect();
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.check_open()?;
        let owner = sdp_owner(&description.sdp).ok_or_else(|| PeerError::InvalidState {
            operation: "set_remote_description",
            state: "unparseable sdp".to_owned(),
        })?;
        {
            let mut state = self.state.lock().unwrap();
            let next = match (description.kind, state.signaling) {
                (SdpKind::Offer, SignalingState::Stable) => SignalingState::HaveRemoteOffer,
                (SdpKind::Answer, SignalingState::HaveLocalOffer) => SignalingState::Stable,
                (_, current) => return Err(Self::invalid("set_remote_description", current)),
            };
            state.remote_connection = Some(owner);
            self.set_signaling(&mut state, next);
        }
        if description.kind == SdpKind::Answer {
            self.network.inner.lock().unwrap().answers_applied += 1;
        }
        self.try_connect();
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.signaling == SignalingState::HaveLocalOffer {
            self.set_signaling(&mut state, SignalingState::Stable);
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let Some(remote) = state.remote_connection else {
            return Err(PeerError::IceCandidate("no remote description".to_owned()));
        };
        if candidate_owner(&candidate) != Some(remote) {
            return Err(PeerError::IceCandidate(
                "candidate does not belong to the remote description".to_owned(),
            ));
        }
        state.candidates_applied += 1;
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        self.state.lock().unwrap().signaling
    }

    fn connection_state(&self) -> PeerConnectionState {
        self.state.lock().unwrap().connection
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        self.state.lock().unwrap().ice
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataPipe>> {
        self.check_open()?;
        let pipe = FakeDataPipe::new(label, self.sink.clone());
        self.network.inner.lock().unwrap().channels_created += 1;

        let (connected, first) = {
            let mut state = self.state.lock().unwrap();
            let first = state.channels.is_empty();
            state.channels.push(Arc::clone(&pipe));
            (state.connected, first)
        };

        if connected {
            let remote = self.state.lock().unwrap().remote_connection;
            if let Some(peer) = remote.and_then(|id| self.network.transport(id)) {
                peer.accept_remote_channel(&pipe);
            }
        } else if first {
            self.sink.emit(TransportEvent::NegotiationNeeded);
        }
        Ok(pipe)
    }

    async fn replace_track(&self, device: DeviceTag, _track: OutgoingTrack) -> Result<TrackUpdate> {
        self.check_open()?;
        let added = self.state.lock().unwrap().senders.insert(device);
        if !added {
            return Ok(TrackUpdate::Replaced);
        }
        self.sink.emit(TransportEvent::NegotiationNeeded);
        Ok(TrackUpdate::Added)
    }

    fn detach(&self) {
        self.sink.detach();
    }

    async fn close(&self) -> Result<()> {
        let (channels, remote) = {
            let mut state = self.state.lock().unwrap();
            if state.connection == PeerConnectionState::Closed {
                return Ok(());
            }
            state.connection = PeerConnectionState::Closed;
            state.ice = IceConnectionState::Closed;
            state.signaling = SignalingState::Closed;
            (std::mem::take(&mut state.channels), state.remote_connection)
        };

        for channel in channels {
            channel.close().await?;
        }
        if let Some(peer) = remote.and_then(|id| self.network.transport(id)) {
            peer.remote_vanished();
        }
        Ok(())
    }
}

pub struct FakeDataPipe {
    id: ChannelId,
    label: String,
    sink: TransportEventSink,
    state: Mutex<DataChannelState>,
    peer: Mutex<Option<Weak<FakeDataPipe>>>,
}

impl FakeDataPipe {
    fn new(label: &str, sink: TransportEventSink) -> Arc<Self> {
        Arc::new(Self {
            id: ChannelId::next(),
            label: label.to_owned(),
            sink,
            state: Mutex::new(DataChannelState::Connecting),
            peer: Mutex::new(None),
        })
    }

    fn peer(&self) -> Option<Arc<FakeDataPipe>> {
        self.peer.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }

    fn open(&self) {
        *self.state.lock().unwrap() = DataChannelState::Open;
        self.sink.emit(TransportEvent::DataChannelOpen(self.id));
    }

    fn remote_closed(&self) {
        let mut state = self.state.lock().unwrap();
        if *state != DataChannelState::Closed {
            *state = DataChannelState::Closed;
            drop(state);
            self.sink.emit(TransportEvent::DataChannelClosed(self.id));
        }
    }
}

#[async_trait]
impl DataPipe for FakeDataPipe {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn ready_state(&self) -> DataChannelState {
        *self.state.lock().unwrap()
    }

    async fn send(&self, data: &Bytes) -> Result<()> {
        if self.ready_state() != DataChannelState::Open {
            return Err(PeerError::DataChannel("channel is not open".to_owned()));
        }
        if let Some(peer) = self.peer() {
            if peer.ready_state() == DataChannelState::Open {
                peer.sink
                    .emit(TransportEvent::DataChannelMessage(peer.id, data.clone()));
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.state.lock().unwrap() = DataChannelState::Closed;
        if let Some(peer) = self.peer() {
            peer.remote_closed();
        }
        Ok(())
    }
}
