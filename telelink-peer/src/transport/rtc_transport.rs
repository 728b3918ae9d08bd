use crate::config::SessionConfig;
use crate::error::{PeerError, Result};
use crate::transport::peer_transport::{
    ChannelId, DataChannelState, DataPipe, DeviceTag, IceConnectionState, OutgoingTrack,
    PeerConnectionState, PeerTransport, RemoteTrack, SignalingState, TrackKind, TrackUpdate,
    TransportFactory,
};
use crate::transport::transport_event::{TransportEvent, TransportEventSink};
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use telelink_core::{ConnectionId, IceCandidate, SdpKind, SessionDescription};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Builds [`RtcTransport`]s backed by webrtc-rs.
#[derive(Debug, Default, Clone, Copy)]
pub struct RtcTransportFactory;

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(
        &self,
        config: &SessionConfig,
        events: TransportEventSink,
    ) -> Result<Arc<dyn PeerTransport>> {
        let transport = RtcTransport::new(config, events).await?;
        Ok(Arc::new(transport))
    }
}

pub struct RtcTransport {
    connection_id: ConnectionId,
    peer_connection: Arc<RTCPeerConnection>,
    events: TransportEventSink,
    senders: Mutex<HashMap<DeviceTag, Arc<RTCRtpSender>>>,
}

impl RtcTransport {
    pub async fn new(config: &SessionConfig, events: TransportEventSink) -> Result<Self> {
        let peer_connection = Arc::new(build_peer_connection(config).await?);

        let transport = Self {
            connection_id: ConnectionId::new(),
            peer_connection,
            events,
            senders: Mutex::new(HashMap::new()),
        };
        transport.attach_handlers();

        info!(
            connection = %transport.connection_id,
            epoch = %transport.events.epoch(),
            "peer connection created"
        );
        Ok(transport)
    }

    fn attach_handlers(&self) {
        let pc = &self.peer_connection;

        let events = self.events.clone();
        pc.on_negotiation_needed(Box::new(move || {
            let events = events.clone();
            Box::pin(async move {
                events.emit(TransportEvent::NegotiationNeeded);
            })
        }));

        // Trickle ICE: every local candidate goes straight to signaling.
        let events = self.events.clone();
        pc.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let events = events.clone();
            Box::pin(async move {
                let candidate = match c {
                    Some(c) => match c.to_json() {
                        Ok(init) => Some(from_rtc_candidate(init)),
                        Err(e) => {
                            warn!(category = "transport", "failed to serialize candidate: {e}");
                            return;
                        }
                    },
                    None => None,
                };
                events.emit(TransportEvent::LocalCandidate(candidate));
            })
        }));

        let events = self.events.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let events = events.clone();
            Box::pin(async move {
                events.emit(TransportEvent::ConnectionStateChanged(map_connection_state(s)));
            })
        }));

        let events = self.events.clone();
        pc.on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
            let events = events.clone();
            Box::pin(async move {
                events.emit(TransportEvent::IceConnectionStateChanged(map_ice_state(s)));
            })
        }));

        let events = self.events.clone();
        pc.on_signaling_state_change(Box::new(move |s: RTCSignalingState| {
            let events = events.clone();
            Box::pin(async move {
                events.emit(TransportEvent::SignalingStateChanged(map_signaling_state(s)));
            })
        }));

        let events = self.events.clone();
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let events = events.clone();
            Box::pin(async move {
                debug!("remote data channel '{}' announced", dc.label());
                let pipe = RtcDataPipe::wrap(dc, events.clone());
                events.emit(TransportEvent::DataChannelReceived(pipe));
            })
        }));

        let events = self.events.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let events = events.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    _ => TrackKind::Video,
                };
                events.emit(TransportEvent::RemoteTrack(RemoteTrack {
                    track_id: track.id(),
                    stream_id: track.stream_id(),
                    kind,
                }));
            })
        }));
    }

    fn clear_handlers(&self) {
        let pc = &self.peer_connection;
        pc.on_negotiation_needed(Box::new(|| Box::pin(async {})));
        pc.on_ice_candidate(Box::new(|_| Box::pin(async {})));
        pc.on_peer_connection_state_change(Box::new(|_| Box::pin(async {})));
        pc.on_ice_connection_state_change(Box::new(|_| Box::pin(async {})));
        pc.on_signaling_state_change(Box::new(|_| Box::pin(async {})));
        pc.on_data_channel(Box::new(|_| Box::pin(async {})));
        pc.on_track(Box::new(|_, _, _| Box::pin(async {})));
    }
}

async fn build_peer_connection(config: &SessionConfig) -> anyhow::Result<RTCPeerConnection> {
    // Codecs are registered even for data-only sessions so tracks can be
    // added later without rebuilding the API.
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .context("failed to register default codecs")?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)
        .context("failed to register interceptors")?;

    let mut setting_engine = SettingEngine::default();
    if config.include_loopback_candidates {
        setting_engine.set_include_loopback_candidate(true);
    }

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .with_setting_engine(setting_engine)
        .build();

    let rtc_config = RTCConfiguration {
        ice_servers: config
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
            })
            .collect(),
        ..Default::default()
    };

    api.new_peer_connection(rtc_config)
        .await
        .context("failed to create peer connection")
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let desc = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp)?,
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp)?,
    };
    Ok(desc)
}

fn from_rtc_description(description: RTCSessionDescription) -> Result<SessionDescription> {
    match description.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(description.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(description.sdp)),
        other => Err(PeerError::InvalidState {
            operation: "describe",
            state: other.to_string(),
        }),
    }
}

fn from_rtc_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_m_line_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn map_connection_state(state: RTCPeerConnectionState) -> PeerConnectionState {
    match state {
        RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
        RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
        RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
        _ => PeerConnectionState::New,
    }
}

fn map_ice_state(state: RTCIceConnectionState) -> IceConnectionState {
    match state {
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        RTCIceConnectionState::Closed => IceConnectionState::Closed,
        _ => IceConnectionState::New,
    }
}

fn map_signaling_state(state: RTCSignalingState) -> SignalingState {
    match state {
        RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
        RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
        RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
        RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
        RTCSignalingState::Closed => SignalingState::Closed,
        _ => SignalingState::Stable,
    }
}

#[async_trait]
impl PeerTransport for RtcTransport {
    fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.peer_connection.create_offer(None).await?;
        from_rtc_description(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.peer_connection.create_answer(None).await?;
        from_rtc_description(answer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let desc = to_rtc_description(description)?;
        self.peer_connection.set_local_description(desc).await?;
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let desc = to_rtc_description(description)?;
        self.peer_connection.set_remote_description(desc).await?;
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        if self.peer_connection.signaling_state() != RTCSignalingState::HaveLocalOffer {
            return Ok(());
        }
        // webrtc-rs has no public constructor for a rollback description;
        // deserializing is the only way to build one. It must still carry
        // parseable SDP, so reuse the pending offer.
        let sdp = self
            .peer_connection
            .pending_local_description()
            .await
            .map(|d| d.sdp)
            .unwrap_or_default();
        let rollback: RTCSessionDescription =
            serde_json::from_value(serde_json::json!({ "type": "rollback", "sdp": sdp }))
                .map_err(|e| PeerError::InvalidState {
                    operation: "rollback",
                    state: e.to_string(),
                })?;
        self.peer_connection.set_local_description(rollback).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        };
        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| PeerError::IceCandidate(e.to_string()))
    }

    fn signaling_state(&self) -> SignalingState {
        map_signaling_state(self.peer_connection.signaling_state())
    }

    fn connection_state(&self) -> PeerConnectionState {
        map_connection_state(self.peer_connection.connection_state())
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        map_ice_state(self.peer_connection.ice_connection_state())
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataPipe>> {
        if self.connection_state() == PeerConnectionState::Closed {
            return Err(PeerError::TransportClosed);
        }
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = self
            .peer_connection
            .create_data_channel(label, Some(init))
            .await?;
        Ok(RtcDataPipe::wrap(dc, self.events.clone()))
    }

    async fn replace_track(&self, device: DeviceTag, track: OutgoingTrack) -> Result<TrackUpdate> {
        let local = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: track.codec.clone(),
                ..Default::default()
            },
            track.track_id.clone(),
            track.stream_id.clone(),
        ));

        let mut senders = self.senders.lock().await;
        if let Some(sender) = senders.get(&device) {
            sender
                .replace_track(Some(local as Arc<dyn TrackLocal + Send + Sync>))
                .await?;
            return Ok(TrackUpdate::Replaced);
        }

        let sender = self
            .peer_connection
            .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // RTCP has to be drained for the interceptors to keep working.
        let rtcp_sender = Arc::clone(&sender);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtcp_sender.read(&mut buf).await.is_ok() {}
        });

        senders.insert(device, sender);
        Ok(TrackUpdate::Added)
    }

    fn detach(&self) {
        self.events.detach();
        self.clear_handlers();
    }

    async fn close(&self) -> Result<()> {
        self.peer_connection.close().await?;
        Ok(())
    }
}

pub struct RtcDataPipe {
    id: ChannelId,
    channel: Arc<RTCDataChannel>,
}

impl RtcDataPipe {
    fn wrap(channel: Arc<RTCDataChannel>, events: TransportEventSink) -> Arc<Self> {
        let id = ChannelId::next();

        let open_events = events.clone();
        channel.on_open(Box::new(move || {
            Box::pin(async move {
                open_events.emit(TransportEvent::DataChannelOpen(id));
            })
        }));

        let close_events = events.clone();
        channel.on_close(Box::new(move || {
            let events = close_events.clone();
            Box::pin(async move {
                events.emit(TransportEvent::DataChannelClosed(id));
            })
        }));

        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let events = events.clone();
            Box::pin(async move {
                events.emit(TransportEvent::DataChannelMessage(id, msg.data));
            })
        }));

        Arc::new(Self { id, channel })
    }
}

#[async_trait]
impl DataPipe for RtcDataPipe {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn label(&self) -> String {
        self.channel.label().to_owned()
    }

    fn ready_state(&self) -> DataChannelState {
        match self.channel.ready_state() {
            RTCDataChannelState::Open => DataChannelState::Open,
            RTCDataChannelState::Closing => DataChannelState::Closing,
            RTCDataChannelState::Closed => DataChannelState::Closed,
            _ => DataChannelState::Connecting,
        }
    }

    async fn send(&self, data: &Bytes) -> Result<()> {
        self.channel
            .send(data)
            .await
            .map_err(|e| PeerError::DataChannel(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.channel.on_message(Box::new(|_| Box::pin(async {})));
        self.channel.on_close(Box::new(|| Box::pin(async {})));
        self.channel
            .close()
            .await
            .map_err(|e| PeerError::DataChannel(e.to_string()))
    }
}
