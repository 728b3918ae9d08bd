use crate::transport::peer_transport::{
    ChannelId, DataPipe, IceConnectionState, PeerConnectionState, RemoteTrack, SignalingState,
};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use telelink_core::IceCandidate;
use tokio::sync::mpsc;

/// Generation counter of the transport slot. Every rebuild gets a new epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TransportEpoch(pub u64);

impl TransportEpoch {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for TransportEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Events a transport raises for the session that owns it.
pub enum TransportEvent {
    NegotiationNeeded,

    /// Local ICE candidate; `None` marks the end of gathering.
    LocalCandidate(Option<IceCandidate>),

    ConnectionStateChanged(PeerConnectionState),

    IceConnectionStateChanged(IceConnectionState),

    SignalingStateChanged(SignalingState),

    /// The remote peer created a data channel.
    DataChannelReceived(Arc<dyn DataPipe>),

    DataChannelOpen(ChannelId),

    DataChannelClosed(ChannelId),

    DataChannelMessage(ChannelId, Bytes),

    RemoteTrack(RemoteTrack),
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::NegotiationNeeded => f.write_str("NegotiationNeeded"),
            TransportEvent::LocalCandidate(c) => {
                write!(f, "LocalCandidate({})", if c.is_some() { "some" } else { "end" })
            }
            TransportEvent::ConnectionStateChanged(s) => write!(f, "ConnectionStateChanged({s:?})"),
            TransportEvent::IceConnectionStateChanged(s) => {
                write!(f, "IceConnectionStateChanged({s:?})")
            }
            TransportEvent::SignalingStateChanged(s) => write!(f, "SignalingStateChanged({s:?})"),
            TransportEvent::DataChannelReceived(p) => write!(f, "DataChannelReceived({})", p.id()),
            TransportEvent::DataChannelOpen(id) => write!(f, "DataChannelOpen({id})"),
            TransportEvent::DataChannelClosed(id) => write!(f, "DataChannelClosed({id})"),
            TransportEvent::DataChannelMessage(id, data) => {
                write!(f, "DataChannelMessage({id}, {} bytes)", data.len())
            }
            TransportEvent::RemoteTrack(t) => write!(f, "RemoteTrack({})", t.track_id),
        }
    }
}

/// Handle a transport uses to report events. Events are tagged with the
/// epoch the transport was created under; once detached the sink drops
/// everything.
#[derive(Clone)]
pub struct TransportEventSink {
    epoch: TransportEpoch,
    tx: mpsc::UnboundedSender<(TransportEpoch, TransportEvent)>,
    attached: Arc<AtomicBool>,
}

impl TransportEventSink {
    pub fn new(
        epoch: TransportEpoch,
        tx: mpsc::UnboundedSender<(TransportEpoch, TransportEvent)>,
    ) -> Self {
        Self {
            epoch,
            tx,
            attached: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn epoch(&self) -> TransportEpoch {
        self.epoch
    }

    pub fn emit(&self, event: TransportEvent) {
        if !self.attached.load(Ordering::Acquire) {
            return;
        }
        let _ = self.tx.send((self.epoch, event));
    }

    pub fn detach(&self) {
        self.attached.store(false, Ordering::Release);
    }
}
