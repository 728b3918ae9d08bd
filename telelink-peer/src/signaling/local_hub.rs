use crate::error::SignalingError;
use crate::signaling::signaling_channel::{SignalingChannel, SignalingEvent};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use telelink_core::{PeerIdentity, PresenceRecord, RoomId, SignalingMessage, valid_participants};
use tokio::sync::mpsc;
use tracing::{debug, info};

struct Member {
    key: u64,
    record: PresenceRecord,
    tx: mpsc::UnboundedSender<SignalingEvent>,
}

/// In-process signaling: every room is a broadcast group with a presence
/// list. Messages reach every member, the sender included.
#[derive(Clone, Default)]
pub struct LocalSignalingHub {
    rooms: Arc<DashMap<RoomId, Vec<Member>>>,
    next_key: Arc<AtomicU64>,
}

impl LocalSignalingHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A signaling channel for `identity` in `room_id`. Nothing happens until
    /// it is connected.
    pub fn channel(&self, room_id: RoomId, identity: PeerIdentity) -> LocalSignalingChannel {
        LocalSignalingChannel {
            hub: self.clone(),
            room_id,
            identity,
            member_key: AtomicU64::new(0),
        }
    }

    pub fn participants(&self, room_id: &RoomId) -> Vec<PresenceRecord> {
        self.rooms
            .get(room_id)
            .map(|members| members.iter().map(|m| m.record.clone()).collect())
            .unwrap_or_default()
    }

    fn join(&self, room_id: &RoomId, record: PresenceRecord) -> (u64, mpsc::UnboundedReceiver<SignalingEvent>) {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();

        info!(category = "signaling", room = %room_id, client = %record.client_id, "joined room");
        self.rooms
            .entry(room_id.clone())
            .or_default()
            .push(Member { key, record, tx });
        self.publish_presence(room_id);

        (key, rx)
    }

    fn leave(&self, room_id: &RoomId, key: u64) {
        let emptied = match self.rooms.get_mut(room_id) {
            Some(mut members) => {
                members.retain(|m| m.key != key);
                members.is_empty()
            }
            None => return,
        };

        if emptied {
            self.rooms.remove_if(room_id, |_, members| members.is_empty());
            debug!(category = "signaling", room = %room_id, "room closed");
        } else {
            self.publish_presence(room_id);
        }
    }

    fn broadcast(&self, room_id: &RoomId, message: SignalingMessage) -> Result<(), SignalingError> {
        let members = self
            .rooms
            .get(room_id)
            .ok_or_else(|| SignalingError::RoomUnavailable(room_id.to_string()))?;

        for member in members.iter() {
            let _ = member.tx.send(SignalingEvent::Message(message.clone()));
        }
        Ok(())
    }

    fn publish_presence(&self, room_id: &RoomId) {
        let Some(members) = self.rooms.get(room_id) else {
            return;
        };
        let snapshot: Vec<PresenceRecord> = members.iter().map(|m| m.record.clone()).collect();
        for member in members.iter() {
            let _ = member.tx.send(SignalingEvent::Presence(snapshot.clone()));
        }
    }
}

pub struct LocalSignalingChannel {
    hub: LocalSignalingHub,
    room_id: RoomId,
    identity: PeerIdentity,
    /// Zero while disconnected.
    member_key: AtomicU64,
}

impl LocalSignalingChannel {
    pub fn is_connected(&self) -> bool {
        self.member_key.load(Ordering::Acquire) != 0
    }
}

#[async_trait]
impl SignalingChannel for LocalSignalingChannel {
    async fn connect(&self) -> Result<mpsc::UnboundedReceiver<SignalingEvent>, SignalingError> {
        let record = PresenceRecord::new(
            self.identity.client_id.clone(),
            self.identity.business_role,
        );
        let (key, rx) = self.hub.join(&self.room_id, record);

        let previous = self.member_key.swap(key, Ordering::AcqRel);
        if previous != 0 {
            self.hub.leave(&self.room_id, previous);
        }
        Ok(rx)
    }

    async fn disconnect(&self) {
        let key = self.member_key.swap(0, Ordering::AcqRel);
        if key != 0 {
            info!(category = "signaling", room = %self.room_id, client = %self.identity.client_id, "left room");
            self.hub.leave(&self.room_id, key);
        }
    }

    async fn send_message(&self, message: SignalingMessage) -> Result<(), SignalingError> {
        if !self.is_connected() {
            return Err(SignalingError::NotConnected);
        }
        self.hub.broadcast(&self.room_id, message)
    }

    fn valid_participants(&self) -> Vec<PresenceRecord> {
        valid_participants(&self.hub.participants(&self.room_id))
    }
}
