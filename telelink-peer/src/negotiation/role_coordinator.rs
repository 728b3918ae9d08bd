use serde::Serialize;
use telelink_core::{ClientId, PresenceRecord, SignalPayload};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationRole {
    Polite,
    Impolite,
}

/// Side effects requested by the coordinator. The caller performs them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleEffect {
    Broadcast(SignalPayload),
    ArmArrivalTimer,
    ArmConfirmTimer,
    CancelArrivalTimer,
    CancelConfirmTimer,
    RoleChanged(NegotiationRole),
}

/// Decides which peer is impolite. A peer starts out polite, claims the
/// impolite role when it is alone or nobody else claims in time, and settles
/// conflicting claims in favour of the smaller client id.
#[derive(Debug, Clone)]
pub struct RoleCoordinator {
    local: ClientId,
    role: NegotiationRole,
    requested: bool,
    confirmed: bool,
    remote_impolite: Option<ClientId>,
    released_by: Option<ClientId>,
    participants: Vec<ClientId>,
    destroyed: bool,
}

impl RoleCoordinator {
    pub fn new(local: ClientId) -> Self {
        Self {
            local,
            role: NegotiationRole::Polite,
            requested: false,
            confirmed: false,
            remote_impolite: None,
            released_by: None,
            participants: Vec::new(),
            destroyed: false,
        }
    }

    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    pub fn is_polite(&self) -> bool {
        self.role == NegotiationRole::Polite
    }

    pub fn role_requested(&self) -> bool {
        self.requested
    }

    pub fn role_confirmed(&self) -> bool {
        self.confirmed
    }

    pub fn is_confirmed_impolite(&self) -> bool {
        self.confirmed && self.role == NegotiationRole::Impolite
    }

    pub fn remote_impolite(&self) -> Option<&ClientId> {
        self.remote_impolite.as_ref()
    }

    /// Begin coordination from the current presence snapshot.
    pub fn start(&mut self, participants: &[PresenceRecord]) -> Vec<RoleEffect> {
        if self.destroyed {
            return Vec::new();
        }
        self.participants = participants.iter().map(|p| p.client_id.clone()).collect();

        if self.participants.iter().all(|id| *id == self.local) {
            debug!(category = "role", client = %self.local, "first to arrive, claiming impolite");
            self.claim()
        } else {
            vec![RoleEffect::ArmArrivalTimer]
        }
    }

    pub fn on_arrival_timeout(&mut self) -> Vec<RoleEffect> {
        if self.destroyed || self.requested || self.confirmed {
            return Vec::new();
        }
        debug!(category = "role", client = %self.local, "no remote claim observed, claiming impolite");
        self.claim()
    }

    pub fn on_confirm_timeout(&mut self) -> Vec<RoleEffect> {
        if self.destroyed || !self.requested || self.confirmed {
            return Vec::new();
        }
        info!(category = "role", client = %self.local, "impolite role confirmed");
        self.confirmed = true;
        self.remote_impolite = None;

        let mut effects = Vec::new();
        self.set_role(NegotiationRole::Impolite, &mut effects);
        effects
    }

    pub fn on_claim(&mut self, sender: &ClientId) -> Vec<RoleEffect> {
        if self.destroyed || *sender == self.local {
            return Vec::new();
        }

        if !self.requested {
            return self.settle_polite(sender);
        }

        if self.local < *sender {
            // The loser only concedes once it sees a claim from us.
            debug!(category = "role", client = %self.local, remote = %sender, "won role conflict");
            return vec![RoleEffect::Broadcast(SignalPayload::RoleClaim)];
        }
        self.concede(sender)
    }

    pub fn on_conflict(&mut self, sender: &ClientId, winner: &ClientId) -> Vec<RoleEffect> {
        if self.destroyed || *sender == self.local {
            return Vec::new();
        }

        if *winner == self.local {
            if self.requested && !self.confirmed {
                info!(category = "role", client = %self.local, remote = %sender, "remote conceded, impolite role confirmed");
                self.confirmed = true;
                self.remote_impolite = None;
                return vec![RoleEffect::CancelConfirmTimer];
            }
            return Vec::new();
        }

        if !self.requested {
            return self.settle_polite(winner);
        }
        if *winner < self.local {
            return self.concede(winner);
        }
        Vec::new()
    }

    pub fn on_release(&mut self, sender: &ClientId) -> Vec<RoleEffect> {
        if self.destroyed || *sender == self.local {
            return Vec::new();
        }
        if self.remote_impolite.as_ref() != Some(sender) {
            debug!(category = "role", remote = %sender, "release from a peer that did not hold the role");
            return Vec::new();
        }

        info!(category = "role", client = %self.local, remote = %sender, "remote released the impolite role");
        self.remote_impolite = None;
        self.released_by = Some(sender.clone());

        if self.participants.contains(sender) {
            // Still in the room: it is rebuilding and will announce itself.
            return Vec::new();
        }
        self.released_by = None;
        self.claim()
    }

    pub fn on_presence(&mut self, participants: &[PresenceRecord]) -> Vec<RoleEffect> {
        if self.destroyed {
            return Vec::new();
        }
        let ids: Vec<ClientId> = participants.iter().map(|p| p.client_id.clone()).collect();
        let arrived = ids
            .iter()
            .any(|id| *id != self.local && !self.participants.contains(id));
        self.participants = ids;

        if let Some(releaser) = self.released_by.clone() {
            if !self.participants.contains(&releaser) {
                self.released_by = None;
                if !self.requested {
                    return self.claim();
                }
            }
        }

        if self.requested && arrived {
            debug!(category = "role", client = %self.local, "announcing claim to new participant");
            return vec![RoleEffect::Broadcast(SignalPayload::RoleClaim)];
        }
        Vec::new()
    }

    /// An offer from a peer we have not competed with means that peer holds
    /// the impolite role.
    pub fn on_offer(&mut self, sender: &ClientId) -> Vec<RoleEffect> {
        if self.destroyed || self.requested || *sender == self.local {
            return Vec::new();
        }
        if self.confirmed && self.remote_impolite.as_ref() == Some(sender) {
            return Vec::new();
        }
        self.settle_polite(sender)
    }

    /// Idempotent. Releases the impolite role if it was claimed.
    pub fn destroy(&mut self) -> Vec<RoleEffect> {
        if self.destroyed {
            return Vec::new();
        }
        self.destroyed = true;

        let mut effects = vec![RoleEffect::CancelArrivalTimer, RoleEffect::CancelConfirmTimer];
        if self.requested {
            info!(category = "role", client = %self.local, "releasing impolite role");
            effects.push(RoleEffect::Broadcast(SignalPayload::RoleRelease));
        }
        self.requested = false;
        self.confirmed = false;
        self.role = NegotiationRole::Polite;
        effects
    }

    fn claim(&mut self) -> Vec<RoleEffect> {
        self.requested = true;
        self.confirmed = false;

        let mut effects = vec![
            RoleEffect::CancelArrivalTimer,
            RoleEffect::Broadcast(SignalPayload::RoleClaim),
            RoleEffect::ArmConfirmTimer,
        ];
        self.set_role(NegotiationRole::Impolite, &mut effects);
        effects
    }

    fn concede(&mut self, winner: &ClientId) -> Vec<RoleEffect> {
        warn!(category = "role", client = %self.local, winner = %winner, "lost role conflict, switching to polite");
        self.requested = false;
        self.confirmed = true;
        self.remote_impolite = Some(winner.clone());

        let mut effects = vec![
            RoleEffect::CancelArrivalTimer,
            RoleEffect::CancelConfirmTimer,
            RoleEffect::Broadcast(SignalPayload::RoleConflict {
                winner: winner.clone(),
            }),
        ];
        self.set_role(NegotiationRole::Polite, &mut effects);
        effects
    }

    fn settle_polite(&mut self, impolite: &ClientId) -> Vec<RoleEffect> {
        if self.remote_impolite.as_ref() != Some(impolite) {
            info!(category = "role", client = %self.local, remote = %impolite, "settled as polite");
        }
        self.confirmed = true;
        self.remote_impolite = Some(impolite.clone());
        self.released_by = None;

        let mut effects = vec![RoleEffect::CancelArrivalTimer];
        self.set_role(NegotiationRole::Polite, &mut effects);
        effects
    }

    fn set_role(&mut self, role: NegotiationRole, effects: &mut Vec<RoleEffect>) {
        if self.role != role {
            self.role = role;
            effects.push(RoleEffect::RoleChanged(role));
        }
    }
}
