use crate::transport::SignalingState;
use serde::Serialize;

/// Where the local side is in an offer/answer exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationPhase {
    #[default]
    Idle,
    /// A local offer was requested and no answer has been applied yet.
    MakingOffer,
    /// The answer to our offer is being applied.
    ApplyingRemoteAnswer,
    /// A remote offer is being applied and answered.
    ApplyingRemoteOffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferDecision {
    Accept,
    /// Accept after rolling back our own pending offer.
    AcceptWithRollback,
    Ignore,
}

/// Perfect Negotiation bookkeeping for one transport.
#[derive(Debug, Clone, Default)]
pub struct NegotiationState {
    phase: NegotiationPhase,
    ignore_offer: bool,
}

impl NegotiationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> NegotiationPhase {
        self.phase
    }

    pub fn making_offer(&self) -> bool {
        matches!(
            self.phase,
            NegotiationPhase::MakingOffer | NegotiationPhase::ApplyingRemoteAnswer
        )
    }

    pub fn is_setting_remote_answer_pending(&self) -> bool {
        self.phase == NegotiationPhase::ApplyingRemoteAnswer
    }

    pub fn ignore_offer(&self) -> bool {
        self.ignore_offer
    }

    pub fn begin_offer(&mut self) {
        self.phase = NegotiationPhase::MakingOffer;
    }

    pub fn offer_failed(&mut self) {
        if self.phase == NegotiationPhase::MakingOffer {
            self.phase = NegotiationPhase::Idle;
        }
    }

    pub fn begin_remote_answer(&mut self) {
        self.phase = NegotiationPhase::ApplyingRemoteAnswer;
    }

    /// Clears both offer flags whether or not the answer applied cleanly.
    pub fn answer_settled(&mut self) {
        self.phase = NegotiationPhase::Idle;
    }

    /// Decide what to do with an inbound offer and record the decision.
    pub fn evaluate_offer(&mut self, signaling: SignalingState, polite: bool) -> OfferDecision {
        let collision = self.phase == NegotiationPhase::MakingOffer
            || (signaling != SignalingState::Stable && !self.is_setting_remote_answer_pending());

        self.ignore_offer = !polite && collision;
        if self.ignore_offer {
            return OfferDecision::Ignore;
        }

        self.phase = NegotiationPhase::ApplyingRemoteOffer;
        if collision {
            OfferDecision::AcceptWithRollback
        } else {
            OfferDecision::Accept
        }
    }

    pub fn remote_offer_settled(&mut self) {
        if self.phase == NegotiationPhase::ApplyingRemoteOffer {
            self.phase = NegotiationPhase::Idle;
        }
    }
}
