use crate::model::peer::{BusinessRole, ClientId};
use serde::{Deserialize, Serialize};

/// One participant as reported by the signaling presence directory.
/// Participants without a recognised business role are tracked but never
/// count towards room readiness.
#[derive(Debug, Serialize, Deserialize, Clone, Eq, PartialEq)]
pub struct PresenceRecord {
    pub client_id: ClientId,
    #[serde(default)]
    pub business_role: Option<BusinessRole>,
}

impl PresenceRecord {
    pub fn new(client_id: impl Into<ClientId>, business_role: BusinessRole) -> Self {
        Self {
            client_id: client_id.into(),
            business_role: Some(business_role),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.business_role.is_some()
    }
}

/// Participants with a valid business role, first occurrence of each client
/// only.
pub fn valid_participants(records: &[PresenceRecord]) -> Vec<PresenceRecord> {
    let mut out: Vec<PresenceRecord> = Vec::with_capacity(records.len());
    for record in records.iter().filter(|r| r.is_valid()) {
        if !out.iter().any(|r| r.client_id == record.client_id) {
            out.push(record.clone());
        }
    }
    out
}

/// A room is ready when at least one patient and one practitioner are
/// present.
pub fn has_patient_and_practitioner(records: &[PresenceRecord]) -> bool {
    let has = |role| records.iter().any(|r| r.business_role == Some(role));
    has(BusinessRole::Patient) && has(BusinessRole::Practitioner)
}
