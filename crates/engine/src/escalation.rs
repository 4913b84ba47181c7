//! Escalation policy: redirects notifications away from unavailable recipients.
//!
//! Today the only rule is staff on leave → the owner of their clinic. The
//! owner is a dentist id stored on `clinics.owner_id`.

use dentease_common::store::StoreError;
use dentease_common::types::{Recipient, Role, STAFF_ON_LEAVE};

use crate::directory::RecipientDirectory;

/// A successful substitution.
#[derive(Debug, Clone, PartialEq)]
pub struct Escalation {
    pub substitute: Recipient,
    pub escalated_from: String,
    pub reason: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EscalationOutcome {
    Escalated(Escalation),
    /// No substitute could be found; the notification is not delivered.
    Unresolved(String),
}

#[derive(Clone)]
pub struct EscalationPolicy {
    directory: RecipientDirectory,
}

impl EscalationPolicy {
    pub fn new(directory: RecipientDirectory) -> Self {
        Self { directory }
    }

    /// True only for staff who are currently unavailable.
    pub fn needs_escalation(recipient: &Recipient) -> bool {
        recipient.role == Role::Staff && !recipient.is_available
    }

    /// Find a substitute for `primary`. The event's clinic wins over the
    /// clinic stored on the staff record.
    pub async fn escalate(
        &self,
        primary: &Recipient,
        clinic_id: Option<&str>,
    ) -> Result<EscalationOutcome, StoreError> {
        if primary.role != Role::Staff {
            return Ok(EscalationOutcome::Unresolved(format!(
                "No escalation path for role {}",
                primary.role
            )));
        }

        let Some(clinic_id) = clinic_id.or(primary.clinic_id.as_deref()) else {
            return Ok(unresolved(primary, "staff has no clinic"));
        };

        let Some(clinic) = self.directory.clinic(clinic_id).await? else {
            return Ok(unresolved(primary, "clinic not found"));
        };

        let Some(owner_id) = clinic.owner_id else {
            return Ok(unresolved(primary, "clinic has no owner"));
        };

        let owner = match self.directory.resolve(&owner_id, Role::Dentist).await? {
            Some(owner) if owner.delivery_target.is_some() => owner,
            Some(_) => return Ok(unresolved(primary, "clinic owner has no device token")),
            None => return Ok(unresolved(primary, "clinic owner not found")),
        };

        tracing::info!(
            staff_id = %primary.id,
            owner_id = %owner.id,
            clinic_id = %clinic_id,
            "Escalating notification for staff on leave"
        );

        Ok(EscalationOutcome::Escalated(Escalation {
            substitute: owner,
            escalated_from: primary.id.clone(),
            reason: STAFF_ON_LEAVE,
        }))
    }
}

fn unresolved(primary: &Recipient, why: &str) -> EscalationOutcome {
    tracing::warn!(staff_id = %primary.id, reason = why, "Escalation failed");
    EscalationOutcome::Unresolved(format!("Escalation failed: {}", why))
}
