//! Recipient directory: resolves ids and roles into deliverable recipients.
//!
//! Admins are never looked up per user; they share the broadcast topic. A
//! dentist id that matches no dentist row is retried as a clinic id, since
//! conversations address a clinic through its dentists.

use std::sync::Arc;

use dentease_common::store::{
    Datastore, Filter, Query, Row, StoreError, Table, bool_field, str_field, text_field,
};
use dentease_common::types::{Clinic, DeliveryTarget, Recipient, Role};

/// An active member of a conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub user_id: String,
    /// Stored role text; parsed by the caller so unknown roles can be reported.
    pub role: String,
    pub display_name: Option<String>,
}

#[derive(Clone)]
pub struct RecipientDirectory {
    store: Arc<dyn Datastore>,
}

impl RecipientDirectory {
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self { store }
    }

    /// Resolve one recipient. `Ok(None)` means nobody by that id exists.
    pub async fn resolve(
        &self,
        recipient_id: &str,
        role: Role,
    ) -> Result<Option<Recipient>, StoreError> {
        let table = match role {
            Role::Admin => return Ok(Some(Recipient::admin_broadcast())),
            Role::Patient => Table::PATIENTS,
            Role::Dentist => Table::DENTISTS,
            Role::Staff => Table::STAFFS,
        };

        if let Some(row) = self.store.get_by_key(table, recipient_id).await? {
            return Ok(Some(recipient_from_row(&row, table, role, recipient_id)));
        }

        if role == Role::Dentist {
            let fallback = self
                .list_dentists_for_clinic(recipient_id)
                .await?
                .into_iter()
                .find(|d| d.delivery_target.is_some());

            if let Some(dentist) = &fallback {
                tracing::debug!(
                    clinic_id = %recipient_id,
                    dentist_id = %dentist.id,
                    "Resolved clinic recipient through its dentist"
                );
            }
            return Ok(fallback);
        }

        Ok(None)
    }

    pub async fn list_dentists_for_clinic(
        &self,
        clinic_id: &str,
    ) -> Result<Vec<Recipient>, StoreError> {
        self.list_for_clinic(Table::DENTISTS, Role::Dentist, clinic_id)
            .await
    }

    /// All staff of a clinic, on leave or not.
    pub async fn list_staff_for_clinic(
        &self,
        clinic_id: &str,
    ) -> Result<Vec<Recipient>, StoreError> {
        self.list_for_clinic(Table::STAFFS, Role::Staff, clinic_id)
            .await
    }

    async fn list_for_clinic(
        &self,
        table: Table,
        role: Role,
        clinic_id: &str,
    ) -> Result<Vec<Recipient>, StoreError> {
        let rows = self
            .store
            .query(
                &Query::table(table)
                    .filter(Filter::eq("clinic_id", clinic_id))
                    .order_by_asc(table.key),
            )
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let id = text_field(row, table.key)?;
                Some(recipient_from_row(row, table, role, &id))
            })
            .collect())
    }

    pub async fn clinic(&self, clinic_id: &str) -> Result<Option<Clinic>, StoreError> {
        let Some(row) = self.store.get_by_key(Table::CLINICS, clinic_id).await? else {
            return Ok(None);
        };

        Ok(Some(Clinic {
            clinic_id: clinic_id.to_string(),
            clinic_name: str_field(&row, "clinic_name")
                .unwrap_or("The clinic")
                .to_string(),
            owner_id: text_field(&row, "owner_id"),
        }))
    }

    /// Active participants of a conversation other than `exclude_user`.
    pub async fn conversation_participants(
        &self,
        conversation_id: &str,
        exclude_user: &str,
    ) -> Result<Vec<Participant>, StoreError> {
        let rows = self
            .store
            .query(
                &Query::table(Table::CONVERSATION_PARTICIPANTS)
                    .filter(Filter::eq("conversation_id", conversation_id))
                    .filter(Filter::eq("is_active", true))
                    .filter(Filter::not_eq("user_id", exclude_user)),
            )
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                Some(Participant {
                    user_id: text_field(row, "user_id")?,
                    role: str_field(row, "role")?.to_string(),
                    display_name: str_field(row, "display_name").map(str::to_string),
                })
            })
            .collect())
    }

    pub async fn patient_name(&self, patient_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .store
            .get_by_key(Table::PATIENTS, patient_id)
            .await?
            .and_then(|row| full_name(&row)))
    }

    pub async fn service_name(&self, service_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .store
            .get_by_key(Table::SERVICES, service_id)
            .await?
            .and_then(|row| str_field(&row, "service_name").map(str::to_string)))
    }
}

fn full_name(row: &Row) -> Option<String> {
    let name = format!(
        "{} {}",
        str_field(row, "firstname").unwrap_or_default(),
        str_field(row, "lastname").unwrap_or_default()
    );
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

fn default_name(role: Role) -> &'static str {
    match role {
        Role::Patient => "Patient",
        Role::Dentist => "Dentist",
        Role::Staff => "Staff",
        Role::Admin => "Admin",
    }
}

fn recipient_from_row(row: &Row, table: Table, role: Role, id: &str) -> Recipient {
    let is_available = match role {
        Role::Staff => !bool_field(row, "is_on_leave").unwrap_or(false),
        _ => true,
    };

    Recipient {
        id: id.to_string(),
        role,
        display_name: full_name(row).unwrap_or_else(|| default_name(role).to_string()),
        delivery_target: str_field(row, "fcm_token").map(|t| DeliveryTarget::Token(t.to_string())),
        is_available,
        clinic_id: text_field(row, "clinic_id").filter(|_| table != Table::PATIENTS),
    }
}
