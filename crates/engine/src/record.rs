//! `system_notifications` rows: encoding built notifications and decoding
//! queued ones.

use chrono::Utc;
use serde_json::{Value, json};

use dentease_common::gateway::PushMessage;
use dentease_common::store::{Row, StoreError, str_field, text_field};
use dentease_common::types::{EventType, Notification, Priority, PushStatus, Recipient, Role};

use crate::builder::{escalated_message_body, escalated_message_title, push_data};
use crate::escalation::Escalation;

/// Encode a notification as a `system_notifications` row.
pub fn to_row(notification: &Notification) -> Result<Row, StoreError> {
    match serde_json::to_value(notification) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(other) => Err(StoreError::Decode(format!(
            "notification encoded as non-object: {}",
            other
        ))),
        Err(e) => Err(StoreError::Decode(e.to_string())),
    }
}

/// A queue row decoded far enough to be delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedNotification {
    pub id: String,
    pub recipient_id: Option<String>,
    pub recipient_role: Role,
    pub event_type: EventType,
    pub title: String,
    pub body: String,
    pub related_entity_id: Option<String>,
    pub related_entity_type: Option<String>,
    pub metadata: Row,
    pub priority: Priority,
}

impl QueuedNotification {
    pub fn is_broadcast(&self) -> bool {
        self.recipient_role == Role::Admin || self.recipient_id.is_none()
    }

    /// Clinic recorded in the metadata, used when escalating.
    pub fn clinic_id(&self) -> Option<String> {
        text_field(&self.metadata, "clinic_id")
    }

    /// The row as delivered to an escalation substitute: chat messages take the
    /// escalation wording, and every kind gains the escalation tags and high
    /// priority, matching synchronously escalated notifications.
    pub fn for_substitute(&self, primary: &Recipient, escalation: &Escalation) -> Self {
        let mut delivered = self.clone();

        if delivered.event_type == EventType::ChatMessage {
            let sender_role =
                text_field(&delivered.metadata, "sender_role").unwrap_or_else(|| "user".to_string());
            delivered.event_type = EventType::EscalatedMessage;
            delivered.title = escalated_message_title(&primary.display_name);
            delivered.body = escalated_message_body(&sender_role, &self.body);
            if let Some(conversation_id) = &delivered.related_entity_id {
                delivered
                    .metadata
                    .insert("conversation_id".into(), json!(conversation_id));
            }
        }

        delivered.recipient_id = Some(escalation.substitute.id.clone());
        delivered.recipient_role = escalation.substitute.role;
        delivered.priority = Priority::High;
        delivered
            .metadata
            .insert("original_recipient".into(), json!(escalation.escalated_from));
        delivered
            .metadata
            .insert("escalation_reason".into(), json!(escalation.reason));
        delivered
    }

    pub fn push_message(&self, priority: Priority) -> PushMessage {
        PushMessage {
            title: self.title.clone(),
            body: self.body.clone(),
            data: push_data(
                self.event_type.as_str(),
                &self.id,
                self.related_entity_id.as_deref(),
                self.related_entity_type.as_deref(),
                &self.metadata,
            ),
            priority,
        }
    }
}

/// Why a queue row cannot be delivered at all.
#[derive(Debug, Clone, PartialEq)]
pub enum RowProblem {
    /// Without an id the row cannot even be marked.
    MissingId,
    Unroutable { id: String, reason: String },
}

/// Current push status of a row; `None` if absent or unrecognised.
pub fn push_status(row: &Row) -> Option<PushStatus> {
    str_field(row, "push_status").and_then(|s| s.parse().ok())
}

pub fn parse_queued(row: &Row) -> Result<QueuedNotification, RowProblem> {
    let id = text_field(row, "id").ok_or(RowProblem::MissingId)?;
    let unroutable = |reason: String| RowProblem::Unroutable {
        id: id.clone(),
        reason,
    };

    let event_type = match str_field(row, "event_type") {
        Some(raw) => raw
            .parse::<EventType>()
            .map_err(|e| unroutable(e.to_string()))?,
        None => return Err(unroutable("missing event type".to_string())),
    };

    let recipient_id = text_field(row, "recipient_id");
    let recipient_role = match (str_field(row, "recipient_role"), &recipient_id) {
        (Some(raw), _) => raw.parse::<Role>().map_err(|e| unroutable(e.to_string()))?,
        (None, None) => Role::Admin,
        (None, Some(_)) => return Err(unroutable("missing recipient role".to_string())),
    };

    let metadata = match row.get("metadata") {
        Some(Value::Object(map)) => map.clone(),
        _ => Row::new(),
    };

    Ok(QueuedNotification {
        id: id.clone(),
        recipient_id,
        recipient_role,
        event_type,
        title: text_field(row, "title").unwrap_or_else(|| "DentEase Notification".to_string()),
        body: text_field(row, "body").unwrap_or_default(),
        related_entity_id: text_field(row, "related_entity_id"),
        related_entity_type: text_field(row, "related_entity_type"),
        metadata,
        priority: Priority::from_stored(str_field(row, "priority")),
    })
}

/// Columns written when a queue row reaches its terminal state.
pub fn outcome_fields(
    status: PushStatus,
    push_error: Option<&str>,
    escalation: Option<&Escalation>,
) -> Row {
    let mut fields = Row::new();
    fields.insert("push_status".into(), json!(status));
    if status == PushStatus::Sent {
        fields.insert("sent_at".into(), json!(Utc::now()));
    }
    if let Some(error) = push_error {
        fields.insert("push_error".into(), json!(error));
    }
    if let Some(escalation) = escalation {
        fields.insert("recipient_id".into(), json!(escalation.substitute.id));
        fields.insert("recipient_role".into(), json!(escalation.substitute.role));
        fields.insert("escalated_from".into(), json!(escalation.escalated_from));
        fields.insert("escalation_reason".into(), json!(escalation.reason));
        fields.insert("priority".into(), json!(Priority::High));
    }
    fields
}

/// Content columns rewritten when a queued row went to a substitute.
pub fn substitute_content_fields(delivered: &QueuedNotification) -> Row {
    let mut fields = Row::new();
    fields.insert("event_type".into(), json!(delivered.event_type));
    fields.insert("title".into(), json!(delivered.title));
    fields.insert("body".into(), json!(delivered.body));
    fields.insert("metadata".into(), Value::Object(delivered.metadata.clone()));
    fields
}
