//! Event router: classifies inbound events into notification intents.
//!
//! Two envelope shapes arrive at the entry points:
//! 1. Row-change webhooks `{type, table, record, old_record?}`
//! 2. Direct calls `{event_type, recipient_id?, recipient_role?, ...}`
//!
//! Classification is pure: no lookups, no side effects. Anything that cannot be
//! routed comes back as [`Routing::Ignored`] with a human-readable reason.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

use dentease_common::store::{Row, f64_field, text_field};
use dentease_common::types::{EventType, Role};

/// Data key holding the caller's notice kind when it is not a known event type.
pub const NOTIFICATION_TYPE_KEY: &str = "notification_type";

/// Kind of row change reported by the database webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Row-change envelope.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RowChange {
    #[serde(rename = "type")]
    pub change_kind: ChangeKind,
    pub table: String,
    #[serde(rename = "record", default, deserialize_with = "null_as_empty")]
    pub new_row: Row,
    #[serde(rename = "old_record", default)]
    pub old_row: Option<Row>,
}

/// Direct-call envelope.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DirectCall {
    #[serde(rename = "event_type")]
    pub intent_kind: String,
    pub recipient_id: Option<String>,
    pub recipient_role: Option<String>,
    pub clinic_id: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub data: Row,
    #[serde(default)]
    pub send_to_admin: bool,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Row, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Row>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Error)]
pub enum MalformedEvent {
    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("payload matches neither a row-change nor a direct-call envelope")]
    UnknownShape,

    #[error("invalid envelope: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Normalized input of the router.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    RowChange(RowChange),
    Direct(DirectCall),
}

impl InboundEvent {
    /// Detect the envelope shape and parse it.
    pub fn from_json(value: Value) -> Result<Self, MalformedEvent> {
        let object = value.as_object().ok_or(MalformedEvent::NotAnObject)?;

        if object.contains_key("type") && object.contains_key("table") {
            return Ok(InboundEvent::RowChange(serde_json::from_value(value)?));
        }
        if object.contains_key("event_type") {
            return Ok(InboundEvent::Direct(serde_json::from_value(value)?));
        }

        Err(MalformedEvent::UnknownShape)
    }
}

/// A generic notice addressed through a direct call.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub event_type: EventType,
    pub recipient: Option<(String, Role)>,
    pub clinic_id: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub data: Row,
    pub send_to_admin: bool,
}

/// Classified, typed "something happened that might need a notification".
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    NewMessage {
        conversation_id: String,
        sender_id: String,
        sender_role: String,
        sender_name: String,
        content: String,
    },
    NewBooking {
        booking_id: String,
        clinic_id: String,
        patient_id: String,
        service_id: Option<String>,
    },
    BookingStatusChanged {
        booking_id: String,
        patient_id: String,
        clinic_id: String,
        old_status: String,
        new_status: String,
        event_type: EventType,
    },
    ClinicRegistered {
        clinic_id: String,
        clinic_name: String,
    },
    ClinicStatusChanged {
        clinic_id: String,
        clinic_name: String,
        old_status: String,
        new_status: String,
        rejection_reason: Option<String>,
        event_type: EventType,
    },
    BillCreated {
        bill_id: String,
        patient_id: String,
        clinic_id: String,
        total_amount: f64,
    },
    Notice(Notice),
}

impl Intent {
    /// Event type of the notifications this intent produces.
    pub fn event_type(&self) -> EventType {
        match self {
            Intent::NewMessage { .. } => EventType::ChatMessage,
            Intent::NewBooking { .. } => EventType::NewBooking,
            Intent::BookingStatusChanged { event_type, .. } => *event_type,
            Intent::ClinicRegistered { .. } => EventType::ClinicRegistered,
            Intent::ClinicStatusChanged { event_type, .. } => *event_type,
            Intent::BillCreated { .. } => EventType::BillCreated,
            Intent::Notice(notice) => notice.event_type,
        }
    }

    /// Clinic the intent belongs to, when it has one.
    pub fn clinic_id(&self) -> Option<&str> {
        match self {
            Intent::NewBooking { clinic_id, .. }
            | Intent::BookingStatusChanged { clinic_id, .. }
            | Intent::ClinicRegistered { clinic_id, .. }
            | Intent::ClinicStatusChanged { clinic_id, .. }
            | Intent::BillCreated { clinic_id, .. } => Some(clinic_id),
            Intent::Notice(notice) => notice.clinic_id.as_deref(),
            Intent::NewMessage { .. } => None,
        }
    }
}

/// Result of classification.
#[derive(Debug, Clone, PartialEq)]
pub enum Routing {
    Intent(Intent),
    Ignored(String),
}

/// Pure classifier from inbound events to intents.
pub struct EventRouter;

impl EventRouter {
    pub fn classify(event: &InboundEvent) -> Routing {
        match event {
            InboundEvent::RowChange(change) => Self::classify_row(
                change.change_kind,
                &change.table,
                &change.new_row,
                change.old_row.as_ref(),
            ),
            InboundEvent::Direct(call) => Self::classify_direct(call),
        }
    }

    fn classify_row(kind: ChangeKind, table: &str, new_row: &Row, old_row: Option<&Row>) -> Routing {
        let routed = match (table, kind) {
            ("messages", ChangeKind::Insert) => Self::new_message(new_row),
            ("bookings", ChangeKind::Insert) => Self::new_booking(new_row),
            ("bookings", ChangeKind::Update) => Self::booking_update(new_row, old_row),
            ("clinics", ChangeKind::Insert) => Self::clinic_insert(new_row),
            ("clinics", ChangeKind::Update) => Self::clinic_update(new_row, old_row),
            ("bills", ChangeKind::Insert) => Self::bill_created(new_row),
            _ => Err(format!("No route for {:?} on table '{}'", kind, table)),
        };

        match routed {
            Ok(intent) => Routing::Intent(intent),
            Err(reason) => Routing::Ignored(reason),
        }
    }

    fn classify_direct(call: &DirectCall) -> Routing {
        match call.intent_kind.as_str() {
            // These carry the source row in `data` and route like the webhook.
            "new_message" => Self::classify_row(ChangeKind::Insert, "messages", &call.data, None),
            "new_booking" => Self::classify_row(ChangeKind::Insert, "bookings", &call.data, None),
            kind => match Self::notice(kind, call) {
                Ok(notice) => Routing::Intent(Intent::Notice(notice)),
                Err(reason) => Routing::Ignored(reason),
            },
        }
    }

    fn new_message(row: &Row) -> Result<Intent, String> {
        let content = text_field(row, "content")
            .or_else(|| text_field(row, "message"))
            .unwrap_or_default();

        Ok(Intent::NewMessage {
            conversation_id: required(row, "messages", "conversation_id")?,
            sender_id: required(row, "messages", "sender_id")?,
            sender_role: text_field(row, "sender_role").unwrap_or_else(|| "user".to_string()),
            sender_name: text_field(row, "sender_name").unwrap_or_else(|| "Someone".to_string()),
            content,
        })
    }

    fn new_booking(row: &Row) -> Result<Intent, String> {
        let status = text_field(row, "status").unwrap_or_default();
        if status != "pending" {
            return Err(format!("Booking status is '{}', not pending", status));
        }

        Ok(Intent::NewBooking {
            booking_id: required(row, "bookings", "booking_id")?,
            clinic_id: required(row, "bookings", "clinic_id")?,
            patient_id: required(row, "bookings", "patient_id")?,
            service_id: text_field(row, "service_id"),
        })
    }

    fn booking_update(new_row: &Row, old_row: Option<&Row>) -> Result<Intent, String> {
        let (old_status, new_status) = status_change(new_row, old_row)?;

        let event_type = match new_status.as_str() {
            "approved" => EventType::BookingApproved,
            "rejected" => EventType::BookingRejected,
            "cancelled" => EventType::BookingCancelled,
            "completed" => EventType::BookingCompleted,
            other => return Err(format!("Unknown booking status: {}", other)),
        };

        Ok(Intent::BookingStatusChanged {
            booking_id: required(new_row, "bookings", "booking_id")?,
            patient_id: required(new_row, "bookings", "patient_id")?,
            clinic_id: required(new_row, "bookings", "clinic_id")?,
            old_status,
            new_status,
            event_type,
        })
    }

    fn clinic_insert(row: &Row) -> Result<Intent, String> {
        let status = text_field(row, "status").unwrap_or_default();
        if status != "pending" {
            return Err(format!("Clinic status is '{}', not pending", status));
        }

        Ok(Intent::ClinicRegistered {
            clinic_id: required(row, "clinics", "clinic_id")?,
            clinic_name: text_field(row, "clinic_name")
                .unwrap_or_else(|| "A new clinic".to_string()),
        })
    }

    fn clinic_update(new_row: &Row, old_row: Option<&Row>) -> Result<Intent, String> {
        let (old_status, new_status) = status_change(new_row, old_row)?;

        let event_type = match new_status.as_str() {
            "approved" => EventType::ClinicApproved,
            "rejected" => EventType::ClinicRejected,
            // Only a move out of `rejected` counts as a resubmission.
            "pending" if old_status == "rejected" => EventType::ClinicResubmission,
            "pending" => {
                return Err(format!(
                    "Clinic moved to pending from '{}', no notification sent",
                    old_status
                ));
            }
            other => return Err(format!("Unknown clinic status: {}", other)),
        };

        Ok(Intent::ClinicStatusChanged {
            clinic_id: required(new_row, "clinics", "clinic_id")?,
            clinic_name: text_field(new_row, "clinic_name")
                .unwrap_or_else(|| "Your clinic".to_string()),
            old_status,
            new_status,
            rejection_reason: text_field(new_row, "rejection_reason"),
            event_type,
        })
    }

    fn bill_created(row: &Row) -> Result<Intent, String> {
        Ok(Intent::BillCreated {
            bill_id: required(row, "bills", "bill_id")?,
            patient_id: required(row, "bills", "patient_id")?,
            clinic_id: required(row, "bills", "clinic_id")?,
            total_amount: f64_field(row, "total_amount")
                .ok_or_else(|| "bills row missing 'total_amount'".to_string())?,
        })
    }

    fn notice(kind: &str, call: &DirectCall) -> Result<Notice, String> {
        // Notice kinds outside the known table go out as `general`, with the
        // caller's kind kept in the payload for the client.
        let mut data = call.data.clone();
        let event_type = kind.parse::<EventType>().unwrap_or_else(|_| {
            data.insert(NOTIFICATION_TYPE_KEY.to_string(), Value::String(kind.to_string()));
            EventType::General
        });

        let recipient = match (&call.recipient_id, &call.recipient_role) {
            (Some(id), Some(role)) => {
                let role: Role = role.parse().map_err(|e| format!("Direct call: {}", e))?;
                Some((id.clone(), role))
            }
            _ => None,
        };

        if recipient.is_none() && !call.send_to_admin {
            return Err(format!(
                "Direct '{}' call names no recipient and does not target admins",
                kind
            ));
        }

        Ok(Notice {
            event_type,
            recipient,
            clinic_id: call.clinic_id.clone(),
            title: call.title.clone(),
            body: call.body.clone(),
            data,
            send_to_admin: call.send_to_admin,
        })
    }
}

fn required(row: &Row, table: &str, column: &str) -> Result<String, String> {
    text_field(row, column).ok_or_else(|| format!("{} row missing '{}'", table, column))
}

/// `(old, new)` status pair, or a reason why there is no change to act on.
fn status_change(new_row: &Row, old_row: Option<&Row>) -> Result<(String, String), String> {
    let old_status = old_row.and_then(|r| text_field(r, "status"));
    let new_status = text_field(new_row, "status");

    match (old_status, new_status) {
        (Some(old), Some(new)) if old != new => Ok((old, new)),
        _ => Err("No status change detected".to_string()),
    }
}
