use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The single broadcast topic every admin device subscribes to.
pub const ADMIN_TOPIC: &str = "admin_alerts";

/// Escalation reason recorded when a staff member on leave is substituted.
pub const STAFF_ON_LEAVE: &str = "staff_on_leave";

/// Error returned when a string does not name a known enum variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Who a notification is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Dentist,
    Staff,
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Patient => write!(f, "patient"),
            Role::Dentist => write!(f, "dentist"),
            Role::Staff => write!(f, "staff"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "patient" => Ok(Role::Patient),
            "dentist" => Ok(Role::Dentist),
            "staff" => Ok(Role::Staff),
            "admin" => Ok(Role::Admin),
            other => Err(UnknownVariant::new("role", other)),
        }
    }
}

/// Closed set of notification event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    NewMessage,
    NewBooking,
    BookingApproved,
    BookingRejected,
    BookingCancelled,
    BookingCompleted,
    ClinicRegistered,
    ClinicApproved,
    ClinicRejected,
    ClinicResubmission,
    BillCreated,
    ChatMessage,
    EscalatedMessage,
    General,
}

impl EventType {
    pub const ALL: [EventType; 14] = [
        EventType::NewMessage,
        EventType::NewBooking,
        EventType::BookingApproved,
        EventType::BookingRejected,
        EventType::BookingCancelled,
        EventType::BookingCompleted,
        EventType::ClinicRegistered,
        EventType::ClinicApproved,
        EventType::ClinicRejected,
        EventType::ClinicResubmission,
        EventType::BillCreated,
        EventType::ChatMessage,
        EventType::EscalatedMessage,
        EventType::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::NewMessage => "new_message",
            EventType::NewBooking => "new_booking",
            EventType::BookingApproved => "booking_approved",
            EventType::BookingRejected => "booking_rejected",
            EventType::BookingCancelled => "booking_cancelled",
            EventType::BookingCompleted => "booking_completed",
            EventType::ClinicRegistered => "clinic_registered",
            EventType::ClinicApproved => "clinic_approved",
            EventType::ClinicRejected => "clinic_rejected",
            EventType::ClinicResubmission => "clinic_resubmission",
            EventType::BillCreated => "bill_created",
            EventType::ChatMessage => "chat_message",
            EventType::EscalatedMessage => "escalated_message",
            EventType::General => "general",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("event type", s))
    }
}

/// Transport-level delivery priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    High,
}

impl Priority {
    /// Lenient parse used for stored rows: anything but `high` is normal.
    pub fn from_stored(value: Option<&str>) -> Self {
        match value {
            Some("high") => Priority::High,
            _ => Priority::Normal,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
        }
    }
}

/// Push delivery state of a notification.
///
/// `Pending` is the only non-terminal state; a notification leaves it exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushStatus {
    Pending,
    Sent,
    Skipped,
    Failed,
}

impl PushStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PushStatus::Pending)
    }
}

impl std::fmt::Display for PushStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PushStatus::Pending => write!(f, "pending"),
            PushStatus::Sent => write!(f, "sent"),
            PushStatus::Skipped => write!(f, "skipped"),
            PushStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for PushStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PushStatus::Pending),
            "sent" => Ok(PushStatus::Sent),
            "skipped" => Ok(PushStatus::Skipped),
            "failed" => Ok(PushStatus::Failed),
            other => Err(UnknownVariant::new("push status", other)),
        }
    }
}

/// A concrete push destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum DeliveryTarget {
    Token(String),
    Topic(String),
}

impl DeliveryTarget {
    pub fn admin_topic() -> Self {
        DeliveryTarget::Topic(ADMIN_TOPIC.to_string())
    }

    /// Short form safe for logs: topics verbatim, tokens truncated.
    pub fn redacted(&self) -> String {
        match self {
            DeliveryTarget::Topic(topic) => format!("topic:{}", topic),
            DeliveryTarget::Token(token) => {
                let prefix: String = token.chars().take(12).collect();
                format!("token:{}...", prefix)
            }
        }
    }
}

/// A resolved recipient. Looked up from the directory, never persisted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    pub role: Role,
    pub display_name: String,
    pub delivery_target: Option<DeliveryTarget>,
    /// Leave / business-hours state. Only meaningful for staff.
    pub is_available: bool,
    pub clinic_id: Option<String>,
}

impl Recipient {
    pub fn admin_broadcast() -> Self {
        Self {
            id: ADMIN_TOPIC.to_string(),
            role: Role::Admin,
            display_name: "Admins".to_string(),
            delivery_target: Some(DeliveryTarget::admin_topic()),
            is_available: true,
            clinic_id: None,
        }
    }
}

/// A clinic as far as routing is concerned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clinic {
    pub clinic_id: String,
    pub clinic_name: String,
    pub owner_id: Option<String>,
}

/// The unit of work: one notification to one audience.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    /// Absent when the audience is the admin broadcast topic.
    pub recipient_id: Option<String>,
    pub recipient_role: Role,
    pub event_type: EventType,
    pub title: String,
    pub body: String,
    pub related_entity_id: Option<String>,
    pub related_entity_type: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub priority: Priority,
    pub push_status: PushStatus,
    pub escalated_from: Option<String>,
    pub escalation_reason: Option<String>,
    pub push_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// Whether this notification goes to the broadcast topic rather than a user.
    pub fn is_broadcast(&self) -> bool {
        self.recipient_role == Role::Admin || self.recipient_id.is_none()
    }
}
