//! Notification builder: renders an intent for one recipient.
//!
//! Pure functions only. The content table lives in [`NotificationBuilder::content`];
//! everything else is addressing and payload plumbing.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::{Value, json};
use uuid::Uuid;

use dentease_common::gateway::PushMessage;
use dentease_common::store::Row;
use dentease_common::types::{EventType, Notification, Priority, PushStatus, Recipient, Role};

use crate::escalation::Escalation;
use crate::router::Intent;

pub const MESSAGE_PREVIEW_CHARS: usize = 100;
pub const ESCALATION_PREVIEW_CHARS: usize = 60;
pub const REJECTION_REASON_CHARS: usize = 80;
pub const CLICK_ACTION: &str = "FLUTTER_NOTIFICATION_CLICK";

/// Names looked up by the caller before rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildContext {
    pub clinic_name: Option<String>,
    pub patient_name: Option<String>,
    pub service_name: Option<String>,
}

struct Content {
    title: String,
    body: String,
    priority: Priority,
    related: Option<(String, &'static str)>,
    metadata: Row,
}

pub struct NotificationBuilder;

impl NotificationBuilder {
    /// Render `intent` for `recipient` as a fresh `pending` notification.
    ///
    /// Topic-audience intents ignore `recipient` and address the admin topic.
    pub fn build(intent: &Intent, recipient: &Recipient, ctx: &BuildContext) -> Notification {
        let content = Self::content(intent, recipient, ctx);
        let (recipient_id, recipient_role) = match intent {
            Intent::ClinicRegistered { .. } => (None, Role::Admin),
            _ if recipient.role == Role::Admin => (None, Role::Admin),
            _ => (Some(recipient.id.clone()), recipient.role),
        };
        let (related_entity_id, related_entity_type) = match content.related {
            Some((id, kind)) => (Some(id), Some(kind.to_string())),
            None => (None, None),
        };

        Notification {
            id: Uuid::new_v4(),
            recipient_id,
            recipient_role,
            event_type: intent.event_type(),
            title: content.title,
            body: content.body,
            related_entity_id,
            related_entity_type,
            metadata: content.metadata,
            priority: content.priority,
            push_status: PushStatus::Pending,
            escalated_from: None,
            escalation_reason: None,
            push_error: None,
            created_at: Utc::now(),
            sent_at: None,
        }
    }

    /// Render `intent` for the substitute of an unavailable `primary`.
    ///
    /// Chat messages get the dedicated escalation wording; other intents keep
    /// their content and only gain the escalation tags.
    pub fn build_escalated(
        intent: &Intent,
        primary: &Recipient,
        escalation: &Escalation,
        ctx: &BuildContext,
    ) -> Notification {
        let mut notification = Self::build(intent, &escalation.substitute, ctx);

        if let Intent::NewMessage {
            conversation_id,
            sender_role,
            content,
            ..
        } = intent
        {
            notification.event_type = EventType::EscalatedMessage;
            notification.title = escalated_message_title(&primary.display_name);
            notification.body = escalated_message_body(sender_role, content);
            notification
                .metadata
                .insert("conversation_id".into(), json!(conversation_id));
        }

        Self::apply_escalation(notification, escalation)
    }

    /// Tag a notification as a substitute delivery.
    pub fn apply_escalation(mut notification: Notification, escalation: &Escalation) -> Notification {
        notification.recipient_id = Some(escalation.substitute.id.clone());
        notification.recipient_role = escalation.substitute.role;
        notification.priority = Priority::High;
        notification.escalated_from = Some(escalation.escalated_from.clone());
        notification.escalation_reason = Some(escalation.reason.to_string());
        notification
            .metadata
            .insert("original_recipient".into(), json!(escalation.escalated_from));
        notification
            .metadata
            .insert("escalation_reason".into(), json!(escalation.reason));
        notification
    }

    /// Transport message for a built notification.
    pub fn push_message(notification: &Notification) -> PushMessage {
        PushMessage {
            title: notification.title.clone(),
            body: notification.body.clone(),
            data: push_data(
                notification.event_type.as_str(),
                &notification.id.to_string(),
                notification.related_entity_id.as_deref(),
                notification.related_entity_type.as_deref(),
                &notification.metadata,
            ),
            priority: notification.priority,
        }
    }

    fn content(intent: &Intent, recipient: &Recipient, ctx: &BuildContext) -> Content {
        let clinic_name = ctx.clinic_name.as_deref().unwrap_or("The clinic");

        match intent {
            Intent::NewMessage {
                conversation_id,
                sender_id,
                sender_role,
                sender_name,
                content,
            } => Content {
                title: format!("New message from {}", sender_name),
                body: truncate(content, MESSAGE_PREVIEW_CHARS),
                priority: Priority::High,
                related: Some((conversation_id.clone(), "conversation")),
                metadata: row(json!({"sender_id": sender_id, "sender_role": sender_role})),
            },

            Intent::NewBooking {
                booking_id,
                patient_id,
                ..
            } => Content {
                title: "New Appointment Request".to_string(),
                body: format!(
                    "{} has booked {}",
                    ctx.patient_name.as_deref().unwrap_or("A patient"),
                    ctx.service_name.as_deref().unwrap_or("a service")
                ),
                priority: match recipient.role {
                    Role::Staff => Priority::Normal,
                    _ => Priority::High,
                },
                related: Some((booking_id.clone(), "booking")),
                metadata: row(json!({"patient_id": patient_id})),
            },

            Intent::BookingStatusChanged {
                booking_id,
                clinic_id,
                new_status,
                event_type,
                ..
            } => {
                let (title, body) = match event_type {
                    EventType::BookingApproved => (
                        "Appointment Confirmed!",
                        format!("{} has approved your appointment", clinic_name),
                    ),
                    EventType::BookingRejected => (
                        "Appointment Declined",
                        format!("{} was unable to accommodate your appointment", clinic_name),
                    ),
                    EventType::BookingCancelled => (
                        "Appointment Cancelled",
                        format!("Your appointment at {} has been cancelled", clinic_name),
                    ),
                    _ => (
                        "Appointment Completed",
                        format!("Thank you for visiting {}!", clinic_name),
                    ),
                };
                Content {
                    title: title.to_string(),
                    body,
                    priority: Priority::High,
                    related: Some((booking_id.clone(), "booking")),
                    metadata: row(json!({"clinic_id": clinic_id, "status": new_status})),
                }
            }

            Intent::ClinicRegistered {
                clinic_id,
                clinic_name,
            } => Content {
                title: "New Clinic Registration".to_string(),
                body: format!("{} has applied to join DentEase", clinic_name),
                priority: Priority::High,
                related: Some((clinic_id.clone(), "clinic")),
                metadata: row(json!({"clinic_id": clinic_id})),
            },

            Intent::ClinicStatusChanged {
                clinic_id,
                clinic_name,
                new_status,
                rejection_reason,
                event_type,
                ..
            } => {
                let (title, body) = match event_type {
                    EventType::ClinicApproved => (
                        "Clinic Approved!",
                        format!(
                            "Congratulations! {} has been approved and is now live on DentEase!",
                            clinic_name
                        ),
                    ),
                    EventType::ClinicRejected => (
                        "Clinic Application Declined",
                        format!(
                            "Your application for {} was declined. Reason: {}",
                            clinic_name,
                            truncate(
                                rejection_reason
                                    .as_deref()
                                    .unwrap_or("Please review the requirements"),
                                REJECTION_REASON_CHARS
                            )
                        ),
                    ),
                    _ => (
                        "Application Resubmitted",
                        format!(
                            "Your application for {} has been resubmitted for review",
                            clinic_name
                        ),
                    ),
                };
                Content {
                    title: title.to_string(),
                    body,
                    priority: Priority::High,
                    related: Some((clinic_id.clone(), "clinic")),
                    metadata: row(json!({"status": new_status})),
                }
            }

            Intent::BillCreated {
                bill_id,
                clinic_id,
                total_amount,
                ..
            } => Content {
                title: "Billing Summary".to_string(),
                body: format!(
                    "Your bill from {} is ready: {}",
                    clinic_name,
                    format_peso(*total_amount)
                ),
                priority: Priority::Normal,
                related: Some((bill_id.clone(), "bill")),
                metadata: row(json!({"clinic_id": clinic_id, "amount": total_amount})),
            },

            Intent::Notice(notice) => {
                let default_title = if recipient.role == Role::Admin {
                    "DentEase Admin Alert"
                } else {
                    "DentEase Notification"
                };
                let mut metadata = notice.data.clone();
                if let Some(clinic_id) = &notice.clinic_id {
                    metadata.insert("clinic_id".into(), json!(clinic_id));
                }
                Content {
                    title: notice.title.clone().unwrap_or_else(|| default_title.to_string()),
                    body: notice.body.clone().unwrap_or_default(),
                    priority: Priority::High,
                    related: None,
                    metadata,
                }
            }
        }
    }
}

/// Client data map. Fixed keys win over metadata entries of the same name;
/// metadata values that are not strings or numbers are dropped.
pub fn push_data(
    event_type: &str,
    notification_id: &str,
    related_entity_id: Option<&str>,
    related_entity_type: Option<&str>,
    metadata: &Row,
) -> BTreeMap<String, String> {
    let mut data: BTreeMap<String, String> = metadata
        .iter()
        .filter_map(|(key, value)| match value {
            Value::String(s) => Some((key.clone(), s.clone())),
            Value::Number(n) => Some((key.clone(), n.to_string())),
            _ => None,
        })
        .collect();

    data.insert("type".into(), event_type.to_string());
    data.insert("notification_id".into(), notification_id.to_string());
    data.insert("click_action".into(), CLICK_ACTION.to_string());
    if let Some(id) = related_entity_id {
        data.insert("related_entity_id".into(), id.to_string());
    }
    if let Some(kind) = related_entity_type {
        data.insert("related_entity_type".into(), kind.to_string());
    }
    data
}

/// First `max` characters of `s`, never splitting a character.
/// Title of a chat message redirected to the clinic owner.
pub fn escalated_message_title(staff_name: &str) -> String {
    format!("Staff {} is on leave", staff_name)
}

pub fn escalated_message_body(sender_role: &str, content: &str) -> String {
    format!(
        "New {} message requires attention: \"{}...\"",
        sender_role,
        truncate(content, ESCALATION_PREVIEW_CHARS)
    )
}

pub fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// `1234.5` → `₱1,234.50`.
pub fn format_peso(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, c) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{}₱{}.{:02}", sign, grouped, cents % 100)
}

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}
