//! Synchronous dispatch of a single inbound event.
//!
//! Fans an intent out to its recipients, applies escalation, and either sends
//! right away (recording the terminal outcome) or queues `pending` rows for the
//! queue processor. Failures stay with the recipient they happened to.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use dentease_common::config::DispatchMode;
use dentease_common::gateway::DeliveryGateway;
use dentease_common::store::{Datastore, StoreError, Table};
use dentease_common::types::{Notification, PushStatus, Recipient, Role};

use crate::builder::{BuildContext, NotificationBuilder};
use crate::directory::RecipientDirectory;
use crate::escalation::{EscalationOutcome, EscalationPolicy};
use crate::record;
use crate::router::{EventRouter, InboundEvent, Intent, Routing};

/// Aggregate outcome of one dispatch.
///
/// `escalated` counts substitutions; the substitute delivery is also counted
/// under `sent`, `errors` or `queued`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchReport {
    pub sent: u32,
    pub skipped: u32,
    pub errors: u32,
    pub escalated: u32,
    pub queued: u32,
    pub details: Vec<String>,
}

impl DispatchReport {
    fn skip(&mut self, detail: String) {
        self.skipped += 1;
        self.details.push(detail);
    }

    fn fail(&mut self, detail: String) {
        self.errors += 1;
        self.details.push(detail);
    }
}

pub struct Dispatcher {
    store: Arc<dyn Datastore>,
    gateway: Arc<dyn DeliveryGateway>,
    directory: RecipientDirectory,
    escalation: EscalationPolicy,
    mode: DispatchMode,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Datastore>,
        gateway: Arc<dyn DeliveryGateway>,
        mode: DispatchMode,
    ) -> Self {
        let directory = RecipientDirectory::new(store.clone());
        Self {
            escalation: EscalationPolicy::new(directory.clone()),
            directory,
            store,
            gateway,
            mode,
        }
    }

    /// Parse a raw entry-point body and dispatch it. Malformed bodies are
    /// reported, never raised.
    pub async fn dispatch_json(&self, payload: Value) -> DispatchReport {
        match InboundEvent::from_json(payload) {
            Ok(event) => self.dispatch(&event).await,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed event");
                DispatchReport {
                    details: vec![format!("Ignored: {}", e)],
                    ..Default::default()
                }
            }
        }
    }

    pub async fn dispatch(&self, event: &InboundEvent) -> DispatchReport {
        let mut report = DispatchReport::default();

        match EventRouter::classify(event) {
            Routing::Ignored(reason) => {
                tracing::debug!(reason = %reason, "Event ignored");
                report.details.push(format!("Ignored: {}", reason));
            }
            Routing::Intent(intent) => {
                tracing::info!(event_type = %intent.event_type(), "Dispatching event");
                self.dispatch_intent(&intent, &mut report).await;
            }
        }

        report
    }

    async fn dispatch_intent(&self, intent: &Intent, report: &mut DispatchReport) {
        match intent {
            Intent::NewMessage {
                conversation_id,
                sender_id,
                ..
            } => {
                let participants = match self
                    .directory
                    .conversation_participants(conversation_id, sender_id)
                    .await
                {
                    Ok(participants) => participants,
                    Err(e) => {
                        tracing::error!(conversation_id = %conversation_id, error = %e, "Participant lookup failed");
                        report.fail(format!(
                            "Could not load participants of {}: {}",
                            conversation_id, e
                        ));
                        return;
                    }
                };

                if participants.is_empty() {
                    report
                        .details
                        .push(format!("No other participants in {}", conversation_id));
                }

                let ctx = BuildContext::default();
                for participant in participants {
                    match participant.role.parse::<Role>() {
                        Ok(role) => {
                            self.deliver_to(&participant.user_id, role, intent, &ctx, report)
                                .await
                        }
                        Err(e) => report.skip(format!("Participant {}: {}", participant.user_id, e)),
                    }
                }
            }

            Intent::NewBooking {
                clinic_id,
                patient_id,
                service_id,
                ..
            } => {
                let patient_name = self
                    .lookup("patient name", self.directory.patient_name(patient_id).await);
                let service_name = match service_id {
                    Some(id) => self.lookup("service name", self.directory.service_name(id).await),
                    None => None,
                };
                let ctx = BuildContext {
                    patient_name,
                    service_name,
                    ..Default::default()
                };

                match self.directory.list_dentists_for_clinic(clinic_id).await {
                    Ok(dentists) => {
                        for dentist in &dentists {
                            self.deliver(dentist, intent, &ctx, report).await;
                        }
                    }
                    Err(e) => report.fail(format!("Could not load dentists of {}: {}", clinic_id, e)),
                }

                match self.directory.list_staff_for_clinic(clinic_id).await {
                    Ok(staff) => {
                        for member in &staff {
                            if !member.is_available {
                                report.skip(format!("Staff {} is on leave", member.display_name));
                                continue;
                            }
                            self.deliver(member, intent, &ctx, report).await;
                        }
                    }
                    Err(e) => report.fail(format!("Could not load staff of {}: {}", clinic_id, e)),
                }
            }

            Intent::BookingStatusChanged {
                patient_id,
                clinic_id,
                ..
            }
            | Intent::BillCreated {
                patient_id,
                clinic_id,
                ..
            } => {
                let ctx = BuildContext {
                    clinic_name: self.clinic_name(clinic_id).await,
                    ..Default::default()
                };
                self.deliver_to(patient_id, Role::Patient, intent, &ctx, report)
                    .await;
            }

            Intent::ClinicRegistered { .. } => {
                self.deliver(
                    &Recipient::admin_broadcast(),
                    intent,
                    &BuildContext::default(),
                    report,
                )
                .await;
            }

            Intent::ClinicStatusChanged { clinic_id, .. } => {
                match self.directory.list_dentists_for_clinic(clinic_id).await {
                    Ok(dentists) if dentists.is_empty() => {
                        report
                            .details
                            .push(format!("No dentists found for clinic {}", clinic_id));
                    }
                    Ok(dentists) => {
                        let ctx = BuildContext::default();
                        for dentist in &dentists {
                            self.deliver(dentist, intent, &ctx, report).await;
                        }
                    }
                    Err(e) => report.fail(format!("Could not load dentists of {}: {}", clinic_id, e)),
                }
            }

            Intent::Notice(notice) => {
                let ctx = BuildContext::default();
                let mut admin_reached = false;
                if let Some((recipient_id, role)) = &notice.recipient {
                    admin_reached = *role == Role::Admin;
                    self.deliver_to(recipient_id, *role, intent, &ctx, report)
                        .await;
                }
                // Admin recipients already resolve to the broadcast topic.
                if notice.send_to_admin && !admin_reached {
                    self.deliver(&Recipient::admin_broadcast(), intent, &ctx, report)
                        .await;
                }
            }
        }
    }

    /// Resolve then deliver. Lookup failures are recorded as failed rows.
    async fn deliver_to(
        &self,
        recipient_id: &str,
        role: Role,
        intent: &Intent,
        ctx: &BuildContext,
        report: &mut DispatchReport,
    ) {
        match self.directory.resolve(recipient_id, role).await {
            Ok(Some(recipient)) => self.deliver(&recipient, intent, ctx, report).await,
            Ok(None) => {
                tracing::debug!(recipient_id = %recipient_id, role = %role, "Recipient not found");
                let reason = format!("{} {} not found", role, recipient_id);
                report.skip(reason.clone());

                let notification = NotificationBuilder::build(intent, &unresolved(recipient_id, role), ctx);
                self.record(notification, PushStatus::Skipped, Some(reason), report)
                    .await;
            }
            Err(e) => {
                tracing::error!(recipient_id = %recipient_id, role = %role, error = %e, "Recipient lookup failed");
                report.fail(format!("Lookup of {} {} failed: {}", role, recipient_id, e));

                let notification = NotificationBuilder::build(intent, &unresolved(recipient_id, role), ctx);
                self.record(notification, PushStatus::Failed, Some(e.to_string()), report)
                    .await;
            }
        }
    }

    async fn deliver(
        &self,
        recipient: &Recipient,
        intent: &Intent,
        ctx: &BuildContext,
        report: &mut DispatchReport,
    ) {
        let label = format!("{} {}", recipient.role, recipient.display_name);

        let (notification, target) = if EscalationPolicy::needs_escalation(recipient) {
            match self.escalation.escalate(recipient, intent.clinic_id()).await {
                Ok(EscalationOutcome::Escalated(escalation)) => {
                    report.escalated += 1;
                    report.details.push(format!(
                        "Escalated {} to clinic owner {}",
                        label, escalation.substitute.display_name
                    ));
                    let target = escalation.substitute.delivery_target.clone();
                    (
                        NotificationBuilder::build_escalated(intent, recipient, &escalation, ctx),
                        target,
                    )
                }
                Ok(EscalationOutcome::Unresolved(reason)) => {
                    report.skip(format!("{}: {}", label, reason));
                    let notification = NotificationBuilder::build(intent, recipient, ctx);
                    self.record(notification, PushStatus::Skipped, Some(reason), report)
                        .await;
                    return;
                }
                Err(e) => {
                    tracing::error!(recipient_id = %recipient.id, error = %e, "Escalation lookup failed");
                    report.fail(format!("Escalation for {} failed: {}", label, e));
                    let notification = NotificationBuilder::build(intent, recipient, ctx);
                    self.record(notification, PushStatus::Failed, Some(e.to_string()), report)
                        .await;
                    return;
                }
            }
        } else {
            (
                NotificationBuilder::build(intent, recipient, ctx),
                recipient.delivery_target.clone(),
            )
        };

        if self.mode == DispatchMode::Queued {
            self.enqueue(notification, &label, report).await;
            return;
        }

        let Some(target) = target else {
            tracing::debug!(recipient_id = %recipient.id, "No delivery target, skipping");
            report.skip(format!("{} has no device token", label));
            self.record(
                notification,
                PushStatus::Skipped,
                Some("no delivery target".to_string()),
                report,
            )
            .await;
            return;
        };

        let message = NotificationBuilder::push_message(&notification);
        match self.gateway.send(&target, &message).await {
            Ok(()) => {
                tracing::info!(
                    notification_id = %notification.id,
                    event_type = %notification.event_type,
                    destination = %target.redacted(),
                    "Push sent"
                );
                report.sent += 1;
                report.details.push(format!("Sent to {}", label));
                self.record(notification, PushStatus::Sent, None, report)
                    .await;
            }
            Err(e) => {
                tracing::error!(
                    notification_id = %notification.id,
                    destination = %target.redacted(),
                    error = %e,
                    "Push failed"
                );
                report.fail(format!("Failed to send to {}: {}", label, e));
                self.record(notification, PushStatus::Failed, Some(e.to_string()), report)
                    .await;
            }
        }
    }

    async fn enqueue(&self, notification: Notification, label: &str, report: &mut DispatchReport) {
        let id = notification.id;
        match self.insert(&notification).await {
            Ok(()) => {
                report.queued += 1;
                report.details.push(format!("Queued for {}", label));
            }
            Err(e) => {
                tracing::error!(notification_id = %id, error = %e, "Could not queue notification");
                report.fail(format!("Could not queue notification for {}: {}", label, e));
            }
        }
    }

    /// Persist a notification in its terminal state. Never fails the dispatch.
    async fn record(
        &self,
        mut notification: Notification,
        status: PushStatus,
        push_error: Option<String>,
        report: &mut DispatchReport,
    ) {
        notification.push_status = status;
        notification.push_error = push_error;
        if status == PushStatus::Sent {
            notification.sent_at = Some(Utc::now());
        }

        if let Err(e) = self.insert(&notification).await {
            tracing::warn!(notification_id = %notification.id, error = %e, "Could not record notification");
            report
                .details
                .push(format!("Could not record notification {}: {}", notification.id, e));
        }
    }

    async fn insert(&self, notification: &Notification) -> Result<(), StoreError> {
        let row = record::to_row(notification)?;
        self.store.insert(Table::SYSTEM_NOTIFICATIONS, row).await?;
        Ok(())
    }

    async fn clinic_name(&self, clinic_id: &str) -> Option<String> {
        self.lookup("clinic", self.directory.clinic(clinic_id).await)
            .map(|clinic| clinic.clinic_name)
    }

    /// Context lookups only improve wording; failures fall back to defaults.
    fn lookup<T>(&self, what: &str, result: Result<Option<T>, StoreError>) -> Option<T> {
        result.unwrap_or_else(|e| {
            tracing::warn!(lookup = what, error = %e, "Context lookup failed, using default");
            None
        })
    }
}

/// Stand-in for a recipient that could not be resolved, so the attempt can
/// still be recorded against the id it was addressed to.
fn unresolved(recipient_id: &str, role: Role) -> Recipient {
    Recipient {
        id: recipient_id.to_string(),
        role,
        display_name: recipient_id.to_string(),
        delivery_target: None,
        is_available: true,
        clinic_id: None,
    }
}
