//! Queue processor: drains `pending` rows from `system_notifications`.
//!
//! Every dequeued row leaves `pending` by the end of its attempt: delivered
//! rows become `sent`, rows without a reachable recipient `skipped`, and rows
//! whose attempt went wrong `failed`. There is no automatic re-queue, so
//! overlapping scheduler ticks cannot deliver the same row twice once one of
//! them has recorded it.

use std::sync::Arc;

use serde::Serialize;

use dentease_common::gateway::DeliveryGateway;
use dentease_common::store::{Datastore, Filter, Query, Row, StoreError, Table};
use dentease_common::types::{DeliveryTarget, Priority, PushStatus};

use crate::directory::RecipientDirectory;
use crate::escalation::{Escalation, EscalationOutcome, EscalationPolicy};
use crate::record::{self, QueuedNotification, RowProblem};

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const MAX_BATCH_SIZE: usize = 100;

/// Aggregate outcome of one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub processed: u32,
    pub sent: u32,
    pub skipped: u32,
    pub errors: u32,
    pub details: Vec<String>,
}

/// Terminal outcome of one row before it is written back.
#[derive(Debug, Clone, PartialEq)]
enum Attempt {
    Sent,
    Skipped(String),
    Failed(String),
    /// Recorded as sent so a bad row never blocks the queue.
    Unroutable(String),
}

impl Attempt {
    fn status(&self) -> PushStatus {
        match self {
            Attempt::Sent | Attempt::Unroutable(_) => PushStatus::Sent,
            Attempt::Skipped(_) => PushStatus::Skipped,
            Attempt::Failed(_) => PushStatus::Failed,
        }
    }

    fn reason(&self) -> Option<&str> {
        match self {
            Attempt::Sent => None,
            Attempt::Skipped(r) | Attempt::Failed(r) | Attempt::Unroutable(r) => Some(r.as_str()),
        }
    }
}

/// Clamp a requested batch size into `1..=MAX_BATCH_SIZE`; zero means default.
pub fn effective_batch_size(requested: Option<usize>) -> usize {
    match requested {
        None | Some(0) => DEFAULT_BATCH_SIZE,
        Some(n) => n.min(MAX_BATCH_SIZE),
    }
}

/// A row redirected to an escalation substitute, as it was delivered.
struct Substitution {
    escalation: Escalation,
    delivered: QueuedNotification,
}

pub struct QueueProcessor {
    store: Arc<dyn Datastore>,
    gateway: Arc<dyn DeliveryGateway>,
    directory: RecipientDirectory,
    escalation: EscalationPolicy,
}

impl QueueProcessor {
    pub fn new(store: Arc<dyn Datastore>, gateway: Arc<dyn DeliveryGateway>) -> Self {
        let directory = RecipientDirectory::new(store.clone());
        Self {
            escalation: EscalationPolicy::new(directory.clone()),
            directory,
            store,
            gateway,
        }
    }

    /// Process up to `batch_size` pending rows, oldest first, one at a time.
    ///
    /// Only a failure to fetch the batch is an error; per-row failures are
    /// counted in the report.
    pub async fn process_pending(&self, batch_size: usize) -> Result<BatchReport, StoreError> {
        let batch_size = effective_batch_size(Some(batch_size));
        let rows = self
            .store
            .query(
                &Query::table(Table::SYSTEM_NOTIFICATIONS)
                    .filter(Filter::eq("push_status", PushStatus::Pending.to_string()))
                    .order_by_asc("created_at")
                    .limit(batch_size),
            )
            .await?;

        let mut report = BatchReport::default();
        if rows.is_empty() {
            report.details.push("No pending notifications".to_string());
            return Ok(report);
        }

        tracing::info!(count = rows.len(), batch_size, "Processing pending notifications");

        for row in &rows {
            self.process_row(row, &mut report).await;
        }

        tracing::info!(
            processed = report.processed,
            sent = report.sent,
            skipped = report.skipped,
            errors = report.errors,
            "Batch complete"
        );

        Ok(report)
    }

    /// Process one row by id. Rows that are no longer `pending` are left alone.
    pub async fn process_one(&self, id: &str) -> Result<BatchReport, StoreError> {
        let row = self
            .store
            .get_by_key(Table::SYSTEM_NOTIFICATIONS, id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                table: Table::SYSTEM_NOTIFICATIONS.name,
                key: Table::SYSTEM_NOTIFICATIONS.key,
                value: id.to_string(),
            })?;

        let mut report = BatchReport::default();
        match record::push_status(&row) {
            Some(PushStatus::Pending) => self.process_row(&row, &mut report).await,
            status => {
                let status = status.map_or("unknown".to_string(), |s| s.to_string());
                tracing::debug!(notification_id = %id, status = %status, "Row is not pending");
                report
                    .details
                    .push(format!("Notification {} already {}", id, status));
            }
        }

        Ok(report)
    }

    async fn process_row(&self, row: &Row, report: &mut BatchReport) {
        report.processed += 1;

        let (id, attempt, substitution) = match record::parse_queued(row) {
            Ok(queued) => {
                let (attempt, substitution) = self.attempt(&queued).await;
                (queued.id, attempt, substitution)
            }
            Err(RowProblem::Unroutable { id, reason }) => {
                tracing::warn!(notification_id = %id, reason = %reason, "Unroutable notification");
                (id, Attempt::Unroutable(format!("unroutable: {}", reason)), None)
            }
            Err(RowProblem::MissingId) => {
                tracing::error!("Queue row without id cannot be marked");
                report.errors += 1;
                report
                    .details
                    .push("Row without id cannot be marked".to_string());
                return;
            }
        };

        let mut fields = record::outcome_fields(
            attempt.status(),
            attempt.reason(),
            substitution.as_ref().map(|s| &s.escalation),
        );
        if let Some(substitution) = &substitution {
            fields.extend(record::substitute_content_fields(&substitution.delivered));
        }
        if let Err(e) = self
            .store
            .update(Table::SYSTEM_NOTIFICATIONS, &id, fields)
            .await
        {
            // The row stays pending; a later tick will attempt it again.
            tracing::error!(notification_id = %id, error = %e, "Could not record outcome");
            report.errors += 1;
            report
                .details
                .push(format!("{}: could not record outcome: {}", id, e));
            return;
        }

        match &attempt {
            Attempt::Sent | Attempt::Unroutable(_) => report.sent += 1,
            Attempt::Skipped(_) => report.skipped += 1,
            Attempt::Failed(_) => report.errors += 1,
        }
        report.details.push(match attempt.reason() {
            Some(reason) => format!("{}: {} ({})", id, attempt.status(), reason),
            None => format!("{}: {}", id, attempt.status()),
        });
    }

    /// Resolve, escalate if needed, and send. Never returns `Pending`.
    async fn attempt(&self, queued: &QueuedNotification) -> (Attempt, Option<Substitution>) {
        if queued.is_broadcast() {
            return (self.send(queued, &DeliveryTarget::admin_topic(), queued.priority).await, None);
        }

        let Some(recipient_id) = queued.recipient_id.as_deref() else {
            return (Attempt::Skipped("no recipient".to_string()), None);
        };

        let recipient = match self.directory.resolve(recipient_id, queued.recipient_role).await {
            Ok(Some(recipient)) => recipient,
            Ok(None) => {
                return (
                    Attempt::Skipped(format!("{} {} not found", queued.recipient_role, recipient_id)),
                    None,
                );
            }
            Err(e) => return (Attempt::Failed(format!("recipient lookup failed: {}", e)), None),
        };

        if EscalationPolicy::needs_escalation(&recipient) {
            let clinic_id = queued.clinic_id();
            return match self.escalation.escalate(&recipient, clinic_id.as_deref()).await {
                Ok(EscalationOutcome::Escalated(escalation)) => {
                    let delivered = queued.for_substitute(&recipient, &escalation);
                    let attempt = match &escalation.substitute.delivery_target {
                        Some(target) => self.send(&delivered, target, delivered.priority).await,
                        None => Attempt::Skipped("clinic owner has no device token".to_string()),
                    };
                    (
                        attempt,
                        Some(Substitution {
                            escalation,
                            delivered,
                        }),
                    )
                }
                Ok(EscalationOutcome::Unresolved(reason)) => (Attempt::Skipped(reason), None),
                Err(e) => (Attempt::Failed(format!("escalation lookup failed: {}", e)), None),
            };
        }

        match &recipient.delivery_target {
            Some(target) => (self.send(queued, target, queued.priority).await, None),
            None => (
                Attempt::Skipped(format!(
                    "{} {} has no device token",
                    recipient.role, recipient.display_name
                )),
                None,
            ),
        }
    }

    async fn send(
        &self,
        queued: &QueuedNotification,
        target: &DeliveryTarget,
        priority: Priority,
    ) -> Attempt {
        match self.gateway.send(target, &queued.push_message(priority)).await {
            Ok(()) => {
                tracing::info!(
                    notification_id = %queued.id,
                    event_type = %queued.event_type,
                    destination = %target.redacted(),
                    "Push sent"
                );
                Attempt::Sent
            }
            Err(e) => {
                tracing::error!(
                    notification_id = %queued.id,
                    destination = %target.redacted(),
                    error = %e,
                    "Push failed"
                );
                Attempt::Failed(e.to_string())
            }
        }
    }
}
