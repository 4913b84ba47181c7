//! Dispatch and escalation engine.
//!
//! An inbound event flows through:
//! 1. [`router::EventRouter`] classifies it into an [`router::Intent`]
//! 2. [`directory::RecipientDirectory`] resolves each implicated recipient
//! 3. [`escalation::EscalationPolicy`] substitutes unavailable staff
//! 4. [`builder::NotificationBuilder`] renders title, body and payload
//! 5. [`dispatcher::Dispatcher`] sends (or queues) and records the outcome
//!
//! Queued rows are drained by [`queue::QueueProcessor`].

pub mod builder;
pub mod directory;
pub mod dispatcher;
pub mod escalation;
pub mod queue;
pub mod record;
pub mod router;

pub use dispatcher::{DispatchReport, Dispatcher};
pub use queue::{BatchReport, QueueProcessor};
