//! HTTP entry points for the DentEase notification engine.
//!
//! - `POST /api/push`: row-change or direct-call events, dispatched synchronously
//! - `POST /api/notifications/process`: drain a batch of the queue
//! - `POST /api/notifications/{id}/process`: process one queued row

pub mod middleware;
pub mod routes;
pub mod state;
