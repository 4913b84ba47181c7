//! Behaviour tests for the dispatcher and queue processor.
//!
//! Runs entirely in memory:
//!
//! ```bash
//! cargo test -p dentease-engine --test dispatch
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use dentease_common::config::DispatchMode;
use dentease_common::gateway::{DeliveryGateway, GatewayError, PushMessage};
use dentease_common::store::{Datastore, MemoryDatastore, Query, Row, StoreError, Table};
use dentease_common::types::DeliveryTarget;
use dentease_engine::{Dispatcher, QueueProcessor};

// ============================================================
// Test doubles
// ============================================================

#[derive(Default)]
struct RecordingGateway {
    sent: Mutex<Vec<(DeliveryTarget, PushMessage)>>,
    failing_tokens: HashSet<String>,
}

impl RecordingGateway {
    fn failing(tokens: &[&str]) -> Self {
        Self {
            failing_tokens: tokens.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    fn sent(&self) -> Vec<(DeliveryTarget, PushMessage)> {
        self.sent.lock().unwrap().clone()
    }

    fn targets(&self) -> Vec<DeliveryTarget> {
        self.sent().into_iter().map(|(t, _)| t).collect()
    }
}

#[async_trait]
impl DeliveryGateway for RecordingGateway {
    async fn send(&self, target: &DeliveryTarget, message: &PushMessage) -> Result<(), GatewayError> {
        if let DeliveryTarget::Token(token) = target {
            if self.failing_tokens.contains(token) {
                return Err(GatewayError::Rejected {
                    status: 404,
                    body: "UNREGISTERED".to_string(),
                });
            }
        }
        self.sent
            .lock()
            .unwrap()
            .push((target.clone(), message.clone()));
        Ok(())
    }
}

/// Memory store whose point lookups fail for one key.
struct FlakyStore {
    inner: Arc<MemoryDatastore>,
    broken_key: &'static str,
}

#[async_trait]
impl Datastore for FlakyStore {
    async fn get_by_key(&self, table: Table, key: &str) -> Result<Option<Row>, StoreError> {
        if key == self.broken_key {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        self.inner.get_by_key(table, key).await
    }

    async fn query(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        self.inner.query(query).await
    }

    async fn update(&self, table: Table, key: &str, fields: Row) -> Result<(), StoreError> {
        self.inner.update(table, key, fields).await
    }

    async fn insert(&self, table: Table, fields: Row) -> Result<Row, StoreError> {
        self.inner.insert(table, fields).await
    }
}

// ============================================================
// Fixtures
// ============================================================

fn seed() -> MemoryDatastore {
    MemoryDatastore::new()
        .with_rows(
            Table::CLINICS,
            vec![json!({"clinic_id": "C1", "clinic_name": "Smile Clinic", "owner_id": "D9", "status": "approved"})],
        )
        .with_rows(
            Table::PATIENTS,
            vec![
                json!({"patient_id": "P1", "firstname": "Ana", "lastname": "Reyes", "fcm_token": "tok-p1"}),
                json!({"patient_id": "P2", "firstname": "Ben", "lastname": "Tan", "fcm_token": "tok-p2"}),
                json!({"patient_id": "P3", "firstname": "Cora", "lastname": "Lim", "fcm_token": "tok-p3"}),
                json!({"patient_id": "P4", "firstname": "Dan", "lastname": "Uy", "fcm_token": null}),
            ],
        )
        .with_rows(
            Table::DENTISTS,
            vec![
                json!({"dentist_id": "D1", "clinic_id": "C1", "firstname": "Jose", "lastname": "Cruz", "fcm_token": "tok-d1"}),
                json!({"dentist_id": "D9", "clinic_id": "C1", "firstname": "Olga", "lastname": "Owner", "fcm_token": "tok-d9"}),
            ],
        )
        .with_rows(
            Table::STAFFS,
            vec![
                json!({"staff_id": "S1", "clinic_id": "C1", "firstname": "Lea", "lastname": "Diaz", "is_on_leave": true, "fcm_token": "tok-s1"}),
                json!({"staff_id": "S2", "clinic_id": "C1", "firstname": "Mia", "lastname": "Go", "is_on_leave": false, "fcm_token": "tok-s2"}),
            ],
        )
        .with_rows(
            Table::SERVICES,
            vec![json!({"service_id": "SV1", "service_name": "Teeth Cleaning"})],
        )
        .with_rows(
            Table::CONVERSATION_PARTICIPANTS,
            vec![
                json!({"id": 1, "conversation_id": "CV1", "user_id": "D1", "role": "dentist", "is_active": true}),
                json!({"id": 2, "conversation_id": "CV1", "user_id": "S1", "role": "staff", "is_active": true}),
                json!({"id": 3, "conversation_id": "CV1", "user_id": "P2", "role": "patient", "is_active": true}),
                json!({"id": 4, "conversation_id": "CV2", "user_id": "D1", "role": "dentist", "is_active": true}),
                json!({"id": 5, "conversation_id": "CV2", "user_id": "P4", "role": "patient", "is_active": true}),
            ],
        )
}

fn pending(id: &str, created_at: &str, recipient_id: Option<&str>, role: &str) -> Value {
    json!({
        "id": id,
        "recipient_id": recipient_id,
        "recipient_role": role,
        "event_type": "general",
        "title": "Reminder",
        "body": "Your appointment is tomorrow",
        "metadata": {"clinic_id": "C1"},
        "priority": "normal",
        "push_status": "pending",
        "created_at": created_at,
    })
}

fn immediate(store: Arc<MemoryDatastore>, gateway: Arc<RecordingGateway>) -> Dispatcher {
    Dispatcher::new(store, gateway, DispatchMode::Immediate)
}

fn notifications(store: &MemoryDatastore) -> Vec<Row> {
    store.rows(Table::SYSTEM_NOTIFICATIONS)
}

// ============================================================
// Synchronous dispatch
// ============================================================

#[tokio::test]
async fn test_booking_approved_notifies_patient() {
    let store = Arc::new(seed());
    let gateway = Arc::new(RecordingGateway::default());

    let report = immediate(store.clone(), gateway.clone())
        .dispatch_json(json!({
            "type": "UPDATE",
            "table": "bookings",
            "record": {"booking_id": "B1", "patient_id": "P1", "clinic_id": "C1", "status": "approved"},
            "old_record": {"booking_id": "B1", "patient_id": "P1", "clinic_id": "C1", "status": "pending"}
        }))
        .await;

    assert_eq!(report.sent, 1);
    assert_eq!(report.errors, 0);

    let sent = gateway.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, DeliveryTarget::Token("tok-p1".into()));
    assert_eq!(sent[0].1.title, "Appointment Confirmed!");
    assert_eq!(sent[0].1.body, "Smile Clinic has approved your appointment");
    assert_eq!(sent[0].1.data["type"], "booking_approved");
    assert_eq!(sent[0].1.data["related_entity_id"], "B1");

    let rows = notifications(&store);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["push_status"], json!("sent"));
    assert_eq!(rows[0]["event_type"], json!("booking_approved"));
    assert_eq!(rows[0]["related_entity_id"], json!("B1"));
    assert_eq!(rows[0]["title"], json!("Appointment Confirmed!"));
    assert!(!rows[0]["sent_at"].is_null());
}

#[tokio::test]
async fn test_chat_escalates_staff_on_leave_to_clinic_owner() {
    let store = Arc::new(seed());
    let gateway = Arc::new(RecordingGateway::default());

    let report = immediate(store.clone(), gateway.clone())
        .dispatch_json(json!({
            "type": "INSERT",
            "table": "messages",
            "record": {
                "conversation_id": "CV1",
                "sender_id": "D1",
                "sender_role": "dentist",
                "sender_name": "Dr. Cruz",
                "content": "Please confirm tomorrow's schedule"
            }
        }))
        .await;

    assert_eq!(report.escalated, 1);
    assert_eq!(report.sent, 2);
    assert_eq!(report.errors, 0);

    let targets = gateway.targets();
    assert!(targets.contains(&DeliveryTarget::Token("tok-d9".into())));
    assert!(targets.contains(&DeliveryTarget::Token("tok-p2".into())));
    assert!(!targets.contains(&DeliveryTarget::Token("tok-s1".into())));
    assert!(!targets.contains(&DeliveryTarget::Token("tok-d1".into())));

    let rows = notifications(&store);
    let escalated = rows
        .iter()
        .find(|r| r["escalated_from"] == json!("S1"))
        .expect("escalated row");
    assert_eq!(escalated["recipient_id"], json!("D9"));
    assert_eq!(escalated["recipient_role"], json!("dentist"));
    assert_eq!(escalated["priority"], json!("high"));
    assert_eq!(escalated["escalation_reason"], json!("staff_on_leave"));
    assert_eq!(escalated["event_type"], json!("escalated_message"));
    assert_eq!(escalated["title"], json!("Staff Lea Diaz is on leave"));

    let patient = rows
        .iter()
        .find(|r| r["recipient_id"] == json!("P2"))
        .expect("patient row");
    assert_eq!(patient["event_type"], json!("chat_message"));
    assert_eq!(patient["push_status"], json!("sent"));
    assert!(patient["escalated_from"].is_null());
}

#[tokio::test]
async fn test_chat_participant_without_token_is_skipped() {
    let store = Arc::new(seed());
    let gateway = Arc::new(RecordingGateway::default());

    let report = immediate(store.clone(), gateway.clone())
        .dispatch_json(json!({
            "event_type": "new_message",
            "data": {"conversation_id": "CV2", "sender_id": "D1", "sender_name": "Dr. Cruz", "content": "Hi"}
        }))
        .await;

    assert_eq!(report.sent, 0);
    assert_eq!(report.skipped, 1);
    assert!(gateway.sent().is_empty());

    let rows = notifications(&store);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["push_status"], json!("skipped"));
    assert_eq!(rows[0]["recipient_id"], json!("P4"));
}

#[tokio::test]
async fn test_new_booking_fans_out_to_dentists_and_available_staff() {
    let store = Arc::new(seed());
    let gateway = Arc::new(RecordingGateway::default());

    let report = immediate(store.clone(), gateway.clone())
        .dispatch_json(json!({
            "type": "INSERT",
            "table": "bookings",
            "record": {"booking_id": "B2", "clinic_id": "C1", "patient_id": "P1",
                       "service_id": "SV1", "status": "pending"}
        }))
        .await;

    // D1, D9 and S2; S1 is on leave.
    assert_eq!(report.sent, 3);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.escalated, 0);

    let sent = gateway.sent();
    let staff = sent
        .iter()
        .find(|(t, _)| *t == DeliveryTarget::Token("tok-s2".into()))
        .unwrap();
    assert_eq!(staff.1.body, "Ana Reyes has booked Teeth Cleaning");
    assert_eq!(staff.1.priority.to_string(), "normal");

    let dentist = sent
        .iter()
        .find(|(t, _)| *t == DeliveryTarget::Token("tok-d1".into()))
        .unwrap();
    assert_eq!(dentist.1.priority.to_string(), "high");
}

#[tokio::test]
async fn test_one_failed_recipient_does_not_block_others() {
    let store = Arc::new(seed());
    let gateway = Arc::new(RecordingGateway::failing(&["tok-d1"]));

    let report = immediate(store.clone(), gateway.clone())
        .dispatch_json(json!({
            "type": "UPDATE",
            "table": "clinics",
            "record": {"clinic_id": "C1", "clinic_name": "Smile Clinic", "status": "approved"},
            "old_record": {"clinic_id": "C1", "status": "pending"}
        }))
        .await;

    assert_eq!(report.sent, 1);
    assert_eq!(report.errors, 1);
    assert_eq!(gateway.targets(), vec![DeliveryTarget::Token("tok-d9".into())]);

    let failed = notifications(&store)
        .into_iter()
        .find(|r| r["recipient_id"] == json!("D1"))
        .unwrap();
    assert_eq!(failed["push_status"], json!("failed"));
    assert!(failed["push_error"].as_str().unwrap().contains("UNREGISTERED"));
}

#[tokio::test]
async fn test_clinic_registration_goes_to_admin_topic() {
    let store = Arc::new(seed());
    let gateway = Arc::new(RecordingGateway::default());

    let report = immediate(store.clone(), gateway.clone())
        .dispatch_json(json!({
            "type": "INSERT",
            "table": "clinics",
            "record": {"clinic_id": "C2", "clinic_name": "Bright Smiles", "status": "pending"}
        }))
        .await;

    assert_eq!(report.sent, 1);
    assert_eq!(gateway.targets(), vec![DeliveryTarget::admin_topic()]);

    let rows = notifications(&store);
    assert!(rows[0]["recipient_id"].is_null());
    assert_eq!(rows[0]["recipient_role"], json!("admin"));
}

#[tokio::test]
async fn test_admin_notice_never_looks_up_a_token() {
    let store = Arc::new(seed().with_rows(
        Table::ADMINS,
        vec![json!({"admin_id": "A1", "fcm_token": "tok-a1"})],
    ));
    let gateway = Arc::new(RecordingGateway::default());

    let report = immediate(store, gateway.clone())
        .dispatch_json(json!({
            "event_type": "general",
            "recipient_id": "A1",
            "recipient_role": "admin",
            "body": "Server maintenance tonight"
        }))
        .await;

    assert_eq!(report.sent, 1);
    assert_eq!(gateway.targets(), vec![DeliveryTarget::admin_topic()]);
    assert_eq!(gateway.sent()[0].1.title, "DentEase Admin Alert");
}

#[tokio::test]
async fn test_clinic_id_addressed_as_dentist_reaches_a_clinic_dentist() {
    let store = Arc::new(seed());
    let gateway = Arc::new(RecordingGateway::default());

    let report = immediate(store, gateway.clone())
        .dispatch_json(json!({
            "event_type": "general",
            "recipient_id": "C1",
            "recipient_role": "dentist",
            "title": "Hello clinic"
        }))
        .await;

    assert_eq!(report.sent, 1);
    assert_eq!(gateway.targets(), vec![DeliveryTarget::Token("tok-d1".into())]);
}

#[tokio::test]
async fn test_clinic_without_reachable_dentist_is_skipped() {
    let store = Arc::new(seed().with_rows(
        Table::DENTISTS,
        vec![json!({"dentist_id": "D5", "clinic_id": "C5", "fcm_token": ""})],
    ));
    let gateway = Arc::new(RecordingGateway::default());

    let report = immediate(store.clone(), gateway.clone())
        .dispatch_json(json!({
            "event_type": "general",
            "recipient_id": "C5",
            "recipient_role": "dentist"
        }))
        .await;

    assert_eq!(report.sent, 0);
    assert_eq!(report.skipped, 1);
    assert!(gateway.sent().is_empty());

    let rows = notifications(&store);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["push_status"], json!("skipped"));
    assert_eq!(rows[0]["recipient_id"], json!("C5"));
    assert_eq!(rows[0]["recipient_role"], json!("dentist"));
    assert_eq!(rows[0]["push_error"], json!("dentist C5 not found"));
}

#[tokio::test]
async fn test_unknown_recipient_is_recorded_as_skipped() {
    let store = Arc::new(seed());
    let gateway = Arc::new(RecordingGateway::default());

    let report = immediate(store.clone(), gateway.clone())
        .dispatch_json(json!({
            "event_type": "general",
            "recipient_id": "GHOST",
            "recipient_role": "patient",
            "title": "Reminder",
            "body": "Your appointment is tomorrow"
        }))
        .await;

    assert_eq!((report.sent, report.skipped, report.errors), (0, 1, 0));
    assert!(gateway.sent().is_empty());

    let rows = notifications(&store);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["push_status"], json!("skipped"));
    assert_eq!(rows[0]["recipient_id"], json!("GHOST"));
    assert_eq!(rows[0]["title"], json!("Reminder"));
    assert_eq!(rows[0]["push_error"], json!("patient GHOST not found"));
    assert!(rows[0]["sent_at"].is_null());
}

#[tokio::test]
async fn test_admin_notice_with_admin_flag_broadcasts_once() {
    let store = Arc::new(seed());
    let gateway = Arc::new(RecordingGateway::default());

    let report = immediate(store.clone(), gateway.clone())
        .dispatch_json(json!({
            "event_type": "general",
            "recipient_id": "A1",
            "recipient_role": "admin",
            "send_to_admin": true,
            "body": "Server maintenance tonight"
        }))
        .await;

    assert_eq!(report.sent, 1);
    assert_eq!(gateway.targets(), vec![DeliveryTarget::admin_topic()]);
    assert_eq!(notifications(&store).len(), 1);
}

#[tokio::test]
async fn test_unlisted_notice_kind_is_delivered_as_general() {
    let store = Arc::new(seed());
    let gateway = Arc::new(RecordingGateway::default());

    let report = immediate(store.clone(), gateway.clone())
        .dispatch_json(json!({
            "event_type": "support_ticket",
            "send_to_admin": true,
            "title": "New support ticket",
            "body": "Ticket #42 was opened",
            "data": {"ticket_id": "T42"}
        }))
        .await;

    assert_eq!(report.sent, 1);
    let sent = gateway.sent();
    assert_eq!(sent[0].0, DeliveryTarget::admin_topic());
    assert_eq!(sent[0].1.data["type"], "general");
    assert_eq!(sent[0].1.data["notification_type"], "support_ticket");
    assert_eq!(sent[0].1.data["ticket_id"], "T42");

    let rows = notifications(&store);
    assert_eq!(rows[0]["event_type"], json!("general"));
    assert_eq!(rows[0]["metadata"]["notification_type"], json!("support_ticket"));
}

#[tokio::test]
async fn test_escalation_only_for_unavailable_staff() {
    let store = Arc::new(seed());
    let gateway = Arc::new(RecordingGateway::default());
    let dispatcher = immediate(store, gateway.clone());

    for (id, role) in [("S2", "staff"), ("D1", "dentist"), ("P1", "patient")] {
        let report = dispatcher
            .dispatch_json(json!({"event_type": "general", "recipient_id": id, "recipient_role": role}))
            .await;
        assert_eq!(report.escalated, 0, "{} should not escalate", id);
        assert_eq!(report.sent, 1);
    }

    let report = dispatcher
        .dispatch_json(json!({"event_type": "general", "recipient_id": "S1", "recipient_role": "staff"}))
        .await;
    assert_eq!(report.escalated, 1);

    let last = gateway.sent().pop().unwrap();
    assert_eq!(last.0, DeliveryTarget::Token("tok-d9".into()));
    assert_eq!(last.1.data["original_recipient"], "S1");
}

#[tokio::test]
async fn test_failed_escalation_is_recorded_as_skipped() {
    let store = Arc::new(
        MemoryDatastore::new()
            .with_rows(
                Table::CLINICS,
                vec![json!({"clinic_id": "C7", "clinic_name": "No Owner", "owner_id": null})],
            )
            .with_rows(
                Table::STAFFS,
                vec![json!({"staff_id": "S7", "clinic_id": "C7", "is_on_leave": true, "fcm_token": "tok-s7"})],
            ),
    );
    let gateway = Arc::new(RecordingGateway::default());

    let report = immediate(store.clone(), gateway.clone())
        .dispatch_json(json!({"event_type": "general", "recipient_id": "S7", "recipient_role": "staff"}))
        .await;

    assert_eq!(report.skipped, 1);
    assert!(gateway.sent().is_empty());

    let rows = notifications(&store);
    assert_eq!(rows[0]["push_status"], json!("skipped"));
    assert!(rows[0]["push_error"].as_str().unwrap().contains("clinic has no owner"));
}

#[tokio::test]
async fn test_malformed_and_unrouted_events_are_ignored() {
    let store = Arc::new(seed());
    let gateway = Arc::new(RecordingGateway::default());
    let dispatcher = immediate(store.clone(), gateway.clone());

    for payload in [
        json!({"hello": "world"}),
        json!("not an object"),
        json!({"type": "INSERT", "table": "reviews", "record": {"id": 1}}),
        json!({"type": "UPDATE", "table": "bookings",
               "record": {"booking_id": "B1", "patient_id": "P1", "clinic_id": "C1", "status": "approved"},
               "old_record": {"status": "approved"}}),
    ] {
        let report = dispatcher.dispatch_json(payload).await;
        assert_eq!((report.sent, report.skipped, report.errors), (0, 0, 0));
        assert!(report.details[0].starts_with("Ignored"));
    }

    assert!(gateway.sent().is_empty());
    assert!(notifications(&store).is_empty());
}

// ============================================================
// Queue processing
// ============================================================

#[tokio::test]
async fn test_batch_contains_single_row_failure() {
    let inner = Arc::new(seed().with_rows(
        Table::SYSTEM_NOTIFICATIONS,
        vec![
            pending("n1", "2026-01-01T00:00:01Z", Some("P1"), "patient"),
            pending("n2", "2026-01-01T00:00:02Z", Some("P-broken"), "patient"),
            pending("n3", "2026-01-01T00:00:03Z", Some("P3"), "patient"),
        ],
    ));
    let store = Arc::new(FlakyStore {
        inner: inner.clone(),
        broken_key: "P-broken",
    });
    let gateway = Arc::new(RecordingGateway::default());

    let report = QueueProcessor::new(store, gateway.clone())
        .process_pending(50)
        .await
        .unwrap();

    assert_eq!(report.processed, 3);
    assert_eq!(report.sent, 2);
    assert_eq!(report.errors, 1);
    assert_eq!(
        gateway.targets(),
        vec![
            DeliveryTarget::Token("tok-p1".into()),
            DeliveryTarget::Token("tok-p3".into()),
        ]
    );

    let row2 = inner.row(Table::SYSTEM_NOTIFICATIONS, "n2").unwrap();
    assert_eq!(row2["push_status"], json!("failed"));
    assert!(row2["push_error"].as_str().unwrap().contains("recipient lookup failed"));
    assert!(row2["sent_at"].is_null());

    let row3 = inner.row(Table::SYSTEM_NOTIFICATIONS, "n3").unwrap();
    assert_eq!(row3["push_status"], json!("sent"));
    assert!(!row3["sent_at"].is_null());
}

#[tokio::test]
async fn test_terminal_rows_are_never_reprocessed() {
    let store = Arc::new(seed().with_rows(
        Table::SYSTEM_NOTIFICATIONS,
        vec![
            pending("n1", "2026-01-01T00:00:01Z", Some("P1"), "patient"),
            pending("n2", "2026-01-01T00:00:02Z", Some("P2"), "patient"),
        ],
    ));
    let gateway = Arc::new(RecordingGateway::failing(&["tok-p2"]));
    let processor = QueueProcessor::new(store.clone(), gateway.clone());

    let first = processor.process_pending(50).await.unwrap();
    assert_eq!((first.processed, first.sent, first.errors), (2, 1, 1));

    let second = processor.process_pending(50).await.unwrap();
    assert_eq!(second.processed, 0);

    let single = processor.process_one("n2").await.unwrap();
    assert_eq!(single.processed, 0);
    assert!(single.details[0].contains("already failed"));

    assert_eq!(gateway.sent().len(), 1);
    assert_eq!(
        store.row(Table::SYSTEM_NOTIFICATIONS, "n2").unwrap()["push_status"],
        json!("failed")
    );
}

#[tokio::test]
async fn test_batch_is_oldest_first_and_capped() {
    let rows: Vec<Value> = (0..120)
        .rev()
        .map(|i| {
            pending(
                &format!("n{:03}", i),
                &format!("2026-01-01T00:{:02}:{:02}Z", i / 60, i % 60),
                Some("P1"),
                "patient",
            )
        })
        .collect();
    let store = Arc::new(seed().with_rows(Table::SYSTEM_NOTIFICATIONS, rows));
    let gateway = Arc::new(RecordingGateway::default());
    let processor = QueueProcessor::new(store.clone(), gateway.clone());

    let report = processor.process_pending(500).await.unwrap();
    assert_eq!(report.processed, 100);
    assert_eq!(gateway.sent()[0].1.data["notification_id"], "n000");

    let leftover = processor.process_pending(500).await.unwrap();
    assert_eq!(leftover.processed, 20);
}

#[tokio::test]
async fn test_outcomes_per_row_kind() {
    let mut unroutable = pending("n4", "2026-01-01T00:00:04Z", Some("P1"), "patient");
    unroutable["event_type"] = json!("support_ticket");

    let store = Arc::new(seed().with_rows(
        Table::SYSTEM_NOTIFICATIONS,
        vec![
            pending("n1", "2026-01-01T00:00:01Z", Some("P4"), "patient"),
            pending("n2", "2026-01-01T00:00:02Z", None, "admin"),
            pending("n3", "2026-01-01T00:00:03Z", Some("ghost"), "patient"),
            unroutable,
        ],
    ));
    let gateway = Arc::new(RecordingGateway::default());

    let report = QueueProcessor::new(store.clone(), gateway.clone())
        .process_pending(10)
        .await
        .unwrap();

    assert_eq!(report.processed, 4);
    assert_eq!(report.sent, 2);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.errors, 0);
    assert_eq!(gateway.targets(), vec![DeliveryTarget::admin_topic()]);

    let status = |id: &str| store.row(Table::SYSTEM_NOTIFICATIONS, id).unwrap()["push_status"].clone();
    assert_eq!(status("n1"), json!("skipped"));
    assert_eq!(status("n2"), json!("sent"));
    assert_eq!(status("n3"), json!("skipped"));
    assert_eq!(status("n4"), json!("sent"));

    let n4 = store.row(Table::SYSTEM_NOTIFICATIONS, "n4").unwrap();
    assert!(n4["push_error"].as_str().unwrap().starts_with("unroutable"));
}

#[tokio::test]
async fn test_queued_staff_row_is_escalated() {
    let store = Arc::new(seed().with_rows(
        Table::SYSTEM_NOTIFICATIONS,
        vec![pending("n1", "2026-01-01T00:00:01Z", Some("S1"), "staff")],
    ));
    let gateway = Arc::new(RecordingGateway::default());

    let report = QueueProcessor::new(store.clone(), gateway.clone())
        .process_one("n1")
        .await
        .unwrap();

    assert_eq!((report.processed, report.sent), (1, 1));
    let sent = gateway.sent();
    assert_eq!(sent[0].0, DeliveryTarget::Token("tok-d9".into()));
    assert_eq!(sent[0].1.priority.to_string(), "high");
    assert_eq!(sent[0].1.title, "Reminder");
    assert_eq!(sent[0].1.data["original_recipient"], "S1");
    assert_eq!(sent[0].1.data["escalation_reason"], "staff_on_leave");

    let row = store.row(Table::SYSTEM_NOTIFICATIONS, "n1").unwrap();
    assert_eq!(row["push_status"], json!("sent"));
    assert_eq!(row["recipient_id"], json!("D9"));
    assert_eq!(row["escalated_from"], json!("S1"));
    assert_eq!(row["escalation_reason"], json!("staff_on_leave"));
    assert_eq!(row["priority"], json!("high"));
    assert_eq!(row["metadata"]["original_recipient"], json!("S1"));
}

#[tokio::test]
async fn test_queued_chat_escalation_matches_synchronous_wording() {
    let content = "Can we move my cleaning to Friday afternoon instead?";
    let mut chat = pending("n1", "2026-01-01T00:00:01Z", Some("S1"), "staff");
    chat["event_type"] = json!("chat_message");
    chat["title"] = json!("New message from Ana Reyes");
    chat["body"] = json!(content);
    chat["related_entity_id"] = json!("CV1");
    chat["related_entity_type"] = json!("conversation");
    chat["metadata"] = json!({"clinic_id": "C1", "sender_id": "P2", "sender_role": "patient"});

    let store = Arc::new(seed().with_rows(Table::SYSTEM_NOTIFICATIONS, vec![chat]));
    let gateway = Arc::new(RecordingGateway::default());

    QueueProcessor::new(store.clone(), gateway.clone())
        .process_pending(10)
        .await
        .unwrap();

    let sent = gateway.sent();
    assert_eq!(sent.len(), 1);
    let message = &sent[0].1;
    assert_eq!(message.title, "Staff Lea Diaz is on leave");
    assert_eq!(
        message.body,
        format!("New patient message requires attention: \"{}...\"", content)
    );
    assert_eq!(message.data["type"], "escalated_message");
    assert_eq!(message.data["conversation_id"], "CV1");
    assert_eq!(message.data["original_recipient"], "S1");

    let row = store.row(Table::SYSTEM_NOTIFICATIONS, "n1").unwrap();
    assert_eq!(row["event_type"], json!("escalated_message"));
    assert_eq!(row["title"], json!("Staff Lea Diaz is on leave"));
    assert_eq!(row["recipient_id"], json!("D9"));
}

#[tokio::test]
async fn test_process_one_unknown_id() {
    let store = Arc::new(seed());
    let gateway = Arc::new(RecordingGateway::default());

    let err = QueueProcessor::new(store, gateway)
        .process_one("missing")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}

#[tokio::test]
async fn test_queued_mode_defers_delivery_to_processor() {
    let store = Arc::new(seed());
    let gateway = Arc::new(RecordingGateway::default());

    let report = Dispatcher::new(store.clone(), gateway.clone(), DispatchMode::Queued)
        .dispatch_json(json!({
            "type": "INSERT",
            "table": "bills",
            "record": {"bill_id": "BL1", "patient_id": "P1", "clinic_id": "C1", "total_amount": 1234.5}
        }))
        .await;

    assert_eq!(report.queued, 1);
    assert_eq!(report.sent, 0);
    assert!(gateway.sent().is_empty());

    let rows = notifications(&store);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["push_status"], json!("pending"));

    let batch = QueueProcessor::new(store.clone(), gateway.clone())
        .process_pending(50)
        .await
        .unwrap();
    assert_eq!(batch.sent, 1);

    let sent = gateway.sent();
    assert_eq!(sent[0].1.body, "Your bill from Smile Clinic is ready: ₱1,234.50");
    assert_eq!(sent[0].1.data["type"], "bill_created");
    assert_eq!(sent[0].1.data["click_action"], "FLUTTER_NOTIFICATION_CLICK");
}
