//! Datastore capability.
//!
//! The engine only ever needs point lookups by key, filtered scans, single-row
//! updates and inserts. Rows travel as JSON objects so the same engine code runs
//! against Postgres and against the in-memory store used in tests.

mod memory;
mod postgres;

pub use memory::MemoryDatastore;
pub use postgres::PgDatastore;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// A single row, keyed by column name.
pub type Row = serde_json::Map<String, Value>;

/// Static descriptor of a backing table and its primary key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Table {
    pub name: &'static str,
    pub key: &'static str,
}

impl Table {
    pub const PATIENTS: Table = Table::new("patients", "patient_id");
    pub const DENTISTS: Table = Table::new("dentists", "dentist_id");
    pub const STAFFS: Table = Table::new("staffs", "staff_id");
    pub const ADMINS: Table = Table::new("admins", "admin_id");
    pub const CLINICS: Table = Table::new("clinics", "clinic_id");
    pub const SERVICES: Table = Table::new("services", "service_id");
    pub const CONVERSATION_PARTICIPANTS: Table = Table::new("conversation_participants", "id");
    pub const SYSTEM_NOTIFICATIONS: Table = Table::new("system_notifications", "id");

    pub const fn new(name: &'static str, key: &'static str) -> Self {
        Self { name, key }
    }
}

/// Row filter. Values compare on their text form, the way Postgres renders
/// `column::text`.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(&'static str, Value),
    NotEq(&'static str, Value),
    IsNull(&'static str),
    NotNull(&'static str),
}

impl Filter {
    pub fn eq(column: &'static str, value: impl Into<Value>) -> Self {
        Filter::Eq(column, value.into())
    }

    pub fn not_eq(column: &'static str, value: impl Into<Value>) -> Self {
        Filter::NotEq(column, value.into())
    }

    pub fn column(&self) -> &'static str {
        match self {
            Filter::Eq(c, _) | Filter::NotEq(c, _) | Filter::IsNull(c) | Filter::NotNull(c) => c,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub column: &'static str,
    pub ascending: bool,
}

/// A filtered scan over one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: Table,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn table(table: Table) -> Self {
        Self {
            table,
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by_asc(mut self, column: &'static str) -> Self {
        self.order_by = Some(OrderBy {
            column,
            ascending: true,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("No row in {table} with {key} = {value}")]
    NotFound {
        table: &'static str,
        key: &'static str,
        value: String,
    },

    #[error("Invalid column name '{0}'")]
    InvalidColumn(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Datastore unavailable: {0}")]
    Unavailable(String),
}

/// Abstract datastore used by the engine.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Point lookup by the table's primary key.
    async fn get_by_key(&self, table: Table, key: &str) -> Result<Option<Row>, StoreError>;

    /// Filtered scan, optionally ordered and limited.
    async fn query(&self, query: &Query) -> Result<Vec<Row>, StoreError>;

    /// Update the given columns of a single row identified by primary key.
    async fn update(&self, table: Table, key: &str, fields: Row) -> Result<(), StoreError>;

    /// Insert a row and return it as stored.
    async fn insert(&self, table: Table, fields: Row) -> Result<Row, StoreError>;
}

/// Text form of a JSON value, matching what `column::text` yields in Postgres
/// for the column types the engine filters on.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Non-empty string column.
pub fn str_field<'a>(row: &'a Row, column: &str) -> Option<&'a str> {
    row.get(column)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// String-like column; numbers are rendered as text.
pub fn text_field(row: &Row, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn bool_field(row: &Row, column: &str) -> Option<bool> {
    row.get(column).and_then(|v| v.as_bool())
}

/// Numeric column; numeric strings (Postgres `numeric` via JSON) are parsed.
pub fn f64_field(row: &Row, column: &str) -> Option<f64> {
    match row.get(column)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Column identifiers that can be spliced into SQL safely.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
