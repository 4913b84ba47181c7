use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::{Datastore, Filter, Query, Row, StoreError, Table, value_text};

/// In-process datastore with the same filter semantics as [`super::PgDatastore`].
///
/// Used by the test suites and for running the API without a database.
#[derive(Debug, Default)]
pub struct MemoryDatastore {
    tables: RwLock<HashMap<&'static str, Vec<Row>>>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a table with rows. Accepts JSON objects; anything else is ignored.
    pub fn with_rows(self, table: Table, rows: impl IntoIterator<Item = Value>) -> Self {
        {
            let mut tables = self.write();
            let entry = tables.entry(table.name).or_default();
            entry.extend(rows.into_iter().filter_map(|v| v.as_object().cloned()));
        }
        self
    }

    /// Snapshot of a table's rows in insertion order.
    pub fn rows(&self, table: Table) -> Vec<Row> {
        self.read().get(table.name).cloned().unwrap_or_default()
    }

    /// Snapshot of a single row by key.
    pub fn row(&self, table: Table, key: &str) -> Option<Row> {
        self.read()
            .get(table.name)
            .and_then(|rows| rows.iter().find(|r| key_matches(r, table, key)).cloned())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<&'static str, Vec<Row>>> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<&'static str, Vec<Row>>> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn key_matches(row: &Row, table: Table, key: &str) -> bool {
    row.get(table.key)
        .and_then(value_text)
        .is_some_and(|k| k == key)
}

fn column_text(row: &Row, column: &str) -> Option<String> {
    row.get(column).and_then(value_text)
}

fn matches(row: &Row, filter: &Filter) -> bool {
    match filter {
        Filter::Eq(column, value) => column_text(row, column) == value_text(value),
        Filter::NotEq(column, value) => column_text(row, column) != value_text(value),
        Filter::IsNull(column) => column_text(row, column).is_none(),
        Filter::NotNull(column) => column_text(row, column).is_some(),
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        // NULLS LAST, as Postgres does for ascending order
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(x), Some(y)) => value_text(x).cmp(&value_text(y)),
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn get_by_key(&self, table: Table, key: &str) -> Result<Option<Row>, StoreError> {
        Ok(self.row(table, key))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        let mut rows: Vec<Row> = self
            .read()
            .get(query.table.name)
            .map(|rows| {
                rows.iter()
                    .filter(|r| query.filters.iter().all(|f| matches(r, f)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order_by {
            // Stable sort keeps insertion order between equal keys.
            rows.sort_by(|a, b| {
                let ord = compare(a.get(order.column), b.get(order.column));
                if order.ascending { ord } else { ord.reverse() }
            });
        }

        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        Ok(rows)
    }

    async fn update(&self, table: Table, key: &str, fields: Row) -> Result<(), StoreError> {
        let mut tables = self.write();
        let row = tables
            .get_mut(table.name)
            .and_then(|rows| rows.iter_mut().find(|r| key_matches(r, table, key)))
            .ok_or_else(|| StoreError::NotFound {
                table: table.name,
                key: table.key,
                value: key.to_string(),
            })?;

        row.extend(fields);
        Ok(())
    }

    async fn insert(&self, table: Table, mut fields: Row) -> Result<Row, StoreError> {
        if !fields.contains_key(table.key) {
            fields.insert(
                table.key.to_string(),
                Value::String(Uuid::new_v4().to_string()),
            );
        }

        self.write()
            .entry(table.name)
            .or_default()
            .push(fields.clone());

        Ok(fields)
    }
}
