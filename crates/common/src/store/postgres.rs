use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use super::{Datastore, Filter, Query, Row, StoreError, Table, is_identifier, value_text};

/// Postgres-backed datastore.
///
/// Rows are read as `to_jsonb(t)` and written through `jsonb_populate_record`, so
/// column types come from the table definition rather than from the caller.
#[derive(Clone)]
pub struct PgDatastore {
    pool: PgPool,
}

impl PgDatastore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn quote(ident: &str) -> Result<String, StoreError> {
    if !is_identifier(ident) {
        return Err(StoreError::InvalidColumn(ident.to_string()));
    }
    Ok(format!("\"{}\"", ident))
}

fn into_row(value: Value) -> Result<Row, StoreError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Decode(format!(
            "expected a JSON object row, got {}",
            other
        ))),
    }
}

/// Build `SELECT ... WHERE ...` for a query. Returns the SQL and the text binds in
/// placeholder order.
fn build_select(query: &Query) -> Result<(String, Vec<String>), StoreError> {
    let mut sql = format!("SELECT to_jsonb(t) FROM {} AS t", quote(query.table.name)?);
    let mut binds = Vec::new();
    let mut clauses = Vec::new();

    for filter in &query.filters {
        let column = quote(filter.column())?;
        match filter {
            Filter::Eq(_, value) => match value_text(value) {
                Some(text) => {
                    binds.push(text);
                    clauses.push(format!("t.{}::text = ${}", column, binds.len()));
                }
                None => clauses.push(format!("t.{} IS NULL", column)),
            },
            Filter::NotEq(_, value) => match value_text(value) {
                Some(text) => {
                    binds.push(text);
                    clauses.push(format!(
                        "t.{}::text IS DISTINCT FROM ${}",
                        column,
                        binds.len()
                    ));
                }
                None => clauses.push(format!("t.{} IS NOT NULL", column)),
            },
            Filter::IsNull(_) => clauses.push(format!("t.{} IS NULL", column)),
            Filter::NotNull(_) => clauses.push(format!("t.{} IS NOT NULL", column)),
        }
    }

    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }

    if let Some(order) = &query.order_by {
        sql.push_str(&format!(
            " ORDER BY t.{} {}",
            quote(order.column)?,
            if order.ascending { "ASC" } else { "DESC" }
        ));
    }

    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    Ok((sql, binds))
}

fn column_list(fields: &Row) -> Result<Vec<String>, StoreError> {
    fields.keys().map(|k| quote(k)).collect()
}

#[async_trait]
impl Datastore for PgDatastore {
    async fn get_by_key(&self, table: Table, key: &str) -> Result<Option<Row>, StoreError> {
        let sql = format!(
            "SELECT to_jsonb(t) FROM {} AS t WHERE t.{}::text = $1 LIMIT 1",
            quote(table.name)?,
            quote(table.key)?
        );

        let value: Option<Value> = sqlx::query_scalar(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        value.map(into_row).transpose()
    }

    async fn query(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        let (sql, binds) = build_select(query)?;

        let mut q = sqlx::query_scalar::<_, Value>(&sql);
        for bind in binds {
            q = q.bind(bind);
        }

        q.fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(into_row)
            .collect()
    }

    async fn update(&self, table: Table, key: &str, fields: Row) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }

        let columns = column_list(&fields)?;
        let name = quote(table.name)?;
        let assignment = if columns.len() == 1 {
            format!(
                "{col} = (SELECT {col} FROM jsonb_populate_record(NULL::{name}, $1))",
                col = columns[0],
                name = name
            )
        } else {
            format!(
                "({cols}) = (SELECT {cols} FROM jsonb_populate_record(NULL::{name}, $1))",
                cols = columns.join(", "),
                name = name
            )
        };

        let sql = format!(
            "UPDATE {} AS t SET {} WHERE t.{}::text = $2",
            name,
            assignment,
            quote(table.key)?
        );

        let result = sqlx::query(&sql)
            .bind(Value::Object(fields))
            .bind(key)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                table: table.name,
                key: table.key,
                value: key.to_string(),
            });
        }

        Ok(())
    }

    async fn insert(&self, table: Table, fields: Row) -> Result<Row, StoreError> {
        let columns = column_list(&fields)?.join(", ");
        let name = quote(table.name)?;

        let sql = format!(
            "INSERT INTO {name} AS t ({cols}) \
             SELECT {cols} FROM jsonb_populate_record(NULL::{name}, $1) \
             RETURNING to_jsonb(t)",
            name = name,
            cols = columns
        );

        let value: Value = sqlx::query_scalar(&sql)
            .bind(Value::Object(fields))
            .fetch_one(&self.pool)
            .await?;

        into_row(value)
    }
}
