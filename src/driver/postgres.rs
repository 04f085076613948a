//! PostgreSQL driver backed by an sqlx pool
//!
//! Reads outside a transaction go to the optional read replica; everything
//! else uses the primary pool. An open transaction pins one pooled connection
//! and every statement runs on it until the outermost commit or rollback.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Number, Value};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Postgres, Row as _, Transaction, TypeInfo};
use tracing::{debug, info};

use super::{Context, Driver, Resolution, ResultSet, TransactionDepth};
use crate::config::PgConfig;
use crate::entity::Row;
use crate::error::{ModelError, Result};
use crate::query::{Query, QueryType};
use crate::schema::Schema;
use crate::sql::render::{Param, Statement, render};
use crate::types::{ColumnDefinition, ColumnType};

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

#[derive(Default)]
struct TxState {
    depth: TransactionDepth,
    conn: Option<Transaction<'static, Postgres>>,
}

/// Driver executing rendered SQL on PostgreSQL
pub struct PgDriver {
    write: PgPool,
    read: Option<PgPool>,
    context: Mutex<Context>,
    tx: tokio::sync::Mutex<TxState>,
    inserted: Mutex<HashMap<String, Row>>,
}

impl PgDriver {
    /// Connect the primary pool and, when configured, the read replica
    pub async fn connect(config: &PgConfig) -> Result<Self> {
        let write = Self::open_pool(&config.database_url, config.max_connections).await?;
        let read = match &config.read_url {
            Some(url) => Some(Self::open_pool(url, config.max_connections).await?),
            None => None,
        };
        Ok(Self::with_pools(write, read))
    }

    /// Create a driver on an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self::with_pools(pool, None)
    }

    fn with_pools(write: PgPool, read: Option<PgPool>) -> Self {
        Self {
            write,
            read,
            context: Mutex::new(Context::default()),
            tx: tokio::sync::Mutex::new(TxState::default()),
            inserted: Mutex::new(HashMap::new()),
        }
    }

    async fn open_pool(url: &str, max_connections: u32) -> Result<PgPool> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| ModelError::driver(format!("Failed to connect to database: {}", e)))
    }

    /// Get the primary pool
    pub fn pool(&self) -> &PgPool {
        &self.write
    }

    fn current_context(&self) -> Context {
        self.context.lock().map(|c| *c).unwrap_or_default()
    }

    /// Transaction state, held only while a connection is pinned
    async fn pinned(&self) -> Option<tokio::sync::MutexGuard<'_, TxState>> {
        let tx = self.tx.lock().await;
        tx.conn.is_some().then_some(tx)
    }

    fn pool_for(&self, context: Context) -> &PgPool {
        match (context, &self.read) {
            (Context::Read, Some(read)) => read,
            _ => &self.write,
        }
    }
}

#[async_trait]
impl Driver for PgDriver {
    fn name(&self) -> &str {
        "postgres"
    }

    fn set_context(&self, context: Context) {
        if let Ok(mut current) = self.context.lock() {
            *current = context;
        }
    }

    async fn execute(&self, query: &Query) -> Result<ResultSet> {
        let statement = render(query)?;
        let context = self.current_context();
        debug!(
            driver = "postgres",
            query_type = %query.query_type(),
            table = query.table(),
            params = statement.params.len(),
            ?context,
            sql = %statement.sql,
            "executing query"
        );

        let returns_rows = matches!(
            query.query_type(),
            QueryType::Select | QueryType::Insert | QueryType::MultiInsert
        );
        let schema = query.table_schema();

        let result = match self.pinned().await {
            Some(mut tx) => match tx.conn.as_mut() {
                Some(conn) => run(&statement, schema, returns_rows, &mut **conn).await?,
                None => run(&statement, schema, returns_rows, &self.write).await?,
            },
            None => run(&statement, schema, returns_rows, self.pool_for(context)).await?,
        };

        if matches!(query.query_type(), QueryType::Insert | QueryType::MultiInsert) {
            if let Some(row) = result.fetch() {
                if let Ok(mut inserted) = self.inserted.lock() {
                    inserted.insert(query.table().to_string(), row.clone());
                }
            }
        }
        Ok(result)
    }

    async fn last_insert_id(&self, table: &str, primary_key: &str) -> Result<Option<Value>> {
        let inserted = self
            .inserted
            .lock()
            .map_err(|_| ModelError::driver("insert cache is poisoned"))?;
        Ok(inserted.get(table).and_then(|row| row.get(primary_key)).cloned())
    }

    async fn start_transaction(&self) -> Result<bool> {
        let mut tx = self.tx.lock().await;
        if !tx.depth.begin() {
            return Ok(false);
        }
        match self.write.begin().await {
            Ok(conn) => {
                tx.conn = Some(conn);
                info!(driver = "postgres", "transaction started");
                Ok(true)
            }
            Err(e) => {
                tx.depth = TransactionDepth::new();
                Err(e.into())
            }
        }
    }

    async fn commit_transaction(&self) -> Result<bool> {
        let mut tx = self.tx.lock().await;
        match tx.depth.commit()? {
            Resolution::Nested => Ok(false),
            Resolution::Commit => {
                if let Some(conn) = tx.conn.take() {
                    conn.commit().await?;
                }
                info!(driver = "postgres", "transaction committed");
                Ok(true)
            }
            Resolution::Rollback => {
                if let Some(conn) = tx.conn.take() {
                    conn.rollback().await?;
                }
                info!(driver = "postgres", "transaction rolled back on commit");
                Err(ModelError::transaction(
                    "transaction was marked rollback-only by a nested rollback",
                ))
            }
        }
    }

    async fn rollback_transaction(&self) -> Result<bool> {
        let mut tx = self.tx.lock().await;
        match tx.depth.rollback()? {
            Resolution::Nested => Ok(false),
            _ => {
                if let Some(conn) = tx.conn.take() {
                    conn.rollback().await?;
                }
                info!(driver = "postgres", "transaction rolled back");
                Ok(true)
            }
        }
    }

    async fn describe_table(&self, table: &str) -> Result<Option<Schema>> {
        // information_schema columns are domain types; cast for decoding
        let columns: Vec<(String, String, String, Option<String>)> = sqlx::query_as(
            "SELECT column_name::text, data_type::text, is_nullable::text, column_default::text \
             FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 \
             ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(&self.write)
        .await?;

        if columns.is_empty() {
            return Ok(None);
        }

        let primary: Vec<(String,)> = sqlx::query_as(
            "SELECT kcu.column_name::text \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
             WHERE tc.constraint_type = 'PRIMARY KEY' \
               AND tc.table_schema = current_schema() AND tc.table_name = $1",
        )
        .bind(table)
        .fetch_all(&self.write)
        .await?;
        let primary: HashSet<String> = primary.into_iter().map(|(name,)| name).collect();

        let columns = columns
            .into_iter()
            .map(|(name, data_type, nullable, default)| {
                let is_primary = primary.contains(&name);
                column_from_catalog(&name, &data_type, nullable == "YES", default, is_primary)
            })
            .collect();
        Ok(Some(Schema::new(table, columns)))
    }
}

async fn run<'c, E>(
    statement: &Statement,
    schema: Option<&Schema>,
    returns_rows: bool,
    executor: E,
) -> Result<ResultSet>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    let mut query = sqlx::query(&statement.sql);
    for param in &statement.params {
        query = bind_param(query, schema, param)?;
    }

    if returns_rows {
        let rows = query.fetch_all(executor).await?;
        let rows = rows.iter().map(decode_row).collect::<Result<Vec<_>>>()?;
        Ok(ResultSet::from_rows(rows))
    } else {
        let done = query.execute(executor).await?;
        Ok(ResultSet::affected(done.rows_affected()))
    }
}

fn column_from_catalog(
    name: &str,
    data_type: &str,
    nullable: bool,
    default: Option<String>,
    primary: bool,
) -> ColumnDefinition {
    let mut column = ColumnDefinition::new(name, ColumnType::from_pg_data_type(data_type));
    column.nullable = nullable;
    if primary {
        column = column.primary();
    }
    match default {
        Some(expr) if expr.starts_with("nextval(") => column = column.auto_increment(),
        Some(expr) => column = column.default_expression(expr),
        None => {}
    }
    column
}

// =============================================================================
// Parameter binding
// =============================================================================

fn bind_param<'q>(query: PgQuery<'q>, schema: Option<&Schema>, param: &Param) -> Result<PgQuery<'q>> {
    let column = param
        .column
        .as_deref()
        .and_then(|name| schema.and_then(|s| s.column(name)));
    match column {
        Some(column) => bind_value(query, &column.column_type, &column.name, &param.value),
        None => Ok(bind_json(query, &param.value)),
    }
}

/// Bind by the JSON type when the column type is unknown
fn bind_json<'q>(query: PgQuery<'q>, value: &Value) -> PgQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => query.bind(i),
            (None, Some(f)) => query.bind(f),
            (None, None) => query.bind(n.to_string()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(sqlx::types::Json(other.clone())),
    }
}

fn bind_value<'q>(
    query: PgQuery<'q>,
    column_type: &ColumnType,
    column_name: &str,
    value: &Value,
) -> Result<PgQuery<'q>> {
    let mismatch = |expected: &str| {
        ModelError::validation(format!("Column '{}' expected {}", column_name, expected))
    };

    Ok(match column_type {
        ColumnType::String | ColumnType::Enum { .. } => match value {
            Value::Null => query.bind(None::<String>),
            Value::String(s) => query.bind(s.clone()),
            Value::Number(n) => query.bind(n.to_string()),
            Value::Bool(b) => query.bind(b.to_string()),
            _ => return Err(mismatch("string")),
        },
        ColumnType::Integer => {
            if value.is_null() {
                query.bind(None::<i64>)
            } else {
                let int_val = value
                    .as_i64()
                    .or_else(|| value.as_str().and_then(|s| s.parse::<i64>().ok()))
                    .ok_or_else(|| mismatch("integer"))?;
                query.bind(int_val)
            }
        }
        ColumnType::Decimal { .. } => {
            if value.is_null() {
                query.bind(None::<Decimal>)
            } else {
                let text = match value {
                    Value::Number(n) => n.to_string(),
                    Value::String(s) => s.clone(),
                    _ => return Err(mismatch("decimal")),
                };
                let dec_val = Decimal::from_str(&text)
                    .or_else(|_| Decimal::from_scientific(&text))
                    .map_err(|_| mismatch("decimal"))?;
                query.bind(dec_val)
            }
        }
        ColumnType::Boolean => {
            if value.is_null() {
                query.bind(None::<bool>)
            } else {
                let bool_val = value
                    .as_bool()
                    .or_else(|| {
                        value
                            .as_str()
                            .and_then(|s| match s.to_lowercase().as_str() {
                                "true" | "1" | "yes" => Some(true),
                                "false" | "0" | "no" => Some(false),
                                _ => None,
                            })
                    })
                    .ok_or_else(|| mismatch("boolean"))?;
                query.bind(bool_val)
            }
        }
        ColumnType::Timestamp => {
            if value.is_null() {
                query.bind(None::<chrono::DateTime<chrono::Utc>>)
            } else {
                let text = value.as_str().ok_or_else(|| mismatch("timestamp string"))?;
                let timestamp = chrono::DateTime::parse_from_rfc3339(text)
                    .map_err(|e| {
                        ModelError::validation(format!(
                            "Column '{}' has invalid timestamp: {}",
                            column_name, e
                        ))
                    })?
                    .with_timezone(&chrono::Utc);
                query.bind(timestamp)
            }
        }
        ColumnType::Json => query.bind(sqlx::types::Json(value.clone())),
    })
}

// =============================================================================
// Row decoding
// =============================================================================

fn decode_row(row: &PgRow) -> Result<Row> {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "INT2" => row.try_get::<Option<i16>, _>(i)?.map(Value::from),
            "INT4" => row.try_get::<Option<i32>, _>(i)?.map(Value::from),
            "INT8" => row.try_get::<Option<i64>, _>(i)?.map(Value::from),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(i)?
                .and_then(|f| Number::from_f64(f64::from(f)))
                .map(Value::Number),
            "FLOAT8" => row
                .try_get::<Option<f64>, _>(i)?
                .and_then(Number::from_f64)
                .map(Value::Number),
            "NUMERIC" => row.try_get::<Option<Decimal>, _>(i)?.map(decimal_value),
            "BOOL" => row.try_get::<Option<bool>, _>(i)?.map(Value::Bool),
            "UUID" => row
                .try_get::<Option<uuid::Uuid>, _>(i)?
                .map(|u| Value::String(u.to_string())),
            "TIMESTAMPTZ" => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i)?
                .map(|v| Value::String(v.to_rfc3339())),
            "TIMESTAMP" => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(i)?
                .map(|v| Value::String(v.and_utc().to_rfc3339())),
            "DATE" => row
                .try_get::<Option<chrono::NaiveDate>, _>(i)?
                .map(|v| Value::String(v.to_string())),
            "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(i)?,
            _ => row.try_get::<Option<String>, _>(i)?.map(Value::String),
        };
        out.insert(column.name().to_string(), value.unwrap_or(Value::Null));
    }
    Ok(out)
}

/// Integral decimals become integers, others floats
fn decimal_value(decimal: Decimal) -> Value {
    if decimal.fract().is_zero() {
        if let Some(i) = decimal.to_i64() {
            return Value::from(i);
        }
    }
    decimal
        .to_f64()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
