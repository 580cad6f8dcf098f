//! PostgreSQL table driver.
//!
//! Expects `updated_at` to be a `TIMESTAMPTZ` column and `value` to be
//! `BYTEA` or `TEXT`. Enable with `--features postgres`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use datastream_core::{Capability, Error, Record, Result};

use super::{check_columns, next_timestamp, validate_table_name, TableDriver};

const MAX_CONNECTIONS: u32 = 5;

fn db_error(context: &str, err: sqlx::Error) -> Error {
    Error::Database(format!("{}: {}", context, err))
}

fn read_row(row: &PgRow) -> Result<Record> {
    let key: String = row
        .try_get("key")
        .map_err(|e| db_error("failed to read key", e))?;
    // BYTEA decodes directly; TEXT columns fall back to their UTF-8 bytes.
    let value = match row.try_get::<Option<Vec<u8>>, _>("value") {
        Ok(bytes) => bytes.unwrap_or_default(),
        Err(_) => row
            .try_get::<Option<String>, _>("value")
            .map_err(|e| db_error(&format!("failed to read value of {}", key), e))?
            .map(String::into_bytes)
            .unwrap_or_default(),
    };
    let value_type: Option<String> = row
        .try_get("value_type")
        .map_err(|e| db_error(&format!("failed to read value_type of {}", key), e))?;
    let updated_at: DateTime<Utc> = row
        .try_get("updated_at")
        .map_err(|e| db_error(&format!("failed to read updated_at of {}", key), e))?;

    Ok(Record::at(key, value, value_type.unwrap_or_default(), updated_at))
}

/// A key/value table in a PostgreSQL database.
#[derive(Debug, Clone)]
pub struct PostgresTable {
    pool: PgPool,
    table: String,
}

impl PostgresTable {
    /// Connect and validate `table`.
    pub async fn connect(database_url: &str, table: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(database_url)
            .await
            .map_err(|e| db_error("failed to connect to PostgreSQL", e))?;
        Self::new(pool, table).await
    }

    /// Validate `table` on an existing pool.
    pub async fn new(pool: PgPool, table: &str) -> Result<Self> {
        validate_table_name(table)?;

        let columns: Vec<String> = sqlx::query_scalar(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1",
        )
        .bind(table)
        .fetch_all(&pool)
        .await
        .map_err(|e| db_error("failed to inspect columns", e))?;

        if columns.is_empty() {
            return Err(Error::Config(format!("table {} does not exist", table)));
        }
        check_columns(table, &columns)?;

        tracing::debug!(table, "validated postgres table");
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    /// Table name.
    pub fn table(&self) -> &str {
        &self.table
    }
}

#[async_trait]
impl TableDriver for PostgresTable {
    fn dialect(&self) -> &'static str {
        "postgres"
    }

    async fn capabilities(&self) -> Result<Vec<Capability>> {
        let rows = sqlx::query(&format!(
            "SELECT DISTINCT key, value_type FROM \"{}\" ORDER BY key",
            self.table
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("failed to list keys", e))?;

        rows.iter()
            .map(|row| {
                let key: String = row
                    .try_get("key")
                    .map_err(|e| db_error("failed to read key", e))?;
                let value_type: Option<String> = row
                    .try_get("value_type")
                    .map_err(|e| db_error("failed to read value_type", e))?;
                Ok(Capability::new(key, value_type.unwrap_or_default()))
            })
            .collect()
    }

    async fn select(&self, keys: &[String]) -> Result<Vec<Record>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT key, value, value_type, updated_at FROM \"{}\" WHERE key = ANY($1)",
            self.table
        ))
        .bind(keys)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("failed to query rows", e))?;

        rows.iter().map(read_row).collect()
    }

    async fn select_since(
        &self,
        keys: &[String],
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Record>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT key, value, value_type, updated_at FROM \"{}\" \
             WHERE key = ANY($1) AND ($2::timestamptz IS NULL OR updated_at > $2) \
             ORDER BY updated_at, key",
            self.table
        ))
        .bind(keys)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("failed to query rows", e))?;

        rows.iter().map(read_row).collect()
    }

    async fn upsert(&self, record: &Record) -> Result<DateTime<Utc>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("failed to begin transaction", e))?;

        // Serializes concurrent pushes so each sees the previous stamp.
        sqlx::query(&format!("LOCK TABLE \"{}\" IN SHARE ROW EXCLUSIVE MODE", self.table))
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("failed to lock table", e))?;
        let latest: Option<DateTime<Utc>> =
            sqlx::query_scalar(&format!("SELECT MAX(updated_at) FROM \"{}\"", self.table))
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| db_error("failed to read latest timestamp", e))?;
        let stamp = next_timestamp(record.updated_at, Utc::now(), latest);

        sqlx::query(&format!(
            "INSERT INTO \"{}\" (key, value, value_type, updated_at) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, \
             value_type = EXCLUDED.value_type, updated_at = EXCLUDED.updated_at",
            self.table
        ))
        .bind(&record.key)
        .bind(&record.value)
        .bind(&record.value_type)
        .bind(stamp)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error(&format!("failed to upsert key {}", record.key), e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("failed to commit transaction", e))?;
        Ok(stamp)
    }
}
