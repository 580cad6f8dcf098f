//! SQLite table driver.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};

use datastream_core::{Capability, Error, Record, Result};

use super::{
    check_columns, format_timestamp, next_timestamp, parse_timestamp, validate_table_name,
    TableDriver,
};

type RawRow = (String, Vec<u8>, Option<String>, String);

fn db_error(context: &str, err: rusqlite::Error) -> Error {
    Error::Database(format!("{}: {}", context, err))
}

/// A key/value table in a SQLite database.
///
/// The connection is shared behind a mutex and every statement runs on the
/// blocking pool.
#[derive(Debug, Clone)]
pub struct SqliteTable {
    conn: Arc<Mutex<Connection>>,
    table: String,
}

impl SqliteTable {
    /// Open a database file and validate `table`.
    pub fn open(path: impl AsRef<Path>, table: &str) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|e| db_error(&format!("failed to open {}", path.display()), e))?;
        Self::new(conn, table)
    }

    /// Validate `table` on an existing connection.
    pub fn new(conn: Connection, table: &str) -> Result<Self> {
        validate_table_name(table)?;

        let exists: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| db_error("failed to inspect schema", e))?;
        if exists.is_none() {
            return Err(Error::Config(format!("table {} does not exist", table)));
        }

        let columns = {
            let mut stmt = conn
                .prepare(&format!("PRAGMA table_info(\"{}\")", table))
                .map_err(|e| db_error("failed to inspect columns", e))?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(1))
                .map_err(|e| db_error("failed to inspect columns", e))?
                .collect::<rusqlite::Result<Vec<String>>>()
                .map_err(|e| db_error("failed to inspect columns", e))?;
            names
        };
        check_columns(table, &columns)?;

        tracing::debug!(table, "validated sqlite table");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            table: table.to_string(),
        })
    }

    /// Table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &str) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        let table = self.table.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn, &table)
        })
        .await?
    }
}

/// `?1, ?2, ...` for `count` bound parameters, starting at `first`.
fn placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    let value = match row.get_ref(1)? {
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => bytes.to_vec(),
        ValueRef::Integer(i) => i.to_string().into_bytes(),
        ValueRef::Real(f) => f.to_string().into_bytes(),
        ValueRef::Null => Vec::new(),
    };
    Ok((row.get(0)?, value, row.get(2)?, row.get(3)?))
}

fn into_record((key, value, value_type, updated_at): RawRow) -> Result<Record> {
    let updated_at = parse_timestamp(&updated_at)?;
    Ok(Record::at(key, value, value_type.unwrap_or_default(), updated_at))
}

fn query_records(
    conn: &Connection,
    sql: &str,
    params: Vec<String>,
) -> Result<Vec<Record>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| db_error("failed to prepare query", e))?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), read_row)
        .map_err(|e| db_error("failed to query rows", e))?
        .collect::<rusqlite::Result<Vec<RawRow>>>()
        .map_err(|e| db_error("failed to read rows", e))?;
    rows.into_iter().map(into_record).collect()
}

#[async_trait]
impl TableDriver for SqliteTable {
    fn dialect(&self) -> &'static str {
        "sqlite"
    }

    async fn capabilities(&self) -> Result<Vec<Capability>> {
        self.blocking(|conn, table| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT DISTINCT key, value_type FROM \"{}\" ORDER BY key",
                    table
                ))
                .map_err(|e| db_error("failed to prepare query", e))?;
            let capabilities = stmt
                .query_map([], |row| {
                    let key: String = row.get(0)?;
                    let value_type: Option<String> = row.get(1)?;
                    Ok(Capability::new(key, value_type.unwrap_or_default()))
                })
                .map_err(|e| db_error("failed to list keys", e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| db_error("failed to list keys", e))?;
            Ok(capabilities)
        })
        .await
    }

    async fn select(&self, keys: &[String]) -> Result<Vec<Record>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let keys = keys.to_vec();
        self.blocking(move |conn, table| {
            let sql = format!(
                "SELECT key, value, value_type, updated_at FROM \"{}\" WHERE key IN ({})",
                table,
                placeholders(1, keys.len())
            );
            query_records(conn, &sql, keys)
        })
        .await
    }

    async fn select_since(
        &self,
        keys: &[String],
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Record>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let keys = keys.to_vec();
        self.blocking(move |conn, table| {
            let mut params = keys;
            let mut sql = format!(
                "SELECT key, value, value_type, updated_at FROM \"{}\" WHERE key IN ({})",
                table,
                placeholders(1, params.len())
            );
            if let Some(since) = since {
                // julianday() normalizes both RFC 3339 and CURRENT_TIMESTAMP text.
                sql.push_str(&format!(
                    " AND julianday(updated_at) > julianday(?{})",
                    params.len() + 1
                ));
                params.push(format_timestamp(&since));
            }
            sql.push_str(" ORDER BY julianday(updated_at), key");
            query_records(conn, &sql, params)
        })
        .await
    }

    async fn upsert(&self, record: &Record) -> Result<DateTime<Utc>> {
        let record = record.clone();
        self.blocking(move |conn, table| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| db_error("failed to begin transaction", e))?;
            let latest: Option<String> = tx
                .query_row(
                    &format!(
                        "SELECT updated_at FROM \"{}\" ORDER BY julianday(updated_at) DESC LIMIT 1",
                        table
                    ),
                    [],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| db_error("failed to read latest timestamp", e))?;
            let latest = latest.as_deref().map(parse_timestamp).transpose()?;
            let stamp = next_timestamp(record.updated_at, Utc::now(), latest);

            tx.execute(
                &format!(
                    "INSERT OR REPLACE INTO \"{}\" (key, value, value_type, updated_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    table
                ),
                params![
                    record.key,
                    record.value,
                    record.value_type,
                    format_timestamp(&stamp)
                ],
            )
            .map_err(|e| db_error(&format!("failed to upsert key {}", record.key), e))?;
            tx.commit()
                .map_err(|e| db_error("failed to commit transaction", e))?;
            Ok(stamp)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = "CREATE TABLE data (
        key TEXT PRIMARY KEY,
        value BLOB,
        value_type TEXT,
        updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )";

    fn table() -> SqliteTable {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        SqliteTable::new(conn, "data").unwrap()
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1, 3), "?1, ?2, ?3");
        assert_eq!(placeholders(4, 1), "?4");
    }

    #[test]
    fn test_missing_table_and_columns() {
        let conn = Connection::open_in_memory().unwrap();
        let err = SqliteTable::new(conn, "data").unwrap_err();
        assert_eq!(err, Error::Config("table data does not exist".to_string()));

        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE data (key TEXT PRIMARY KEY, value BLOB)")
            .unwrap();
        let err = SqliteTable::new(conn, "data").unwrap_err();
        assert_eq!(
            err,
            Error::Config("table data does not have a column named 'value_type'".to_string())
        );

        let conn = Connection::open_in_memory().unwrap();
        assert!(matches!(
            SqliteTable::new(conn, "data\"; --"),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_reads_text_and_default_timestamps() {
        let table = table();
        table
            .conn
            .lock()
            .execute_batch(
                "INSERT INTO data (key, value, value_type, updated_at)
                 VALUES ('max_connections', '10', 'int', '2024-01-01 10:00:00')",
            )
            .unwrap();

        let rows = table.select(&["max_connections".to_string()]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, b"10");
        assert_eq!(rows[0].value_type, "int");
        assert_eq!(
            format_timestamp(&rows[0].updated_at),
            "2024-01-01T10:00:00.000Z"
        );
    }

    #[tokio::test]
    async fn test_select_since_compares_mixed_formats() {
        let table = table();
        table
            .conn
            .lock()
            .execute_batch(
                "INSERT INTO data VALUES ('a', '1', 'int', '2024-01-01 10:00:00');
                 INSERT INTO data VALUES ('b', '2', 'int', '2024-01-01T11:00:00.000Z');",
            )
            .unwrap();
        let keys = vec!["a".to_string(), "b".to_string()];

        let all = table.select_since(&keys, None).await.unwrap();
        let order: Vec<&str> = all.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(order, vec!["a", "b"]);

        let mark = all[0].updated_at;
        let newer = table.select_since(&keys, Some(mark)).await.unwrap();
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].key, "b");
    }

    #[tokio::test]
    async fn test_upsert_replaces_row() {
        let table = table();
        table.upsert(&Record::new("a", "1", "int")).await.unwrap();
        table.upsert(&Record::new("a", "2", "int")).await.unwrap();

        let rows = table.select(&["a".to_string()]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value_str(), Some("2"));

        let capabilities = table.capabilities().await.unwrap();
        assert_eq!(capabilities, vec![Capability::new("a", "int")]);
    }

    #[tokio::test]
    async fn test_upsert_never_stores_an_older_timestamp() {
        let table = table();
        table
            .conn
            .lock()
            .execute_batch("INSERT INTO data VALUES ('a', '1', 'int', '2030-01-01T00:00:00.000Z')")
            .unwrap();
        let newest = parse_timestamp("2030-01-01T00:00:00.000Z").unwrap();
        let stale = parse_timestamp("2024-01-01T00:00:00.000Z").unwrap();

        let stored = table
            .upsert(&Record::at("b", "2", "int", stale))
            .await
            .unwrap();
        assert!(stored > newest);

        let rows = table.select(&["b".to_string()]).await.unwrap();
        assert_eq!(rows[0].updated_at, stored);

        let again = table.upsert(&Record::at("b", "3", "int", stale)).await.unwrap();
        assert!(again > stored);
    }
}
