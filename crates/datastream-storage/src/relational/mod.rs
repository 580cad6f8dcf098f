//! Relational table backend.
//!
//! Rows of a `(key, value, value_type, updated_at)` table are the keys.
//! Unlike the git and object-store backends the change witness is a single
//! watermark timestamp per subscription, not a fingerprint per key: each pass
//! selects the watched rows newer than the watermark and then advances it to
//! the newest `updated_at` seen. A row rewritten with an unchanged timestamp
//! is therefore never reported twice. Pull is one batched query and simply
//! leaves out keys that have no row.
//!
//! Pushes are stamped with the later of the supplied `updated_at`, the
//! current time and one millisecond past the newest row in the table, so a
//! pushed row always lands beyond every watermark a subscriber can hold.
//!
//! The SQL itself lives behind [`TableDriver`]; SQLite is always available
//! and PostgreSQL is enabled with the `postgres` feature.

mod config;
mod poller;
#[cfg(feature = "postgres")]
mod postgres;
mod sqlite;

pub use config::{RelationalConfig, DEFAULT_TABLE};
#[cfg(feature = "postgres")]
pub use postgres::PostgresTable;
pub use sqlite::SqliteTable;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, SecondsFormat, SubsecRound, Utc};

use datastream_core::{
    ensure_keys, spawn_poller, Capability, Error, PollSettings, Record, Result, Store,
    Subscription,
};

use poller::RelationalPoller;

/// Columns every backing table must provide.
pub const REQUIRED_COLUMNS: [&str; 4] = ["key", "value", "value_type", "updated_at"];

/// SQL access to one key/value table.
#[async_trait]
pub trait TableDriver: Send + Sync + std::fmt::Debug + 'static {
    /// Dialect name used in log fields.
    fn dialect(&self) -> &'static str;

    /// Every distinct key with its declared value type.
    async fn capabilities(&self) -> Result<Vec<Capability>>;

    /// Rows for `keys` in one query. Missing keys are simply absent.
    async fn select(&self, keys: &[String]) -> Result<Vec<Record>>;

    /// Rows for `keys` updated strictly after `since`, oldest first.
    async fn select_since(
        &self,
        keys: &[String],
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Record>>;

    /// Insert or replace a row inside a single transaction. The stored
    /// `updated_at` is strictly newer than every row already in the table;
    /// it is returned.
    async fn upsert(&self, record: &Record) -> Result<DateTime<Utc>>;
}

/// Store backed by a relational table.
#[derive(Debug, Clone)]
pub struct RelationalStore {
    driver: Arc<dyn TableDriver>,
    poll: PollSettings,
}

impl RelationalStore {
    /// Wrap an already validated table driver.
    pub fn new(driver: impl TableDriver, poll: PollSettings) -> Self {
        tracing::info!(dialect = driver.dialect(), "relational backend ready");
        Self {
            driver: Arc::new(driver),
            poll,
        }
    }

    /// Open a SQLite database file and validate its table.
    pub fn open_sqlite(path: impl AsRef<Path>, config: RelationalConfig) -> Result<Self> {
        let table = SqliteTable::open(path, &config.table)?;
        Ok(Self::new(table, config.poll))
    }

    /// Take ownership of a SQLite connection and validate its table.
    pub fn from_sqlite(conn: rusqlite::Connection, config: RelationalConfig) -> Result<Self> {
        let table = SqliteTable::new(conn, &config.table)?;
        Ok(Self::new(table, config.poll))
    }

    /// Connect to PostgreSQL and validate the table.
    #[cfg(feature = "postgres")]
    pub async fn connect_postgres(url: &str, config: RelationalConfig) -> Result<Self> {
        let table = PostgresTable::connect(url, &config.table).await?;
        Ok(Self::new(table, config.poll))
    }
}

#[async_trait]
impl Store for RelationalStore {
    fn name(&self) -> &'static str {
        "relational"
    }

    async fn list_capabilities(&self) -> Result<Vec<Capability>> {
        self.driver.capabilities().await
    }

    async fn pull(&self, keys: &[String]) -> Result<HashMap<String, Record>> {
        ensure_keys(keys)?;
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = self.driver.select(keys).await?;
        Ok(rows.into_iter().map(|r| (r.key.clone(), r)).collect())
    }

    async fn subscribe(&self, keys: &[String]) -> Result<Subscription> {
        ensure_keys(keys)?;

        tracing::debug!(dialect = self.driver.dialect(), keys = ?keys, "starting relational subscription");
        let poller = RelationalPoller::new(
            self.driver.clone(),
            keys.to_vec(),
            self.poll.initial_snapshot,
        );
        Ok(spawn_poller(poller, &self.poll))
    }

    async fn push_update(&self, record: &Record) -> Result<()> {
        ensure_keys(std::slice::from_ref(&record.key))?;
        let stored = self.driver.upsert(record).await?;
        tracing::info!(key = %record.key, updated_at = %stored, "pushed update");
        Ok(())
    }
}

/// Check that a table name is a plain SQL identifier.
pub(crate) fn validate_table_name(table: &str) -> Result<()> {
    let mut chars = table.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid table name '{}'", table)))
    }
}

/// Check the required columns against the columns a table actually has.
pub(crate) fn check_columns(table: &str, columns: &[String]) -> Result<()> {
    for required in REQUIRED_COLUMNS {
        if !columns.iter().any(|c| c == required) {
            return Err(Error::Config(format!(
                "table {} does not have a column named '{}'",
                table, required
            )));
        }
    }
    Ok(())
}

/// Timestamp to store for a pushed row.
///
/// Never earlier than `supplied` or `now`, and strictly after `latest`, the
/// newest `updated_at` already in the table. Millisecond precision.
pub(crate) fn next_timestamp(
    supplied: DateTime<Utc>,
    now: DateTime<Utc>,
    latest: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    let stamp = supplied.max(now).trunc_subsecs(3);
    match latest {
        Some(latest) => stamp.max(latest.trunc_subsecs(3) + Duration::milliseconds(1)),
        None => stamp,
    }
}

/// Text form of a timestamp as stored in SQLite: RFC 3339, UTC, milliseconds.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp, accepting RFC 3339 and SQLite's
/// `CURRENT_TIMESTAMP` form.
pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::Database(format!("invalid updated_at '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("data").is_ok());
        assert!(validate_table_name("_settings_v2").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("2data").is_err());
        assert!(validate_table_name("data; DROP TABLE data").is_err());
    }

    #[test]
    fn test_check_columns() {
        let columns: Vec<String> = ["key", "value", "value_type", "updated_at", "extra"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(check_columns("data", &columns).is_ok());

        let err = check_columns("data", &columns[..3]).unwrap_err();
        assert_eq!(
            err,
            Error::Config("table data does not have a column named 'updated_at'".to_string())
        );
    }

    #[test]
    fn test_timestamp_formats() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(format_timestamp(&ts), "2024-03-01T12:30:00.000Z");
        assert_eq!(parse_timestamp("2024-03-01T12:30:00.000Z").unwrap(), ts);
        assert_eq!(parse_timestamp("2024-03-01 12:30:00").unwrap(), ts);
        assert_eq!(parse_timestamp("2024-03-01T14:30:00+02:00").unwrap(), ts);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_next_timestamp() {
        let old = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let future = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();

        // A stale caller timestamp is lifted to the current time.
        assert_eq!(next_timestamp(old, now, None), now);
        assert_eq!(next_timestamp(future, now, None), future);

        // Rows already at or past `now` still get a strictly newer stamp.
        assert_eq!(
            next_timestamp(old, now, Some(now)),
            now + Duration::milliseconds(1)
        );
        let skewed = future + Duration::microseconds(250);
        assert_eq!(
            next_timestamp(old, now, Some(skewed)),
            future + Duration::milliseconds(1)
        );

        let precise = now + Duration::microseconds(1_500);
        assert_eq!(
            next_timestamp(precise, now, None),
            now + Duration::milliseconds(1)
        );
    }
}
