//! Watermark change detection.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use datastream_core::{Poller, Result, UpdateSink};

use super::TableDriver;

/// Poll loop state for one relational subscription.
pub(crate) struct RelationalPoller {
    driver: Arc<dyn TableDriver>,
    keys: Vec<String>,
    initial_snapshot: bool,
    baseline: bool,
    /// Newest `updated_at` observed across all watched rows.
    watermark: Option<DateTime<Utc>>,
}

impl RelationalPoller {
    pub fn new(driver: Arc<dyn TableDriver>, keys: Vec<String>, initial_snapshot: bool) -> Self {
        Self {
            driver,
            keys,
            initial_snapshot,
            baseline: false,
            watermark: None,
        }
    }

    #[cfg(test)]
    fn watermark(&self) -> Option<DateTime<Utc>> {
        self.watermark
    }
}

#[async_trait]
impl Poller for RelationalPoller {
    fn backend(&self) -> &'static str {
        "relational"
    }

    async fn poll(&mut self, sink: &UpdateSink) -> Result<()> {
        if self.keys.is_empty() {
            return Ok(());
        }

        let rows = self.driver.select_since(&self.keys, self.watermark).await?;
        let emit = self.baseline || self.initial_snapshot;
        self.baseline = true;

        for record in rows {
            if self.watermark.map_or(true, |mark| record.updated_at > mark) {
                self.watermark = Some(record.updated_at);
            }
            if emit && !sink.emit(record) {
                break;
            }
        }

        tracing::trace!(watermark = ?self.watermark, "relational poll complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use chrono::TimeZone;
    use datastream_core::{Capability, Error, PollSettings, Record};
    use parking_lot::Mutex;

    /// In-memory table with the same watermark semantics as the SQL drivers.
    #[derive(Debug, Default)]
    struct MemoryTable {
        rows: Mutex<HashMap<String, Record>>,
        fail: Mutex<bool>,
    }

    #[async_trait]
    impl TableDriver for MemoryTable {
        fn dialect(&self) -> &'static str {
            "memory"
        }

        async fn capabilities(&self) -> Result<Vec<Capability>> {
            Ok(self.rows.lock().values().map(Record::capability).collect())
        }

        async fn select(&self, keys: &[String]) -> Result<Vec<Record>> {
            let rows = self.rows.lock();
            Ok(keys.iter().filter_map(|k| rows.get(k).cloned()).collect())
        }

        async fn select_since(
            &self,
            keys: &[String],
            since: Option<DateTime<Utc>>,
        ) -> Result<Vec<Record>> {
            if *self.fail.lock() {
                return Err(Error::Database("connection reset".to_string()));
            }
            let mut rows: Vec<Record> = self
                .select(keys)
                .await?
                .into_iter()
                .filter(|r| since.map_or(true, |s| r.updated_at > s))
                .collect();
            rows.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
            Ok(rows)
        }

        async fn upsert(&self, record: &Record) -> Result<DateTime<Utc>> {
            self.rows.lock().insert(record.key.clone(), record.clone());
            Ok(record.updated_at)
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn record(key: &str, value: &str, secs: i64) -> Record {
        Record::at(key, value.as_bytes().to_vec(), "int", at(secs))
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Result<Record>>) -> Vec<Record> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_baseline_is_silent_and_watermark_advances() {
        let table = Arc::new(MemoryTable::default());
        table.upsert(&record("max_connections", "10", 0)).await.unwrap();

        let (sink, mut rx) = UpdateSink::channel(&PollSettings::default());
        let mut poller = RelationalPoller::new(table.clone(), keys(&["max_connections"]), false);

        poller.poll(&sink).await.unwrap();
        assert!(drain(&mut rx).is_empty());
        assert_eq!(poller.watermark(), Some(at(0)));

        table.upsert(&record("max_connections", "20", 5)).await.unwrap();
        poller.poll(&sink).await.unwrap();
        let emitted = drain(&mut rx);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].value_str(), Some("20"));
        assert_eq!(poller.watermark(), Some(at(5)));

        // Same timestamp again is not a change.
        table.upsert(&record("max_connections", "30", 5)).await.unwrap();
        poller.poll(&sink).await.unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_initial_snapshot_emits_existing_rows() {
        let table = Arc::new(MemoryTable::default());
        table.upsert(&record("a", "1", 1)).await.unwrap();
        table.upsert(&record("b", "2", 2)).await.unwrap();
        table.upsert(&record("c", "3", 3)).await.unwrap();

        let (sink, mut rx) = UpdateSink::channel(&PollSettings::default());
        let mut poller = RelationalPoller::new(table, keys(&["a", "b"]), true);

        poller.poll(&sink).await.unwrap();
        let emitted: Vec<String> = drain(&mut rx).into_iter().map(|r| r.key).collect();
        assert_eq!(emitted, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(poller.watermark(), Some(at(2)));
    }

    #[tokio::test]
    async fn test_watermark_never_regresses() {
        let table = Arc::new(MemoryTable::default());
        table.upsert(&record("a", "1", 10)).await.unwrap();

        let (sink, mut rx) = UpdateSink::channel(&PollSettings::default());
        let mut poller = RelationalPoller::new(table.clone(), keys(&["a", "b"]), false);
        poller.poll(&sink).await.unwrap();

        // A row written with an older timestamp is invisible to the watermark.
        table.upsert(&record("b", "2", 4)).await.unwrap();
        poller.poll(&sink).await.unwrap();
        assert!(drain(&mut rx).is_empty());
        assert_eq!(poller.watermark(), Some(at(10)));
    }

    #[tokio::test]
    async fn test_empty_table_then_insert() {
        let table = Arc::new(MemoryTable::default());
        let (sink, mut rx) = UpdateSink::channel(&PollSettings::default());
        let mut poller = RelationalPoller::new(table.clone(), keys(&["a"]), false);

        poller.poll(&sink).await.unwrap();
        assert_eq!(poller.watermark(), None);

        table.upsert(&record("a", "1", 1)).await.unwrap();
        poller.poll(&sink).await.unwrap();
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn test_query_failure_is_returned() {
        let table = Arc::new(MemoryTable::default());
        *table.fail.lock() = true;

        let (sink, _rx) = UpdateSink::channel(&PollSettings::default());
        let mut poller = RelationalPoller::new(table, keys(&["a"]), false);
        assert!(matches!(poller.poll(&sink).await, Err(Error::Database(_))));
    }
}
