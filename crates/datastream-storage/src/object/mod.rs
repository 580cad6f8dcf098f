//! S3-compatible object-store backend.
//!
//! Object keys are the keys. A key ending in `/` (or the root `/`) watches
//! every object under that prefix through a bounded listing; any other key
//! watches a single object through a metadata-only HEAD request. Bodies are
//! fetched only when the entity tag differs from the last one reported.
//! Pull fails with `NotFound` as soon as one requested object is missing.
//!
//! Pushes overwrite unconditionally; concurrent writers race and the last
//! one wins.

mod config;
mod poller;

pub use config::{ObjectStoreConfig, DEFAULT_LIST_PAGE_SIZE};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use object_store::path::Path as ObjectPath;
use object_store::{ObjectMeta, ObjectStore, PutPayload};

use datastream_core::{
    ensure_keys, spawn_poller, Capability, Error, PollSettings, Record, Result, Store,
    Subscription,
};

use poller::ObjectPoller;

/// Key of the synthetic capability for the bucket root.
pub const ROOT_KEY: &str = "/";

/// Value type of the root capability.
pub const DIRECTORY_VALUE_TYPE: &str = "directory";

/// Value type of every object; object storage carries no type metadata.
pub const OBJECT_VALUE_TYPE: &str = "binary";

/// What a subscribed key resolves to.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WatchTarget {
    /// Every object under the prefix; `None` is the whole bucket.
    Prefix(Option<ObjectPath>),
    /// A single object.
    Object(ObjectPath),
}

impl WatchTarget {
    fn parse(key: &str) -> Result<Self> {
        if key == ROOT_KEY {
            return Ok(WatchTarget::Prefix(None));
        }
        if let Some(prefix) = key.strip_suffix('/') {
            return object_path(prefix).map(|p| WatchTarget::Prefix(Some(p)));
        }
        object_path(key).map(WatchTarget::Object)
    }
}

fn object_path(key: &str) -> Result<ObjectPath> {
    ObjectPath::parse(key).map_err(|e| Error::invalid_key(key, e.to_string()))
}

pub(crate) fn object_error(context: &str, err: object_store::Error) -> Error {
    Error::ObjectStore(format!("{}: {}", context, err))
}

/// Change fingerprint of an object: its entity tag, or modification time and
/// size when the store does not report one.
pub(crate) fn fingerprint(meta: &ObjectMeta) -> String {
    match &meta.e_tag {
        Some(tag) => tag.clone(),
        None => format!("{}:{}", meta.last_modified.timestamp_micros(), meta.size),
    }
}

/// Read an object body into a record.
pub(crate) async fn fetch_record(store: &dyn ObjectStore, location: &ObjectPath) -> Result<Record> {
    let key = location.to_string();
    let result = store.get(location).await.map_err(|e| match e {
        object_store::Error::NotFound { .. } => Error::NotFound(key.clone()),
        e => object_error(&format!("failed to retrieve object {}", key), e),
    })?;

    let updated_at = result.meta.last_modified;
    let body = result
        .bytes()
        .await
        .map_err(|e| object_error(&format!("failed to read contents of object {}", key), e))?;

    Ok(Record::at(key, body.to_vec(), OBJECT_VALUE_TYPE, updated_at))
}

/// Store backed by an object-store bucket.
#[derive(Debug, Clone)]
pub struct BucketStore {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    page_size: usize,
    poll: PollSettings,
}

impl BucketStore {
    /// Connect to the S3-compatible bucket described by `config`.
    pub async fn connect(config: ObjectStoreConfig) -> Result<Self> {
        let s3 = config.build_s3()?;
        Self::with_store(Arc::new(s3), config).await
    }

    /// Wrap an existing object store, using `config` for naming and polling.
    ///
    /// The bucket is listed once so an unreachable store fails here rather
    /// than on first use.
    pub async fn with_store(store: Arc<dyn ObjectStore>, config: ObjectStoreConfig) -> Result<Self> {
        if let Some(Err(e)) = store.list(None).next().await {
            return Err(Error::Config(format!(
                "bucket {} is not accessible: {}",
                config.bucket, e
            )));
        }

        tracing::info!(bucket = %config.bucket, store = %store, "object store backend ready");

        Ok(Self {
            store,
            bucket: config.bucket,
            page_size: config.list_page_size.max(1),
            poll: config.poll,
        })
    }

    /// Bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl Store for BucketStore {
    fn name(&self) -> &'static str {
        "object"
    }

    async fn list_capabilities(&self) -> Result<Vec<Capability>> {
        let objects: Vec<ObjectMeta> = self
            .store
            .list(None)
            .try_collect()
            .await
            .map_err(|e| object_error(&format!("failed to list bucket {}", self.bucket), e))?;

        let mut capabilities = Vec::with_capacity(objects.len() + 1);
        capabilities.push(Capability::new(ROOT_KEY, DIRECTORY_VALUE_TYPE));
        capabilities.extend(
            objects
                .iter()
                .map(|meta| Capability::new(meta.location.to_string(), OBJECT_VALUE_TYPE)),
        );
        Ok(capabilities)
    }

    async fn pull(&self, keys: &[String]) -> Result<HashMap<String, Record>> {
        ensure_keys(keys)?;

        let mut data = HashMap::with_capacity(keys.len());
        for key in keys {
            let location = object_path(key)?;
            let record = fetch_record(self.store.as_ref(), &location).await?;
            data.insert(key.clone(), record);
        }
        Ok(data)
    }

    async fn subscribe(&self, keys: &[String]) -> Result<Subscription> {
        ensure_keys(keys)?;
        let targets = keys
            .iter()
            .map(|key| WatchTarget::parse(key).map(|target| (key.clone(), target)))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(bucket = %self.bucket, keys = ?keys, "starting object store subscription");
        let poller = ObjectPoller::new(
            self.store.clone(),
            targets,
            self.page_size,
            self.poll.initial_snapshot,
        );
        Ok(spawn_poller(poller, &self.poll))
    }

    async fn push_update(&self, record: &Record) -> Result<()> {
        ensure_keys(std::slice::from_ref(&record.key))?;
        let location = object_path(&record.key)?;

        let result = self
            .store
            .put(&location, PutPayload::from(record.value.clone()))
            .await
            .map_err(|e| object_error(&format!("failed to upload object {}", record.key), e))?;

        tracing::info!(
            bucket = %self.bucket,
            key = %record.key,
            e_tag = ?result.e_tag,
            "pushed update"
        );
        Ok(())
    }
}
