//! The closed set of storage backends.

use std::collections::HashMap;

use async_trait::async_trait;

use datastream_core::{Capability, Record, Result, Store, Subscription};

use crate::git::GitStore;
use crate::object::BucketStore;
use crate::relational::RelationalStore;

/// Any supported backend behind one [`Store`] implementation.
#[derive(Debug, Clone)]
pub enum Backend {
    /// Git working tree.
    Git(GitStore),
    /// S3-compatible bucket.
    Object(BucketStore),
    /// Relational table.
    Relational(RelationalStore),
}

impl Backend {
    fn inner(&self) -> &dyn Store {
        match self {
            Backend::Git(store) => store,
            Backend::Object(store) => store,
            Backend::Relational(store) => store,
        }
    }
}

impl From<GitStore> for Backend {
    fn from(store: GitStore) -> Self {
        Backend::Git(store)
    }
}

impl From<BucketStore> for Backend {
    fn from(store: BucketStore) -> Self {
        Backend::Object(store)
    }
}

impl From<RelationalStore> for Backend {
    fn from(store: RelationalStore) -> Self {
        Backend::Relational(store)
    }
}

#[async_trait]
impl Store for Backend {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    async fn list_capabilities(&self) -> Result<Vec<Capability>> {
        self.inner().list_capabilities().await
    }

    async fn pull(&self, keys: &[String]) -> Result<HashMap<String, Record>> {
        self.inner().pull(keys).await
    }

    async fn subscribe(&self, keys: &[String]) -> Result<Subscription> {
        self.inner().subscribe(keys).await
    }

    async fn push_update(&self, record: &Record) -> Result<()> {
        self.inner().push_update(record).await
    }
}
