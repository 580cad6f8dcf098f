//! The capability contract implemented by every backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::poller::Subscription;
use crate::types::{Capability, Record};

/// Uniform contract over heterogeneous backing stores.
#[async_trait]
pub trait Store: Send + Sync {
    /// Backend name used in log fields.
    fn name(&self) -> &'static str;

    /// Enumerate every key currently visible in the backend.
    ///
    /// The result is a snapshot, recomputed on every call.
    async fn list_capabilities(&self) -> Result<Vec<Capability>>;

    /// Fetch the current value of each key.
    ///
    /// Each backend documents whether an absent key fails the whole call
    /// with [`Error::NotFound`] or is left out of the result.
    async fn pull(&self, keys: &[String]) -> Result<HashMap<String, Record>>;

    /// Watch `keys` and yield a record whenever one of them changes.
    ///
    /// The first poll establishes the baseline; only later changes are
    /// delivered unless the backend was configured for an initial snapshot.
    async fn subscribe(&self, keys: &[String]) -> Result<Subscription>;

    /// Write a new value for `record.key`.
    async fn push_update(&self, record: &Record) -> Result<()>;
}

/// Shared, type-erased store handle.
pub type SharedStore = Arc<dyn Store>;

/// Reject empty keys before they reach a backend.
pub fn ensure_keys(keys: &[String]) -> Result<()> {
    match keys.iter().find(|k| k.is_empty()) {
        Some(key) => Err(Error::invalid_key(key.clone(), "key is empty")),
        None => Ok(()),
    }
}
