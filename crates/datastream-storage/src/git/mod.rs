//! Git repository backend.
//!
//! Files in the working tree are the keys. Change detection compares the
//! HEAD commit id first and, only when it moved, the blob hash of every
//! watched file. Remote repositories are cloned once and fast-forwarded
//! before every pull and poll pass. Pull fails with `NotFound` as soon as
//! one requested file is missing. Keys that pass through a symbolic link in
//! the working tree are rejected as invalid.
//!
//! Two pushes racing on the same working tree are not serialised, and a
//! commit whose push to the remote fails stays in the local clone.

mod config;
mod poller;
mod repo;

pub use config::{GitConfig, DEFAULT_COMMIT_EMAIL, DEFAULT_COMMIT_NAME};
pub use repo::{DEFAULT_EXTENSION_TYPE, FILE_VALUE_TYPE};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use datastream_core::{
    ensure_keys, spawn_poller, Capability, Error, PollSettings, Record, Result, Store,
    Subscription,
};

use poller::GitPoller;
use repo::{list_files, tree_path, working_file, GitContext};

/// Store backed by a git working tree.
#[derive(Debug, Clone)]
pub struct GitStore {
    context: Arc<GitContext>,
    poll: PollSettings,
}

impl GitStore {
    /// Open (or clone) the repository described by `config`.
    ///
    /// Fails immediately when the location is neither a local repository nor
    /// a cloneable remote.
    pub fn open(config: GitConfig) -> Result<Self> {
        let context = GitContext::open(&config)?;
        tracing::info!(
            workdir = %context.workdir.display(),
            branch = %context.branch,
            remote = context.remote,
            "git backend ready"
        );

        Ok(Self {
            context: Arc::new(context),
            poll: config.poll,
        })
    }

    /// Root of the working tree.
    pub fn workdir(&self) -> &Path {
        &self.context.workdir
    }

    /// Whether this store tracks a cloned remote.
    pub fn is_remote(&self) -> bool {
        self.context.remote
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&GitContext) -> Result<T> + Send + 'static,
    {
        let context = self.context.clone();
        tokio::task::spawn_blocking(move || f(&context)).await?
    }
}

#[async_trait]
impl Store for GitStore {
    fn name(&self) -> &'static str {
        "git"
    }

    async fn list_capabilities(&self) -> Result<Vec<Capability>> {
        self.blocking(|context| list_files(&context.repository()?))
            .await
    }

    async fn pull(&self, keys: &[String]) -> Result<HashMap<String, Record>> {
        ensure_keys(keys)?;
        let keys = keys.to_vec();

        self.blocking(move |context| {
            let repo = context.repository()?;
            context.sync(&repo)?;

            let mut data = HashMap::with_capacity(keys.len());
            for key in keys {
                let path = working_file(&context.workdir, &key)?;
                let metadata = match std::fs::metadata(&path) {
                    Ok(metadata) if metadata.is_file() => metadata,
                    Ok(_) => return Err(Error::NotFound(key)),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(Error::NotFound(key))
                    }
                    Err(e) => return Err(e.into()),
                };
                let value = std::fs::read(&path)?;
                let updated_at: DateTime<Utc> = metadata.modified()?.into();

                data.insert(key.clone(), Record::at(key, value, FILE_VALUE_TYPE, updated_at));
            }
            Ok(data)
        })
        .await
    }

    async fn subscribe(&self, keys: &[String]) -> Result<Subscription> {
        ensure_keys(keys)?;
        for key in keys {
            tree_path(key)?;
        }

        tracing::debug!(keys = ?keys, "starting git subscription");
        let poller = GitPoller::new(self.context.clone(), keys.to_vec(), self.poll.initial_snapshot);
        Ok(spawn_poller(poller, &self.poll))
    }

    async fn push_update(&self, record: &Record) -> Result<()> {
        let key = record.key.clone();
        let value = record.value.clone();

        let commit = self
            .blocking(move |context| context.commit_file(&key, &value))
            .await?;
        tracing::info!(key = %record.key, commit = %commit, "pushed update");
        Ok(())
    }
}
