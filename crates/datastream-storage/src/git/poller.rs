//! Commit/blob-hash change detection.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use git2::{ObjectType, Oid};

use datastream_core::{Error, Poller, Record, Result, UpdateSink};

use super::repo::{commit_time, head_commit, vcs_error, GitContext, FILE_VALUE_TYPE};

/// Last commit seen and the blob hash of every watched file at that commit.
#[derive(Debug, Default)]
pub(crate) struct GitWitness {
    commit: Option<Oid>,
    blobs: HashMap<String, Oid>,
    baseline: bool,
}

/// Output of one blocking scan.
struct Scan {
    witness: GitWitness,
    outcome: Result<Vec<Record>>,
    skipped: Vec<Error>,
}

/// Poll loop state for one git subscription.
pub(crate) struct GitPoller {
    context: Arc<GitContext>,
    keys: Arc<[String]>,
    initial_snapshot: bool,
    witness: Option<GitWitness>,
}

impl GitPoller {
    pub fn new(context: Arc<GitContext>, keys: Vec<String>, initial_snapshot: bool) -> Self {
        Self {
            context,
            keys: keys.into(),
            initial_snapshot,
            witness: Some(GitWitness::default()),
        }
    }
}

#[async_trait]
impl Poller for GitPoller {
    fn backend(&self) -> &'static str {
        "git"
    }

    async fn poll(&mut self, sink: &UpdateSink) -> Result<()> {
        let witness = self.witness.take().unwrap_or_default();
        let context = self.context.clone();
        let keys = self.keys.clone();
        let initial_snapshot = self.initial_snapshot;

        let scan = tokio::task::spawn_blocking(move || {
            scan(&context, &keys, witness, initial_snapshot)
        })
        .await?;

        self.witness = Some(scan.witness);
        for error in scan.skipped {
            sink.report(error);
        }

        for record in scan.outcome? {
            if !sink.emit(record) {
                break;
            }
        }
        Ok(())
    }
}

fn scan(context: &GitContext, keys: &[String], mut witness: GitWitness, initial_snapshot: bool) -> Scan {
    let mut skipped = Vec::new();
    let outcome = scan_head(context, keys, &mut witness, initial_snapshot, &mut skipped);
    Scan {
        witness,
        outcome,
        skipped,
    }
}

fn scan_head(
    context: &GitContext,
    keys: &[String],
    witness: &mut GitWitness,
    initial_snapshot: bool,
    skipped: &mut Vec<Error>,
) -> Result<Vec<Record>> {
    let repo = context.repository()?;

    if let Err(e) = context.sync(&repo) {
        // Remote trouble is not fatal: keep watching the local tree.
        skipped.push(e);
    }

    let emit = witness.baseline || initial_snapshot;
    witness.baseline = true;

    let Some(commit) = head_commit(&repo)? else {
        return Ok(Vec::new());
    };
    if witness.commit == Some(commit.id()) {
        return Ok(Vec::new());
    }

    let tree = commit
        .tree()
        .map_err(|e| vcs_error("failed to retrieve tree", e))?;
    let updated_at = commit_time(&commit);

    let mut records = Vec::new();
    for key in keys {
        let entry = match tree.get_path(Path::new(key)) {
            Ok(entry) => entry,
            Err(e) => {
                skipped.push(vcs_error(&format!("failed to retrieve file '{}'", key), e));
                continue;
            }
        };
        if entry.kind() != Some(ObjectType::Blob) {
            skipped.push(Error::invalid_key(key.clone(), "not a file at HEAD"));
            continue;
        }

        let blob_id = entry.id();
        if witness.blobs.get(key) == Some(&blob_id) {
            continue;
        }

        let blob = match repo.find_blob(blob_id) {
            Ok(blob) => blob,
            Err(e) => {
                skipped.push(vcs_error(&format!("failed to retrieve file contents '{}'", key), e));
                continue;
            }
        };

        if emit {
            records.push(Record::at(
                key.clone(),
                blob.content(),
                FILE_VALUE_TYPE,
                updated_at,
            ));
        }
        witness.blobs.insert(key.clone(), blob_id);
    }

    tracing::trace!(commit = %commit.id(), changed = records.len(), "scanned commit");
    witness.commit = Some(commit.id());
    Ok(records)
}
