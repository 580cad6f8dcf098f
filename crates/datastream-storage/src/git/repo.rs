//! Blocking repository operations.
//!
//! Everything here runs on the blocking pool. A fresh [`Repository`] handle is
//! opened per operation so no libgit2 state outlives the call that needed it.

use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, TimeZone, Utc};
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    Commit, Cred, ErrorCode, FetchOptions, ObjectType, Oid, PushOptions, RemoteCallbacks,
    Repository, Signature, TreeWalkMode, TreeWalkResult,
};

use datastream_core::{Capability, Error, Result};

use super::config::GitConfig;

/// Value type reported for file contents.
pub const FILE_VALUE_TYPE: &str = "text/plain";

/// Value type for files without an extension.
pub const DEFAULT_EXTENSION_TYPE: &str = "text";

const REMOTE_NAME: &str = "origin";
const COMMIT_MESSAGE: &str = "Update key";

pub(crate) fn vcs_error(context: &str, err: git2::Error) -> Error {
    Error::VersionControl(format!("{}: {}", context, err.message()))
}

/// Resolved repository location and identity, shared by every operation.
#[derive(Debug, Clone)]
pub(crate) struct GitContext {
    /// Root of the working tree.
    pub workdir: PathBuf,
    /// Branch that is tracked and pushed.
    pub branch: String,
    /// Whether the repository is a clone that must be synced and pushed.
    pub remote: bool,
    /// Author identity for commits.
    pub author_name: String,
    pub author_email: String,
    /// Basic auth credentials.
    pub username: Option<String>,
    pub password: Option<String>,
}

impl GitContext {
    /// Open a local repository, or clone `repo_path` when it is not one.
    pub fn open(config: &GitConfig) -> Result<Self> {
        let mut context = Self {
            workdir: PathBuf::new(),
            branch: String::new(),
            remote: false,
            author_name: config.commit_name.clone(),
            author_email: config.commit_email.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        };

        let repo = match Repository::open(&config.repo_path) {
            Ok(repo) => repo,
            Err(e) if e.code() == ErrorCode::NotFound => {
                let dir = config
                    .clone_dir
                    .clone()
                    .unwrap_or_else(default_clone_dir);
                tracing::info!(url = %config.repo_path, dir = %dir.display(), "cloning repository");

                context.remote = true;
                let mut builder = RepoBuilder::new();
                builder.fetch_options(context.fetch_options());
                if let Some(branch) = &config.branch {
                    builder.branch(branch);
                }
                builder
                    .clone(&config.repo_path, &dir)
                    .map_err(|e| Error::Config(format!("failed to clone {}: {}", config.repo_path, e.message())))?
            }
            Err(e) => {
                return Err(Error::Config(format!(
                    "failed to open repository {}: {}",
                    config.repo_path,
                    e.message()
                )))
            }
        };

        context.workdir = repo
            .workdir()
            .ok_or_else(|| Error::Config(format!("repository {} has no working tree", config.repo_path)))?
            .to_path_buf();

        context.branch = match &config.branch {
            Some(branch) => branch.clone(),
            None => current_branch(&repo)?,
        };

        Ok(context)
    }

    /// Open a handle on the working tree.
    pub fn repository(&self) -> Result<Repository> {
        Repository::open(&self.workdir).map_err(|e| vcs_error("failed to open repository", e))
    }

    fn callbacks(&self) -> RemoteCallbacks<'_> {
        let mut callbacks = RemoteCallbacks::new();
        if let Some(password) = &self.password {
            let username = self.username.as_deref().unwrap_or_default();
            callbacks.credentials(move |_url, username_from_url, _allowed| {
                Cred::userpass_plaintext(username_from_url.unwrap_or(username), password)
            });
        }
        callbacks
    }

    fn fetch_options(&self) -> FetchOptions<'_> {
        let mut options = FetchOptions::new();
        options.remote_callbacks(self.callbacks());
        options
    }

    /// Fetch the tracked branch and fast-forward onto it.
    ///
    /// Returns whether HEAD moved. A no-op for local repositories.
    pub fn sync(&self, repo: &Repository) -> Result<bool> {
        if !self.remote {
            return Ok(false);
        }

        let mut remote = repo
            .find_remote(REMOTE_NAME)
            .map_err(|e| vcs_error("failed to find remote", e))?;
        remote
            .fetch(&[self.branch.as_str()], Some(&mut self.fetch_options()), None)
            .map_err(|e| vcs_error("failed to fetch", e))?;

        let fetch_head = repo
            .find_reference("FETCH_HEAD")
            .map_err(|e| vcs_error("failed to read FETCH_HEAD", e))?;
        let incoming = repo
            .reference_to_annotated_commit(&fetch_head)
            .map_err(|e| vcs_error("failed to resolve fetched commit", e))?;
        let (analysis, _) = repo
            .merge_analysis(&[&incoming])
            .map_err(|e| vcs_error("failed to analyse merge", e))?;

        if analysis.is_up_to_date() {
            return Ok(false);
        }
        if !analysis.is_fast_forward() {
            return Err(Error::VersionControl(format!(
                "branch {} has diverged from {}",
                self.branch, REMOTE_NAME
            )));
        }

        let refname = format!("refs/heads/{}", self.branch);
        match repo.find_reference(&refname) {
            Ok(mut reference) => {
                reference
                    .set_target(incoming.id(), "datastream: fast-forward")
                    .map_err(|e| vcs_error("failed to fast-forward", e))?;
            }
            Err(_) => {
                repo.reference(&refname, incoming.id(), true, "datastream: fast-forward")
                    .map_err(|e| vcs_error("failed to create branch", e))?;
            }
        }
        repo.set_head(&refname)
            .map_err(|e| vcs_error("failed to move HEAD", e))?;
        repo.checkout_head(Some(CheckoutBuilder::default().force()))
            .map_err(|e| vcs_error("failed to check out HEAD", e))?;

        tracing::debug!(branch = %self.branch, commit = %incoming.id(), "fast-forwarded to remote");
        Ok(true)
    }

    /// Write `value` to `key`, commit it and push when remote-backed.
    pub fn commit_file(&self, key: &str, value: &[u8]) -> Result<Oid> {
        let relative = tree_path(key)?;
        let full_path = working_file(&self.workdir, key)?;
        let repo = self.repository()?;

        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&full_path, value)?;

        let mut index = repo.index().map_err(|e| vcs_error("failed to open index", e))?;
        index
            .add_path(relative)
            .map_err(|e| vcs_error("failed to stage file", e))?;
        index.write().map_err(|e| vcs_error("failed to write index", e))?;
        let tree_id = index
            .write_tree()
            .map_err(|e| vcs_error("failed to write tree", e))?;
        let tree = repo
            .find_tree(tree_id)
            .map_err(|e| vcs_error("failed to find tree", e))?;

        let signature = Signature::now(&self.author_name, &self.author_email)
            .map_err(|e| vcs_error("invalid commit author", e))?;
        let parent = head_commit(&repo)?;
        let parents: Vec<&Commit<'_>> = parent.iter().collect();

        let commit_id = repo
            .commit(Some("HEAD"), &signature, &signature, COMMIT_MESSAGE, &tree, &parents)
            .map_err(|e| vcs_error("failed to commit", e))?;

        tracing::debug!(key, commit = %commit_id, "committed update");

        if self.remote {
            self.push(&repo)?;
        }

        Ok(commit_id)
    }

    fn push(&self, repo: &Repository) -> Result<()> {
        let mut remote = repo
            .find_remote(REMOTE_NAME)
            .map_err(|e| vcs_error("failed to find remote", e))?;

        let mut rejection: Option<String> = None;
        {
            let mut callbacks = self.callbacks();
            callbacks.push_update_reference(|refname, status| {
                if let Some(message) = status {
                    rejection = Some(format!("{} rejected: {}", refname, message));
                }
                Ok(())
            });

            let mut options = PushOptions::new();
            options.remote_callbacks(callbacks);

            let refspec = format!("refs/heads/{0}:refs/heads/{0}", self.branch);
            remote
                .push(&[refspec.as_str()], Some(&mut options))
                .map_err(|e| vcs_error("failed to push", e))?;
        }

        match rejection {
            Some(message) => Err(Error::VersionControl(message)),
            None => Ok(()),
        }
    }
}

/// Resolve HEAD to a commit; `None` while the branch has no commits.
pub(crate) fn head_commit(repo: &Repository) -> Result<Option<Commit<'_>>> {
    let head = match repo.head() {
        Ok(head) => head,
        Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
            return Ok(None)
        }
        Err(e) => return Err(vcs_error("failed to retrieve HEAD reference", e)),
    };
    head.peel_to_commit()
        .map(Some)
        .map_err(|e| vcs_error("failed to retrieve commit", e))
}

/// List every file at HEAD with a type derived from its extension.
pub(crate) fn list_files(repo: &Repository) -> Result<Vec<Capability>> {
    let Some(commit) = head_commit(repo)? else {
        return Ok(Vec::new());
    };
    let tree = commit
        .tree()
        .map_err(|e| vcs_error("failed to retrieve tree", e))?;

    let mut capabilities = Vec::new();
    tree.walk(TreeWalkMode::PreOrder, |root, entry| {
        if entry.kind() == Some(ObjectType::Blob) {
            if let Some(name) = entry.name() {
                let key = format!("{}{}", root, name);
                let value_type = extension_type(&key);
                capabilities.push(Capability::new(key, value_type));
            }
        }
        TreeWalkResult::Ok
    })
    .map_err(|e| vcs_error("failed to enumerate files", e))?;

    Ok(capabilities)
}

/// Value type for a file path: its extension, or `text` when it has none.
pub(crate) fn extension_type(key: &str) -> String {
    Path::new(key)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .unwrap_or(DEFAULT_EXTENSION_TYPE)
        .to_string()
}

/// Validate that `key` is a relative path inside the working tree.
pub(crate) fn tree_path(key: &str) -> Result<&Path> {
    let path = Path::new(key);
    if key.is_empty() {
        return Err(Error::invalid_key(key, "key is empty"));
    }
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(Error::invalid_key(key, "key must be a relative path inside the repository"));
    }
    if path.starts_with(".git") {
        return Err(Error::invalid_key(key, "repository metadata is not addressable"));
    }
    Ok(path)
}

/// Resolve `key` to a path in the working tree without following symlinks.
///
/// Every existing component below `workdir` must be a real file or
/// directory; components that do not exist yet are fine.
pub(crate) fn working_file(workdir: &Path, key: &str) -> Result<PathBuf> {
    let relative = tree_path(key)?;
    let mut path = workdir.to_path_buf();
    for component in relative.components() {
        path.push(component);
        match std::fs::symlink_metadata(&path) {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                return Err(Error::invalid_key(key, "key passes through a symbolic link"));
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(workdir.join(relative));
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(path)
}

/// Author time of a commit in UTC.
pub(crate) fn commit_time(commit: &Commit<'_>) -> DateTime<Utc> {
    Utc.timestamp_opt(commit.author().when().seconds(), 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Current branch name from HEAD, including unborn branches.
fn current_branch(repo: &Repository) -> Result<String> {
    match repo.head() {
        Ok(head) => head
            .shorthand()
            .map(str::to_string)
            .ok_or_else(|| Error::Config("HEAD does not point at a named branch".to_string())),
        Err(e) if e.code() == ErrorCode::UnbornBranch => {
            let head = repo
                .find_reference("HEAD")
                .map_err(|e| Error::Config(format!("failed to read HEAD: {}", e.message())))?;
            head.symbolic_target()
                .and_then(|target| target.strip_prefix("refs/heads/"))
                .map(str::to_string)
                .ok_or_else(|| Error::Config("HEAD does not point at a branch".to_string()))
        }
        Err(e) => Err(Error::Config(format!(
            "failed to retrieve HEAD reference: {}",
            e.message()
        ))),
    }
}

fn default_clone_dir() -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    std::env::temp_dir().join(format!("datastream-{:x}", nanos))
}
