//! Git backend configuration.

use std::path::PathBuf;
use std::time::Duration;

use datastream_core::{ErrorConduit, PollSettings};

/// Default author name for commits created by push.
pub const DEFAULT_COMMIT_NAME: &str = "datastream";

/// Default author email for commits created by push.
pub const DEFAULT_COMMIT_EMAIL: &str = "datastream@localhost";

/// Git backend configuration.
#[derive(Debug, Clone)]
pub struct GitConfig {
    /// Local repository path, or a remote URL to clone.
    pub repo_path: String,

    /// Where a remote repository is cloned. Defaults to a fresh directory
    /// under the system temp dir.
    pub clone_dir: Option<PathBuf>,

    /// Branch to track. Defaults to the branch HEAD points at.
    pub branch: Option<String>,

    /// Author name for commits.
    pub commit_name: String,

    /// Author email for commits.
    pub commit_email: String,

    /// Username for basic auth against the remote.
    pub username: Option<String>,

    /// Password or token for basic auth against the remote.
    pub password: Option<String>,

    /// Poll loop settings.
    pub poll: PollSettings,
}

impl GitConfig {
    /// Create a configuration for the given repository location.
    pub fn new(repo_path: impl Into<String>) -> Self {
        Self {
            repo_path: repo_path.into(),
            clone_dir: None,
            branch: None,
            commit_name: DEFAULT_COMMIT_NAME.to_string(),
            commit_email: DEFAULT_COMMIT_EMAIL.to_string(),
            username: None,
            password: None,
            poll: PollSettings::default(),
        }
    }

    /// Set the clone directory for remote repositories.
    pub fn with_clone_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.clone_dir = Some(dir.into());
        self
    }

    /// Track a specific branch.
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Set the commit author identity.
    pub fn with_author(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.commit_name = name.into();
        self.commit_email = email.into();
        self
    }

    /// Set basic auth credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the sync interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.poll = self.poll.with_interval(interval);
        self
    }

    /// Attach an error conduit.
    pub fn with_error_conduit(mut self, conduit: ErrorConduit) -> Self {
        self.poll = self.poll.with_error_conduit(conduit);
        self
    }

    /// Replace the poll settings.
    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }
}
