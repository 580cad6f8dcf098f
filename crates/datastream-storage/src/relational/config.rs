//! Relational backend configuration.

use std::time::Duration;

use datastream_core::{ErrorConduit, PollSettings};

/// Default table name.
pub const DEFAULT_TABLE: &str = "data";

/// Relational backend configuration. The database handle is supplied
/// separately to the constructor.
#[derive(Debug, Clone)]
pub struct RelationalConfig {
    /// Table holding `key`, `value`, `value_type` and `updated_at` columns.
    pub table: String,

    /// Poll loop settings.
    pub poll: PollSettings,
}

impl RelationalConfig {
    /// Create a configuration for the given table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            poll: PollSettings::default(),
        }
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

impl Default for RelationalConfig {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelationalConfig::default();
        assert_eq!(config.table, "data");
        assert_eq!(config.poll.interval, Duration::from_secs(5));
    }

    #[test]
    fn test_config_builder() {
        let config = RelationalConfig::new("settings").with_sync_interval(Duration::from_secs(1));
        assert_eq!(config.table, "settings");
        assert_eq!(config.poll.interval, Duration::from_secs(1));
    }
}
