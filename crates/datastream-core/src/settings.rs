//! Polling configuration shared by all backends.

use std::time::Duration;

use crate::sink::ErrorConduit;

/// Default delay between poll passes.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5);

/// Settings for the background poll loop of a backend.
#[derive(Debug, Clone)]
pub struct PollSettings {
    /// Delay between two passes over the watched keys.
    pub interval: Duration,
    /// Emit the baseline on the first pass instead of recording it silently.
    pub initial_snapshot: bool,
    /// Optional sink for non-fatal background errors.
    pub error_conduit: Option<ErrorConduit>,
}

impl PollSettings {
    /// Create settings with the given interval. A zero interval selects the default.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: normalize_interval(interval),
            initial_snapshot: false,
            error_conduit: None,
        }
    }

    /// Set the poll interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = normalize_interval(interval);
        self
    }

    /// Emit the current values on the first poll.
    pub fn with_initial_snapshot(mut self, enabled: bool) -> Self {
        self.initial_snapshot = enabled;
        self
    }

    /// Attach an error conduit.
    pub fn with_error_conduit(mut self, conduit: ErrorConduit) -> Self {
        self.error_conduit = Some(conduit);
        self
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::new(DEFAULT_SYNC_INTERVAL)
    }
}

fn normalize_interval(interval: Duration) -> Duration {
    if interval.is_zero() {
        DEFAULT_SYNC_INTERVAL
    } else {
        interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::error_conduit;

    #[test]
    fn test_default_settings() {
        let settings = PollSettings::default();
        assert_eq!(settings.interval, DEFAULT_SYNC_INTERVAL);
        assert!(!settings.initial_snapshot);
        assert!(settings.error_conduit.is_none());
    }

    #[test]
    fn test_zero_interval_uses_default() {
        let settings = PollSettings::new(Duration::ZERO);
        assert_eq!(settings.interval, Duration::from_secs(5));

        let settings = PollSettings::default().with_interval(Duration::ZERO);
        assert_eq!(settings.interval, Duration::from_secs(5));
    }

    #[test]
    fn test_builder() {
        let (conduit, _rx) = error_conduit(4);
        let settings = PollSettings::new(Duration::from_millis(250))
            .with_initial_snapshot(true)
            .with_error_conduit(conduit);

        assert_eq!(settings.interval, Duration::from_millis(250));
        assert!(settings.initial_snapshot);
        assert!(settings.error_conduit.is_some());
    }
}
