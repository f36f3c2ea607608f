//! Client configuration.

use std::time::Duration;

use roster_core::{IsolationLevel, TransactionOptions};
use roster_session::SessionConfig;

/// Configuration for a [`crate::Client`].
///
/// # Example
///
/// ```rust,ignore
/// let config = ClientConfig::new()
///     .max_include_depth(8)
///     .isolation_level(IsolationLevel::Serializable)
///     .timeout(Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub session: SessionConfig,
}

impl ClientConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    #[must_use]
    pub fn max_include_depth(mut self, depth: usize) -> Self {
        self.session.max_include_depth = depth;
        self
    }

    #[must_use]
    pub fn upsert_retry(mut self, enabled: bool) -> Self {
        self.session.upsert_retry = enabled;
        self
    }

    /// Options for one-shot operations and transactions opened without any.
    #[must_use]
    pub fn default_transaction(mut self, options: TransactionOptions) -> Self {
        self.session.default_transaction = options;
        self
    }

    #[must_use]
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.session.default_transaction.isolation_level = level;
        self
    }

    #[must_use]
    pub fn max_wait(mut self, wait: Duration) -> Self {
        self.session.default_transaction.max_wait = wait;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.session.default_transaction.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_updates_session_defaults() {
        let config = ClientConfig::new()
            .max_include_depth(4)
            .upsert_retry(false)
            .isolation_level(IsolationLevel::RepeatableRead)
            .timeout(Duration::from_millis(250));
        assert_eq!(config.session.max_include_depth, 4);
        assert!(!config.session.upsert_retry);
        assert_eq!(
            config.session.default_transaction.isolation_level,
            IsolationLevel::RepeatableRead
        );
        assert_eq!(
            config.session.default_transaction.timeout,
            Duration::from_millis(250)
        );
        assert_eq!(
            config.session.default_transaction.max_wait,
            TransactionOptions::default().max_wait
        );
    }
}
