//! Session configuration.

use roster_core::TransactionOptions;
use roster_query::DEFAULT_MAX_DEPTH;

/// Configuration shared by every transaction a client opens.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bound on nested relation reads and nested writes.
    pub max_include_depth: usize,
    /// Retry a standalone upsert once when its create loses a unique race.
    pub upsert_retry: bool,
    /// Options used when a caller does not pass any.
    pub default_transaction: TransactionOptions,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_include_depth: DEFAULT_MAX_DEPTH,
            upsert_retry: true,
            default_transaction: TransactionOptions::default(),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = depth;
        self
    }

    #[must_use]
    pub fn upsert_retry(mut self, enabled: bool) -> Self {
        self.upsert_retry = enabled;
        self
    }

    #[must_use]
    pub fn default_transaction(mut self, options: TransactionOptions) -> Self {
        self.default_transaction = options;
        self
    }
}
