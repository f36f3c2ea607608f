//! In-memory store configuration.

/// Configuration for a [`crate::MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Name reported in log events, to tell several stores apart.
    pub name: String,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            name: "memory".to_string(),
        }
    }
}

impl MemoryStoreConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}
