//! [`StoreConfig`]: store-wide settings not tied to any one bucket.

use std::sync::Arc;

use noex_persistence::StorageAdapter;

/// Store-wide settings: the store's name (used to namespace persistence
/// keys), the server identity stamped into every persisted blob, an
/// optional pluggable storage adapter, the persistence coordinator's
/// debounce interval, and the TTL scheduler's check interval.
#[derive(Clone)]
pub struct StoreConfig {
    pub name: String,
    pub server_id: String,
    pub adapter: Option<Arc<dyn StorageAdapter>>,
    pub debounce_ms: u64,
    pub ttl_check_interval_ms: u64,
}

impl StoreConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server_id: default_server_id(),
            adapter: None,
            debounce_ms: 100,
            ttl_check_interval_ms: 1_000,
        }
    }

    pub fn server_id(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = server_id.into();
        self
    }

    pub fn adapter(mut self, adapter: Arc<dyn StorageAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    pub fn ttl_check_interval_ms(mut self, ms: u64) -> Self {
        self.ttl_check_interval_ms = ms;
        self
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("name", &self.name)
            .field("server_id", &self.server_id)
            .field("adapter", &self.adapter.as_ref().map(|_| "<dyn StorageAdapter>"))
            .field("debounce_ms", &self.debounce_ms)
            .field("ttl_check_interval_ms", &self.ttl_check_interval_ms)
            .finish()
    }
}

fn default_server_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = StoreConfig::new("demo");
        assert_eq!(cfg.name, "demo");
        assert!(cfg.debounce_ms > 0);
        assert!(cfg.ttl_check_interval_ms > 0);
        assert!(cfg.adapter.is_none());
    }

    #[test]
    fn builder_overrides_apply() {
        let cfg = StoreConfig::new("demo").debounce_ms(250).ttl_check_interval_ms(500).server_id("fixed");
        assert_eq!(cfg.debounce_ms, 250);
        assert_eq!(cfg.ttl_check_interval_ms, 500);
        assert_eq!(cfg.server_id, "fixed");
    }
}
