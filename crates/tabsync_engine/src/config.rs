//! Configuration for the sync processor.

/// Configuration for sync runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Server URL, passed through to logs and the transport.
    pub server_url: String,
    /// Application name the tables belong to.
    pub app_name: String,
    /// Maximum rows per insert, update or delete call.
    pub push_batch_size: usize,
    /// Whole-run sync only visits tables set to sync.
    pub only_sync_flagged_tables: bool,
    /// Run crash recovery before the first table.
    pub recover_on_start: bool,
}

impl SyncConfig {
    /// Creates a configuration for the given server.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            app_name: "tables".to_string(),
            push_batch_size: 100,
            only_sync_flagged_tables: true,
            recover_on_start: true,
        }
    }

    /// Sets the application name.
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Sets the push batch size. Zero is treated as one.
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size.max(1);
        self
    }

    /// Sets whether whole-run sync skips tables not set to sync.
    pub fn with_only_sync_flagged_tables(mut self, only_flagged: bool) -> Self {
        self.only_sync_flagged_tables = only_flagged;
        self
    }

    /// Sets whether crash recovery runs at the start of a whole run.
    pub fn with_recover_on_start(mut self, recover: bool) -> Self {
        self.recover_on_start = recover;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("")
    }
}
