//! Rows and tables as held by the local store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tabsync_protocol::{
    KeyValueEntry, RowETag, RowMetadata, RowSyncState, SyncRow, TableDefinition, TableETag,
    TableSyncState, TransactionMarker,
};

/// Whether a row has been saved as complete by the application.
///
/// Only complete rows take part in synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SavedStatus {
    /// Finalized by the application.
    #[default]
    Complete,
    /// Still being edited (for example a partially filled form).
    Incomplete,
}

/// Which copy of a row a record holds.
///
/// A conflict keeps both sides under the same row id: the local copy in
/// `CONFLICTING` state and the server's copy alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowVersion {
    /// The row as edited on this device.
    #[default]
    Local,
    /// The server's version of a conflicting row.
    ServerConflict,
}

/// One stored row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRow {
    /// Stable row identifier.
    pub row_id: String,
    /// Which copy this record holds.
    #[serde(default)]
    pub version: RowVersion,
    /// Last ETag the server assigned, none until first accepted.
    pub row_etag: Option<RowETag>,
    /// Sync lifecycle state.
    pub sync_state: RowSyncState,
    /// Crash marker.
    #[serde(default)]
    pub transaction: TransactionMarker,
    /// Completeness.
    #[serde(default)]
    pub saved: SavedStatus,
    /// Admin columns.
    #[serde(default)]
    pub metadata: RowMetadata,
    /// Column key to string-encoded value.
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

impl LocalRow {
    /// Creates a locally inserted row.
    pub fn new(row_id: impl Into<String>, values: BTreeMap<String, String>) -> Self {
        Self {
            row_id: row_id.into(),
            version: RowVersion::Local,
            row_etag: None,
            sync_state: RowSyncState::after_local_insert(),
            transaction: TransactionMarker::Clean,
            saved: SavedStatus::Complete,
            metadata: RowMetadata::default(),
            values,
        }
    }

    /// Creates a row accepted from the server, at rest.
    pub fn from_server(row: &SyncRow) -> Self {
        Self {
            row_id: row.row_id.clone(),
            version: RowVersion::Local,
            row_etag: row.row_etag.clone(),
            sync_state: RowSyncState::Rest,
            transaction: TransactionMarker::Clean,
            saved: SavedStatus::Complete,
            metadata: row.metadata.clone(),
            values: row.values.clone(),
        }
    }

    /// Creates the stored copy of the server side of a conflict.
    pub fn server_conflict_copy(row: &SyncRow) -> Self {
        Self {
            version: RowVersion::ServerConflict,
            sync_state: RowSyncState::Deleting,
            ..Self::from_server(row)
        }
    }

    /// Sets the sync state.
    pub fn with_state(mut self, sync_state: RowSyncState) -> Self {
        self.sync_state = sync_state;
        self
    }

    /// Sets the row ETag.
    pub fn with_etag(mut self, row_etag: impl Into<RowETag>) -> Self {
        self.row_etag = Some(row_etag.into());
        self
    }

    /// Sets the completeness.
    pub fn with_saved(mut self, saved: SavedStatus) -> Self {
        self.saved = saved;
        self
    }

    /// Sets a single column value.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Converts to the wire form pushed to the server.
    pub fn to_sync_row(&self) -> SyncRow {
        SyncRow {
            row_id: self.row_id.clone(),
            row_etag: self.row_etag.clone(),
            deleted: self.sync_state == RowSyncState::Deleting,
            metadata: self.metadata.clone(),
            values: self.values.clone(),
        }
    }
}

/// One stored table: definition plus sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableEntry {
    /// Structural definition.
    pub definition: TableDefinition,
    /// Last table ETag returned by the server, none before the first answer.
    pub etag: Option<TableETag>,
    /// Table-level sync state.
    pub sync_state: TableSyncState,
    /// Crash marker for table-level operations.
    #[serde(default)]
    pub transaction: TransactionMarker,
    /// End of the last fully successful sync pass.
    #[serde(default)]
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Key-value property entries.
    #[serde(default)]
    pub properties: Vec<KeyValueEntry>,
    /// Whether whole-run synchronization includes this table.
    #[serde(default)]
    pub is_set_to_sync: bool,
}

impl TableEntry {
    /// Creates a table that exists only on this device.
    pub fn new_local(definition: TableDefinition) -> Self {
        Self {
            definition,
            etag: None,
            sync_state: TableSyncState::Inserting,
            transaction: TransactionMarker::Clean,
            last_sync_time: None,
            properties: Vec::new(),
            is_set_to_sync: true,
        }
    }

    /// Creates a placeholder for a table about to be downloaded.
    pub fn placeholder(definition: TableDefinition) -> Self {
        Self {
            sync_state: TableSyncState::Rest,
            ..Self::new_local(definition)
        }
    }

    /// Creates a table rebuilt from the server's definition.
    pub fn from_server(definition: TableDefinition, etag: TableETag) -> Self {
        Self {
            etag: Some(etag),
            ..Self::placeholder(definition)
        }
    }

    /// The table id.
    pub fn table_id(&self) -> &str {
        &self.definition.table_id
    }

    /// The display name.
    pub fn display_name(&self) -> &str {
        &self.definition.display_name
    }
}
