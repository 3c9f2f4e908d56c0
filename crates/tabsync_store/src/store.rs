//! Local store trait definition.

use crate::error::{StoreError, StoreResult};
use crate::model::{LocalRow, RowVersion, SavedStatus, TableEntry};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tabsync_protocol::{
    KeyValueEntry, RowETag, RowMetadata, RowSyncState, TableDefinition, TableETag,
    TableSyncState, TransactionMarker,
};

/// The local row/table store the sync engine works against.
///
/// Rows are addressed by `(row_id, version)`: a conflict stores the local and
/// the server copy of a row under the same id.
///
/// # Invariants
///
/// - `insert_row` fails if the `(row_id, version)` pair already exists
/// - `update_row` and `update_table` fail if the target does not exist
/// - `drop_table` removes the table and all of its rows
/// - Stores must be `Send + Sync`; callers serialize sync runs
pub trait LocalStore: Send + Sync {
    /// Returns the ids of all tables, in id order.
    fn table_ids(&self) -> StoreResult<Vec<String>>;

    /// Returns a table, or none if it does not exist.
    fn table(&self, table_id: &str) -> StoreResult<Option<TableEntry>>;

    /// Creates a table.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TableExists`] if the id is taken.
    fn create_table(&self, entry: TableEntry) -> StoreResult<()>;

    /// Applies a patch to a table's bookkeeping.
    fn update_table(&self, table_id: &str, patch: &TablePatch) -> StoreResult<()>;

    /// Removes a table and its rows. Returns true if it existed.
    fn drop_table(&self, table_id: &str) -> StoreResult<bool>;

    /// Returns the rows matching `filter`, in `(row_id, version)` order.
    fn rows(&self, table_id: &str, filter: &RowFilter) -> StoreResult<Vec<LocalRow>>;

    /// Returns one row.
    fn row(&self, table_id: &str, row_id: &str, version: RowVersion)
        -> StoreResult<Option<LocalRow>>;

    /// Inserts a row.
    fn insert_row(&self, table_id: &str, row: LocalRow) -> StoreResult<()>;

    /// Applies a patch to a row.
    fn update_row(
        &self,
        table_id: &str,
        row_id: &str,
        version: RowVersion,
        patch: &RowPatch,
    ) -> StoreResult<()>;

    /// Physically removes a row. Returns true if it existed.
    fn delete_row(&self, table_id: &str, row_id: &str, version: RowVersion) -> StoreResult<bool>;

    /// Returns a table or [`StoreError::TableNotFound`].
    fn require_table(&self, table_id: &str) -> StoreResult<TableEntry> {
        self.table(table_id)?
            .ok_or_else(|| StoreError::TableNotFound(table_id.to_string()))
    }
}

/// Selects rows by state, completeness, version and crash marker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowFilter {
    /// Only rows in this sync state.
    pub sync_state: Option<RowSyncState>,
    /// Only rows with this completeness.
    pub saved: Option<SavedStatus>,
    /// Only rows of this version.
    pub version: Option<RowVersion>,
    /// Skip rows currently claimed by an in-flight operation.
    pub exclude_in_flight: bool,
}

impl RowFilter {
    /// Matches every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// Complete local rows: what the sync engine compares and pushes.
    pub fn complete_local() -> Self {
        Self {
            saved: Some(SavedStatus::Complete),
            version: Some(RowVersion::Local),
            ..Self::default()
        }
    }

    /// Restricts to one sync state.
    pub fn state(mut self, sync_state: RowSyncState) -> Self {
        self.sync_state = Some(sync_state);
        self
    }

    /// Restricts to one version.
    pub fn version(mut self, version: RowVersion) -> Self {
        self.version = Some(version);
        self
    }

    /// Skips in-flight rows.
    pub fn not_in_flight(mut self) -> Self {
        self.exclude_in_flight = true;
        self
    }

    /// Returns true if `row` passes the filter.
    pub fn matches(&self, row: &LocalRow) -> bool {
        self.sync_state.map_or(true, |s| row.sync_state == s)
            && self.saved.map_or(true, |s| row.saved == s)
            && self.version.map_or(true, |v| row.version == v)
            && !(self.exclude_in_flight && row.transaction == TransactionMarker::InFlight)
    }
}

/// Partial update of a row. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowPatch {
    /// New ETag (`Some(None)` clears it).
    pub row_etag: Option<Option<RowETag>>,
    /// New sync state.
    pub sync_state: Option<RowSyncState>,
    /// New crash marker.
    pub transaction: Option<TransactionMarker>,
    /// New completeness.
    pub saved: Option<SavedStatus>,
    /// Replacement values.
    pub values: Option<BTreeMap<String, String>>,
    /// Replacement admin columns.
    pub metadata: Option<RowMetadata>,
}

impl RowPatch {
    /// An empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the ETag.
    pub fn etag(mut self, row_etag: Option<RowETag>) -> Self {
        self.row_etag = Some(row_etag);
        self
    }

    /// Sets the sync state.
    pub fn state(mut self, sync_state: RowSyncState) -> Self {
        self.sync_state = Some(sync_state);
        self
    }

    /// Sets the crash marker.
    pub fn transaction(mut self, transaction: TransactionMarker) -> Self {
        self.transaction = Some(transaction);
        self
    }

    /// Sets the completeness.
    pub fn saved(mut self, saved: SavedStatus) -> Self {
        self.saved = Some(saved);
        self
    }

    /// Replaces the values.
    pub fn values(mut self, values: BTreeMap<String, String>) -> Self {
        self.values = Some(values);
        self
    }

    /// Replaces the admin columns.
    pub fn metadata(mut self, metadata: RowMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Applies the patch in place.
    pub fn apply(&self, row: &mut LocalRow) {
        if let Some(etag) = &self.row_etag {
            row.row_etag = etag.clone();
        }
        if let Some(state) = self.sync_state {
            row.sync_state = state;
        }
        if let Some(transaction) = self.transaction {
            row.transaction = transaction;
        }
        if let Some(saved) = self.saved {
            row.saved = saved;
        }
        if let Some(values) = &self.values {
            row.values = values.clone();
        }
        if let Some(metadata) = &self.metadata {
            row.metadata = metadata.clone();
        }
    }
}

/// Partial update of a table. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TablePatch {
    /// New table ETag (`Some(None)` clears it).
    pub etag: Option<Option<TableETag>>,
    /// New sync state.
    pub sync_state: Option<TableSyncState>,
    /// New crash marker.
    pub transaction: Option<TransactionMarker>,
    /// New last successful sync time.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Replacement property entries.
    pub properties: Option<Vec<KeyValueEntry>>,
    /// Replacement definition.
    pub definition: Option<TableDefinition>,
    /// New sync selection flag.
    pub is_set_to_sync: Option<bool>,
}

impl TablePatch {
    /// An empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the table ETag.
    pub fn etag(mut self, etag: TableETag) -> Self {
        self.etag = Some(Some(etag));
        self
    }

    /// Sets the sync state.
    pub fn state(mut self, sync_state: TableSyncState) -> Self {
        self.sync_state = Some(sync_state);
        self
    }

    /// Sets the crash marker.
    pub fn transaction(mut self, transaction: TransactionMarker) -> Self {
        self.transaction = Some(transaction);
        self
    }

    /// Stamps the last successful sync time.
    pub fn last_sync_time(mut self, at: DateTime<Utc>) -> Self {
        self.last_sync_time = Some(at);
        self
    }

    /// Replaces the property entries.
    pub fn properties(mut self, properties: Vec<KeyValueEntry>) -> Self {
        self.properties = Some(properties);
        self
    }

    /// Sets the sync selection flag.
    pub fn set_to_sync(mut self, is_set_to_sync: bool) -> Self {
        self.is_set_to_sync = Some(is_set_to_sync);
        self
    }

    /// Applies the patch in place.
    pub fn apply(&self, entry: &mut TableEntry) {
        if let Some(etag) = &self.etag {
            entry.etag = etag.clone();
        }
        if let Some(state) = self.sync_state {
            entry.sync_state = state;
        }
        if let Some(transaction) = self.transaction {
            entry.transaction = transaction;
        }
        if let Some(at) = self.last_sync_time {
            entry.last_sync_time = Some(at);
        }
        if let Some(properties) = &self.properties {
            entry.properties = properties.clone();
        }
        if let Some(definition) = &self.definition {
            entry.definition = definition.clone();
        }
        if let Some(flag) = self.is_set_to_sync {
            entry.is_set_to_sync = flag;
        }
    }
}
