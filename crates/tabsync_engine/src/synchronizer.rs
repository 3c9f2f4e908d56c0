//! The remote store port.

use crate::error::SyncResult;
use std::sync::Arc;
use tabsync_protocol::{
    IncomingModification, KeyValueEntry, OutgoingModification, SyncRow, TableDefinition, TableETag,
};

/// Operations the sync processor needs from the remote store.
///
/// Implementations own authentication, transport-level retries and the wire
/// format; the processor only sees typed results or a [`crate::SyncError`].
///
/// # Contract
///
/// Every successful call that returns a table ETag returns the tag the
/// processor must store next. The processor never stores a table ETag that
/// did not come from this trait.
pub trait Synchronizer: Send + Sync {
    /// Returns the changes since `since`, or everything when `since` is none.
    fn get_updates(
        &self,
        table_id: &str,
        since: Option<&TableETag>,
    ) -> SyncResult<IncomingModification>;

    /// Inserts rows.
    fn insert_rows(
        &self,
        table_id: &str,
        table_etag: Option<&TableETag>,
        rows: &[SyncRow],
    ) -> SyncResult<OutgoingModification>;

    /// Updates rows.
    fn update_rows(
        &self,
        table_id: &str,
        table_etag: Option<&TableETag>,
        rows: &[SyncRow],
    ) -> SyncResult<OutgoingModification>;

    /// Deletes rows by id.
    fn delete_rows(
        &self,
        table_id: &str,
        table_etag: Option<&TableETag>,
        row_ids: &[String],
    ) -> SyncResult<TableETag>;

    /// Creates a table from its definition.
    fn create_table(&self, definition: &TableDefinition) -> SyncResult<TableETag>;

    /// Deletes a table.
    fn delete_table(&self, table_id: &str) -> SyncResult<()>;

    /// Replaces a table's property entries.
    fn set_table_properties(
        &self,
        table_id: &str,
        table_etag: Option<&TableETag>,
        table_key: &str,
        properties: &[KeyValueEntry],
    ) -> SyncResult<TableETag>;
}

impl<T: Synchronizer + ?Sized> Synchronizer for Arc<T> {
    fn get_updates(
        &self,
        table_id: &str,
        since: Option<&TableETag>,
    ) -> SyncResult<IncomingModification> {
        (**self).get_updates(table_id, since)
    }

    fn insert_rows(
        &self,
        table_id: &str,
        table_etag: Option<&TableETag>,
        rows: &[SyncRow],
    ) -> SyncResult<OutgoingModification> {
        (**self).insert_rows(table_id, table_etag, rows)
    }

    fn update_rows(
        &self,
        table_id: &str,
        table_etag: Option<&TableETag>,
        rows: &[SyncRow],
    ) -> SyncResult<OutgoingModification> {
        (**self).update_rows(table_id, table_etag, rows)
    }

    fn delete_rows(
        &self,
        table_id: &str,
        table_etag: Option<&TableETag>,
        row_ids: &[String],
    ) -> SyncResult<TableETag> {
        (**self).delete_rows(table_id, table_etag, row_ids)
    }

    fn create_table(&self, definition: &TableDefinition) -> SyncResult<TableETag> {
        (**self).create_table(definition)
    }

    fn delete_table(&self, table_id: &str) -> SyncResult<()> {
        (**self).delete_table(table_id)
    }

    fn set_table_properties(
        &self,
        table_id: &str,
        table_etag: Option<&TableETag>,
        table_key: &str,
        properties: &[KeyValueEntry],
    ) -> SyncResult<TableETag> {
        (**self).set_table_properties(table_id, table_etag, table_key, properties)
    }
}
