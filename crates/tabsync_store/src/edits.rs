//! Local writes made by the application between sync runs.
//!
//! These functions apply the row and table state rules on top of any
//! [`LocalStore`]. They never touch ETags and never move anything to `REST`;
//! that is the sync processor's job.

use crate::error::{StoreError, StoreResult};
use crate::model::{LocalRow, RowVersion, SavedStatus, TableEntry};
use crate::store::{LocalStore, RowPatch, TablePatch};
use std::collections::BTreeMap;
use tabsync_protocol::{
    DeleteOutcome, KeyValueEntry, RowMetadata, RowSyncState, TableDefinition, TableSyncState,
};

/// Creates a table that exists only on this device.
pub fn create_table<S: LocalStore + ?Sized>(
    store: &S,
    definition: TableDefinition,
) -> StoreResult<()> {
    tracing::debug!(table_id = %definition.table_id, "local table create");
    store.create_table(TableEntry::new_local(definition))
}

/// Replaces a table's property entries and returns the new table state.
pub fn edit_properties<S: LocalStore + ?Sized>(
    store: &S,
    table_id: &str,
    properties: Vec<KeyValueEntry>,
) -> StoreResult<TableSyncState> {
    let entry = store.require_table(table_id)?;
    let next = entry.sync_state.after_local_properties_edit();
    store.update_table(table_id, &TablePatch::new().properties(properties).state(next))?;
    Ok(next)
}

/// Deletes a table locally.
///
/// A table the server never saw is dropped at once; otherwise it is marked
/// `deleting` and removed by the next sync pass.
pub fn delete_table<S: LocalStore + ?Sized>(store: &S, table_id: &str) -> StoreResult<DeleteOutcome> {
    let entry = store.require_table(table_id)?;
    let outcome = entry.sync_state.local_delete();
    match outcome {
        DeleteOutcome::RemoveNow => {
            store.drop_table(table_id)?;
        }
        DeleteOutcome::MarkDeleting => {
            store.update_table(table_id, &TablePatch::new().state(TableSyncState::Deleting))?;
        }
        DeleteOutcome::Unchanged => {}
    }
    tracing::debug!(table_id, ?outcome, "local table delete");
    Ok(outcome)
}

/// Inserts a brand-new row in `INSERTING` state.
///
/// # Errors
///
/// Returns [`StoreError::RowExists`] if the id is already used.
pub fn insert_row<S: LocalStore + ?Sized>(
    store: &S,
    table_id: &str,
    row_id: &str,
    values: BTreeMap<String, String>,
    metadata: RowMetadata,
) -> StoreResult<()> {
    let mut row = LocalRow::new(row_id, values);
    row.metadata = metadata;
    store.insert_row(table_id, row)
}

/// Replaces a row's values and returns its new state.
///
/// A row at rest becomes `UPDATING`; any other state is kept.
pub fn update_row<S: LocalStore + ?Sized>(
    store: &S,
    table_id: &str,
    row_id: &str,
    values: BTreeMap<String, String>,
) -> StoreResult<RowSyncState> {
    let row = require_row(store, table_id, row_id)?;
    let next = row.sync_state.after_local_update();
    store.update_row(
        table_id,
        row_id,
        RowVersion::Local,
        &RowPatch::new().values(values).state(next),
    )?;
    Ok(next)
}

/// Deletes a row locally.
///
/// A row still `INSERTING` is removed at once and never reaches the server.
pub fn delete_row<S: LocalStore + ?Sized>(
    store: &S,
    table_id: &str,
    row_id: &str,
) -> StoreResult<DeleteOutcome> {
    let row = require_row(store, table_id, row_id)?;
    let outcome = row.sync_state.local_delete();
    match outcome {
        DeleteOutcome::RemoveNow => {
            store.delete_row(table_id, row_id, RowVersion::Local)?;
        }
        DeleteOutcome::MarkDeleting => {
            store.update_row(
                table_id,
                row_id,
                RowVersion::Local,
                &RowPatch::new().state(RowSyncState::Deleting),
            )?;
        }
        DeleteOutcome::Unchanged => {}
    }
    Ok(outcome)
}

/// Marks a row complete or incomplete.
pub fn set_saved<S: LocalStore + ?Sized>(
    store: &S,
    table_id: &str,
    row_id: &str,
    saved: SavedStatus,
) -> StoreResult<()> {
    store.update_row(table_id, row_id, RowVersion::Local, &RowPatch::new().saved(saved))
}

fn require_row<S: LocalStore + ?Sized>(
    store: &S,
    table_id: &str,
    row_id: &str,
) -> StoreResult<LocalRow> {
    store
        .row(table_id, row_id, RowVersion::Local)?
        .ok_or_else(|| StoreError::RowNotFound {
            table_id: table_id.to_string(),
            row_id: row_id.to_string(),
        })
}
