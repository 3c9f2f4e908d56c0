//! Push phase: send pending local rows and apply each answer at once.

use crate::error::SyncResult;
use crate::result::SyncStats;
use crate::synchronizer::Synchronizer;
use std::collections::BTreeSet;
use tabsync_protocol::{OutgoingModification, RowSyncState, SyncRow, TableETag};
use tabsync_store::{LocalRow, LocalStore, RowFilter, RowPatch, RowVersion, TablePatch};

/// Pending local rows of one table, by kind of change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushPlan {
    /// Rows the server has never seen.
    pub inserts: Vec<LocalRow>,
    /// Rows edited since their last accepted version.
    pub updates: Vec<LocalRow>,
    /// Rows deleted locally.
    pub deletes: Vec<LocalRow>,
}

impl PushPlan {
    /// Collects every pending complete local row.
    pub fn gather<L: LocalStore + ?Sized>(store: &L, table_id: &str) -> SyncResult<Self> {
        let pending = |state| {
            store.rows(
                table_id,
                &RowFilter::complete_local().state(state).not_in_flight(),
            )
        };
        Ok(Self {
            inserts: pending(RowSyncState::Inserting)?,
            updates: pending(RowSyncState::Updating)?,
            deletes: pending(RowSyncState::Deleting)?,
        })
    }

    /// Collects only the rows awaiting insertion.
    pub fn gather_inserts<L: LocalStore + ?Sized>(store: &L, table_id: &str) -> SyncResult<Self> {
        Ok(Self {
            inserts: store.rows(
                table_id,
                &RowFilter::complete_local()
                    .state(RowSyncState::Inserting)
                    .not_in_flight(),
            )?,
            ..Self::default()
        })
    }

    /// Ids of every row in the plan.
    pub fn row_ids(&self) -> Vec<String> {
        self.inserts
            .iter()
            .chain(&self.updates)
            .chain(&self.deletes)
            .map(|row| row.row_id.clone())
            .collect()
    }

    /// Number of rows in the plan.
    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What the server confirmed so far. Filled in as calls succeed, so it is
/// accurate even when a later call fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOutcome {
    /// Inserted or updated rows now at rest with a server ETag.
    pub confirmed: BTreeSet<String>,
    /// Rows removed after the server accepted their deletion.
    pub deleted: Vec<String>,
}

impl PushOutcome {
    /// Returns true if the server accepted anything.
    pub fn pushed_any(&self) -> bool {
        !self.confirmed.is_empty() || !self.deleted.is_empty()
    }
}

/// Stores a table ETag returned by the server.
pub(crate) fn adopt_table_etag<L: LocalStore + ?Sized>(
    store: &L,
    table_id: &str,
    etag: &TableETag,
) -> SyncResult<()> {
    store.update_table(table_id, &TablePatch::new().etag(etag.clone()))?;
    Ok(())
}

/// Sends pending rows of one table to the remote.
pub struct Pusher<'a, R: ?Sized, L: ?Sized> {
    /// The remote store.
    pub remote: &'a R,
    /// The local store.
    pub store: &'a L,
    /// The table being pushed.
    pub table_id: &'a str,
    /// Maximum rows per call.
    pub batch_size: usize,
}

impl<R, L> Pusher<'_, R, L>
where
    R: Synchronizer + ?Sized,
    L: LocalStore + ?Sized,
{
    /// Sends a plan: inserts, then updates, then deletes, `batch_size` rows
    /// per call. Empty groups make no call. `etag` is the table ETag to push
    /// against and is advanced after every call.
    pub fn push(
        &self,
        plan: &PushPlan,
        etag: &mut Option<TableETag>,
        outcome: &mut PushOutcome,
        stats: &mut SyncStats,
    ) -> SyncResult<()> {
        let (remote, store, table_id) = (self.remote, self.store, self.table_id);
        let batch_size = self.batch_size.max(1);

        for chunk in plan.inserts.chunks(batch_size) {
            let rows: Vec<SyncRow> = chunk.iter().map(LocalRow::to_sync_row).collect();
            tracing::debug!(table_id, rows = rows.len(), "pushing inserts");
            let modification = remote.insert_rows(table_id, etag.as_ref(), &rows)?;
            apply_modification(store, table_id, chunk, &modification, outcome)?;
            adopt_table_etag(store, table_id, &modification.table_etag)?;
            *etag = Some(modification.table_etag);
        }

        for chunk in plan.updates.chunks(batch_size) {
            let rows: Vec<SyncRow> = chunk.iter().map(LocalRow::to_sync_row).collect();
            tracing::debug!(table_id, rows = rows.len(), "pushing updates");
            let modification = remote.update_rows(table_id, etag.as_ref(), &rows)?;
            apply_modification(store, table_id, chunk, &modification, outcome)?;
            adopt_table_etag(store, table_id, &modification.table_etag)?;
            *etag = Some(modification.table_etag);
        }

        for chunk in plan.deletes.chunks(batch_size) {
            let row_ids: Vec<String> = chunk.iter().map(|row| row.row_id.clone()).collect();
            tracing::debug!(table_id, rows = row_ids.len(), "pushing deletes");
            let new_etag = remote.delete_rows(table_id, etag.as_ref(), &row_ids)?;
            adopt_table_etag(store, table_id, &new_etag)?;
            *etag = Some(new_etag);
            for row_id in row_ids {
                store.delete_row(table_id, &row_id, RowVersion::Local)?;
                stats.num_deletes += 1;
                stats.num_entries += 1;
                outcome.deleted.push(row_id);
            }
        }
        Ok(())
    }
}

fn apply_modification<L: LocalStore + ?Sized>(
    store: &L,
    table_id: &str,
    sent: &[LocalRow],
    modification: &OutgoingModification,
    outcome: &mut PushOutcome,
) -> SyncResult<()> {
    for row in sent {
        match modification.row_etag(&row.row_id) {
            Some(etag) => {
                let patch = RowPatch::new()
                    .etag(Some(etag.clone()))
                    .state(RowSyncState::Rest);
                store.update_row(table_id, &row.row_id, RowVersion::Local, &patch)?;
                outcome.confirmed.insert(row.row_id.clone());
            }
            None => {
                tracing::warn!(table_id, row_id = %row.row_id, "server returned no etag for pushed row");
            }
        }
    }
    Ok(())
}
