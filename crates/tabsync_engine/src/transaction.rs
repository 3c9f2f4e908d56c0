//! Crash markers around work that spans local and remote mutation.
//!
//! A pass marks its table, and the rows it is about to push, `InFlight`
//! before any remote call and clears the marks afterwards whatever the
//! outcome. A mark still present when the next run starts therefore means
//! the process died mid-pass; [`recover_interrupted`] turns such marks into
//! `NeedsVerification`.

use crate::error::{SyncError, SyncResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tabsync_protocol::{RowSyncState, TableSyncState, TransactionMarker};
use tabsync_store::{LocalStore, RowFilter, RowPatch, RowVersion, TablePatch};

/// A row whose crash marker is not clean.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkedRow {
    /// Table id.
    pub table_id: String,
    /// Row id.
    pub row_id: String,
    /// Which copy of the row.
    pub version: RowVersion,
    /// The marker found.
    pub marker: TransactionMarker,
}

/// Tables and rows found with a crash marker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Marked tables with their marker.
    pub tables: Vec<(String, TransactionMarker)>,
    /// Marked rows.
    pub rows: Vec<MarkedRow>,
}

impl RecoveryReport {
    /// Returns true if nothing was marked.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.rows.is_empty()
    }
}

/// Lists every table and row whose marker is not clean, without changing them.
pub fn interrupted<L: LocalStore + ?Sized>(store: &L) -> SyncResult<RecoveryReport> {
    let mut report = RecoveryReport::default();
    for table_id in store.table_ids()? {
        let Some(entry) = store.table(&table_id)? else {
            continue;
        };
        if !entry.transaction.is_clean() {
            report.tables.push((table_id.clone(), entry.transaction));
        }
        for row in store.rows(&table_id, &RowFilter::all())? {
            if !row.transaction.is_clean() {
                report.rows.push(MarkedRow {
                    table_id: table_id.clone(),
                    row_id: row.row_id,
                    version: row.version,
                    marker: row.transaction,
                });
            }
        }
    }
    Ok(report)
}

/// Moves every `InFlight` marker to `NeedsVerification`.
///
/// Returns what was moved. Rows keep their sync state, so pending rows stay
/// eligible for the next push.
pub fn recover_interrupted<L: LocalStore + ?Sized>(store: &L) -> SyncResult<RecoveryReport> {
    let mut report = interrupted(store)?;
    report
        .tables
        .retain(|(_, marker)| *marker == TransactionMarker::InFlight);
    report
        .rows
        .retain(|row| row.marker == TransactionMarker::InFlight);

    for (table_id, marker) in &report.tables {
        store.update_table(table_id, &TablePatch::new().transaction(marker.recovered()))?;
        tracing::warn!(table_id = %table_id, "table was left in flight by an interrupted run");
    }
    for row in &report.rows {
        store.update_row(
            &row.table_id,
            &row.row_id,
            row.version,
            &RowPatch::new().transaction(row.marker.recovered()),
        )?;
    }
    if !report.rows.is_empty() {
        tracing::warn!(rows = report.rows.len(), "rows were left in flight by an interrupted run");
    }
    Ok(report)
}

/// Marks a table in flight. Returns the marker it had before.
pub fn begin_table<L: LocalStore + ?Sized>(
    store: &L,
    table_id: &str,
) -> SyncResult<TransactionMarker> {
    let entry = store
        .table(table_id)?
        .ok_or_else(|| SyncError::TableNotFound(table_id.to_string()))?;
    store.update_table(
        table_id,
        &TablePatch::new().transaction(TransactionMarker::InFlight),
    )?;
    Ok(entry.transaction)
}

/// Clears a table's marker; on success also sets it to rest and stamps the
/// sync time. A table dropped during the pass is ignored.
pub fn end_table<L: LocalStore + ?Sized>(
    store: &L,
    table_id: &str,
    success: bool,
) -> SyncResult<()> {
    if store.table(table_id)?.is_none() {
        return Ok(());
    }
    let mut patch = TablePatch::new().transaction(TransactionMarker::Clean);
    if success {
        patch = patch
            .state(TableSyncState::Rest)
            .last_sync_time(Utc::now());
    }
    store.update_table(table_id, &patch)?;
    Ok(())
}

/// Settles the row markers of one table before a pass over it.
///
/// Pending local rows left `InFlight` move to `NeedsVerification` so the
/// pull can confirm them; any other marked row has nothing to verify and is
/// cleared. Returns how many rows carried a marker.
pub fn recover_table<L: LocalStore + ?Sized>(store: &L, table_id: &str) -> SyncResult<usize> {
    let mut marked = 0;
    for row in store.rows(table_id, &RowFilter::all())? {
        if row.transaction.is_clean() {
            continue;
        }
        marked += 1;
        let next = if row.version == RowVersion::Local && row.sync_state.is_pending() {
            row.transaction.recovered()
        } else {
            TransactionMarker::Clean
        };
        if next != row.transaction {
            store.update_row(
                table_id,
                &row.row_id,
                row.version,
                &RowPatch::new().transaction(next),
            )?;
        }
    }
    if marked > 0 {
        tracing::warn!(table_id, rows = marked, "rows still marked by an interrupted pass");
    }
    Ok(marked)
}

/// Marks local rows in flight.
///
/// Either every row is marked or none is: on a failure the rows already
/// marked get their previous marker back.
pub fn begin_rows<L: LocalStore + ?Sized>(
    store: &L,
    table_id: &str,
    row_ids: &[String],
) -> SyncResult<()> {
    let mut begun = Vec::with_capacity(row_ids.len());
    for row_id in row_ids {
        match mark_in_flight(store, table_id, row_id) {
            Ok(previous) => begun.push((row_id, previous)),
            Err(error) => {
                for (row_id, previous) in begun {
                    let patch = RowPatch::new().transaction(previous);
                    if let Err(undo) = store.update_row(table_id, row_id, RowVersion::Local, &patch)
                    {
                        tracing::error!(?undo, table_id, row_id = %row_id, "could not restore row marker");
                    }
                }
                return Err(error);
            }
        }
    }
    Ok(())
}

fn mark_in_flight<L: LocalStore + ?Sized>(
    store: &L,
    table_id: &str,
    row_id: &str,
) -> SyncResult<TransactionMarker> {
    let previous = store
        .row(table_id, row_id, RowVersion::Local)?
        .map(|row| row.transaction)
        .unwrap_or_default();
    store.update_row(
        table_id,
        row_id,
        RowVersion::Local,
        &RowPatch::new().transaction(TransactionMarker::InFlight),
    )?;
    Ok(previous)
}

/// Clears the marker on every attempted row that still exists, and forces
/// the confirmed ones to rest. Unconfirmed rows keep their pending state.
pub fn end_rows<L: LocalStore + ?Sized>(
    store: &L,
    table_id: &str,
    attempted: &[String],
    confirmed: &BTreeSet<String>,
) -> SyncResult<()> {
    for row_id in attempted {
        if store.row(table_id, row_id, RowVersion::Local)?.is_none() {
            continue;
        }
        let mut patch = RowPatch::new().transaction(TransactionMarker::Clean);
        if confirmed.contains(row_id) {
            patch = patch.state(RowSyncState::Rest);
        }
        store.update_row(table_id, row_id, RowVersion::Local, &patch)?;
    }
    Ok(())
}
