//! Per-table and whole-run outcomes.

use crate::error::{FailureKind, SyncError};
use crate::transaction::RecoveryReport;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse outcome of one table's pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Every step completed.
    #[default]
    Success,
    /// The pass could not run (for example the table is missing locally).
    Failure,
    /// A step raised an error. Terminal for the run.
    Exception,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Success => "SUCCESS",
            Status::Failure => "FAILURE",
            Status::Exception => "EXCEPTION",
        })
    }
}

/// Counters accumulated by a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncStats {
    /// Rows inserted locally from the server.
    pub num_inserts: u64,
    /// Rows updated locally from the server.
    pub num_updates: u64,
    /// Rows and tables deleted locally.
    pub num_deletes: u64,
    /// Rows and tables touched in total.
    pub num_entries: u64,
    /// Conflicts materialized.
    pub num_conflicts_detected: u64,
    /// Passes that ended in an I/O failure.
    pub num_io_exceptions: u64,
    /// Rows that could not be pushed because the pass failed.
    pub num_skipped_entries: u64,
}

impl SyncStats {
    /// Adds another set of counters to this one.
    pub fn merge(&mut self, other: &SyncStats) {
        self.num_inserts += other.num_inserts;
        self.num_updates += other.num_updates;
        self.num_deletes += other.num_deletes;
        self.num_entries += other.num_entries;
        self.num_conflicts_detected += other.num_conflicts_detected;
        self.num_io_exceptions += other.num_io_exceptions;
        self.num_skipped_entries += other.num_skipped_entries;
    }
}

/// Outcome of one table's pass.
///
/// Created when the pass starts and handed to the caller when it ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableResult {
    /// Table id.
    pub table_id: String,
    /// Display name.
    pub display_name: String,
    status: Status,
    /// Detail for a failure or exception.
    pub message: Option<String>,
    /// Classification of the error that ended the pass.
    pub failure_kind: Option<FailureKind>,
    /// Row changes were pulled from the server.
    pub pulled_server_data: bool,
    /// Server properties replaced the local ones.
    pub pulled_server_properties: bool,
    /// The table was rebuilt from the server definition.
    pub pulled_server_schema: bool,
    /// Local rows were pushed.
    pub pushed_local_data: bool,
    /// Local properties were pushed.
    pub pushed_local_properties: bool,
    /// The table definition was created on the server.
    pub pushed_local_schema: bool,
    /// Local rows were pending when the pass started its push.
    pub had_local_data_changes: bool,
    /// Local properties were preferred over the server's.
    pub had_local_properties_changes: bool,
    /// The server reported row changes.
    pub server_had_data_changes: bool,
    /// The server reported property changes.
    pub server_had_properties_changes: bool,
    /// The server reported a schema change.
    pub server_had_schema_changes: bool,
    /// The table or some of its rows were left in flight by an earlier run.
    pub recovered_from_interrupt: bool,
    /// Counters for this pass.
    pub stats: SyncStats,
}

impl TableResult {
    /// Creates a result for a pass that is about to start.
    pub fn new(table_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            table_id: table_id.into(),
            display_name: display_name.into(),
            status: Status::Success,
            message: None,
            failure_kind: None,
            pulled_server_data: false,
            pulled_server_properties: false,
            pulled_server_schema: false,
            pushed_local_data: false,
            pushed_local_properties: false,
            pushed_local_schema: false,
            had_local_data_changes: false,
            had_local_properties_changes: false,
            server_had_data_changes: false,
            server_had_properties_changes: false,
            server_had_schema_changes: false,
            recovered_from_interrupt: false,
            stats: SyncStats::default(),
        }
    }

    /// The current status.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Sets the status.
    ///
    /// # Panics
    ///
    /// Panics if the status is already [`Status::Exception`] and `status` is
    /// anything else. Downgrading an exception is a programming error.
    pub fn set_status(&mut self, status: Status) {
        if self.status == Status::Exception && status != Status::Exception {
            panic!(
                "table {}: cannot change status from EXCEPTION to {status}",
                self.table_id
            );
        }
        self.status = status;
    }

    /// Records the error that ended the pass.
    pub fn record_error(&mut self, error: &SyncError) {
        self.set_status(Status::Exception);
        self.message = Some(error.to_string());
        self.failure_kind = Some(error.failure_kind());
    }

    /// Records a failure that prevented the pass from running.
    pub fn record_failure(&mut self, message: impl Into<String>) {
        self.set_status(Status::Failure);
        self.message = Some(message.into());
    }

    /// Returns true if the pass succeeded.
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynchronizationResult {
    /// One result per table visited, in visiting order.
    pub table_results: Vec<TableResult>,
    /// What startup recovery found, if it ran.
    pub recovery: Option<RecoveryReport>,
}

impl SynchronizationResult {
    /// Returns the result for a table.
    pub fn table(&self, table_id: &str) -> Option<&TableResult> {
        self.table_results.iter().find(|r| r.table_id == table_id)
    }

    /// Returns true if every table succeeded.
    pub fn is_success(&self) -> bool {
        self.table_results.iter().all(TableResult::is_success)
    }

    /// Returns true if any table failed on credentials.
    pub fn auth_required(&self) -> bool {
        self.table_results
            .iter()
            .any(|r| r.failure_kind == Some(FailureKind::Authorization))
    }

    /// Counters summed over all tables.
    pub fn stats(&self) -> SyncStats {
        let mut total = SyncStats::default();
        for result in &self.table_results {
            total.merge(&result.stats);
        }
        total
    }
}
