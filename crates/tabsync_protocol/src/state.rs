//! Row and table sync states.
//!
//! Transition rules for ordinary (non-sync) local writes:
//!
//! ```text
//! insert:  state = INSERTING
//! update:  REST -> UPDATING, otherwise unchanged
//! delete:  REST | UPDATING -> DELETING (row stays, marked for removal)
//!          INSERTING       -> removed immediately
//! ```
//!
//! `CONFLICTING` is only ever set by the sync processor, and only the sync
//! processor moves a row back to `REST`.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-row synchronization state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowSyncState {
    /// In agreement with the server as of the row's ETag.
    Rest,
    /// Created locally, never accepted by the server.
    Inserting,
    /// Edited locally since the last accepted version.
    Updating,
    /// Deleted locally, removal not yet confirmed by the server.
    Deleting,
    /// A pending local edit collided with a server change.
    Conflicting,
}

/// What a local delete does to a row or table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Keep the record and mark it for removal on the next sync.
    MarkDeleting,
    /// The server never saw the record; remove it now.
    RemoveNow,
    /// The delete does not change the record.
    Unchanged,
}

impl RowSyncState {
    /// All states, in code order.
    pub const ALL: [RowSyncState; 5] = [
        RowSyncState::Rest,
        RowSyncState::Inserting,
        RowSyncState::Updating,
        RowSyncState::Deleting,
        RowSyncState::Conflicting,
    ];

    /// Converts to the numeric code used by persisted stores.
    pub fn to_code(self) -> u8 {
        match self {
            RowSyncState::Rest => 0,
            RowSyncState::Inserting => 1,
            RowSyncState::Updating => 2,
            RowSyncState::Deleting => 3,
            RowSyncState::Conflicting => 4,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> ProtocolResult<Self> {
        match code {
            0 => Ok(RowSyncState::Rest),
            1 => Ok(RowSyncState::Inserting),
            2 => Ok(RowSyncState::Updating),
            3 => Ok(RowSyncState::Deleting),
            4 => Ok(RowSyncState::Conflicting),
            _ => Err(ProtocolError::UnknownStateCode {
                kind: "row sync state",
                code,
            }),
        }
    }

    /// Returns true if the row carries a local change the server has not seen.
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            RowSyncState::Inserting | RowSyncState::Updating | RowSyncState::Deleting
        )
    }

    /// State of a freshly inserted row.
    pub fn after_local_insert() -> Self {
        RowSyncState::Inserting
    }

    /// State after a local update.
    pub fn after_local_update(self) -> Self {
        match self {
            RowSyncState::Rest => RowSyncState::Updating,
            other => other,
        }
    }

    /// Effect of a local delete.
    pub fn local_delete(self) -> DeleteOutcome {
        match self {
            RowSyncState::Rest | RowSyncState::Updating => DeleteOutcome::MarkDeleting,
            RowSyncState::Inserting => DeleteOutcome::RemoveNow,
            RowSyncState::Deleting | RowSyncState::Conflicting => DeleteOutcome::Unchanged,
        }
    }
}

impl fmt::Display for RowSyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RowSyncState::Rest => "REST",
            RowSyncState::Inserting => "INSERTING",
            RowSyncState::Updating => "UPDATING",
            RowSyncState::Deleting => "DELETING",
            RowSyncState::Conflicting => "CONFLICTING",
        };
        f.write_str(name)
    }
}

/// Table-level synchronization state.
///
/// Governs whether the table itself (definition and properties, not its rows)
/// must be created, altered or removed on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableSyncState {
    /// Definition and properties agree with the server.
    #[default]
    Rest,
    /// Table exists only locally.
    Inserting,
    /// Properties were edited locally.
    Updating,
    /// Table was deleted locally.
    Deleting,
}

impl TableSyncState {
    /// State after a local properties edit.
    pub fn after_local_properties_edit(self) -> Self {
        match self {
            TableSyncState::Rest => TableSyncState::Updating,
            other => other,
        }
    }

    /// Effect of a local table delete.
    pub fn local_delete(self) -> DeleteOutcome {
        match self {
            TableSyncState::Inserting => DeleteOutcome::RemoveNow,
            TableSyncState::Deleting => DeleteOutcome::Unchanged,
            TableSyncState::Rest | TableSyncState::Updating => DeleteOutcome::MarkDeleting,
        }
    }
}

impl fmt::Display for TableSyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TableSyncState::Rest => "rest",
            TableSyncState::Inserting => "inserting",
            TableSyncState::Updating => "updating",
            TableSyncState::Deleting => "deleting",
        };
        f.write_str(name)
    }
}

/// Crash-visible marker for work spanning local and remote mutation.
///
/// This is a claim, not a lock. A record found `InFlight` when a run starts
/// belonged to a run that never finished; recovery moves it to
/// `NeedsVerification` so the next pass re-checks it against the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMarker {
    /// No sync operation touches the record.
    #[default]
    Clean,
    /// A sync operation touching the record is in progress.
    InFlight,
    /// Left in flight by an interrupted run; status unknown.
    NeedsVerification,
}

impl TransactionMarker {
    /// Maps a legacy boolean flag: a set flag on load means an interrupted run.
    pub fn from_flag(transactioning: bool) -> Self {
        if transactioning {
            TransactionMarker::NeedsVerification
        } else {
            TransactionMarker::Clean
        }
    }

    /// Returns true if readers may treat the record as authoritative.
    pub fn is_clean(self) -> bool {
        self == TransactionMarker::Clean
    }

    /// Marker after startup recovery.
    pub fn recovered(self) -> Self {
        match self {
            TransactionMarker::InFlight => TransactionMarker::NeedsVerification,
            other => other,
        }
    }
}
