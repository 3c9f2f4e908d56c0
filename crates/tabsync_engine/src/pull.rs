//! Pull phase: classify incoming rows, then apply the plan locally.
//!
//! Classification is pure: it reads local rows and incoming rows and returns
//! a list of [`RowAction`]s. Only [`apply`] touches the store.

use crate::error::SyncResult;
use crate::result::SyncStats;
use std::collections::BTreeMap;
use tabsync_protocol::{RowSyncState, SyncRow, TransactionMarker};
use tabsync_store::{LocalRow, LocalStore, RowPatch, RowVersion, SavedStatus};

/// What to do locally with one incoming row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowAction {
    /// Unknown locally: insert at rest.
    Insert(SyncRow),
    /// At rest locally: take the server version.
    Update(SyncRow),
    /// At rest locally (or an interrupted delete the server confirms): remove.
    Delete {
        /// Row id.
        row_id: String,
    },
    /// Pending local edit collides with a server change.
    Conflict {
        /// Local state before the conflict.
        local_state: RowSyncState,
        /// The server version.
        server: SyncRow,
    },
    /// An interrupted push the server already holds: adopt its ETag.
    Confirm(SyncRow),
    /// A server delete for a row that does not exist locally.
    Ignore {
        /// Row id.
        row_id: String,
    },
}

impl RowAction {
    /// The row id the action concerns.
    pub fn row_id(&self) -> &str {
        match self {
            RowAction::Insert(row)
            | RowAction::Update(row)
            | RowAction::Confirm(row)
            | RowAction::Conflict { server: row, .. } => &row.row_id,
            RowAction::Delete { row_id } | RowAction::Ignore { row_id } => row_id,
        }
    }
}

/// Classifies incoming rows against the local copies of a table's rows.
///
/// `local` holds the local version of every row. The rules, by local row:
///
/// - none: insert, unless the incoming row is a delete (ignored)
/// - complete and at rest: delete or update
/// - left in flight by an interrupted push whose result the server already
///   shows: confirm
/// - anything else: conflict, whatever the contents
///
/// When the server lists a row id twice, the last entry wins.
pub fn classify(local: &[LocalRow], incoming: &[SyncRow]) -> Vec<RowAction> {
    let by_id: BTreeMap<&str, &LocalRow> = local
        .iter()
        .filter(|row| row.version == RowVersion::Local)
        .map(|row| (row.row_id.as_str(), row))
        .collect();

    let mut last_index: BTreeMap<&str, usize> = BTreeMap::new();
    for (i, row) in incoming.iter().enumerate() {
        last_index.insert(row.row_id.as_str(), i);
    }

    incoming
        .iter()
        .enumerate()
        .filter(|(i, row)| last_index.get(row.row_id.as_str()) == Some(i))
        .map(|(_, server)| match by_id.get(server.row_id.as_str()) {
            None if server.deleted => RowAction::Ignore {
                row_id: server.row_id.clone(),
            },
            None => RowAction::Insert(server.clone()),
            Some(local) => classify_existing(local, server),
        })
        .collect()
}

fn classify_existing(local: &LocalRow, server: &SyncRow) -> RowAction {
    if local.sync_state == RowSyncState::Rest && local.saved == SavedStatus::Complete {
        return if server.deleted {
            RowAction::Delete {
                row_id: server.row_id.clone(),
            }
        } else {
            RowAction::Update(server.clone())
        };
    }
    if local.transaction == TransactionMarker::NeedsVerification {
        match local.sync_state {
            RowSyncState::Inserting | RowSyncState::Updating
                if !server.deleted
                    && server.values == local.values
                    && server.metadata == local.metadata =>
            {
                return RowAction::Confirm(server.clone());
            }
            RowSyncState::Deleting if server.deleted => {
                return RowAction::Delete {
                    row_id: server.row_id.clone(),
                };
            }
            _ => {}
        }
    }
    RowAction::Conflict {
        local_state: local.sync_state,
        server: server.clone(),
    }
}

/// Applies a plan to the store, counting into `stats`.
pub fn apply<L: LocalStore + ?Sized>(
    store: &L,
    table_id: &str,
    actions: &[RowAction],
    stats: &mut SyncStats,
) -> SyncResult<()> {
    for action in actions {
        tracing::debug!(table_id, row_id = action.row_id(), ?action, "applying incoming row");
        match action {
            RowAction::Insert(server) => {
                store.insert_row(table_id, LocalRow::from_server(server))?;
                stats.num_inserts += 1;
                stats.num_entries += 1;
            }
            RowAction::Update(server) => {
                let patch = RowPatch::new()
                    .etag(server.row_etag.clone())
                    .values(server.values.clone())
                    .metadata(server.metadata.clone())
                    .state(RowSyncState::Rest);
                store.update_row(table_id, &server.row_id, RowVersion::Local, &patch)?;
                stats.num_updates += 1;
                stats.num_entries += 1;
            }
            RowAction::Delete { row_id } => {
                store.delete_row(table_id, row_id, RowVersion::Local)?;
                stats.num_deletes += 1;
                stats.num_entries += 1;
            }
            RowAction::Conflict { server, .. } => {
                store.delete_row(table_id, &server.row_id, RowVersion::ServerConflict)?;
                store.update_row(
                    table_id,
                    &server.row_id,
                    RowVersion::Local,
                    &RowPatch::new().state(RowSyncState::Conflicting),
                )?;
                store.insert_row(table_id, LocalRow::server_conflict_copy(server))?;
                stats.num_conflicts_detected += 1;
                stats.num_entries += 2;
            }
            RowAction::Confirm(server) => {
                let patch = RowPatch::new()
                    .etag(server.row_etag.clone())
                    .state(RowSyncState::Rest)
                    .transaction(TransactionMarker::Clean);
                store.update_row(table_id, &server.row_id, RowVersion::Local, &patch)?;
                stats.num_entries += 1;
            }
            RowAction::Ignore { .. } => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabsync_protocol::TableDefinition;
    use tabsync_store::{LocalStore, MemoryStore, RowFilter, TableEntry};

    fn local(id: &str, state: RowSyncState, v: &str) -> LocalRow {
        LocalRow::new(id, BTreeMap::new())
            .with_value("v", v)
            .with_state(state)
            .with_etag(format!("{id}-e1"))
    }

    fn server(id: &str, v: &str) -> SyncRow {
        SyncRow::new(id, BTreeMap::new())
            .with_value("v", v)
            .with_etag(format!("{id}-e2"))
    }

    #[test]
    fn classification_rules() {
        let locals = vec![
            local("rest", RowSyncState::Rest, "a"),
            local("gone", RowSyncState::Rest, "a"),
            local("edited", RowSyncState::Updating, "x"),
            local("new", RowSyncState::Inserting, "n"),
            local("removed", RowSyncState::Deleting, "d"),
        ];
        let incoming = vec![
            server("rest", "b"),
            SyncRow::deleted("gone", None),
            server("edited", "y"),
            server("new", "n"),
            server("removed", "d"),
            server("fresh", "f"),
            SyncRow::deleted("ghost", None),
        ];
        let actions = classify(&locals, &incoming);
        assert!(matches!(actions[0], RowAction::Update(_)));
        assert!(matches!(actions[1], RowAction::Delete { .. }));
        assert!(matches!(
            actions[2],
            RowAction::Conflict {
                local_state: RowSyncState::Updating,
                ..
            }
        ));
        // Identical content still conflicts for a clean pending row.
        assert!(matches!(actions[3], RowAction::Conflict { .. }));
        assert!(matches!(actions[4], RowAction::Conflict { .. }));
        assert!(matches!(actions[5], RowAction::Insert(_)));
        assert!(matches!(actions[6], RowAction::Ignore { .. }));
    }

    #[test]
    fn incomplete_rest_row_conflicts() {
        let locals = vec![local("r1", RowSyncState::Rest, "a").with_saved(SavedStatus::Incomplete)];
        let actions = classify(&locals, &[server("r1", "b")]);
        assert!(matches!(actions[0], RowAction::Conflict { .. }));
    }

    #[test]
    fn interrupted_push_is_confirmed() {
        let mut row = local("r1", RowSyncState::Inserting, "a");
        row.transaction = TransactionMarker::NeedsVerification;
        let actions = classify(&[row.clone()], &[server("r1", "a")]);
        assert!(matches!(actions[0], RowAction::Confirm(_)));

        let actions = classify(&[row], &[server("r1", "other")]);
        assert!(matches!(actions[0], RowAction::Conflict { .. }));
    }

    #[test]
    fn last_duplicate_wins() {
        let actions = classify(&[], &[server("r1", "a"), server("r1", "b")]);
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            RowAction::Insert(row) => assert_eq!(row.values["v"], "b"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn conflict_keeps_both_versions_and_replaces_old_copy() {
        let store = MemoryStore::new();
        store
            .create_table(TableEntry::placeholder(TableDefinition::new("t", "T")))
            .unwrap();
        store
            .insert_row("t", local("r2", RowSyncState::Updating, "x"))
            .unwrap();

        let mut stats = SyncStats::default();
        let first = classify(&store.rows("t", &RowFilter::all()).unwrap(), &[server("r2", "y")]);
        apply(&store, "t", &first, &mut stats).unwrap();

        let second = classify(&store.rows("t", &RowFilter::all()).unwrap(), &[server("r2", "z")]);
        apply(&store, "t", &second, &mut stats).unwrap();

        let mine = store.row("t", "r2", RowVersion::Local).unwrap().unwrap();
        let theirs = store
            .row("t", "r2", RowVersion::ServerConflict)
            .unwrap()
            .unwrap();
        assert_eq!(mine.sync_state, RowSyncState::Conflicting);
        assert_eq!(mine.values["v"], "x");
        assert_eq!(theirs.sync_state, RowSyncState::Deleting);
        assert_eq!(theirs.values["v"], "z");
        assert_eq!(store.rows("t", &RowFilter::all()).unwrap().len(), 2);
        assert_eq!(stats.num_conflicts_detected, 2);
    }

    #[test]
    fn apply_insert_update_delete() {
        let store = MemoryStore::new();
        store
            .create_table(TableEntry::placeholder(TableDefinition::new("t", "T")))
            .unwrap();
        store.insert_row("t", local("r1", RowSyncState::Rest, "a")).unwrap();
        store.insert_row("t", local("r2", RowSyncState::Rest, "a")).unwrap();

        let mut stats = SyncStats::default();
        let actions = classify(
            &store.rows("t", &RowFilter::all()).unwrap(),
            &[server("r1", "b"), SyncRow::deleted("r2", None), server("r3", "c")],
        );
        apply(&store, "t", &actions, &mut stats).unwrap();

        let r1 = store.row("t", "r1", RowVersion::Local).unwrap().unwrap();
        assert_eq!(r1.values["v"], "b");
        assert_eq!(r1.row_etag.as_ref().map(|e| e.as_str()), Some("r1-e2"));
        assert!(store.row("t", "r2", RowVersion::Local).unwrap().is_none());
        let r3 = store.row("t", "r3", RowVersion::Local).unwrap().unwrap();
        assert_eq!(r3.sync_state, RowSyncState::Rest);
        assert_eq!((stats.num_inserts, stats.num_updates, stats.num_deletes), (1, 1, 1));
    }
}
