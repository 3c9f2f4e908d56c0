//! End-to-end table passes against the in-memory remote.

use std::collections::BTreeMap;
use std::sync::Arc;
use tabsync_engine::{
    transaction, FailureKind, Fault, MemoryRemote, RemoteOp, Status, SyncConfig, SyncProcessor,
    Synchronizer,
};
use tabsync_protocol::{
    KeyValueEntry, RowSyncState, SyncRow, TableDefinition, TableETag, TableSyncState,
    TransactionMarker,
};
use tabsync_store::{
    edits, FileStore, LocalRow, LocalStore, MemoryStore, RowFilter, RowVersion, TableEntry,
    TablePatch,
};

type Processor = SyncProcessor<MemoryRemote, MemoryStore>;

fn values(v: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("v".to_string(), v.to_string())])
}

fn setup() -> (Processor, Arc<MemoryRemote>, Arc<MemoryStore>) {
    let remote = Arc::new(MemoryRemote::new());
    let store = Arc::new(MemoryStore::new());
    let processor = SyncProcessor::new(
        SyncConfig::new("memory://").with_push_batch_size(2),
        remote.clone(),
        store.clone(),
    );
    (processor, remote, store)
}

/// A table present on both sides with rows `r1` and `r2` at rest.
fn synced_table() -> (Processor, Arc<MemoryRemote>, Arc<MemoryStore>) {
    let (processor, remote, store) = setup();
    remote.seed_table(TableDefinition::new("t", "T"));
    remote.server_put_row("t", SyncRow::new("r1", values("a"))).unwrap();
    remote.server_put_row("t", SyncRow::new("r2", values("a"))).unwrap();
    assert!(processor.download_table("t").is_success());
    remote.clear_calls();
    (processor, remote, store)
}

fn local_row(store: &MemoryStore, row_id: &str) -> LocalRow {
    store.row("t", row_id, RowVersion::Local).unwrap().unwrap()
}

fn local_etag(store: &MemoryStore) -> Option<TableETag> {
    store.table("t").unwrap().unwrap().etag
}

#[test]
fn resync_without_changes_is_idempotent() {
    let (processor, remote, store) = synced_table();
    edits::update_row(&*store, "t", "r1", values("b")).unwrap();
    edits::insert_row(&*store, "t", "r3", values("c"), Default::default()).unwrap();

    assert!(processor.synchronize_table("t", false).is_success());
    let etag = local_etag(&store);
    let rows = store.rows("t", &RowFilter::all()).unwrap();
    remote.clear_calls();

    let second = processor.synchronize_table("t", false);
    assert!(second.is_success());
    assert!(!second.pulled_server_data && !second.pushed_local_data);
    assert_eq!(local_etag(&store), etag);
    assert_eq!(store.rows("t", &RowFilter::all()).unwrap(), rows);
    let ops: Vec<RemoteOp> = remote.calls().into_iter().map(|c| c.op).collect();
    assert_eq!(ops, vec![RemoteOp::GetUpdates]);
}

#[test]
fn conflict_keeps_both_versions() {
    let (processor, remote, store) = synced_table();
    edits::update_row(&*store, "t", "r2", values("A")).unwrap();
    let server = remote.row("t", "r2").unwrap();
    remote
        .server_put_row("t", server.clone().with_value("v", "B"))
        .unwrap();

    let result = processor.synchronize_table("t", false);
    assert!(result.is_success());
    assert_eq!(result.stats.num_conflicts_detected, 1);

    let mine = local_row(&store, "r2");
    assert_eq!(mine.sync_state, RowSyncState::Conflicting);
    assert_eq!(mine.values["v"], "A");
    let theirs = store
        .row("t", "r2", RowVersion::ServerConflict)
        .unwrap()
        .unwrap();
    assert_eq!(theirs.values["v"], "B");
    assert_eq!(theirs.row_etag, remote.row("t", "r2").unwrap().row_etag);

    // Neither copy is pushed while the conflict stands.
    assert!(remote.calls_of(RemoteOp::UpdateRows).is_empty());
    assert!(remote.calls_of(RemoteOp::DeleteRows).is_empty());
    assert_eq!(remote.row("t", "r2").unwrap().values["v"], "B");
}

#[test]
fn local_insert_then_delete_never_reaches_remote() {
    let (processor, remote, store) = synced_table();
    edits::insert_row(&*store, "t", "tmp", values("x"), Default::default()).unwrap();
    edits::delete_row(&*store, "t", "tmp").unwrap();

    assert!(processor.synchronize_table("t", false).is_success());
    assert!(store.row("t", "tmp", RowVersion::Local).unwrap().is_none());
    assert!(remote.calls_of(RemoteOp::InsertRows).is_empty());
    assert!(remote.row("t", "tmp").is_none());
}

#[test]
fn failed_update_push_keeps_inserts_and_retries_updates() {
    let (processor, remote, store) = synced_table();
    edits::insert_row(&*store, "t", "r3", values("c"), Default::default()).unwrap();
    edits::update_row(&*store, "t", "r1", values("b")).unwrap();
    remote.fail_next(RemoteOp::UpdateRows, Fault::Io);

    let first = processor.synchronize_table("t", false);
    assert_eq!(first.status(), Status::Exception);
    assert_eq!(first.failure_kind, Some(FailureKind::Io));
    assert_eq!(first.stats.num_io_exceptions, 1);
    assert_eq!(first.stats.num_skipped_entries, 1);
    assert_eq!(local_row(&store, "r3").sync_state, RowSyncState::Rest);
    assert_eq!(local_row(&store, "r1").sync_state, RowSyncState::Updating);
    assert!(transaction::interrupted(&*store).unwrap().is_empty());
    assert_eq!(local_etag(&store), remote.table_etag("t"));

    remote.clear_calls();
    let second = processor.synchronize_table("t", false);
    assert!(second.is_success(), "{second:?}");
    assert!(remote.calls_of(RemoteOp::InsertRows).is_empty());
    let updates = remote.calls_of(RemoteOp::UpdateRows);
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].row_ids, vec!["r1".to_string()]);
    assert_eq!(local_row(&store, "r1").sync_state, RowSyncState::Rest);
    assert_eq!(remote.row("t", "r1").unwrap().values["v"], "b");
}

#[test]
fn interrupted_push_is_verified_on_next_run() {
    let (processor, remote, store) = synced_table();
    edits::insert_row(&*store, "t", "r3", values("c"), Default::default()).unwrap();

    // The process died after the server accepted the insert but before the
    // answer was applied locally.
    transaction::begin_table(&*store, "t").unwrap();
    transaction::begin_rows(&*store, "t", &["r3".to_string()]).unwrap();
    let pending = local_row(&store, "r3").to_sync_row();
    remote
        .insert_rows("t", local_etag(&store).as_ref(), &[pending])
        .unwrap();
    remote.clear_calls();

    let run = processor.synchronize();
    let recovery = run.recovery.as_ref().unwrap();
    assert_eq!(recovery.tables.len(), 1);
    assert_eq!(recovery.rows.len(), 1);

    let result = run.table("t").unwrap();
    assert!(result.is_success(), "{result:?}");
    assert!(result.recovered_from_interrupt);
    assert_eq!(result.stats.num_conflicts_detected, 0);

    let r3 = local_row(&store, "r3");
    assert_eq!(r3.sync_state, RowSyncState::Rest);
    assert!(r3.transaction.is_clean());
    assert_eq!(r3.row_etag, remote.row("t", "r3").unwrap().row_etag);
    assert!(remote.calls_of(RemoteOp::InsertRows).is_empty());
}

#[test]
fn table_etag_always_comes_from_the_remote() {
    let (processor, remote, store) = synced_table();
    for id in ["a", "b", "c", "d", "e"] {
        edits::insert_row(&*store, "t", id, values(id), Default::default()).unwrap();
    }
    edits::delete_row(&*store, "t", "r2").unwrap();

    assert!(processor.synchronize_table("t", false).is_success());
    assert_eq!(remote.calls_of(RemoteOp::InsertRows).len(), 3);
    assert_eq!(remote.calls_of(RemoteOp::DeleteRows).len(), 1);
    assert_eq!(local_etag(&store), remote.table_etag("t"));
    assert!(store.row("t", "r2", RowVersion::Local).unwrap().is_none());
    assert!(remote.row("t", "r2").unwrap().deleted);
}

#[test]
fn pull_scenario_with_conflict_and_ghost_delete() {
    let (processor, remote, store) = synced_table();
    edits::update_row(&*store, "t", "r2", values("x")).unwrap();

    let server_r2 = remote.row("t", "r2").unwrap();
    remote.server_put_row("t", server_r2.with_value("v", "y")).unwrap();
    remote.server_put_row("t", SyncRow::new("r3", values("z"))).unwrap();
    remote.server_delete_row("t", "r3").unwrap();
    let before = local_row(&store, "r1");

    let result = processor.synchronize_table("t", false);
    assert!(result.is_success());

    assert_eq!(local_row(&store, "r1"), before);
    let r2 = local_row(&store, "r2");
    assert_eq!(r2.sync_state, RowSyncState::Conflicting);
    assert_eq!(r2.values["v"], "x");
    let copy = store
        .row("t", "r2", RowVersion::ServerConflict)
        .unwrap()
        .unwrap();
    assert_eq!(copy.sync_state, RowSyncState::Deleting);
    assert_eq!(copy.values["v"], "y");
    assert!(store.row("t", "r3", RowVersion::Local).unwrap().is_none());
    assert_eq!(local_etag(&store), remote.table_etag("t"));
}

#[test]
fn new_table_is_created_then_filled() {
    let (processor, remote, store) = setup();
    edits::create_table(&*store, TableDefinition::new("t", "T")).unwrap();
    edits::insert_row(&*store, "t", "r1", values("a"), Default::default()).unwrap();
    edits::insert_row(&*store, "t", "r2", values("b"), Default::default()).unwrap();
    remote.fail_next(RemoteOp::InsertRows, Fault::Io);

    let failed = processor.synchronize_table("t", false);
    assert_eq!(failed.status(), Status::Exception);
    assert_eq!(failed.stats.num_skipped_entries, 2);
    let entry = store.table("t").unwrap().unwrap();
    assert_eq!(entry.sync_state, TableSyncState::Inserting);

    let retried = processor.synchronize_table("t", false);
    assert!(retried.is_success(), "{retried:?}");
    assert_eq!(remote.live_rows("t").len(), 2);
    assert_eq!(store.table("t").unwrap().unwrap().sync_state, TableSyncState::Rest);
}

#[test]
fn local_property_edit_wins_over_a_concurrent_server_edit() {
    let (processor, remote, store) = synced_table();
    edits::edit_properties(&*store, "t", vec![KeyValueEntry::table_property("c", "mine")])
        .unwrap();
    remote
        .server_set_properties("t", vec![KeyValueEntry::table_property("c", "theirs")])
        .unwrap();

    let result = processor.synchronize_table("t", false);
    assert!(result.is_success(), "{result:?}");
    assert!(result.had_local_properties_changes);
    assert!(result.pushed_local_properties);
    assert!(!result.pulled_server_properties);
    assert_eq!(remote.properties("t")[0].value, "mine");
    assert_eq!(store.table("t").unwrap().unwrap().properties[0].value, "mine");
    assert_eq!(local_etag(&store), remote.table_etag("t"));

    let calls: Vec<RemoteOp> = remote.calls().into_iter().map(|call| call.op).collect();
    assert_eq!(
        calls,
        vec![RemoteOp::SetTableProperties, RemoteOp::GetUpdates]
    );
}

#[test]
fn property_edit_does_not_hide_rows_from_other_clients() {
    let (processor, remote, store) = synced_table();
    remote.server_put_row("t", SyncRow::new("r9", values("z"))).unwrap();
    edits::edit_properties(&*store, "t", vec![KeyValueEntry::table_property("c", "mine")])
        .unwrap();

    let result = processor.synchronize_table("t", false);
    assert!(result.is_success(), "{result:?}");
    assert!(result.pulled_server_data);
    assert_eq!(result.stats.num_inserts, 1);

    let r9 = local_row(&store, "r9");
    assert_eq!(r9.sync_state, RowSyncState::Rest);
    assert_eq!(r9.values["v"], "z");
    assert_eq!(remote.properties("t")[0].value, "mine");
    assert_eq!(local_etag(&store), remote.table_etag("t"));
    assert_eq!(
        store.table("t").unwrap().unwrap().sync_state,
        TableSyncState::Rest
    );
}

#[test]
fn rows_written_during_a_pass_reach_the_next_pass() {
    let (processor, remote, store) = synced_table();
    edits::edit_properties(&*store, "t", vec![KeyValueEntry::table_property("c", "mine")])
        .unwrap();
    // Another client writes between this device's pull and its properties
    // push; the ETag adopted afterwards must not claim that row was seen.
    let etag = local_etag(&store);
    remote.server_put_row("t", SyncRow::new("r9", values("z"))).unwrap();
    let adopted = remote
        .set_table_properties("t", etag.as_ref(), "t", &[])
        .unwrap();
    assert_eq!(adopted.data_component(), etag.as_ref().and_then(TableETag::data_component));
    store
        .update_table("t", &TablePatch::new().etag(adopted))
        .unwrap();

    assert!(processor.synchronize_table("t", false).is_success());
    assert_eq!(local_row(&store, "r9").values["v"], "z");
}

#[test]
fn stale_in_flight_rows_are_pushed_by_a_single_table_pass() {
    let (processor, remote, store) = synced_table();
    edits::insert_row(&*store, "t", "r3", values("c"), Default::default()).unwrap();
    // Left behind by a pass that died before reaching the server; no
    // whole-run recovery happens before the next single-table pass.
    transaction::begin_table(&*store, "t").unwrap();
    transaction::begin_rows(&*store, "t", &["r3".to_string()]).unwrap();

    let result = processor.synchronize_table("t", false);
    assert_eq!(result.status(), Status::Success, "{result:?}");
    assert!(result.recovered_from_interrupt);
    assert!(result.pushed_local_data);
    assert_eq!(result.stats.num_skipped_entries, 0);

    let r3 = local_row(&store, "r3");
    assert_eq!(r3.sync_state, RowSyncState::Rest);
    assert!(r3.transaction.is_clean());
    assert_eq!(remote.row("t", "r3").unwrap().values["v"], "c");
    assert!(transaction::interrupted(&*store).unwrap().is_empty());

    let again = processor.synchronize_table("t", false);
    assert!(again.is_success());
    assert!(!again.recovered_from_interrupt);
}

#[test]
fn stale_local_properties_are_replaced_by_newer_server_ones() {
    let (processor, remote, store) = synced_table();
    remote
        .server_set_properties("t", vec![KeyValueEntry::table_property("c", "theirs")])
        .unwrap();

    let result = processor.synchronize_table("t", false);
    assert!(result.pulled_server_properties);
    assert!(!result.pushed_local_properties);
    assert_eq!(store.table("t").unwrap().unwrap().properties[0].value, "theirs");
}

#[test]
fn higher_local_counter_keeps_local_properties() {
    let (processor, remote, store) = setup();
    remote.seed_table(TableDefinition::new("t", "T"));
    remote
        .server_set_properties("t", vec![KeyValueEntry::table_property("c", "theirs")])
        .unwrap();
    let mut entry = TableEntry::from_server(
        TableDefinition::new("t", "T"),
        TableETag::new(Some("1".into()), Some("5".into()), Some("1".into())),
    );
    entry.properties = vec![KeyValueEntry::table_property("c", "mine")];
    store.create_table(entry).unwrap();

    let result = processor.synchronize_table("t", false);
    assert!(result.is_success(), "{result:?}");
    assert!(result.server_had_properties_changes);
    assert!(result.had_local_properties_changes && result.pushed_local_properties);
    assert_eq!(remote.properties("t")[0].value, "mine");
    assert_eq!(store.table("t").unwrap().unwrap().properties[0].value, "mine");
    assert_eq!(local_etag(&store), remote.table_etag("t"));
}

#[test]
fn schema_change_is_reported_not_applied() {
    let (processor, remote, store) = synced_table();
    remote
        .server_alter_schema(TableDefinition::new("t", "Renamed"))
        .unwrap();

    let result = processor.synchronize_table("t", false);
    assert!(result.is_success());
    assert!(result.server_had_schema_changes);
    assert!(!result.pulled_server_schema);
    assert_eq!(store.table("t").unwrap().unwrap().display_name(), "T");
}

#[test]
fn deleted_table_reaches_remote() {
    let (processor, remote, store) = synced_table();
    edits::delete_table(&*store, "t").unwrap();

    let run = processor.synchronize();
    assert!(run.is_success());
    assert_eq!(run.stats().num_deletes, 1);
    assert!(store.table("t").unwrap().is_none());
    assert!(remote.table_ids().is_empty());
}

#[test]
fn one_failing_table_does_not_stop_the_run() {
    let (processor, remote, store) = setup();
    for id in ["a", "b"] {
        edits::create_table(&*store, TableDefinition::new(id, id)).unwrap();
    }
    remote.fail_next(RemoteOp::CreateTable, Fault::Server);

    let run = processor.synchronize();
    assert_eq!(run.table_results.len(), 2);
    assert_eq!(run.table("a").unwrap().status(), Status::Exception);
    assert!(run.table("b").unwrap().is_success());
    assert!(!run.auth_required());
}

#[test]
fn incomplete_rows_wait_until_complete() {
    let (processor, remote, store) = synced_table();
    edits::insert_row(&*store, "t", "draft", values("d"), Default::default()).unwrap();
    edits::set_saved(&*store, "t", "draft", tabsync_store::SavedStatus::Incomplete).unwrap();

    assert!(processor.synchronize_table("t", false).is_success());
    assert!(remote.row("t", "draft").is_none());

    edits::set_saved(&*store, "t", "draft", tabsync_store::SavedStatus::Complete).unwrap();
    assert!(processor.synchronize_table("t", false).is_success());
    assert!(remote.row("t", "draft").is_some());
}

#[test]
fn file_store_survives_between_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let remote = Arc::new(MemoryRemote::new());
    remote.seed_table(TableDefinition::new("t", "T"));
    remote.server_put_row("t", SyncRow::new("r1", values("a"))).unwrap();

    {
        let store = Arc::new(FileStore::open(&path).unwrap());
        let processor = SyncProcessor::new(SyncConfig::default(), remote.clone(), store);
        assert!(processor.download_table("t").is_success());
    }

    let store = Arc::new(FileStore::open(&path).unwrap());
    let row = store.row("t", "r1", RowVersion::Local).unwrap().unwrap();
    assert_eq!(row.sync_state, RowSyncState::Rest);
    assert_eq!(store.table("t").unwrap().unwrap().etag, remote.table_etag("t"));
    assert_eq!(
        store.table("t").unwrap().unwrap().transaction,
        TransactionMarker::Clean
    );
}
