//! In-memory authoritative remote store.
//!
//! [`MemoryRemote`] behaves like a table server: it issues row and table
//! ETags, answers change queries relative to a table ETag and rejects pushes
//! made against a stale one. It records every call and can fail the next call
//! of a given kind, which makes it the network double for engine tests. The
//! CLI persists it as a JSON snapshot to stand in for a real server.

use crate::error::{SyncError, SyncResult};
use crate::synchronizer::Synchronizer;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tabsync_protocol::{
    IncomingModification, KeyValueEntry, OutgoingModification, RowETag, SyncRow, TableDefinition,
    TableETag,
};
use uuid::Uuid;

/// A remote operation, for call recording and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RemoteOp {
    /// `get_updates`
    GetUpdates,
    /// `insert_rows`
    InsertRows,
    /// `update_rows`
    UpdateRows,
    /// `delete_rows`
    DeleteRows,
    /// `create_table`
    CreateTable,
    /// `delete_table`
    DeleteTable,
    /// `set_table_properties`
    SetTableProperties,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    /// Which operation.
    pub op: RemoteOp,
    /// Target table.
    pub table_id: String,
    /// Row ids carried by the call, if any.
    pub row_ids: Vec<String>,
}

/// A failure the remote can be told to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Connection dropped.
    Io,
    /// Credentials rejected.
    Authorization,
    /// Server-side error.
    Server,
}

impl Fault {
    fn into_error(self, op: RemoteOp) -> SyncError {
        match self {
            Fault::Io => SyncError::transport_retryable(format!("connection reset during {op:?}")),
            Fault::Authorization => SyncError::AuthenticationFailed("token expired".to_string()),
            Fault::Server => SyncError::ServerError(format!("internal error during {op:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredRow {
    row: SyncRow,
    changed_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RemoteTable {
    definition: TableDefinition,
    #[serde(default)]
    properties: Vec<KeyValueEntry>,
    data_version: u64,
    properties_version: u64,
    schema_version: u64,
    #[serde(default)]
    rows: BTreeMap<String, StoredRow>,
}

impl RemoteTable {
    fn new(definition: TableDefinition) -> Self {
        Self {
            definition,
            properties: Vec::new(),
            data_version: 1,
            properties_version: 1,
            schema_version: 1,
            rows: BTreeMap::new(),
        }
    }

    fn etag(&self) -> TableETag {
        TableETag::new(
            Some(self.data_version.to_string()),
            Some(self.properties_version.to_string()),
            Some(self.schema_version.to_string()),
        )
    }

    fn check_etag(&self, given: Option<&TableETag>) -> SyncResult<()> {
        let current = self.data_version.to_string();
        match given.and_then(TableETag::data_component) {
            Some(data) if data == current => Ok(()),
            other => Err(SyncError::ServerError(format!(
                "stale table etag for {}: server is at {current}, request carried {}",
                self.definition.table_id,
                other.unwrap_or("none")
            ))),
        }
    }

    fn live_row(&self, row_id: &str) -> Option<&StoredRow> {
        self.rows.get(row_id).filter(|stored| !stored.row.deleted)
    }

    fn write_row(&mut self, mut row: SyncRow) -> RowETag {
        let etag = RowETag::new(Uuid::new_v4().to_string());
        row.row_etag = Some(etag.clone());
        self.rows.insert(
            row.row_id.clone(),
            StoredRow {
                row,
                changed_at: self.data_version,
            },
        );
        etag
    }

    fn tombstone(&mut self, row_id: &str) -> bool {
        let Some(stored) = self.rows.get(row_id).filter(|s| !s.row.deleted).cloned() else {
            return false;
        };
        let mut row = stored.row;
        row.deleted = true;
        self.write_row(row);
        true
    }
}

/// Serializable copy of a [`MemoryRemote`]'s tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    tables: BTreeMap<String, RemoteTable>,
}

#[derive(Debug, Default)]
struct RemoteState {
    tables: BTreeMap<String, RemoteTable>,
    calls: Vec<RemoteCall>,
    faults: BTreeMap<RemoteOp, Fault>,
}

impl RemoteState {
    fn enter(&mut self, op: RemoteOp, table_id: &str, row_ids: Vec<String>) -> SyncResult<()> {
        self.calls.push(RemoteCall {
            op,
            table_id: table_id.to_string(),
            row_ids,
        });
        match self.faults.remove(&op) {
            Some(fault) => Err(fault.into_error(op)),
            None => Ok(()),
        }
    }

    fn table(&self, table_id: &str) -> SyncResult<&RemoteTable> {
        self.tables
            .get(table_id)
            .ok_or_else(|| missing_table(table_id))
    }

    fn table_mut(&mut self, table_id: &str) -> SyncResult<&mut RemoteTable> {
        self.tables
            .get_mut(table_id)
            .ok_or_else(|| missing_table(table_id))
    }
}

fn missing_table(table_id: &str) -> SyncError {
    SyncError::ServerError(format!("table {table_id} does not exist on the server"))
}

fn ids_of(rows: &[SyncRow]) -> Vec<String> {
    rows.iter().map(|r| r.row_id.clone()).collect()
}

/// An in-memory authoritative remote store.
///
/// # Thread Safety
///
/// All state sits behind one mutex; each call is atomic.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
}

impl MemoryRemote {
    /// Creates an empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a remote from a snapshot.
    pub fn from_snapshot(snapshot: RemoteSnapshot) -> Self {
        Self {
            state: Mutex::new(RemoteState {
                tables: snapshot.tables,
                ..RemoteState::default()
            }),
        }
    }

    /// Copies the remote's tables.
    pub fn snapshot(&self) -> RemoteSnapshot {
        RemoteSnapshot {
            tables: self.state.lock().tables.clone(),
        }
    }

    /// Makes the next call of `op` fail with `fault`.
    pub fn fail_next(&self, op: RemoteOp, fault: Fault) {
        self.state.lock().faults.insert(op, fault);
    }

    /// Returns every call made so far.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    /// Returns the calls of one kind.
    pub fn calls_of(&self, op: RemoteOp) -> Vec<RemoteCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Returns the ids of all tables.
    pub fn table_ids(&self) -> Vec<String> {
        self.state.lock().tables.keys().cloned().collect()
    }

    /// Returns a table's current ETag.
    pub fn table_etag(&self, table_id: &str) -> Option<TableETag> {
        self.state.lock().tables.get(table_id).map(RemoteTable::etag)
    }

    /// Returns a table's definition.
    pub fn definition(&self, table_id: &str) -> Option<TableDefinition> {
        self.state
            .lock()
            .tables
            .get(table_id)
            .map(|t| t.definition.clone())
    }

    /// Returns a table's property entries.
    pub fn properties(&self, table_id: &str) -> Vec<KeyValueEntry> {
        self.state
            .lock()
            .tables
            .get(table_id)
            .map(|t| t.properties.clone())
            .unwrap_or_default()
    }

    /// Returns a row, including a deleted tombstone.
    pub fn row(&self, table_id: &str, row_id: &str) -> Option<SyncRow> {
        self.state
            .lock()
            .tables
            .get(table_id)
            .and_then(|t| t.rows.get(row_id))
            .map(|s| s.row.clone())
    }

    /// Returns the rows that are not deleted, in id order.
    pub fn live_rows(&self, table_id: &str) -> Vec<SyncRow> {
        self.state
            .lock()
            .tables
            .get(table_id)
            .map(|t| {
                t.rows
                    .values()
                    .filter(|s| !s.row.deleted)
                    .map(|s| s.row.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Creates a table as another client would, without recording a call.
    pub fn seed_table(&self, definition: TableDefinition) -> TableETag {
        let mut state = self.state.lock();
        let table_id = definition.table_id.clone();
        state
            .tables
            .entry(table_id)
            .or_insert_with(|| RemoteTable::new(definition))
            .etag()
    }

    /// Writes a row as another client would, ignoring ETags.
    pub fn server_put_row(&self, table_id: &str, row: SyncRow) -> SyncResult<RowETag> {
        let mut state = self.state.lock();
        let table = state.table_mut(table_id)?;
        table.data_version += 1;
        Ok(table.write_row(SyncRow {
            deleted: false,
            ..row
        }))
    }

    /// Deletes a row as another client would.
    pub fn server_delete_row(&self, table_id: &str, row_id: &str) -> SyncResult<bool> {
        let mut state = self.state.lock();
        let table = state.table_mut(table_id)?;
        if table.live_row(row_id).is_none() {
            return Ok(false);
        }
        table.data_version += 1;
        Ok(table.tombstone(row_id))
    }

    /// Replaces properties as another client would.
    pub fn server_set_properties(
        &self,
        table_id: &str,
        properties: Vec<KeyValueEntry>,
    ) -> SyncResult<TableETag> {
        let mut state = self.state.lock();
        let table = state.table_mut(table_id)?;
        table.properties = properties;
        table.properties_version += 1;
        Ok(table.etag())
    }

    /// Replaces the definition as another client would.
    pub fn server_alter_schema(
        &self,
        definition: TableDefinition,
    ) -> SyncResult<TableETag> {
        let mut state = self.state.lock();
        let table = state.table_mut(&definition.table_id)?;
        table.definition = definition;
        table.schema_version += 1;
        Ok(table.etag())
    }
}

impl Synchronizer for MemoryRemote {
    fn get_updates(
        &self,
        table_id: &str,
        since: Option<&TableETag>,
    ) -> SyncResult<IncomingModification> {
        let mut state = self.state.lock();
        state.enter(RemoteOp::GetUpdates, table_id, Vec::new())?;
        let table = state.table(table_id)?;

        let since_data = since
            .and_then(TableETag::data_component)
            .and_then(|d| d.parse::<u64>().ok());
        let mut changed: Vec<&StoredRow> = table
            .rows
            .values()
            .filter(|s| match since_data {
                Some(at) => s.changed_at > at,
                None => !s.row.deleted,
            })
            .collect();
        changed.sort_by(|a, b| {
            a.changed_at
                .cmp(&b.changed_at)
                .then_with(|| a.row.row_id.cmp(&b.row.row_id))
        });

        let etag = table.etag();
        let mut modification = IncomingModification::unchanged(etag.clone())
            .with_rows(changed.into_iter().map(|s| s.row.clone()).collect());
        let since_schema = since.and_then(TableETag::schema_component);
        if since_schema != etag.schema_component() {
            modification = modification.with_definition(table.definition.clone());
        }
        let since_properties = since.and_then(TableETag::properties_component);
        if since_properties != etag.properties_component() {
            modification = modification.with_properties(table.properties.clone());
        }
        Ok(modification)
    }

    fn insert_rows(
        &self,
        table_id: &str,
        table_etag: Option<&TableETag>,
        rows: &[SyncRow],
    ) -> SyncResult<OutgoingModification> {
        let mut state = self.state.lock();
        state.enter(RemoteOp::InsertRows, table_id, ids_of(rows))?;
        let table = state.table_mut(table_id)?;
        table.check_etag(table_etag)?;
        if let Some(dup) = rows.iter().find(|r| table.live_row(&r.row_id).is_some()) {
            return Err(SyncError::ServerError(format!(
                "row {} already exists in {table_id}",
                dup.row_id
            )));
        }
        if rows.is_empty() {
            return Ok(OutgoingModification::new(table.etag()));
        }

        table.data_version += 1;
        let mut row_etags = BTreeMap::new();
        for row in rows {
            let etag = table.write_row(SyncRow {
                deleted: false,
                ..row.clone()
            });
            row_etags.insert(row.row_id.clone(), etag);
        }
        Ok(OutgoingModification {
            row_etags,
            table_etag: table.etag(),
        })
    }

    fn update_rows(
        &self,
        table_id: &str,
        table_etag: Option<&TableETag>,
        rows: &[SyncRow],
    ) -> SyncResult<OutgoingModification> {
        let mut state = self.state.lock();
        state.enter(RemoteOp::UpdateRows, table_id, ids_of(rows))?;
        let table = state.table_mut(table_id)?;
        table.check_etag(table_etag)?;
        for row in rows {
            let current = table.live_row(&row.row_id).map(|s| &s.row.row_etag);
            if current != Some(&row.row_etag) {
                return Err(SyncError::ServerError(format!(
                    "row {} in {table_id} does not match the server version",
                    row.row_id
                )));
            }
        }
        if rows.is_empty() {
            return Ok(OutgoingModification::new(table.etag()));
        }

        table.data_version += 1;
        let mut row_etags = BTreeMap::new();
        for row in rows {
            let etag = table.write_row(row.clone());
            row_etags.insert(row.row_id.clone(), etag);
        }
        Ok(OutgoingModification {
            row_etags,
            table_etag: table.etag(),
        })
    }

    fn delete_rows(
        &self,
        table_id: &str,
        table_etag: Option<&TableETag>,
        row_ids: &[String],
    ) -> SyncResult<TableETag> {
        let mut state = self.state.lock();
        state.enter(RemoteOp::DeleteRows, table_id, row_ids.to_vec())?;
        let table = state.table_mut(table_id)?;
        table.check_etag(table_etag)?;
        if row_ids.iter().any(|id| table.live_row(id).is_some()) {
            table.data_version += 1;
            for row_id in row_ids {
                table.tombstone(row_id);
            }
        }
        Ok(table.etag())
    }

    fn create_table(&self, definition: &TableDefinition) -> SyncResult<TableETag> {
        let mut state = self.state.lock();
        state.enter(RemoteOp::CreateTable, &definition.table_id, Vec::new())?;
        if let Some(existing) = state.tables.get(&definition.table_id) {
            if existing.definition == *definition {
                return Ok(existing.etag());
            }
            return Err(SyncError::ServerError(format!(
                "table {} already exists with a different definition",
                definition.table_id
            )));
        }
        let table = RemoteTable::new(definition.clone());
        let etag = table.etag();
        state.tables.insert(definition.table_id.clone(), table);
        Ok(etag)
    }

    fn delete_table(&self, table_id: &str) -> SyncResult<()> {
        let mut state = self.state.lock();
        state.enter(RemoteOp::DeleteTable, table_id, Vec::new())?;
        state.tables.remove(table_id);
        Ok(())
    }

    /// The returned tag carries the caller's data component, so rows other
    /// clients wrote since the caller's last pull still show up in its next one.
    fn set_table_properties(
        &self,
        table_id: &str,
        table_etag: Option<&TableETag>,
        table_key: &str,
        properties: &[KeyValueEntry],
    ) -> SyncResult<TableETag> {
        let mut state = self.state.lock();
        state.enter(RemoteOp::SetTableProperties, table_id, Vec::new())?;
        let table = state.table_mut(table_id)?;
        if table.definition.table_key != table_key {
            return Err(SyncError::ServerError(format!(
                "table key {table_key} does not match {table_id}"
            )));
        }
        table.properties = properties.to_vec();
        table.properties_version += 1;
        let current = table.etag();
        let data = table_etag
            .and_then(TableETag::data_component)
            .or(current.data_component())
            .map(str::to_string);
        Ok(TableETag::new(
            data,
            current.properties_component().map(str::to_string),
            current.schema_component().map(str::to_string),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote_with_table() -> (MemoryRemote, TableETag) {
        let remote = MemoryRemote::new();
        let etag = remote.seed_table(TableDefinition::new("t", "T"));
        (remote, etag)
    }

    fn row(id: &str, v: &str) -> SyncRow {
        SyncRow::new(id, BTreeMap::new()).with_value("v", v)
    }

    #[test]
    fn insert_then_query_changes() {
        let (remote, etag) = remote_with_table();
        let out = remote.insert_rows("t", Some(&etag), &[row("r1", "a")]).unwrap();
        assert!(out.row_etag("r1").is_some());
        assert_ne!(out.table_etag, etag);

        let since_start = remote.get_updates("t", Some(&etag)).unwrap();
        assert_eq!(since_start.rows.len(), 1);
        assert!(!since_start.has_properties_changed());

        let since_now = remote.get_updates("t", Some(&out.table_etag)).unwrap();
        assert!(since_now.rows.is_empty());
        assert_eq!(since_now.table_etag, out.table_etag);
    }

    #[test]
    fn full_download_includes_definition_and_properties() {
        let (remote, _) = remote_with_table();
        let incoming = remote.get_updates("t", None).unwrap();
        assert!(incoming.has_schema_changed());
        assert!(incoming.has_properties_changed());
    }

    #[test]
    fn stale_etag_is_rejected() {
        let (remote, etag) = remote_with_table();
        remote.server_put_row("t", row("r1", "a")).unwrap();
        let err = remote.insert_rows("t", Some(&etag), &[row("r2", "b")]).unwrap_err();
        assert!(matches!(err, SyncError::ServerError(_)));
        assert!(remote.insert_rows("t", None, &[row("r2", "b")]).is_err());
    }

    #[test]
    fn update_requires_current_row_etag() {
        let (remote, etag) = remote_with_table();
        let out = remote.insert_rows("t", Some(&etag), &[row("r1", "a")]).unwrap();
        let stale = row("r1", "b").with_etag("wrong");
        assert!(remote
            .update_rows("t", Some(&out.table_etag), &[stale])
            .is_err());

        let good = row("r1", "b").with_etag(out.row_etag("r1").unwrap().clone());
        let out2 = remote.update_rows("t", Some(&out.table_etag), &[good]).unwrap();
        assert_ne!(out2.row_etag("r1"), out.row_etag("r1"));
        assert_eq!(
            remote.row("t", "r1").unwrap().values.get("v").map(String::as_str),
            Some("b")
        );
    }

    #[test]
    fn deletes_leave_tombstones() {
        let (remote, etag) = remote_with_table();
        let out = remote.insert_rows("t", Some(&etag), &[row("r1", "a")]).unwrap();
        let after = remote
            .delete_rows("t", Some(&out.table_etag), &["r1".to_string()])
            .unwrap();
        assert!(remote.live_rows("t").is_empty());
        let changes = remote.get_updates("t", Some(&out.table_etag)).unwrap();
        assert_eq!(changes.rows.len(), 1);
        assert!(changes.rows[0].deleted);

        let unchanged = remote
            .delete_rows("t", Some(&after), &["r1".to_string()])
            .unwrap();
        assert_eq!(unchanged, after);
    }

    #[test]
    fn empty_batch_does_not_advance() {
        let (remote, etag) = remote_with_table();
        let out = remote.insert_rows("t", Some(&etag), &[]).unwrap();
        assert_eq!(out.table_etag, etag);
    }

    #[test]
    fn properties_bump_counter() {
        let (remote, etag) = remote_with_table();
        let after = remote
            .set_table_properties("t", Some(&etag), "t", &[KeyValueEntry::table_property("k", "v")])
            .unwrap();
        assert_eq!(after.properties_component(), Some("2"));
        assert_eq!(after.data_component(), etag.data_component());
        assert!(remote
            .set_table_properties("t", Some(&after), "other", &[])
            .is_err());
    }

    #[test]
    fn properties_tag_keeps_the_callers_data_component() {
        let (remote, etag) = remote_with_table();
        remote.server_put_row("t", row("r1", "other client")).unwrap();

        let after = remote.set_table_properties("t", Some(&etag), "t", &[]).unwrap();
        assert_eq!(after.data_component(), etag.data_component());
        assert_eq!(after.properties_component(), Some("2"));

        let updates = remote.get_updates("t", Some(&after)).unwrap();
        assert_eq!(updates.rows.len(), 1);
        assert_eq!(updates.rows[0].row_id, "r1");
    }

    #[test]
    fn create_table_is_idempotent_for_same_definition() {
        let remote = MemoryRemote::new();
        let definition = TableDefinition::new("t", "T");
        let first = remote.create_table(&definition).unwrap();
        assert_eq!(remote.create_table(&definition).unwrap(), first);
        assert!(remote.create_table(&TableDefinition::new("t", "Other")).is_err());
    }

    #[test]
    fn faults_fire_once_and_calls_are_recorded() {
        let (remote, etag) = remote_with_table();
        remote.fail_next(RemoteOp::GetUpdates, Fault::Authorization);
        assert!(matches!(
            remote.get_updates("t", Some(&etag)),
            Err(SyncError::AuthenticationFailed(_))
        ));
        assert!(remote.get_updates("t", Some(&etag)).is_ok());
        assert_eq!(remote.calls_of(RemoteOp::GetUpdates).len(), 2);
    }

    #[test]
    fn snapshot_round_trip_keeps_tables() {
        let (remote, etag) = remote_with_table();
        remote.insert_rows("t", Some(&etag), &[row("r1", "a")]).unwrap();
        let restored = MemoryRemote::from_snapshot(remote.snapshot());
        assert_eq!(restored.table_etag("t"), remote.table_etag("t"));
        assert_eq!(restored.live_rows("t"), remote.live_rows("t"));
        assert!(restored.calls().is_empty());
    }
}
