//! JSON-file store for persistent local state.

use crate::error::StoreResult;
use crate::memory::{MemoryStore, StoreSnapshot};
use crate::model::{LocalRow, RowVersion, TableEntry};
use crate::store::{LocalStore, RowFilter, RowPatch, TablePatch};
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// A store persisted as one JSON document.
///
/// The working set lives in a [`MemoryStore`]. Every mutation rewrites the
/// file: the snapshot is written to a sibling temp file, synced, then renamed
/// over the target, so a crash leaves either the old or the new document.
///
/// # Thread Safety
///
/// Mutations are serialized by an internal lock held across the write, so
/// the file always reflects a prefix of the mutation order.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use tabsync_protocol::TableDefinition;
/// use tabsync_store::{edits, FileStore};
///
/// let store = FileStore::open(Path::new("local.json")).unwrap();
/// edits::create_table(&store, TableDefinition::new("people", "People")).unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Opens the store at `path`, starting empty if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let inner = if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            let snapshot: StoreSnapshot = serde_json::from_reader(reader)?;
            tracing::debug!(path = %path.display(), tables = snapshot.tables.len(), "loaded store");
            MemoryStore::from_snapshot(snapshot)
        } else {
            MemoryStore::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            inner,
            write_lock: Mutex::new(()),
        })
    }

    /// Returns the path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copies the whole store.
    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        self.inner.snapshot()
    }

    /// Writes the current state to disk.
    pub fn persist(&self) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        self.write_file()
    }

    fn write_file(&self) -> StoreResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &self.inner.snapshot())?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), "persisted store");
        Ok(())
    }

    /// Applies a change and writes it out. If the write fails the change is
    /// undone, so memory never runs ahead of the file.
    fn mutate<R>(&self, f: impl FnOnce(&MemoryStore) -> StoreResult<R>) -> StoreResult<R> {
        let _guard = self.write_lock.lock();
        let before = self.inner.snapshot();
        let result = f(&self.inner)?;
        if let Err(error) = self.write_file() {
            tracing::warn!(path = %self.path.display(), %error, "write failed; change rolled back");
            self.inner.restore(before);
            return Err(error);
        }
        Ok(result)
    }
}

impl LocalStore for FileStore {
    fn table_ids(&self) -> StoreResult<Vec<String>> {
        self.inner.table_ids()
    }

    fn table(&self, table_id: &str) -> StoreResult<Option<TableEntry>> {
        self.inner.table(table_id)
    }

    fn create_table(&self, entry: TableEntry) -> StoreResult<()> {
        self.mutate(|s| s.create_table(entry))
    }

    fn update_table(&self, table_id: &str, patch: &TablePatch) -> StoreResult<()> {
        self.mutate(|s| s.update_table(table_id, patch))
    }

    fn drop_table(&self, table_id: &str) -> StoreResult<bool> {
        self.mutate(|s| s.drop_table(table_id))
    }

    fn rows(&self, table_id: &str, filter: &RowFilter) -> StoreResult<Vec<LocalRow>> {
        self.inner.rows(table_id, filter)
    }

    fn row(
        &self,
        table_id: &str,
        row_id: &str,
        version: RowVersion,
    ) -> StoreResult<Option<LocalRow>> {
        self.inner.row(table_id, row_id, version)
    }

    fn insert_row(&self, table_id: &str, row: LocalRow) -> StoreResult<()> {
        self.mutate(|s| s.insert_row(table_id, row))
    }

    fn update_row(
        &self,
        table_id: &str,
        row_id: &str,
        version: RowVersion,
        patch: &RowPatch,
    ) -> StoreResult<()> {
        self.mutate(|s| s.update_row(table_id, row_id, version, patch))
    }

    fn delete_row(&self, table_id: &str, row_id: &str, version: RowVersion) -> StoreResult<bool> {
        self.mutate(|s| s.delete_row(table_id, row_id, version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::collections::BTreeMap;
    use tabsync_protocol::{RowSyncState, TableDefinition, TransactionMarker};
    use tempfile::tempdir;

    #[test]
    fn missing_file_opens_empty() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(&dir.path().join("store.json")).unwrap();
        assert!(store.table_ids().unwrap().is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn failed_write_leaves_memory_unchanged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = FileStore::open(&path).unwrap();
        store
            .create_table(TableEntry::new_local(TableDefinition::new("t", "T")))
            .unwrap();

        // A directory where the temp file goes makes the next write fail.
        let blocker = path.with_extension("json.tmp");
        fs::create_dir(&blocker).unwrap();
        assert!(store
            .insert_row("t", LocalRow::new("r1", BTreeMap::new()))
            .is_err());
        assert!(store.row("t", "r1", RowVersion::Local).unwrap().is_none());
        assert!(store.drop_table("t").is_err());
        assert!(store.table("t").unwrap().is_some());

        fs::remove_dir(&blocker).unwrap();
        store
            .insert_row("t", LocalRow::new("r1", BTreeMap::new()))
            .unwrap();
        let reopened = FileStore::open(&path).unwrap();
        assert!(reopened.row("t", "r1", RowVersion::Local).unwrap().is_some());
    }

    #[test]
    fn mutations_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        {
            let store = FileStore::open(&path).unwrap();
            store
                .create_table(TableEntry::new_local(TableDefinition::new("t", "T")))
                .unwrap();
            store
                .insert_row("t", LocalRow::new("r1", BTreeMap::new()).with_value("a", "1"))
                .unwrap();
            store
                .update_row(
                    "t",
                    "r1",
                    RowVersion::Local,
                    &RowPatch::new().transaction(TransactionMarker::InFlight),
                )
                .unwrap();
        }

        let reopened = FileStore::open(&path).unwrap();
        let row = reopened.row("t", "r1", RowVersion::Local).unwrap().unwrap();
        assert_eq!(row.sync_state, RowSyncState::Inserting);
        assert_eq!(row.transaction, TransactionMarker::InFlight);
        assert_eq!(row.values.get("a").map(String::as_str), Some("1"));
    }

    #[test]
    fn failed_mutation_does_not_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = FileStore::open(&path).unwrap();
        let err = store
            .insert_row("missing", LocalRow::new("r1", BTreeMap::new()))
            .unwrap_err();
        assert!(matches!(err, StoreError::TableNotFound(_)));
        assert!(!path.exists());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(
            FileStore::open(&path),
            Err(StoreError::Serialization(_))
        ));
    }
}
