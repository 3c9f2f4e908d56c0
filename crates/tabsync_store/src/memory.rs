//! In-memory store for testing.

use crate::error::{StoreError, StoreResult};
use crate::model::{LocalRow, RowVersion, TableEntry};
use crate::store::{LocalStore, RowFilter, RowPatch, TablePatch};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

type RowKey = (String, RowVersion);

#[derive(Debug, Clone)]
struct TableData {
    entry: TableEntry,
    rows: BTreeMap<RowKey, LocalRow>,
}

/// An in-memory store.
///
/// Suitable for unit tests, integration tests and as the working set of
/// [`crate::FileStore`].
///
/// # Thread Safety
///
/// All state sits behind one lock; the store can be shared across threads.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<BTreeMap<String, TableData>>,
}

/// Serializable copy of a whole store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Tables in id order.
    pub tables: Vec<TableSnapshot>,
}

/// Serializable copy of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSnapshot {
    /// Table bookkeeping.
    pub entry: TableEntry,
    /// Rows in `(row_id, version)` order.
    pub rows: Vec<LocalRow>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a store from a snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let tables = snapshot
            .tables
            .into_iter()
            .map(|table| {
                let rows = table
                    .rows
                    .into_iter()
                    .map(|row| ((row.row_id.clone(), row.version), row))
                    .collect();
                (
                    table.entry.table_id().to_string(),
                    TableData {
                        entry: table.entry,
                        rows,
                    },
                )
            })
            .collect();
        Self {
            tables: RwLock::new(tables),
        }
    }

    /// Replaces the whole store with a snapshot.
    pub fn restore(&self, snapshot: StoreSnapshot) {
        let restored = Self::from_snapshot(snapshot);
        *self.tables.write() = restored.tables.into_inner();
    }

    /// Copies the whole store.
    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        let tables = self
            .tables
            .read()
            .values()
            .map(|data| TableSnapshot {
                entry: data.entry.clone(),
                rows: data.rows.values().cloned().collect(),
            })
            .collect();
        StoreSnapshot { tables }
    }

    fn with_table<R>(
        &self,
        table_id: &str,
        f: impl FnOnce(&TableData) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let tables = self.tables.read();
        let data = tables
            .get(table_id)
            .ok_or_else(|| StoreError::TableNotFound(table_id.to_string()))?;
        f(data)
    }

    fn with_table_mut<R>(
        &self,
        table_id: &str,
        f: impl FnOnce(&mut TableData) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let mut tables = self.tables.write();
        let data = tables
            .get_mut(table_id)
            .ok_or_else(|| StoreError::TableNotFound(table_id.to_string()))?;
        f(data)
    }
}

impl LocalStore for MemoryStore {
    fn table_ids(&self) -> StoreResult<Vec<String>> {
        Ok(self.tables.read().keys().cloned().collect())
    }

    fn table(&self, table_id: &str) -> StoreResult<Option<TableEntry>> {
        Ok(self.tables.read().get(table_id).map(|d| d.entry.clone()))
    }

    fn create_table(&self, entry: TableEntry) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let table_id = entry.table_id().to_string();
        if tables.contains_key(&table_id) {
            return Err(StoreError::TableExists(table_id));
        }
        tables.insert(
            table_id,
            TableData {
                entry,
                rows: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn update_table(&self, table_id: &str, patch: &TablePatch) -> StoreResult<()> {
        self.with_table_mut(table_id, |data| {
            patch.apply(&mut data.entry);
            Ok(())
        })
    }

    fn drop_table(&self, table_id: &str) -> StoreResult<bool> {
        Ok(self.tables.write().remove(table_id).is_some())
    }

    fn rows(&self, table_id: &str, filter: &RowFilter) -> StoreResult<Vec<LocalRow>> {
        self.with_table(table_id, |data| {
            Ok(data
                .rows
                .values()
                .filter(|row| filter.matches(row))
                .cloned()
                .collect())
        })
    }

    fn row(
        &self,
        table_id: &str,
        row_id: &str,
        version: RowVersion,
    ) -> StoreResult<Option<LocalRow>> {
        self.with_table(table_id, |data| {
            Ok(data.rows.get(&(row_id.to_string(), version)).cloned())
        })
    }

    fn insert_row(&self, table_id: &str, row: LocalRow) -> StoreResult<()> {
        self.with_table_mut(table_id, |data| {
            let key = (row.row_id.clone(), row.version);
            if data.rows.contains_key(&key) {
                return Err(StoreError::RowExists {
                    table_id: table_id.to_string(),
                    row_id: row.row_id,
                });
            }
            data.rows.insert(key, row);
            Ok(())
        })
    }

    fn update_row(
        &self,
        table_id: &str,
        row_id: &str,
        version: RowVersion,
        patch: &RowPatch,
    ) -> StoreResult<()> {
        self.with_table_mut(table_id, |data| {
            let row = data
                .rows
                .get_mut(&(row_id.to_string(), version))
                .ok_or_else(|| StoreError::RowNotFound {
                    table_id: table_id.to_string(),
                    row_id: row_id.to_string(),
                })?;
            patch.apply(row);
            Ok(())
        })
    }

    fn delete_row(&self, table_id: &str, row_id: &str, version: RowVersion) -> StoreResult<bool> {
        self.with_table_mut(table_id, |data| {
            Ok(data.rows.remove(&(row_id.to_string(), version)).is_some())
        })
    }
}
