//! Results of pulling from and pushing to the remote store.

use crate::etag::{RowETag, TableETag};
use crate::row::SyncRow;
use crate::table::{KeyValueEntry, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Changes on the server since a given table ETag.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IncomingModification {
    /// Changed and deleted rows, in server order.
    pub rows: Vec<SyncRow>,
    /// The server's current table ETag.
    pub table_etag: TableETag,
    /// New table definition, present when the schema changed.
    pub table_definition: Option<TableDefinition>,
    /// Full property set, present when the properties changed.
    pub table_properties: Option<Vec<KeyValueEntry>>,
}

impl IncomingModification {
    /// Creates a modification with no changes.
    pub fn unchanged(table_etag: TableETag) -> Self {
        Self {
            rows: Vec::new(),
            table_etag,
            table_definition: None,
            table_properties: None,
        }
    }

    /// Sets the changed rows.
    pub fn with_rows(mut self, rows: Vec<SyncRow>) -> Self {
        self.rows = rows;
        self
    }

    /// Sets the new table definition.
    pub fn with_definition(mut self, definition: TableDefinition) -> Self {
        self.table_definition = Some(definition);
        self
    }

    /// Sets the new property set.
    pub fn with_properties(mut self, properties: Vec<KeyValueEntry>) -> Self {
        self.table_properties = Some(properties);
        self
    }

    /// Returns true if the server reports row changes.
    pub fn has_data_changed(&self) -> bool {
        !self.rows.is_empty()
    }

    /// Returns true if the server reports a schema change.
    pub fn has_schema_changed(&self) -> bool {
        self.table_definition.is_some()
    }

    /// Returns true if the server reports a properties change.
    pub fn has_properties_changed(&self) -> bool {
        self.table_properties.is_some()
    }
}

/// The server's answer to an insert or update batch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutgoingModification {
    /// New ETag for every accepted row.
    pub row_etags: BTreeMap<String, RowETag>,
    /// The server's table ETag after the batch.
    pub table_etag: TableETag,
}

impl OutgoingModification {
    /// Creates a modification carrying only the new table ETag.
    pub fn new(table_etag: TableETag) -> Self {
        Self {
            row_etags: BTreeMap::new(),
            table_etag,
        }
    }

    /// Records the new ETag of a row.
    pub fn with_row_etag(mut self, row_id: impl Into<String>, etag: impl Into<RowETag>) -> Self {
        self.row_etags.insert(row_id.into(), etag.into());
        self
    }

    /// Returns the new ETag of a row, if the server assigned one.
    pub fn row_etag(&self, row_id: &str) -> Option<&RowETag> {
        self.row_etags.get(row_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_flags() {
        let etag = TableETag::new(Some("1".into()), Some("1".into()), Some("1".into()));
        let none = IncomingModification::unchanged(etag.clone());
        assert!(!none.has_data_changed());
        assert!(!none.has_schema_changed());
        assert!(!none.has_properties_changed());

        let some = IncomingModification::unchanged(etag)
            .with_rows(vec![SyncRow::deleted("r1", None)])
            .with_properties(vec![KeyValueEntry::table_property("color", "red")]);
        assert!(some.has_data_changed());
        assert!(some.has_properties_changed());
        assert!(!some.has_schema_changed());
    }

    #[test]
    fn outgoing_lookup() {
        let modification = OutgoingModification::new(TableETag::default()).with_row_etag("r1", "e9");
        assert_eq!(modification.row_etag("r1"), Some(&RowETag::new("e9")));
        assert_eq!(modification.row_etag("r2"), None);
    }
}
