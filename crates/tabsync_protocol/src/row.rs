//! Rows as exchanged with the remote store.

use crate::etag::RowETag;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Admin columns synchronized alongside user data.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RowMetadata {
    /// Access-control string.
    pub access_control: Option<String>,
    /// Id of the form that produced the row.
    pub form_id: Option<String>,
    /// Locale the row was captured in.
    pub locale: Option<String>,
    /// Savepoint timestamp in milliseconds.
    pub savepoint_timestamp: Option<i64>,
}

/// A row on the wire.
///
/// Incoming rows carry the server's ETag. Outgoing rows carry the ETag the
/// local copy was based on, or none for a row the server never accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRow {
    /// Stable row identifier.
    pub row_id: String,
    /// Row version tag.
    pub row_etag: Option<RowETag>,
    /// True if this row reports a deletion.
    pub deleted: bool,
    /// Admin columns.
    #[serde(default)]
    pub metadata: RowMetadata,
    /// Column key to string-encoded value.
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

impl SyncRow {
    /// Creates a live row with the given values.
    pub fn new(row_id: impl Into<String>, values: BTreeMap<String, String>) -> Self {
        Self {
            row_id: row_id.into(),
            row_etag: None,
            deleted: false,
            metadata: RowMetadata::default(),
            values,
        }
    }

    /// Creates a deletion record.
    pub fn deleted(row_id: impl Into<String>, row_etag: Option<RowETag>) -> Self {
        Self {
            row_id: row_id.into(),
            row_etag,
            deleted: true,
            metadata: RowMetadata::default(),
            values: BTreeMap::new(),
        }
    }

    /// Sets the row ETag.
    pub fn with_etag(mut self, row_etag: impl Into<RowETag>) -> Self {
        self.row_etag = Some(row_etag.into());
        self
    }

    /// Sets the admin columns.
    pub fn with_metadata(mut self, metadata: RowMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sets a single column value.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}
