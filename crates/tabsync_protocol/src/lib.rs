//! # tabsync protocol
//!
//! Sync protocol types shared by the local store and the sync engine.
//!
//! This crate provides:
//! - [`RowSyncState`] and [`TableSyncState`] with the local-write transition rules
//! - [`TransactionMarker`], the crash-visible "in flight" claim
//! - [`TableETag`] and [`RowETag`] version tags
//! - [`SyncRow`] wire rows and [`TableDefinition`] / [`KeyValueEntry`] metadata
//! - [`IncomingModification`] and [`OutgoingModification`]
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod etag;
mod modification;
mod row;
mod state;
mod table;

pub use error::{ProtocolError, ProtocolResult};
pub use etag::{PropertiesCounter, PropertiesVerdict, RowETag, TableETag};
pub use modification::{IncomingModification, OutgoingModification};
pub use row::{RowMetadata, SyncRow};
pub use state::{DeleteOutcome, RowSyncState, TableSyncState, TransactionMarker};
pub use table::{ColumnDefinition, KeyValueEntry, TableDefinition, TableType};
