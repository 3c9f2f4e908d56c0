//! # tabsync store
//!
//! Local row and table store for tabsync.
//!
//! The sync engine never talks to a storage engine directly. It needs four
//! capabilities, expressed by [`LocalStore`]:
//!
//! - query rows filtered by sync state, completeness and version
//! - insert, update and delete a row by id with an explicit value map
//! - read and write a table's ETag, sync state and transaction marker
//! - read and write a table's property entries
//!
//! ## Available stores
//!
//! - [`MemoryStore`] - For testing and ephemeral use
//! - [`FileStore`] - Write-through JSON snapshot on disk
//!
//! Local writes made by the application (as opposed to the sync engine) go
//! through [`edits`], which applies the row and table state rules.
//!
//! ## Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use tabsync_protocol::{RowSyncState, TableDefinition};
//! use tabsync_store::{edits, LocalStore, MemoryStore, RowVersion};
//!
//! let store = MemoryStore::new();
//! edits::create_table(&store, TableDefinition::new("people", "People")).unwrap();
//! edits::insert_row(&store, "people", "r1", BTreeMap::new(), Default::default()).unwrap();
//!
//! let row = store.row("people", "r1", RowVersion::Local).unwrap().unwrap();
//! assert_eq!(row.sync_state, RowSyncState::Inserting);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod edits;
mod error;
mod file;
mod memory;
mod model;
mod store;

pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use memory::{MemoryStore, StoreSnapshot, TableSnapshot};
pub use model::{LocalRow, RowVersion, SavedStatus, TableEntry};
pub use store::{LocalStore, RowFilter, RowPatch, TablePatch};
