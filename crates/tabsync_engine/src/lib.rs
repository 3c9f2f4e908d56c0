//! # tabsync engine
//!
//! Table synchronization between a local store and a remote table service.
//!
//! This crate provides:
//! - [`SyncProcessor`], which runs one pass per table
//! - [`Synchronizer`], the port to the remote service, and [`MemoryRemote`]
//! - pull classification ([`pull`]) and batched push ([`push`])
//! - crash markers and startup recovery ([`transaction`])
//! - [`TableResult`] / [`SynchronizationResult`] reporting
//!
//! ## Architecture
//!
//! Every table pass is **pull-then-push**:
//! 1. Fetch server changes since the stored table ETag
//! 2. Classify each incoming row against its local copy and apply the plan
//! 3. Push pending local rows in batches, adopting each returned ETag
//!
//! Tables that are new locally are created on the server first; tables
//! deleted locally are deleted on the server and then dropped.
//!
//! ## Key Invariants
//!
//! - A pending local edit is never overwritten by a pull; a collision keeps
//!   both versions and marks the local row conflicting
//! - A pushed row only leaves its pending state once the server confirms it
//! - Work spanning local and remote mutation is marked in flight first, so
//!   an interrupted run is detectable on the next start
//! - A failing table never stops the run; its error lands on its result
//!
//! ## Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use tabsync_engine::{MemoryRemote, SyncConfig, SyncProcessor};
//! use tabsync_protocol::TableDefinition;
//! use tabsync_store::{edits, MemoryStore};
//!
//! let store = Arc::new(MemoryStore::new());
//! edits::create_table(&*store, TableDefinition::new("people", "People")).unwrap();
//! edits::insert_row(&*store, "people", "r1", BTreeMap::new(), Default::default()).unwrap();
//!
//! let remote = Arc::new(MemoryRemote::new());
//! let processor = SyncProcessor::new(SyncConfig::new("memory://"), remote.clone(), store);
//! let run = processor.synchronize();
//!
//! assert!(run.is_success());
//! assert_eq!(remote.live_rows("people").len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod processor;
pub mod pull;
pub mod push;
mod remote;
mod result;
mod synchronizer;
pub mod transaction;

pub use config::SyncConfig;
pub use error::{FailureKind, SyncError, SyncResult};
pub use processor::SyncProcessor;
pub use pull::RowAction;
pub use push::{PushOutcome, PushPlan, Pusher};
pub use remote::{Fault, MemoryRemote, RemoteCall, RemoteOp, RemoteSnapshot};
pub use result::{Status, SyncStats, SynchronizationResult, TableResult};
pub use synchronizer::Synchronizer;
pub use transaction::{MarkedRow, RecoveryReport};
