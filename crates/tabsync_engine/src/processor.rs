//! The sync processor: one pass per table, pull before push.

use crate::config::SyncConfig;
use crate::error::{FailureKind, SyncError, SyncResult};
use crate::pull::{self, RowAction};
use crate::push::{adopt_table_etag, PushOutcome, PushPlan, Pusher};
use crate::result::{SynchronizationResult, TableResult};
use crate::synchronizer::Synchronizer;
use crate::transaction::{self, RecoveryReport};
use std::sync::Arc;
use tabsync_protocol::{
    PropertiesVerdict, TableDefinition, TableETag, TableSyncState, TransactionMarker,
};
use tabsync_store::{LocalStore, RowFilter, RowVersion, TableEntry, TablePatch};

/// Reconciles local tables against the remote store.
///
/// A pass over one table never returns an error: failures end up on the
/// table's [`TableResult`], and a whole run moves on to the next table.
///
/// # Ordering
///
/// - table marked in flight before any remote call, cleared afterwards
/// - pull fully completes before push starts
/// - inserts, then updates, then deletes; each answer applied at once
/// - the stored table ETag is only ever a value the remote returned
///
/// Runs must be serialized by the caller; the crash markers make an
/// interrupted run visible, they do not lock out a concurrent one.
pub struct SyncProcessor<R: ?Sized, L: ?Sized> {
    config: SyncConfig,
    remote: Arc<R>,
    store: Arc<L>,
}

impl<R, L> SyncProcessor<R, L>
where
    R: Synchronizer + ?Sized,
    L: LocalStore + ?Sized,
{
    /// Creates a processor.
    pub fn new(config: SyncConfig, remote: Arc<R>, store: Arc<L>) -> Self {
        Self {
            config,
            remote,
            store,
        }
    }

    /// The configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The local store.
    pub fn store(&self) -> &L {
        &self.store
    }

    /// The remote store.
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Moves markers left by an interrupted run to `NeedsVerification`.
    pub fn recover(&self) -> SyncResult<RecoveryReport> {
        transaction::recover_interrupted(&*self.store)
    }

    /// Runs one pass over every table selected for sync, in id order.
    pub fn synchronize(&self) -> SynchronizationResult {
        tracing::info!(server = %self.config.server_url, app = %self.config.app_name, "starting sync run");
        let mut run = SynchronizationResult::default();

        if self.config.recover_on_start {
            match self.recover() {
                Ok(report) => run.recovery = Some(report),
                Err(error) => tracing::error!(?error, "crash recovery failed"),
            }
        }

        let table_ids = match self.tables_to_sync() {
            Ok(ids) => ids,
            Err(error) => {
                tracing::error!(?error, "could not list local tables");
                return run;
            }
        };
        for table_id in table_ids {
            run.table_results.push(self.synchronize_table(&table_id, false));
        }

        let stats = run.stats();
        tracing::info!(
            tables = run.table_results.len(),
            conflicts = stats.num_conflicts_detected,
            auth_required = run.auth_required(),
            "sync run finished"
        );
        run
    }

    /// Downloads a table the device does not have yet.
    ///
    /// A placeholder is created if needed and the first pass rebuilds it
    /// from the server's definition. A table that already holds a server
    /// ETag gets an ordinary pass instead, so local work is never dropped.
    /// A table with pending table-level work cannot be downloaded.
    pub fn download_table(&self, table_id: &str) -> TableResult {
        let placeholder = TableEntry::placeholder(TableDefinition::new(table_id, table_id));
        match self.store.table(table_id) {
            Ok(Some(entry)) if entry.sync_state != TableSyncState::Rest => {
                let mut result = TableResult::new(table_id, entry.display_name());
                let error = SyncError::InvalidStateTransition {
                    from: entry.sync_state.to_string(),
                    to: "download".to_string(),
                };
                self.record_error(&mut result, &error);
                return result;
            }
            Ok(Some(entry)) if entry.etag.is_some() => {
                return self.synchronize_table(table_id, false);
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                if let Err(error) = self.store.create_table(placeholder) {
                    let mut result = TableResult::new(table_id, table_id);
                    self.record_error(&mut result, &error.into());
                    return result;
                }
            }
            Err(error) => {
                let mut result = TableResult::new(table_id, table_id);
                self.record_error(&mut result, &error.into());
                return result;
            }
        }
        self.synchronize_table(table_id, true)
    }

    /// Runs one pass over one table.
    ///
    /// `first_download` only matters for a table at rest: the server's
    /// definition then replaces the local placeholder, and server properties
    /// win unconditionally.
    pub fn synchronize_table(&self, table_id: &str, first_download: bool) -> TableResult {
        let span = tracing::info_span!("sync_table", table_id);
        let _enter = span.enter();

        let entry = match self.store.table(table_id) {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                let mut result = TableResult::new(table_id, table_id);
                result.record_failure(format!("table {table_id} does not exist locally"));
                tracing::warn!("table does not exist locally");
                return result;
            }
            Err(error) => {
                let mut result = TableResult::new(table_id, table_id);
                self.record_error(&mut result, &error.into());
                return result;
            }
        };

        let mut result = TableResult::new(table_id, entry.display_name());
        let outcome = self.run_table(&entry, first_download, &mut result);
        if let Err(error) = &outcome {
            self.record_error(&mut result, error);
        }
        if let Err(error) = transaction::end_table(&*self.store, table_id, outcome.is_ok()) {
            self.record_error(&mut result, &error);
        }

        tracing::info!(
            status = %result.status(),
            inserts = result.stats.num_inserts,
            updates = result.stats.num_updates,
            deletes = result.stats.num_deletes,
            conflicts = result.stats.num_conflicts_detected,
            "table pass finished"
        );
        result
    }

    fn tables_to_sync(&self) -> SyncResult<Vec<String>> {
        let mut selected = Vec::new();
        for table_id in self.store.table_ids()? {
            let Some(entry) = self.store.table(&table_id)? else {
                continue;
            };
            if !self.config.only_sync_flagged_tables || entry.is_set_to_sync {
                selected.push(table_id);
            }
        }
        Ok(selected)
    }

    fn record_error(&self, result: &mut TableResult, error: &SyncError) {
        match error.failure_kind() {
            FailureKind::Io => {
                tracing::warn!(%error, "I/O failure during table pass");
                result.stats.num_io_exceptions += 1;
            }
            FailureKind::Authorization => {
                tracing::warn!(%error, "authorization failure during table pass");
            }
            FailureKind::Unexpected => {
                tracing::error!(?error, "unexpected failure during table pass");
            }
        }
        result.record_error(error);
    }

    fn run_table(
        &self,
        entry: &TableEntry,
        first_download: bool,
        result: &mut TableResult,
    ) -> SyncResult<()> {
        let table_id = entry.table_id();
        let previous = transaction::begin_table(&*self.store, table_id)?;
        let marked_rows = transaction::recover_table(&*self.store, table_id)?;
        if !previous.is_clean() || marked_rows > 0 {
            result.recovered_from_interrupt = true;
        }

        tracing::info!(state = %entry.sync_state, display_name = entry.display_name(), "synchronizing table");
        match entry.sync_state {
            TableSyncState::Inserting => self.sync_inserting(entry, result),
            TableSyncState::Deleting => self.sync_deleting(table_id, result),
            TableSyncState::Updating => {
                result.had_local_properties_changes = true;
                self.push_properties(table_id, entry.etag.as_ref(), result)?;
                self.sync_rest(table_id, false, result)
            }
            TableSyncState::Rest => self.sync_rest(table_id, first_download, result),
        }
    }

    fn pusher<'a>(&'a self, table_id: &'a str) -> Pusher<'a, R, L> {
        Pusher {
            remote: &*self.remote,
            store: &*self.store,
            table_id,
            batch_size: self.config.push_batch_size,
        }
    }

    fn sync_inserting(&self, entry: &TableEntry, result: &mut TableResult) -> SyncResult<()> {
        let table_id = entry.table_id();
        let plan = PushPlan::gather_inserts(&*self.store, table_id)?;
        let row_ids = plan.row_ids();
        result.had_local_data_changes = !plan.is_empty();

        transaction::begin_rows(&*self.store, table_id, &row_ids)?;
        let mut outcome = PushOutcome::default();
        let pushed = self.create_and_push(entry, &plan, &mut outcome, result);
        if pushed.is_err() {
            result.stats.num_skipped_entries += (row_ids.len() - outcome.confirmed.len()) as u64;
        }
        let ended = transaction::end_rows(&*self.store, table_id, &row_ids, &outcome.confirmed);
        pushed?;
        ended
    }

    fn create_and_push(
        &self,
        entry: &TableEntry,
        plan: &PushPlan,
        outcome: &mut PushOutcome,
        result: &mut TableResult,
    ) -> SyncResult<()> {
        let table_id = entry.table_id();
        let created = self.remote.create_table(&entry.definition)?;
        adopt_table_etag(&*self.store, table_id, &created)?;
        result.pushed_local_schema = true;

        let etag = self.remote.set_table_properties(
            table_id,
            Some(&created),
            &entry.definition.table_key,
            &entry.properties,
        )?;
        adopt_table_etag(&*self.store, table_id, &etag)?;
        result.pushed_local_properties = true;

        let mut current = Some(etag);
        let pushed = self
            .pusher(table_id)
            .push(plan, &mut current, outcome, &mut result.stats);
        result.pushed_local_data = outcome.pushed_any();
        pushed
    }

    fn sync_deleting(&self, table_id: &str, result: &mut TableResult) -> SyncResult<()> {
        self.remote.delete_table(table_id)?;
        self.store.drop_table(table_id)?;
        result.stats.num_deletes += 1;
        result.stats.num_entries += 1;
        tracing::info!("table deleted on the server and locally");
        Ok(())
    }

    fn push_properties(
        &self,
        table_id: &str,
        etag: Option<&TableETag>,
        result: &mut TableResult,
    ) -> SyncResult<()> {
        let entry = self.store.require_table(table_id)?;
        let etag = self.remote.set_table_properties(
            table_id,
            etag,
            &entry.definition.table_key,
            &entry.properties,
        )?;
        adopt_table_etag(&*self.store, table_id, &etag)?;
        result.pushed_local_properties = true;
        Ok(())
    }

    /// Pull, push rows, then push local properties if they won.
    fn sync_rest(
        &self,
        table_id: &str,
        first_download: bool,
        result: &mut TableResult,
    ) -> SyncResult<()> {
        let push_properties_later = self.pull(table_id, first_download, result)?;

        let plan = PushPlan::gather(&*self.store, table_id)?;
        let row_ids = plan.row_ids();
        result.had_local_data_changes = !plan.is_empty();

        transaction::begin_rows(&*self.store, table_id, &row_ids)?;
        let mut outcome = PushOutcome::default();
        let mut etag = self.store.require_table(table_id)?.etag;
        let pushed = self
            .pusher(table_id)
            .push(&plan, &mut etag, &mut outcome, &mut result.stats);
        result.pushed_local_data = outcome.pushed_any();
        if pushed.is_err() {
            let done = outcome.confirmed.len() + outcome.deleted.len();
            result.stats.num_skipped_entries += (plan.len() - done) as u64;
        }
        let ended = transaction::end_rows(&*self.store, table_id, &row_ids, &outcome.confirmed);
        pushed?;
        ended?;

        if push_properties_later {
            self.push_properties(table_id, etag.as_ref(), result)?;
        }
        Ok(())
    }

    /// Pulls and applies server changes. Returns true if local properties
    /// won and must be pushed at the end of the pass.
    fn pull(
        &self,
        table_id: &str,
        first_download: bool,
        result: &mut TableResult,
    ) -> SyncResult<bool> {
        let entry = self.store.require_table(table_id)?;
        let incoming = self.remote.get_updates(table_id, entry.etag.as_ref())?;
        result.server_had_data_changes = incoming.has_data_changed();
        result.server_had_properties_changes = incoming.has_properties_changed();
        result.server_had_schema_changes = incoming.has_schema_changed();

        if let Some(definition) = &incoming.table_definition {
            if first_download {
                self.rebuild_table(&entry, definition.clone(), &incoming.table_etag)?;
                result.pulled_server_schema = true;
            } else if entry.etag.is_some() {
                tracing::warn!("server schema changed; structural changes are not applied");
            }
        }

        let mut push_properties_later = false;
        if let Some(properties) = &incoming.table_properties {
            match TableETag::properties_verdict(
                entry.etag.as_ref(),
                &incoming.table_etag,
                first_download,
            ) {
                PropertiesVerdict::AcceptRemote => {
                    self.store
                        .update_table(table_id, &TablePatch::new().properties(properties.clone()))?;
                    result.pulled_server_properties = true;
                }
                PropertiesVerdict::KeepLocal => {
                    tracing::info!("keeping local properties over the server's");
                    result.had_local_properties_changes = true;
                    push_properties_later = true;
                }
            }
        }

        let local = self
            .store
            .rows(table_id, &RowFilter::all().version(RowVersion::Local))?;
        let actions = pull::classify(&local, &incoming.rows);
        result.pulled_server_data = actions
            .iter()
            .any(|action| !matches!(action, RowAction::Ignore { .. }));
        pull::apply(&*self.store, table_id, &actions, &mut result.stats)?;

        adopt_table_etag(&*self.store, table_id, &incoming.table_etag)?;
        Ok(push_properties_later)
    }

    fn rebuild_table(
        &self,
        placeholder: &TableEntry,
        mut definition: TableDefinition,
        etag: &TableETag,
    ) -> SyncResult<()> {
        definition.table_id = placeholder.table_id().to_string();
        let mut rebuilt = TableEntry::from_server(definition, etag.clone());
        rebuilt.transaction = TransactionMarker::InFlight;
        rebuilt.is_set_to_sync = true;

        self.store.drop_table(placeholder.table_id())?;
        self.store.create_table(rebuilt)?;
        tracing::info!("table rebuilt from the server definition");
        Ok(())
    }
}
