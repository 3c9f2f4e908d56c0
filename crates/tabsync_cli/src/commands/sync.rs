//! Sync command implementation.
//!
//! The remote side is a [`MemoryRemote`] loaded from a JSON snapshot file
//! and written back after the run, so several local stores can share one
//! simulated server.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use tabsync_engine::{
    MemoryRemote, RemoteSnapshot, SyncConfig, SyncProcessor, SynchronizationResult, TableResult,
};
use tabsync_store::FileStore;

/// Options for one sync invocation.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Only synchronize this table.
    pub table: Option<String>,
    /// Rebuild the table from the server definition.
    pub first_download: bool,
    /// Maximum rows per push call.
    pub batch_size: usize,
    /// Include tables not flagged for sync.
    pub all_tables: bool,
    /// Run crash recovery first.
    pub recover: bool,
}

/// Runs the sync command.
pub fn run(
    store_path: &Path,
    remote_path: &Path,
    options: &SyncOptions,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(FileStore::open(store_path)?);
    let remote = Arc::new(load_remote(remote_path)?);

    let config = SyncConfig::new(format!("file://{}", remote_path.display()))
        .with_push_batch_size(options.batch_size)
        .with_only_sync_flagged_tables(!options.all_tables)
        .with_recover_on_start(options.recover);
    let processor = SyncProcessor::new(config, remote.clone(), store);

    let result = run_with(&processor, options);
    save_remote(remote_path, &remote.snapshot())?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    if result.auth_required() {
        return Err("Server rejected the credentials".into());
    }
    if !result.is_success() {
        return Err("Sync finished with failures".into());
    }
    Ok(())
}

fn run_with(
    processor: &SyncProcessor<MemoryRemote, FileStore>,
    options: &SyncOptions,
) -> SynchronizationResult {
    let Some(table_id) = &options.table else {
        return processor.synchronize();
    };

    let mut result = SynchronizationResult::default();
    if processor.config().recover_on_start {
        match processor.recover() {
            Ok(report) => result.recovery = Some(report),
            Err(error) => tracing::error!(?error, "crash recovery failed"),
        }
    }
    let table_result = if options.first_download {
        processor.download_table(table_id)
    } else {
        processor.synchronize_table(table_id, false)
    };
    result.table_results.push(table_result);
    result
}

fn load_remote(path: &Path) -> Result<MemoryRemote, Box<dyn std::error::Error>> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "starting with an empty remote");
        return Ok(MemoryRemote::new());
    }
    let text = fs::read_to_string(path)?;
    let snapshot: RemoteSnapshot = serde_json::from_str(&text)?;
    Ok(MemoryRemote::from_snapshot(snapshot))
}

fn save_remote(path: &Path, snapshot: &RemoteSnapshot) -> Result<(), Box<dyn std::error::Error>> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn print_text_output(result: &SynchronizationResult) {
    println!("tabsync Run");
    println!("===========");

    if let Some(recovery) = &result.recovery {
        if !recovery.is_empty() {
            println!();
            println!(
                "Recovered: {} table(s), {} row(s) left in flight",
                recovery.tables.len(),
                recovery.rows.len()
            );
        }
    }

    for table in &result.table_results {
        print_table(table);
    }

    let stats = result.stats();
    println!();
    println!("Totals:");
    println!("  Inserts:   {}", stats.num_inserts);
    println!("  Updates:   {}", stats.num_updates);
    println!("  Deletes:   {}", stats.num_deletes);
    println!("  Conflicts: {}", stats.num_conflicts_detected);
    println!("  Skipped:   {}", stats.num_skipped_entries);
}

fn print_table(table: &TableResult) {
    println!();
    println!("[{}] {} - {}", table.table_id, table.display_name, table.status());
    if let Some(message) = &table.message {
        println!("  Error: {message}");
    }
    let flags = [
        ("pulled data", table.pulled_server_data),
        ("pulled properties", table.pulled_server_properties),
        ("pulled schema", table.pulled_server_schema),
        ("pushed data", table.pushed_local_data),
        ("pushed properties", table.pushed_local_properties),
        ("pushed schema", table.pushed_local_schema),
        ("recovered", table.recovered_from_interrupt),
    ];
    let set: Vec<&str> = flags
        .iter()
        .filter(|(_, on)| *on)
        .map(|(name, _)| *name)
        .collect();
    if !set.is_empty() {
        println!("  {}", set.join(", "));
    }
    println!(
        "  +{} ~{} -{} conflicts={}",
        table.stats.num_inserts,
        table.stats.num_updates,
        table.stats.num_deletes,
        table.stats.num_conflicts_detected
    );
}
