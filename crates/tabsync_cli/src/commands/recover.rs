//! Recover command implementation.

use super::verify::print_report;
use std::path::Path;
use tabsync_engine::transaction;
use tabsync_store::FileStore;

/// Runs the recover command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No store found at {:?}", path).into());
    }
    let store = FileStore::open(path)?;
    let report = transaction::recover_interrupted(&store)?;

    if report.is_empty() {
        println!("Nothing to recover");
    } else {
        println!("Moved to needs-verification:");
        print_report(&report);
        tracing::info!(
            tables = report.tables.len(),
            rows = report.rows.len(),
            "recovery finished"
        );
    }
    Ok(())
}
