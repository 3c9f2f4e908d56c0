//! Verify command implementation.

use std::path::Path;
use tabsync_engine::{transaction, RecoveryReport};
use tabsync_store::FileStore;

/// Runs the verify command.
///
/// Fails if any table or row carries a crash marker.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying store at {:?}", path);
    println!();

    if !path.exists() {
        return Err(format!("No store found at {:?}", path).into());
    }
    let store = FileStore::open(path)?;
    let report = transaction::interrupted(&store)?;
    print_report(&report);

    println!();
    if report.is_empty() {
        println!("✓ No interrupted sync work found");
        Ok(())
    } else {
        println!("✗ Interrupted sync work found; run `tabsync recover` or sync again");
        Err("Verification failed".into())
    }
}

pub(crate) fn print_report(report: &RecoveryReport) {
    for (table_id, marker) in &report.tables {
        println!("  table {table_id}: {marker:?}");
    }
    for row in &report.rows {
        println!(
            "  row {}/{} ({:?}): {:?}",
            row.table_id, row.row_id, row.version, row.marker
        );
    }
    println!(
        "Marked: {} table(s), {} row(s)",
        report.tables.len(),
        report.rows.len()
    );
}
