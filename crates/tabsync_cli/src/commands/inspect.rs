//! Inspect command implementation.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tabsync_store::{FileStore, LocalRow, LocalStore, RowFilter, RowVersion};

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// One summary per table, in id order.
    pub tables: Vec<TableSummary>,
}

/// Summary of one table.
#[derive(Debug, Serialize)]
pub struct TableSummary {
    /// Table id.
    pub table_id: String,
    /// Display name.
    pub display_name: String,
    /// Table sync state.
    pub sync_state: String,
    /// Table ETag in its textual form.
    pub etag: Option<String>,
    /// Crash marker.
    pub transaction: String,
    /// Whether whole-run sync includes the table.
    pub is_set_to_sync: bool,
    /// End of the last successful pass.
    pub last_sync_time: Option<String>,
    /// Number of property entries.
    pub property_count: usize,
    /// Local rows per sync state.
    pub rows_by_state: BTreeMap<String, usize>,
    /// Stored server copies of conflicting rows.
    pub conflict_copies: usize,
    /// Local rows saved as incomplete.
    pub incomplete_rows: usize,
    /// Every row (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<LocalRow>>,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_rows: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No store found at {:?}", path).into());
    }
    let store = FileStore::open(path)?;
    let result = inspect(&store, path, show_rows)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }
    Ok(())
}

fn inspect<L: LocalStore + ?Sized>(
    store: &L,
    path: &Path,
    show_rows: bool,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let mut tables = Vec::new();
    for table_id in store.table_ids()? {
        let entry = store.require_table(&table_id)?;
        let rows = store.rows(&table_id, &RowFilter::all())?;

        let mut rows_by_state = BTreeMap::new();
        let mut conflict_copies = 0;
        let mut incomplete_rows = 0;
        for row in &rows {
            match row.version {
                RowVersion::Local => {
                    *rows_by_state.entry(row.sync_state.to_string()).or_insert(0) += 1;
                    if row.saved == tabsync_store::SavedStatus::Incomplete {
                        incomplete_rows += 1;
                    }
                }
                RowVersion::ServerConflict => conflict_copies += 1,
            }
        }

        tables.push(TableSummary {
            display_name: entry.display_name().to_string(),
            sync_state: entry.sync_state.to_string(),
            etag: entry.etag.as_ref().map(ToString::to_string),
            transaction: format!("{:?}", entry.transaction),
            is_set_to_sync: entry.is_set_to_sync,
            last_sync_time: entry.last_sync_time.map(|at| at.to_rfc3339()),
            property_count: entry.properties.len(),
            rows_by_state,
            conflict_copies,
            incomplete_rows,
            rows: show_rows.then_some(rows),
            table_id,
        });
    }
    Ok(InspectResult {
        path: path.display().to_string(),
        tables,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("tabsync Store Inspection");
    println!("========================");
    println!();
    println!("Path: {}", result.path);
    println!("Tables: {}", result.tables.len());

    for table in &result.tables {
        println!();
        println!("[{}] {}", table.table_id, table.display_name);
        println!("  State:        {}", table.sync_state);
        println!("  Transaction:  {}", table.transaction);
        println!("  Sync flagged: {}", table.is_set_to_sync);
        println!(
            "  ETag:         {}",
            table.etag.as_deref().unwrap_or("(none)")
        );
        println!(
            "  Last sync:    {}",
            table.last_sync_time.as_deref().unwrap_or("never")
        );
        println!("  Properties:   {}", table.property_count);
        for (state, count) in &table.rows_by_state {
            println!("  Rows {:<11} {}", format!("{state}:"), count);
        }
        if table.conflict_copies > 0 {
            println!("  Server copies: {}", table.conflict_copies);
        }
        if table.incomplete_rows > 0 {
            println!("  Incomplete:   {}", table.incomplete_rows);
        }
        if let Some(rows) = &table.rows {
            for row in rows {
                println!(
                    "    {} {:?} {} etag={} {:?}",
                    row.row_id,
                    row.version,
                    row.sync_state,
                    row.row_etag.as_ref().map(|e| e.as_str()).unwrap_or("-"),
                    row.values
                );
            }
        }
    }
}
