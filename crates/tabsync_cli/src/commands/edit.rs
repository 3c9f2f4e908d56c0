//! Edit command implementation.
//!
//! Local writes as the application would make them; sync states follow the
//! row and table rules of the store.

use clap::Subcommand;
use std::collections::BTreeMap;
use std::path::Path;
use tabsync_protocol::{KeyValueEntry, TableDefinition};
use tabsync_store::{edits, FileStore, LocalStore, SavedStatus};
use uuid::Uuid;

/// A local write.
#[derive(Debug, Subcommand)]
pub enum EditAction {
    /// Create a table that exists only on this device
    CreateTable {
        /// Table id
        #[arg(short, long)]
        table: String,

        /// Display name (defaults to the id)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Replace a table's properties with one entry
    SetProperty {
        /// Table id
        #[arg(short, long)]
        table: String,

        /// Property key
        #[arg(short, long)]
        key: String,

        /// Property value
        #[arg(long)]
        value: String,
    },

    /// Delete a table
    DeleteTable {
        /// Table id
        #[arg(short, long)]
        table: String,
    },

    /// Insert a row
    Insert {
        /// Table id
        #[arg(short, long)]
        table: String,

        /// Row id (a random one if omitted)
        #[arg(short, long)]
        row: Option<String>,

        /// Column value as key=value, repeatable
        #[arg(long = "set", value_parser = parse_assignment)]
        values: Vec<(String, String)>,
    },

    /// Update a row's values
    Update {
        /// Table id
        #[arg(short, long)]
        table: String,

        /// Row id
        #[arg(short, long)]
        row: String,

        /// Column value as key=value, repeatable
        #[arg(long = "set", value_parser = parse_assignment)]
        values: Vec<(String, String)>,
    },

    /// Delete a row
    Delete {
        /// Table id
        #[arg(short, long)]
        table: String,

        /// Row id
        #[arg(short, long)]
        row: String,
    },

    /// Mark a row complete or incomplete
    Saved {
        /// Table id
        #[arg(short, long)]
        table: String,

        /// Row id
        #[arg(short, long)]
        row: String,

        /// Mark incomplete instead of complete
        #[arg(long)]
        incomplete: bool,
    },
}

fn parse_assignment(text: &str) -> Result<(String, String), String> {
    let (key, value) = text
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{text}`"))?;
    if key.is_empty() {
        return Err(format!("empty key in `{text}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Runs the edit command.
pub fn run(path: &Path, action: EditAction) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileStore::open(path)?;
    let message = apply(&store, action)?;
    println!("{message}");
    Ok(())
}

fn apply<L: LocalStore + ?Sized>(
    store: &L,
    action: EditAction,
) -> Result<String, Box<dyn std::error::Error>> {
    let message = match action {
        EditAction::CreateTable { table, name } => {
            let display = name.unwrap_or_else(|| table.clone());
            edits::create_table(store, TableDefinition::new(table.as_str(), display))?;
            format!("created table {table} (inserting)")
        }
        EditAction::SetProperty { table, key, value } => {
            let state = edits::edit_properties(
                store,
                &table,
                vec![KeyValueEntry::table_property(key, value)],
            )?;
            format!("table {table} is now {state}")
        }
        EditAction::DeleteTable { table } => {
            let outcome = edits::delete_table(store, &table)?;
            format!("table {table}: {outcome:?}")
        }
        EditAction::Insert { table, row, values } => {
            let row_id = row.unwrap_or_else(|| Uuid::new_v4().to_string());
            let values: BTreeMap<String, String> = values.into_iter().collect();
            edits::insert_row(store, &table, &row_id, values, Default::default())?;
            format!("inserted row {row_id} into {table}")
        }
        EditAction::Update { table, row, values } => {
            let mut current = store
                .row(&table, &row, tabsync_store::RowVersion::Local)?
                .ok_or_else(|| format!("row {row} not found in {table}"))?
                .values;
            current.extend(values);
            let state = edits::update_row(store, &table, &row, current)?;
            format!("row {row} is now {state}")
        }
        EditAction::Delete { table, row } => {
            let outcome = edits::delete_row(store, &table, &row)?;
            format!("row {row}: {outcome:?}")
        }
        EditAction::Saved {
            table,
            row,
            incomplete,
        } => {
            let saved = if incomplete {
                SavedStatus::Incomplete
            } else {
                SavedStatus::Complete
            };
            edits::set_saved(store, &table, &row, saved)?;
            format!("row {row} marked {saved:?}")
        }
    };
    tracing::debug!(%message, "local edit applied");
    Ok(message)
}
