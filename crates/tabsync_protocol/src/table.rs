//! Table definitions and property entries.

use serde::{Deserialize, Serialize};

/// Kind of table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableType {
    /// Ordinary data table.
    #[default]
    Data,
    /// Shortcut table.
    Shortcut,
    /// Security table.
    Security,
}

/// Definition of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    /// Unique key of the element.
    pub element_key: String,
    /// Display-independent element name.
    pub element_name: String,
    /// Element type name.
    pub element_type: String,
    /// Keys of child elements for composite types.
    #[serde(default)]
    pub list_child_element_keys: Vec<String>,
    /// Whether the element is stored as a column.
    #[serde(default = "default_persisted")]
    pub is_persisted: bool,
    /// Serialized join description, if any.
    #[serde(default)]
    pub joins: Option<String>,
}

fn default_persisted() -> bool {
    true
}

impl ColumnDefinition {
    /// Creates a persisted column with no children or joins.
    pub fn new(
        element_key: impl Into<String>,
        element_name: impl Into<String>,
        element_type: impl Into<String>,
    ) -> Self {
        Self {
            element_key: element_key.into(),
            element_name: element_name.into(),
            element_type: element_type.into(),
            list_child_element_keys: Vec::new(),
            is_persisted: true,
            joins: None,
        }
    }
}

/// Structural definition of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    /// Stable table identifier.
    pub table_id: String,
    /// Key used by the server for the table's properties.
    pub table_key: String,
    /// Human-readable name.
    pub display_name: String,
    /// Kind of table.
    #[serde(default)]
    pub table_type: TableType,
    /// Access-control string.
    #[serde(default)]
    pub access_controls: Option<String>,
    /// Column definitions.
    #[serde(default)]
    pub columns: Vec<ColumnDefinition>,
}

impl TableDefinition {
    /// Creates a data table with no columns, keyed by its id.
    pub fn new(table_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        let table_id = table_id.into();
        Self {
            table_key: table_id.clone(),
            table_id,
            display_name: display_name.into(),
            table_type: TableType::Data,
            access_controls: None,
            columns: Vec::new(),
        }
    }

    /// Adds a column.
    pub fn with_column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    /// Sets the table type.
    pub fn with_type(mut self, table_type: TableType) -> Self {
        self.table_type = table_type;
        self
    }
}

/// One entry of a table's key-value property store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyValueEntry {
    /// Partition the entry belongs to.
    pub partition: String,
    /// Aspect within the partition.
    pub aspect: String,
    /// Entry key.
    pub key: String,
    /// Type name of the value.
    pub value_type: String,
    /// String-encoded value.
    pub value: String,
}

impl KeyValueEntry {
    /// Creates a string-typed entry in the `Table` partition's default aspect.
    pub fn table_property(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            partition: "Table".to_string(),
            aspect: "default".to_string(),
            key: key.into(),
            value_type: "string".to_string(),
            value: value.into(),
        }
    }
}
