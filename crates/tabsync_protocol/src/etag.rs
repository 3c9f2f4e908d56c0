//! Version tags assigned by the remote store.
//!
//! Tags are opaque: the engine compares them for equality and never derives
//! meaning from them, with one exception. The properties component of a
//! [`TableETag`] is a decimal counter, compared to decide which side wins a
//! properties conflict without relying on synchronized clocks.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Row-level version tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowETag(String);

impl RowETag {
    /// Wraps a tag issued by the server.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Returns the tag text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RowETag {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl From<String> for RowETag {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

/// Table-level version tag.
///
/// Covers the table's data, its properties and its schema. The textual form
/// is a JSON object with `dataETag`, `propertiesETag` and `schemaETag` keys;
/// empty text is the tag of a table the server has never answered for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TableETag {
    #[serde(rename = "dataETag", default)]
    data: Option<String>,
    #[serde(rename = "propertiesETag", default)]
    properties: Option<String>,
    #[serde(rename = "schemaETag", default)]
    schema: Option<String>,
}

impl TableETag {
    /// Creates a tag from its components.
    pub fn new(data: Option<String>, properties: Option<String>, schema: Option<String>) -> Self {
        Self {
            data,
            properties,
            schema,
        }
    }

    /// Parses the textual form.
    pub fn parse(text: &str) -> ProtocolResult<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidTableETag {
            text: text.to_string(),
            reason: e.to_string(),
        })
    }

    /// Returns true if no component is set.
    pub fn is_empty(&self) -> bool {
        self.data.is_none() && self.properties.is_none() && self.schema.is_none()
    }

    /// The data component.
    pub fn data_component(&self) -> Option<&str> {
        self.data.as_deref()
    }

    /// The properties component.
    pub fn properties_component(&self) -> Option<&str> {
        self.properties.as_deref()
    }

    /// The schema component.
    pub fn schema_component(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// The properties component read as a counter, if it is one.
    pub fn properties_counter(&self) -> Option<PropertiesCounter> {
        self.properties.as_deref().and_then(|p| p.parse().ok())
    }

    /// Decides whether server properties tagged `remote` replace local ones.
    ///
    /// The server wins on a first download, when nothing is known locally, or
    /// when its counter is strictly greater. Ties and unreadable counters keep
    /// the local properties.
    pub fn properties_verdict(
        local: Option<&TableETag>,
        remote: &TableETag,
        first_download: bool,
    ) -> PropertiesVerdict {
        if first_download {
            return PropertiesVerdict::AcceptRemote;
        }
        let Some(local) = local.filter(|tag| tag.properties.is_some()) else {
            return PropertiesVerdict::AcceptRemote;
        };
        match (local.properties_counter(), remote.properties_counter()) {
            (Some(local), Some(remote)) if remote > local => PropertiesVerdict::AcceptRemote,
            _ => PropertiesVerdict::KeepLocal,
        }
    }
}

impl fmt::Display for TableETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

impl FromStr for TableETag {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Monotonic counter carried in the properties component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PropertiesCounter(u64);

impl PropertiesCounter {
    /// Wraps a counter value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the counter value.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl FromStr for PropertiesCounter {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Outcome of a properties conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertiesVerdict {
    /// Overwrite local properties with the server's.
    AcceptRemote,
    /// Keep local properties; they are pushed later.
    KeepLocal,
}
