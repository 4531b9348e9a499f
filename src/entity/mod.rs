//! Table Entities
//!
//! Records persisted in table storage. Every entity kind names its own
//! partition (one logical table per kind) and derives its row key from a
//! numeric id rendered as a decimal string.
//!
//! ```text
//! ┌──────────────────────┐   to_row()    ┌─────────────────────────────────┐
//! │  ServerConfigEntity  │ ────────────▶ │ PartitionKey | RowKey | columns │
//! │  UserStatsEntity     │ ◀──────────── │   (string | int | bool values)  │
//! └──────────────────────┘  from_row()   └─────────────────────────────────┘
//! ```

mod server_config;
mod user_stats;

pub use server_config::ServerConfigEntity;
pub use user_stats::{Difficulty, UserStatsEntity};

use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Column carrying the partition key
pub const PARTITION_KEY_COLUMN: &str = "PartitionKey";

/// Column carrying the row key
pub const ROW_KEY_COLUMN: &str = "RowKey";

// =============================================================================
// Entity Trait
// =============================================================================

/// A record that can be stored in, and rebuilt from, a table row
pub trait Entity: Clone + fmt::Debug + Send + Sync + 'static {
    /// Partition key, also used as the table name
    const PARTITION_KEY: &'static str;

    /// Domain identifier the row key is derived from
    type Id: fmt::Display + fmt::Debug + Copy + Send + Sync + 'static;

    /// Domain identifier of this record
    fn id(&self) -> Self::Id;

    /// Render a domain id as a row key
    fn format_row_key(id: Self::Id) -> String {
        id.to_string()
    }

    /// Row key of this record
    fn row_key(&self) -> String {
        Self::format_row_key(self.id())
    }

    /// Serialize into a row, key columns included
    fn to_row(&self) -> Row;

    /// Rebuild from a row. Missing optional columns take their defaults.
    fn from_row(row: &Row) -> Result<Self>;
}

// =============================================================================
// Row Values
// =============================================================================

/// A single column value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RowValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl From<bool> for RowValue {
    fn from(v: bool) -> Self {
        RowValue::Bool(v)
    }
}

impl From<i64> for RowValue {
    fn from(v: i64) -> Self {
        RowValue::Int(v)
    }
}

impl From<u32> for RowValue {
    fn from(v: u32) -> Self {
        RowValue::Int(i64::from(v))
    }
}

impl From<String> for RowValue {
    fn from(v: String) -> Self {
        RowValue::Str(v)
    }
}

impl From<&str> for RowValue {
    fn from(v: &str) -> Self {
        RowValue::Str(v.to_string())
    }
}

impl fmt::Display for RowValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowValue::Bool(b) => write!(f, "{}", b),
            RowValue::Int(i) => write!(f, "{}", i),
            RowValue::Str(s) => write!(f, "{}", s),
        }
    }
}

// =============================================================================
// Row
// =============================================================================

/// Column name to value mapping for one table row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Row(BTreeMap<String, RowValue>);

impl Row {
    /// Create a row carrying only its key columns
    pub fn keyed(partition_key: &str, row_key: &str) -> Self {
        let mut row = Self::default();
        row.insert(PARTITION_KEY_COLUMN, partition_key);
        row.insert(ROW_KEY_COLUMN, row_key);
        row
    }

    /// Builder-style insert
    pub fn with(mut self, column: &str, value: impl Into<RowValue>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: &str, value: impl Into<RowValue>) {
        self.0.insert(column.to_string(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&RowValue> {
        self.0.get(column)
    }

    pub fn remove(&mut self, column: &str) -> Option<RowValue> {
        self.0.remove(column)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RowValue)> {
        self.0.iter()
    }

    /// Merge columns of `other` into this row. Columns absent from `other`
    /// keep their current value.
    pub fn merge(&mut self, other: &Row) {
        for (column, value) in other.iter() {
            self.0.insert(column.clone(), value.clone());
        }
    }

    pub fn partition_key(&self) -> Option<&str> {
        self.read_str(PARTITION_KEY_COLUMN)
    }

    pub fn row_key(&self) -> Option<&str> {
        self.read_str(ROW_KEY_COLUMN)
    }

    /// Read a string column
    pub fn read_str(&self, column: &str) -> Option<&str> {
        match self.get(column) {
            Some(RowValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Read an unsigned 64-bit column stored either as an integer or as a
    /// decimal string
    pub fn read_u64(&self, column: &str) -> Result<Option<u64>> {
        match self.get(column) {
            None => Ok(None),
            Some(RowValue::Int(i)) => u64::try_from(*i)
                .map(Some)
                .map_err(|_| self.malformed(format!("{} is negative: {}", column, i))),
            Some(RowValue::Str(s)) => s
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|e| self.malformed(format!("{} = {:?}: {}", column, s, e))),
            Some(RowValue::Bool(_)) => Err(self.malformed(format!("{} is a boolean", column))),
        }
    }

    /// Read a counter column
    pub fn read_u32(&self, column: &str) -> Result<Option<u32>> {
        match self.read_u64(column)? {
            None => Ok(None),
            Some(v) => u32::try_from(v)
                .map(Some)
                .map_err(|_| self.malformed(format!("{} out of range: {}", column, v))),
        }
    }

    /// Read a boolean column stored either as a boolean or as "true"/"false"
    pub fn read_bool(&self, column: &str) -> Result<Option<bool>> {
        match self.get(column) {
            None => Ok(None),
            Some(RowValue::Bool(b)) => Ok(Some(*b)),
            Some(RowValue::Str(s)) => match s.to_ascii_lowercase().as_str() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(self.malformed(format!("{} = {:?} is not a boolean", column, s))),
            },
            Some(RowValue::Int(i)) => {
                Err(self.malformed(format!("{} = {} is not a boolean", column, i)))
            }
        }
    }

    /// Build a data error pointing at this row
    pub fn malformed(&self, reason: impl Into<String>) -> Error {
        Error::MalformedRow {
            table: self.partition_key().unwrap_or("<unknown>").to_string(),
            row_key: self.row_key().unwrap_or("<unknown>").to_string(),
            reason: reason.into(),
        }
    }
}

impl FromIterator<(String, RowValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, RowValue)>>(iter: I) -> Self {
        Row(iter.into_iter().collect())
    }
}
