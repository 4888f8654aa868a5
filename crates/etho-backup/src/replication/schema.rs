//! Table descriptors and the source-to-SQLite type mapper
//!
//! The mapping is a best-effort translation on the declared type name;
//! SQLite's type affinity tolerates anything that slips through as TEXT.

use super::source::{quote_ident, SourceColumn, SourceDatabase};
use crate::error::Result;
use std::fmt;

/// Tables synced by row comparison instead of by increasing id
pub const REFERENCE_TABLES: &[&str] = &["ROI_MAP", "VAR_MAP"];
const REFERENCE_TABLE_PREFIX: &str = "METADATA";

/// Tables whose payload is binary and which are copied by explicit columns
pub const BLOB_TABLES: &[&str] = &["IMG_SNAPSHOTS"];

/// Storage class of a column in the mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqliteType {
    Integer,
    Text,
    Real,
    Blob,
}

impl SqliteType {
    /// Translate a source type name such as `int(11)` or `longblob`
    pub fn from_source(type_name: &str) -> Self {
        let lowered = type_name.to_lowercase();
        if lowered.contains("int") {
            SqliteType::Integer
        } else if ["varchar", "text", "char"].iter().any(|t| lowered.contains(t)) {
            SqliteType::Text
        } else if ["float", "double", "decimal"].iter().any(|t| lowered.contains(t)) {
            SqliteType::Real
        } else if lowered.contains("blob") {
            SqliteType::Blob
        } else {
            SqliteType::Text
        }
    }
}

impl fmt::Display for SqliteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqliteType::Integer => "INTEGER",
            SqliteType::Text => "TEXT",
            SqliteType::Real => "REAL",
            SqliteType::Blob => "BLOB",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub sqlite_type: SqliteType,
}

/// How a table is brought up to date after its first copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Rows carry a monotonically increasing integer `id`
    IncrementalById,
    /// Small lookup tables without a reliable increasing key
    Reference,
}

/// A source table as discovered during one replication pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    pub policy: SyncPolicy,
}

impl TableDescriptor {
    pub fn from_source_columns(name: impl Into<String>, columns: &[SourceColumn]) -> Self {
        let name = name.into();
        let columns: Vec<ColumnSpec> = columns
            .iter()
            .map(|c| ColumnSpec {
                name: c.name.clone(),
                sqlite_type: SqliteType::from_source(&c.type_name),
            })
            .collect();

        let has_id = columns.iter().any(|c| c.name == "id");
        let policy = if is_reference_table(&name) || !has_id {
            SyncPolicy::Reference
        } else {
            SyncPolicy::IncrementalById
        };

        Self {
            name,
            columns,
            policy,
        }
    }

    /// Read the table's columns from the source
    pub async fn discover(source: &dyn SourceDatabase, name: &str) -> Result<Self> {
        let columns = source.describe_table(name).await?;
        Ok(Self::from_source_columns(name, &columns))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Binary tables are always read by explicit column list
    pub fn copies_by_column_list(&self) -> bool {
        BLOB_TABLES.contains(&self.name.as_str())
            || self.columns.iter().any(|c| c.sqlite_type == SqliteType::Blob)
    }

    pub fn create_table_sql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.sqlite_type))
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE IF NOT EXISTS {} ({})", quote_ident(&self.name), columns)
    }
}

pub fn is_reference_table(name: &str) -> bool {
    REFERENCE_TABLES.contains(&name) || name.starts_with(REFERENCE_TABLE_PREFIX)
}
