//! Duplicate-row detection in the reference tables of a mirror

use super::mirror::LocalMirror;
use serde::Serialize;
use tracing::warn;

/// Reference tables and the columns that identify one logical row
const CHECKED_TABLES: &[(&str, &[&str])] = &[
    ("METADATA", &["field", "value"]),
    ("VAR_MAP", &["var_name", "sql_type", "functional_type"]),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DuplicationReport {
    /// Tables holding more rows than distinct identities
    pub duplicated_tables: Vec<String>,
}

impl DuplicationReport {
    pub fn found(&self) -> bool {
        !self.duplicated_tables.is_empty()
    }
}

/// Check the reference tables of `mirror`.
///
/// A table that cannot be inspected counts as clean.
pub async fn check_duplicates(mirror: &LocalMirror) -> DuplicationReport {
    let mut report = DuplicationReport::default();

    for (table, columns) in CHECKED_TABLES {
        let total = mirror.count_rows(table).await;
        let distinct = mirror.count_distinct(table, columns).await;
        match (total, distinct) {
            (Ok(total), Ok(distinct)) if total > distinct => {
                warn!(table, total, distinct, "Duplicated rows in mirror");
                report.duplicated_tables.push((*table).to_string());
            },
            (Ok(_), Ok(_)) => {},
            (Err(e), _) | (_, Err(e)) => {
                warn!(table, error = %e, "Could not check table for duplicates");
            },
        }
    }

    report
}
