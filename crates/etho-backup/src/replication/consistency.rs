//! Source-versus-mirror consistency check
//!
//! Reference tables are compared by row count, all other tables by their
//! largest id. The match percentage is the ratio of the local totals to the
//! remote totals.

use super::mirror::LocalMirror;
use super::schema::{is_reference_table, SyncPolicy, TableDescriptor};
use super::source::SourceDatabase;
use crate::error::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Returned when no comparison is possible
pub const NO_COMPARISON: f64 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TableCounts {
    pub remote: i64,
    pub local: i64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ConsistencyReport {
    pub tables: BTreeMap<String, TableCounts>,
    /// Match in percent, or [`NO_COMPARISON`]
    pub percentage: f64,
}

impl ConsistencyReport {
    fn unavailable() -> Self {
        Self {
            tables: BTreeMap::new(),
            percentage: NO_COMPARISON,
        }
    }

    pub fn is_comparable(&self) -> bool {
        self.percentage >= 0.0
    }
}

pub struct ConsistencyChecker<'a> {
    source: &'a dyn SourceDatabase,
    mirror_path: PathBuf,
}

impl<'a> ConsistencyChecker<'a> {
    pub fn new(source: &'a dyn SourceDatabase, mirror_path: impl AsRef<Path>) -> Self {
        Self {
            source,
            mirror_path: mirror_path.as_ref().to_path_buf(),
        }
    }

    /// Match percentage in [0, 100], or -1 when nothing can be compared
    pub async fn compare(&self) -> f64 {
        self.report().await.percentage
    }

    /// Per-table figures together with the overall percentage.
    ///
    /// Failures on either side degrade to [`NO_COMPARISON`].
    pub async fn report(&self) -> ConsistencyReport {
        match self.collect().await {
            Ok(report) => report,
            Err(e) => {
                warn!(path = %self.mirror_path.display(), error = %e, "Database comparison failed");
                ConsistencyReport::unavailable()
            },
        }
    }

    async fn collect(&self) -> Result<ConsistencyReport> {
        let Some(mirror) = LocalMirror::open_existing(&self.mirror_path).await? else {
            debug!(path = %self.mirror_path.display(), "No local mirror to compare");
            return Ok(ConsistencyReport::unavailable());
        };

        let mut tables: BTreeMap<String, TableCounts> = BTreeMap::new();
        let mut policies: BTreeMap<String, SyncPolicy> = BTreeMap::new();
        for name in self.source.list_tables().await? {
            let table = TableDescriptor::discover(self.source, &name).await?;
            let remote = match table.policy {
                SyncPolicy::Reference => self.source.count_rows(&name).await?,
                SyncPolicy::IncrementalById => self.source.max_id(&name).await?,
            };
            policies.insert(name.clone(), table.policy);
            tables.entry(name).or_default().remote = remote;
        }

        let local = local_figures(&mirror, &policies).await;
        mirror.close().await;
        for (name, value) in local? {
            tables.entry(name).or_default().local = value;
        }

        let remote_total: i64 = tables.values().map(|c| c.remote).sum();
        let local_total: i64 = tables.values().map(|c| c.local).sum();

        if remote_total == 0 {
            return Ok(ConsistencyReport {
                tables,
                percentage: NO_COMPARISON,
            });
        }

        let mut percentage = local_total as f64 / remote_total as f64 * 100.0;
        if percentage > 100.0 {
            warn!(
                local_total,
                remote_total,
                "Mirror is ahead of the device, possible duplicated rows"
            );
            percentage = 100.0;
        }

        Ok(ConsistencyReport { tables, percentage })
    }
}

/// Local figure per table, measured the same way as on the device
async fn local_figures(
    mirror: &LocalMirror,
    policies: &BTreeMap<String, SyncPolicy>,
) -> Result<Vec<(String, i64)>> {
    let mut figures = Vec::new();
    for name in mirror.list_tables().await? {
        let policy = policies.get(&name).copied().unwrap_or(if is_reference_table(&name) {
            SyncPolicy::Reference
        } else {
            SyncPolicy::IncrementalById
        });
        let value = match policy {
            SyncPolicy::Reference => mirror.count_rows(&name).await?,
            SyncPolicy::IncrementalById => match mirror.max_id(&name).await {
                Ok(max) => max,
                Err(_) => mirror.count_rows(&name).await?,
            },
        };
        figures.push((name, value));
    }
    Ok(figures)
}
