//! Row-level replication from a device database into its local mirror
//!
//! Tables with an increasing integer `id` are copied page by page in id
//! order, each page committed in its own transaction, so an interrupted pass
//! resumes from the local maximum on the next cycle. Reference tables are
//! reconciled row by row.

use super::mirror::LocalMirror;
use super::schema::{SyncPolicy, TableDescriptor};
use super::source::{RowQuery, SourceDatabase, SqlRow};
use crate::config::ReplicationConfig;
use crate::error::{BackupError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Outcome of replicating one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSync {
    pub table: String,
    pub rows_copied: u64,
    pub full_copy: bool,
}

/// Outcome of one replication pass over a device database
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplicationStats {
    pub tables: Vec<TableSync>,
}

impl ReplicationStats {
    pub fn rows_copied(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_copied).sum()
    }

    pub fn tables_created(&self) -> usize {
        self.tables.iter().filter(|t| t.full_copy).count()
    }
}

pub struct RowReplicator {
    config: ReplicationConfig,
    side_file: Option<PathBuf>,
}

impl RowReplicator {
    pub fn new(config: ReplicationConfig) -> Self {
        Self {
            config,
            side_file: None,
        }
    }

    /// Also append rows of the side-file table to `path`
    pub fn with_side_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.side_file = Some(path.into());
        self
    }

    /// Fail with [`BackupError::NotReady`] while the liveness table is empty
    pub async fn ensure_ready(&self, source: &dyn SourceDatabase) -> Result<()> {
        let rows = source.count_rows(&self.config.liveness_table).await?;
        if rows == 0 {
            return Err(BackupError::not_ready(format!(
                "{} is empty, no experiment has been recorded yet",
                self.config.liveness_table
            )));
        }
        Ok(())
    }

    /// Bring every source table up to date in the mirror.
    ///
    /// Tables are discovered afresh on each call. A table missing locally is
    /// created and copied in full; existing tables are synced by their policy.
    /// Readiness is not checked here; call [`Self::ensure_ready`] first.
    pub async fn mirror(
        &self,
        source: &dyn SourceDatabase,
        mirror: &LocalMirror,
    ) -> Result<ReplicationStats> {
        let mut stats = ReplicationStats::default();
        for name in source.list_tables().await? {
            let table = TableDescriptor::discover(source, &name).await?;
            let full_copy = !mirror.table_exists(&name).await?;
            if full_copy {
                mirror.create_table(&table).await?;
                debug!(table = %name, "Created local table");
            }

            let rows_copied = self.replicate(&table, source, mirror, full_copy).await?;
            if rows_copied > 0 {
                info!(table = %name, rows = rows_copied, full_copy, "Table synchronised");
            }
            stats.tables.push(TableSync {
                table: name,
                rows_copied,
                full_copy,
            });
        }

        Ok(stats)
    }

    /// Copy rows of one table; the local table must already exist
    pub async fn replicate(
        &self,
        table: &TableDescriptor,
        source: &dyn SourceDatabase,
        mirror: &LocalMirror,
        full_copy: bool,
    ) -> Result<u64> {
        match table.policy {
            SyncPolicy::IncrementalById => {
                let after = if full_copy {
                    None
                } else {
                    Some(mirror.max_id(&table.name).await?).filter(|max| *max > 0)
                };
                self.copy_by_id(table, source, mirror, after).await
            },
            SyncPolicy::Reference if full_copy => self.copy_all(table, source, mirror).await,
            SyncPolicy::Reference => self.sync_reference(table, source, mirror).await,
        }
    }

    async fn copy_by_id(
        &self,
        table: &TableDescriptor,
        source: &dyn SourceDatabase,
        mirror: &LocalMirror,
        mut after: Option<i64>,
    ) -> Result<u64> {
        let columns = table.copies_by_column_list().then(|| table.column_names());
        let id_index = table
            .columns
            .iter()
            .position(|c| c.name == "id")
            .ok_or_else(|| BackupError::config(format!("table {} has no id column", table.name)))?;

        let mut copied = 0u64;
        loop {
            let mut query = RowQuery::page(&table.name, after, self.config.batch_size);
            if let Some(ref columns) = columns {
                query = query.with_columns(columns.clone());
            }

            let rows = source.fetch_rows(&query).await?;
            if rows.is_empty() {
                break;
            }

            let last_id = rows.last().and_then(|row| row.get(id_index)).and_then(|v| v.as_i64());
            copied += mirror.insert_rows(&table.name, columns.as_deref(), &rows).await?;
            self.append_side_file(table, &rows).await;

            match last_id {
                Some(id) if rows.len() >= self.config.batch_size => after = Some(id),
                _ => break,
            }
        }

        Ok(copied)
    }

    async fn copy_all(
        &self,
        table: &TableDescriptor,
        source: &dyn SourceDatabase,
        mirror: &LocalMirror,
    ) -> Result<u64> {
        let columns = table.copies_by_column_list().then(|| table.column_names());
        let mut query = RowQuery::all(&table.name);
        if let Some(ref columns) = columns {
            query = query.with_columns(columns.clone());
        }

        let rows = source.fetch_rows(&query).await?;
        let mut copied = 0u64;
        for batch in rows.chunks(self.config.batch_size) {
            copied += mirror.insert_rows(&table.name, columns.as_deref(), batch).await?;
            self.append_side_file(table, batch).await;
        }
        Ok(copied)
    }

    /// Insert the remote rows of a reference table that the mirror lacks
    async fn sync_reference(
        &self,
        table: &TableDescriptor,
        source: &dyn SourceDatabase,
        mirror: &LocalMirror,
    ) -> Result<u64> {
        let remote = source.count_rows(&table.name).await?;
        let local = mirror.count_rows(&table.name).await?;
        if remote == local {
            return Ok(0);
        }
        if remote < local {
            warn!(table = %table.name, remote, local, "Mirror holds more rows than the device");
            return Ok(0);
        }

        let columns = table.column_names();
        let rows = source
            .fetch_rows(&RowQuery::all(&table.name).with_columns(columns.clone()))
            .await?;

        let mut missing = Vec::new();
        for row in rows {
            if !mirror.row_exists(&table.name, &columns, &row).await? {
                missing.push(row);
            }
        }

        let mut copied = 0u64;
        for batch in missing.chunks(self.config.batch_size) {
            copied += mirror.insert_rows(&table.name, Some(&columns), batch).await?;
            self.append_side_file(table, batch).await;
        }
        Ok(copied)
    }

    async fn append_side_file(&self, table: &TableDescriptor, rows: &[SqlRow]) {
        let Some(ref path) = self.side_file else {
            return;
        };
        if table.name != self.config.side_file_table || rows.is_empty() {
            return;
        }

        if let Err(e) = write_side_file(path, rows).await {
            warn!(path = %path.display(), error = %e, "Could not append to side-file");
        }
    }
}

async fn write_side_file(path: &Path, rows: &[SqlRow]) -> std::io::Result<()> {
    let mut content = String::new();
    for row in rows {
        let line = row
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\t");
        content.push_str(&line);
        content.push('\n');
    }

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::replication::source::SqlValue;

    #[tokio::test]
    async fn test_side_file_appends_tab_separated_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirror.txt");
        let rows = vec![
            vec![SqlValue::Integer(1), SqlValue::Integer(60000), SqlValue::Text("0".into())],
            vec![SqlValue::Integer(2), SqlValue::Integer(120000), SqlValue::Null],
        ];

        write_side_file(&path, &rows[..1]).await.unwrap();
        write_side_file(&path, &rows[1..]).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "1\t60000\t0\n2\t120000\tNone\n");
    }

    #[test]
    fn test_stats_totals() {
        let stats = ReplicationStats {
            tables: vec![
                TableSync { table: "ROI_1".into(), rows_copied: 50, full_copy: false },
                TableSync { table: "METADATA".into(), rows_copied: 3, full_copy: true },
            ],
        };
        assert_eq!(stats.rows_copied(), 53);
        assert_eq!(stats.tables_created(), 1);
    }
}
