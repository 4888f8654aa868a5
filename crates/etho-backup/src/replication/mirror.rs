//! Local SQLite mirror of one device database

use super::schema::TableDescriptor;
use super::source::{quote_ident, SqlRow, SqlValue};
use crate::error::Result;
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::Sqlite;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct LocalMirror {
    pool: SqlitePool,
    path: PathBuf,
}

impl LocalMirror {
    /// Open the mirror at `path`, creating the file when needed
    pub async fn open(path: &Path) -> Result<Self> {
        Self::connect(path, true).await
    }

    /// Open an existing mirror without creating it; `None` when there is no file
    pub async fn open_existing(path: &Path) -> Result<Option<Self>> {
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(Self::connect(path, false).await?))
    }

    async fn connect(path: &Path, create: bool) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(create)
            // Mirrors are handed to analysis tools as single files.
            .journal_mode(SqliteJournalMode::Delete)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let tables = sqlx::query_scalar::<_, String>(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(tables)
    }

    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    pub async fn create_table(&self, table: &TableDescriptor) -> Result<()> {
        sqlx::query(&table.create_table_sql())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count_rows(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        Ok(sqlx::query_scalar::<_, i64>(&sql).fetch_one(&self.pool).await?)
    }

    /// Largest `id` in `table`, 0 when the table is empty
    pub async fn max_id(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COALESCE(MAX(`id`), 0) FROM {}", quote_ident(table));
        Ok(sqlx::query_scalar::<_, i64>(&sql).fetch_one(&self.pool).await?)
    }

    /// Number of distinct combinations of `columns` in `table`
    pub async fn count_distinct(&self, table: &str, columns: &[&str]) -> Result<i64> {
        let projection = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT COUNT(*) FROM (SELECT DISTINCT {} FROM {})",
            projection,
            quote_ident(table)
        );
        Ok(sqlx::query_scalar::<_, i64>(&sql).fetch_one(&self.pool).await?)
    }

    /// Insert `rows` in a single transaction.
    ///
    /// With `columns` the rows are matched to those columns, otherwise each
    /// row must cover the full table in declaration order.
    pub async fn insert_rows(
        &self,
        table: &str,
        columns: Option<&[String]>,
        rows: &[SqlRow],
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut statements: Vec<(usize, String)> = Vec::new();
        let mut inserted = 0u64;

        for row in rows {
            let width = row.len();
            let sql = match statements.iter().find(|(w, _)| *w == width) {
                Some((_, sql)) => sql.clone(),
                None => {
                    let sql = insert_sql(table, columns, width);
                    statements.push((width, sql.clone()));
                    sql
                },
            };

            let query = row
                .iter()
                .fold(sqlx::query(&sql), |query, value| bind_value(query, value));
            inserted += query.execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Whether a row equal to `row` on every column already exists (NULL-aware)
    pub async fn row_exists(&self, table: &str, columns: &[String], row: &SqlRow) -> Result<bool> {
        let predicate = columns
            .iter()
            .map(|c| format!("{} IS ?", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!("SELECT 1 FROM {} WHERE {} LIMIT 1", quote_ident(table), predicate);

        let query = row
            .iter()
            .fold(sqlx::query(&sql), |query, value| bind_value(query, value));
        Ok(query.fetch_optional(&self.pool).await?.is_some())
    }
}

fn insert_sql(table: &str, columns: Option<&[String]>, width: usize) -> String {
    let placeholders = vec!["?"; width].join(", ");
    match columns {
        Some(columns) => format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
            placeholders
        ),
        None => format!("INSERT INTO {} VALUES ({})", quote_ident(table), placeholders),
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q SqlValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(None::<i64>),
        SqlValue::Integer(v) => query.bind(*v),
        SqlValue::Real(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        SqlValue::Blob(v) => query.bind(v.as_slice()),
    }
}
