//! Test helpers for etho-backup integration tests
//!
//! This module provides:
//! - A SQLite-backed stand-in for a device's MySQL experiment database
//! - A wrapper counting the row counts a job asks for
//! - A connector handing those stand-ins to database jobs
//! - Fixture builders for devices and experiment tables

#![allow(dead_code)]

pub mod fixtures;

use async_trait::async_trait;
use etho_backup::device::DeviceDescriptor;
use etho_backup::jobs::SourceConnector;
use etho_backup::replication::source::quote_ident;
use etho_backup::replication::{RowQuery, SourceColumn, SourceDatabase, SqlRow, SqlValue};
use etho_backup::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, TypeInfo, ValueRef};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub use fixtures::*;

/// Experiment database of a simulated device, stored in a SQLite file
#[derive(Clone)]
pub struct SqliteSource {
    pool: SqlitePool,
}

impl SqliteSource {
    pub async fn create(path: &Path) -> Self {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .expect("Failed to open source database");
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run raw SQL against the simulated device
    pub async fn execute(&self, sql: &str) {
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .unwrap_or_else(|e| panic!("Failed to run `{sql}`: {e}"));
    }
}

#[async_trait]
impl SourceDatabase for SqliteSource {
    async fn list_tables(&self) -> Result<Vec<String>> {
        Ok(sqlx::query_scalar::<_, String>(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn describe_table(&self, table: &str) -> Result<Vec<SourceColumn>> {
        let rows = sqlx::query(&format!("PRAGMA table_info({})", quote_ident(table)))
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<SourceColumn> {
                Ok(SourceColumn::new(
                    row.try_get::<String, _>("name")?,
                    row.try_get::<String, _>("type")?,
                ))
            })
            .collect()
    }

    async fn count_rows(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        Ok(sqlx::query_scalar::<_, i64>(&sql).fetch_one(&self.pool).await?)
    }

    async fn max_id(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COALESCE(MAX(`id`), 0) FROM {}", quote_ident(table));
        Ok(sqlx::query_scalar::<_, i64>(&sql).fetch_one(&self.pool).await?)
    }

    async fn fetch_rows(&self, query: &RowQuery) -> Result<Vec<SqlRow>> {
        let sql = query.to_sql();
        let mut statement = sqlx::query(&sql);
        if let Some(after) = query.after_id {
            statement = statement.bind(after);
        }
        let rows = statement.fetch_all(&self.pool).await?;
        rows.iter().map(decode_row).collect()
    }
}

fn decode_row(row: &SqliteRow) -> Result<SqlRow> {
    (0..row.len())
        .map(|idx| -> Result<SqlValue> {
            let raw = row.try_get_raw(idx)?;
            if raw.is_null() {
                return Ok(SqlValue::Null);
            }
            let value = match raw.type_info().name() {
                "INTEGER" => SqlValue::Integer(row.try_get(idx)?),
                "REAL" => SqlValue::Real(row.try_get(idx)?),
                "BLOB" => SqlValue::Blob(row.try_get(idx)?),
                _ => SqlValue::Text(row.try_get(idx)?),
            };
            Ok(value)
        })
        .collect()
}

/// Source wrapper recording how often each table's rows were counted
#[derive(Clone)]
pub struct CountingSource<S> {
    inner: S,
    counted: Arc<Mutex<HashMap<String, usize>>>,
}

impl<S: SourceDatabase> CountingSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            counted: Arc::default(),
        }
    }

    pub fn count_calls(&self, table: &str) -> usize {
        self.counted.lock().unwrap().get(table).copied().unwrap_or(0)
    }
}

#[async_trait]
impl<S: SourceDatabase> SourceDatabase for CountingSource<S> {
    async fn list_tables(&self) -> Result<Vec<String>> {
        self.inner.list_tables().await
    }

    async fn describe_table(&self, table: &str) -> Result<Vec<SourceColumn>> {
        self.inner.describe_table(table).await
    }

    async fn count_rows(&self, table: &str) -> Result<i64> {
        *self.counted.lock().unwrap().entry(table.to_string()).or_default() += 1;
        self.inner.count_rows(table).await
    }

    async fn max_id(&self, table: &str) -> Result<i64> {
        self.inner.max_id(table).await
    }

    async fn fetch_rows(&self, query: &RowQuery) -> Result<Vec<SqlRow>> {
        self.inner.fetch_rows(query).await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

/// Boxable handle on a source shared with the test body
struct SharedSource(Arc<dyn SourceDatabase>);

#[async_trait]
impl SourceDatabase for SharedSource {
    async fn list_tables(&self) -> Result<Vec<String>> {
        self.0.list_tables().await
    }

    async fn describe_table(&self, table: &str) -> Result<Vec<SourceColumn>> {
        self.0.describe_table(table).await
    }

    async fn count_rows(&self, table: &str) -> Result<i64> {
        self.0.count_rows(table).await
    }

    async fn max_id(&self, table: &str) -> Result<i64> {
        self.0.max_id(table).await
    }

    async fn fetch_rows(&self, query: &RowQuery) -> Result<Vec<SqlRow>> {
        self.0.fetch_rows(query).await
    }

    async fn close(&self) {
        self.0.close().await
    }
}

/// Hands out the simulated database registered for each device id
#[derive(Default, Clone)]
pub struct SqliteConnector {
    sources: HashMap<String, Arc<dyn SourceDatabase>>,
}

impl SqliteConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, device_id: &str, source: impl SourceDatabase + 'static) -> Self {
        self.sources.insert(device_id.to_string(), Arc::new(source));
        self
    }

    pub fn into_arc(self) -> Arc<dyn SourceConnector> {
        Arc::new(self)
    }
}

#[async_trait]
impl SourceConnector for SqliteConnector {
    async fn connect(&self, device: &DeviceDescriptor) -> Result<Box<dyn SourceDatabase>> {
        match self.sources.get(&device.id) {
            Some(source) => Ok(Box::new(SharedSource(Arc::clone(source)))),
            None => Err(etho_backup::BackupError::config(format!(
                "no simulated database for device {}",
                device.id
            ))),
        }
    }
}
