//! Remote experiment databases
//!
//! [`SourceDatabase`] is the seam between the replicator and the database
//! server running on a device. [`MySqlSource`] is the production
//! implementation; anything able to list tables and page through rows by id
//! can stand in for it.

use crate::config::SourceCredentials;
use crate::device::DeviceDescriptor;
use crate::error::Result;
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::fmt;

/// Port of the MySQL server on every device
pub const MYSQL_PORT: u16 = 3306;

/// A single cell value carried from the source to the mirror
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(v) => Some(*v),
            SqlValue::Real(v) => Some(*v as i64),
            SqlValue::Text(v) => v.parse().ok(),
            SqlValue::Null | SqlValue::Blob(_) => None,
        }
    }
}

/// Flat-text rendering used by the side-file
impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("None"),
            SqlValue::Integer(v) => write!(f, "{v}"),
            SqlValue::Real(v) => write!(f, "{v}"),
            SqlValue::Text(v) => f.write_str(v),
            SqlValue::Blob(bytes) => {
                for byte in bytes {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            },
        }
    }
}

pub type SqlRow = Vec<SqlValue>;

/// A column as declared on the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceColumn {
    pub name: String,
    /// Declared type, e.g. `int(11)`, `varchar(255)`, `longblob`
    pub type_name: String,
}

impl SourceColumn {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// One page of rows to read from a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowQuery {
    pub table: String,
    /// Explicit column list; `None` selects every column
    pub columns: Option<Vec<String>>,
    /// Only rows with `id` strictly greater than this
    pub after_id: Option<i64>,
    /// Page by ascending `id`
    pub order_by_id: bool,
    pub limit: Option<usize>,
}

impl RowQuery {
    /// Every row of `table`, unordered
    pub fn all(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: None,
            after_id: None,
            order_by_id: false,
            limit: None,
        }
    }

    /// Up to `limit` rows following `after_id` in id order
    pub fn page(table: impl Into<String>, after_id: Option<i64>, limit: usize) -> Self {
        Self {
            table: table.into(),
            columns: None,
            after_id,
            order_by_id: true,
            limit: Some(limit),
        }
    }

    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }

    /// Render with `?` placeholders; the bound parameter, if any, is `after_id`
    pub fn to_sql(&self) -> String {
        let projection = match &self.columns {
            Some(columns) => columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
            None => "*".to_string(),
        };

        let mut sql = format!("SELECT {} FROM {}", projection, quote_ident(&self.table));
        if self.after_id.is_some() {
            sql.push_str(" WHERE `id` > ?");
        }
        if self.order_by_id {
            sql.push_str(" ORDER BY `id`");
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        sql
    }
}

/// Quote an identifier with backticks, understood by both MySQL and SQLite
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Read access to a device's experiment database
#[async_trait]
pub trait SourceDatabase: Send + Sync {
    /// Names of every table in the database
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Columns of `table` in declaration order
    async fn describe_table(&self, table: &str) -> Result<Vec<SourceColumn>>;

    async fn count_rows(&self, table: &str) -> Result<i64>;

    /// Largest `id` in `table`, 0 when empty
    async fn max_id(&self, table: &str) -> Result<i64>;

    async fn fetch_rows(&self, query: &RowQuery) -> Result<Vec<SqlRow>>;

    /// Release every connection held by the source
    async fn close(&self) {}
}

/// Experiment database served by a device's MySQL server
pub struct MySqlSource {
    pool: MySqlPool,
    database: String,
}

impl MySqlSource {
    /// Connect to `<device-name>_db` on the device
    pub async fn connect(
        device: &DeviceDescriptor,
        credentials: &SourceCredentials,
    ) -> Result<Self> {
        let database = device.database_name();
        let options = MySqlConnectOptions::new()
            .host(&device.ip)
            .port(MYSQL_PORT)
            .username(&credentials.user)
            .password(&credentials.password)
            .database(&database);

        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(credentials.connect_timeout())
            .connect_with(options)
            .await?;

        tracing::debug!(
            device_id = %device.id,
            database = %database,
            "Connected to device database"
        );

        Ok(Self { pool, database })
    }

    pub fn database(&self) -> &str {
        &self.database
    }
}

#[async_trait]
impl SourceDatabase for MySqlSource {
    async fn list_tables(&self) -> Result<Vec<String>> {
        let tables = sqlx::query_scalar::<_, String>(
            "SELECT CAST(TABLE_NAME AS CHAR) FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = DATABASE() ORDER BY TABLE_NAME",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(tables)
    }

    async fn describe_table(&self, table: &str) -> Result<Vec<SourceColumn>> {
        let rows = sqlx::query(
            "SELECT CAST(COLUMN_NAME AS CHAR) AS name, CAST(COLUMN_TYPE AS CHAR) AS type_name \
             FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(SourceColumn {
                    name: row.try_get("name")?,
                    type_name: row.try_get("type_name")?,
                })
            })
            .collect()
    }

    async fn count_rows(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        Ok(sqlx::query_scalar::<_, i64>(&sql).fetch_one(&self.pool).await?)
    }

    async fn max_id(&self, table: &str) -> Result<i64> {
        let sql = format!(
            "SELECT CAST(COALESCE(MAX(`id`), 0) AS SIGNED) FROM {}",
            quote_ident(table)
        );
        Ok(sqlx::query_scalar::<_, i64>(&sql).fetch_one(&self.pool).await?)
    }

    async fn fetch_rows(&self, query: &RowQuery) -> Result<Vec<SqlRow>> {
        let sql = query.to_sql();
        let mut statement = sqlx::query(&sql);
        if let Some(after) = query.after_id {
            statement = statement.bind(after);
        }

        let rows = statement.fetch_all(&self.pool).await?;
        rows.iter().map(decode_mysql_row).collect()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn decode_mysql_row(row: &MySqlRow) -> Result<SqlRow> {
    (0..row.columns().len())
        .map(|idx| decode_mysql_value(row, idx))
        .collect()
}

/// Map one MySQL cell onto the storage classes of the mirror
fn decode_mysql_value(row: &MySqlRow, idx: usize) -> Result<SqlValue> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(SqlValue::Null);
    }
    let type_name = raw.type_info().name().to_uppercase();

    let value = match type_name.as_str() {
        "BOOLEAN" => SqlValue::Integer(i64::from(row.try_get::<bool, _>(idx)?)),
        "TINYINT" => SqlValue::Integer(i64::from(row.try_get::<i8, _>(idx)?)),
        "SMALLINT" => SqlValue::Integer(i64::from(row.try_get::<i16, _>(idx)?)),
        "MEDIUMINT" | "INT" => SqlValue::Integer(i64::from(row.try_get::<i32, _>(idx)?)),
        "BIGINT" => SqlValue::Integer(row.try_get::<i64, _>(idx)?),
        "TINYINT UNSIGNED" => SqlValue::Integer(i64::from(row.try_get::<u8, _>(idx)?)),
        "SMALLINT UNSIGNED" => SqlValue::Integer(i64::from(row.try_get::<u16, _>(idx)?)),
        "MEDIUMINT UNSIGNED" | "INT UNSIGNED" => {
            SqlValue::Integer(i64::from(row.try_get::<u32, _>(idx)?))
        },
        "BIGINT UNSIGNED" => {
            let v = row.try_get::<u64, _>(idx)?;
            i64::try_from(v).map_or(SqlValue::Text(v.to_string()), SqlValue::Integer)
        },
        "FLOAT" => SqlValue::Real(f64::from(row.try_get::<f32, _>(idx)?)),
        "DOUBLE" => SqlValue::Real(row.try_get::<f64, _>(idx)?),
        "DECIMAL" => {
            let v = row.try_get::<sqlx::types::BigDecimal, _>(idx)?;
            let text = v.to_string();
            text.parse::<f64>().map_or(SqlValue::Text(text), SqlValue::Real)
        },
        "DATETIME" => SqlValue::Text(row.try_get::<chrono::NaiveDateTime, _>(idx)?.to_string()),
        "TIMESTAMP" => SqlValue::Text(
            row.try_get::<chrono::DateTime<chrono::Utc>, _>(idx)?
                .naive_utc()
                .to_string(),
        ),
        "DATE" => SqlValue::Text(row.try_get::<chrono::NaiveDate, _>(idx)?.to_string()),
        "TIME" => SqlValue::Text(row.try_get::<chrono::NaiveTime, _>(idx)?.to_string()),
        name if name.contains("BLOB") || name.contains("BINARY") || name == "BIT" => {
            SqlValue::Blob(row.try_get::<Vec<u8>, _>(idx)?)
        },
        _ => match row.try_get::<String, _>(idx) {
            Ok(text) => SqlValue::Text(text),
            Err(_) => SqlValue::Blob(row.try_get::<Vec<u8>, _>(idx)?),
        },
    };

    Ok(value)
}
