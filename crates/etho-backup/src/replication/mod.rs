//! Relational mirroring of device databases into local SQLite files

pub mod consistency;
pub mod duplicates;
pub mod mirror;
pub mod replicator;
pub mod schema;
pub mod source;

pub use consistency::{ConsistencyChecker, ConsistencyReport, NO_COMPARISON};
pub use duplicates::{check_duplicates, DuplicationReport};
pub use mirror::LocalMirror;
pub use replicator::{ReplicationStats, RowReplicator, TableSync};
pub use schema::{SqliteType, SyncPolicy, TableDescriptor};
pub use source::{MySqlSource, RowQuery, SourceColumn, SourceDatabase, SqlRow, SqlValue};
