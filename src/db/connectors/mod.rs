pub mod memory;
pub mod mysql;
pub mod sqlite;

use crate::db::schema::{Row, TableSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Supported database engines
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DatabaseEngine {
    MySql,
    Sqlite,
    /// In-process tables; used by tests and dry runs.
    Memory,
}

impl std::fmt::Display for DatabaseEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseEngine::MySql => write!(f, "MySQL"),
            DatabaseEngine::Sqlite => write!(f, "SQLite"),
            DatabaseEngine::Memory => write!(f, "Memory"),
        }
    }
}

/// Connection configuration for a database
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub engine: DatabaseEngine,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub file_path: Option<String>,
    pub read_only: bool,
    pub connection_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            engine: DatabaseEngine::Sqlite,
            host: None,
            port: None,
            database: None,
            username: None,
            password: None,
            file_path: None,
            read_only: true,
            connection_timeout_secs: 30,
        }
    }
}

impl ConnectionConfig {
    /// Human-readable target for log lines; never includes the password.
    pub fn describe(&self) -> String {
        match self.engine {
            DatabaseEngine::Sqlite => format!(
                "{} {}",
                self.engine,
                self.file_path.as_deref().unwrap_or(":memory:")
            ),
            _ => format!(
                "{} {}:{}/{}",
                self.engine,
                self.host.as_deref().unwrap_or("localhost"),
                self.port.unwrap_or(3306),
                self.database.as_deref().unwrap_or("")
            ),
        }
    }
}

/// Errors raised by connectors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConnectorError {
    /// The database cannot be reached at all. Aborts the whole run.
    #[error("database unavailable: {0}")]
    Unavailable(String),
    /// A statement was rejected. Fatal for the table being migrated.
    #[error("query failed: {0}")]
    Query(String),
    #[error("connection is read-only, refused: {0}")]
    ReadOnly(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
}

impl ConnectorError {
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, ConnectorError::Unavailable(_))
    }
}

pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// What an upsert did to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    Updated,
    /// The key existed and every column already held the written value.
    Unchanged,
}

/// The core trait that all database connectors implement. The source side of
/// a migration only calls the read methods.
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    /// Connect to the database
    async fn connect(&mut self) -> ConnectorResult<()>;

    /// Disconnect from the database
    async fn disconnect(&mut self) -> ConnectorResult<()>;

    /// Check if the connection is active
    async fn is_connected(&self) -> bool;

    /// Get the database engine type
    fn engine(&self) -> DatabaseEngine;

    /// Whether every write through this connector is refused.
    fn is_read_only(&self) -> bool;

    /// Get a list of table names
    async fn get_tables(&self) -> ConnectorResult<Vec<String>>;

    /// Introspect columns and primary key of one table.
    async fn get_table_spec(&self, table: &str) -> ConnectorResult<TableSpec>;

    /// Read every row of a table.
    async fn get_rows(&self, table: &str) -> ConnectorResult<Vec<Row>>;

    /// Read every value of one column (used for orphan cleanup key sets).
    async fn get_column_values(
        &self,
        table: &str,
        column: &str,
    ) -> ConnectorResult<Vec<serde_json::Value>>;

    /// Update the non-key columns of the row identified by `key_columns`, or
    /// insert it when no such row exists.
    async fn upsert_row(
        &self,
        table: &str,
        key_columns: &[String],
        row: &Row,
    ) -> ConnectorResult<WriteOutcome>;

    /// Plain insert; a key collision is a `Query` error.
    async fn insert_row(&self, table: &str, row: &Row) -> ConnectorResult<()>;

    /// Remove every row and reset the identity counter.
    async fn truncate_table(&self, table: &str) -> ConnectorResult<()>;

    /// Delete every row whose `column` value is not in `keep`. Returns the
    /// number of rows removed.
    async fn delete_rows_not_in(
        &self,
        table: &str,
        column: &str,
        keep: &[serde_json::Value],
    ) -> ConnectorResult<u64>;
}

/// Create a connector for the configured engine and connect it.
pub async fn open(config: ConnectionConfig) -> ConnectorResult<Box<dyn DatabaseConnector>> {
    let target = config.describe();
    let mut connector: Box<dyn DatabaseConnector> = match config.engine {
        DatabaseEngine::MySql => Box::new(mysql::MySqlConnector::new(config)),
        DatabaseEngine::Sqlite => Box::new(sqlite::SqliteConnector::new(config)),
        DatabaseEngine::Memory => {
            let read_only = config.read_only;
            let memory = memory::MemoryConnector::new();
            Box::new(if read_only { memory.read_only() } else { memory })
        }
    };
    connector.connect().await?;
    log::info!("Connected to {}", target);
    Ok(connector)
}
