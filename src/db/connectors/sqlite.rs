use super::{
    ConnectionConfig, ConnectorError, ConnectorResult, DatabaseConnector, DatabaseEngine,
    WriteOutcome,
};
use crate::db::schema::{binary_bytes, binary_value, value_fingerprint, Row, TableSpec};
use crate::db::sql_generator::{SqlGenerator, Statement, Upsert};
use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OpenFlags};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

const DELETE_CHUNK: usize = 500;

/// SQLite connector using rusqlite. Blocking calls run on the blocking pool.
pub struct SqliteConnector {
    config: ConnectionConfig,
    conn: Option<Arc<Mutex<Connection>>>,
    sql: SqlGenerator,
}

impl SqliteConnector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            conn: None,
            sql: SqlGenerator::new(DatabaseEngine::Sqlite),
        }
    }

    fn ensure_writable(&self, table: &str) -> ConnectorResult<()> {
        if self.config.read_only {
            return Err(ConnectorError::ReadOnly(table.to_string()));
        }
        Ok(())
    }

    async fn run<T, F>(&self, what: String, f: F) -> ConnectorResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self
            .conn
            .clone()
            .ok_or_else(|| ConnectorError::Unavailable("SQLite connection is not open".into()))?;
        tokio::task::spawn_blocking(move || {
            let mut c = conn
                .lock()
                .map_err(|e| ConnectorError::Unavailable(format!("Lock error: {}", e)))?;
            f(&mut *c).map_err(|e| map_sqlite_error(&what, e))
        })
        .await
        .map_err(|e| ConnectorError::Unavailable(format!("spawn_blocking join error: {}", e)))?
    }
}

fn map_sqlite_error(what: &str, err: rusqlite::Error) -> ConnectorError {
    use rusqlite::ErrorCode;
    match err {
        rusqlite::Error::SqliteFailure(ref e, _)
            if matches!(
                e.code,
                ErrorCode::CannotOpen | ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt
            ) =>
        {
            ConnectorError::Unavailable(format!("{}: {}", what, err))
        }
        rusqlite::Error::SqliteFailure(ref e, _) if e.code == ErrorCode::ReadOnly => {
            ConnectorError::ReadOnly(format!("{}: {}", what, err))
        }
        other => ConnectorError::Query(format!("{}: {}", what, other)),
    }
}

fn json_to_sql(value: &serde_json::Value) -> SqlValue {
    match value {
        serde_json::Value::Null => SqlValue::Null,
        serde_json::Value::Bool(b) => SqlValue::Integer(*b as i64),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => SqlValue::Text(s.clone()),
        other => match binary_bytes(other) {
            Some(bytes) => SqlValue::Blob(bytes),
            None => SqlValue::Text(other.to_string()),
        },
    }
}

fn sql_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::json!(i),
        ValueRef::Real(f) => serde_json::json!(f),
        // TEXT holding invalid UTF-8 travels as bytes rather than lossily.
        ValueRef::Text(t) => match std::str::from_utf8(t) {
            Ok(text) => serde_json::Value::String(text.to_string()),
            Err(_) => binary_value(t),
        },
        ValueRef::Blob(b) => binary_value(b),
    }
}

fn execute(conn: &Connection, stmt: &Statement) -> rusqlite::Result<usize> {
    conn.execute(
        &stmt.sql,
        rusqlite::params_from_iter(stmt.params.iter().map(json_to_sql)),
    )
}

#[async_trait]
impl DatabaseConnector for SqliteConnector {
    async fn connect(&mut self) -> ConnectorResult<()> {
        let path = self.config.file_path.clone();
        let read_only = self.config.read_only;
        let conn = tokio::task::spawn_blocking(move || match path {
            Some(p) if read_only => {
                Connection::open_with_flags(p, OpenFlags::SQLITE_OPEN_READ_ONLY)
            }
            Some(p) => Connection::open(p),
            None => Connection::open_in_memory(),
        })
        .await
        .map_err(|e| ConnectorError::Unavailable(format!("spawn_blocking join error: {}", e)))?
        .map_err(|e| ConnectorError::Unavailable(format!("Failed to open SQLite database: {}", e)))?;
        self.conn = Some(Arc::new(Mutex::new(conn)));
        Ok(())
    }

    async fn disconnect(&mut self) -> ConnectorResult<()> {
        self.conn = None;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::Sqlite
    }

    fn is_read_only(&self) -> bool {
        self.config.read_only
    }

    async fn get_tables(&self) -> ConnectorResult<Vec<String>> {
        self.run("listing tables".into(), |c| {
            let mut stmt = c.prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' \
                 AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(names)
        })
        .await
    }

    async fn get_table_spec(&self, table: &str) -> ConnectorResult<TableSpec> {
        let pragma = format!("PRAGMA table_info({})", self.sql.quote_ident(table));
        let name = table.to_string();
        let columns = self
            .run(format!("introspecting '{}'", table), move |c| {
                let mut stmt = c.prepare(&pragma)?;
                let cols = stmt
                    .query_map([], |row| {
                        Ok((row.get::<_, String>(1)?, row.get::<_, i64>(5)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(cols)
            })
            .await?;

        if columns.is_empty() {
            return Err(ConnectorError::UnknownTable(name));
        }

        let mut keyed: Vec<(i64, String)> = columns
            .iter()
            .filter(|(_, pk)| *pk > 0)
            .map(|(col, pk)| (*pk, col.clone()))
            .collect();
        keyed.sort();

        Ok(TableSpec {
            name,
            key_columns: keyed.into_iter().map(|(_, c)| c).collect(),
            columns: columns.into_iter().map(|(c, _)| c).collect(),
        })
    }

    async fn get_rows(&self, table: &str) -> ConnectorResult<Vec<Row>> {
        let query = self.sql.select_all(table);
        self.run(format!("reading '{}'", table), move |c| {
            let mut stmt = c.prepare(&query)?;
            let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
            let rows = stmt
                .query_map([], |row| {
                    let mut out = Row::new();
                    for (i, name) in names.iter().enumerate() {
                        out.insert(name.clone(), sql_to_json(row.get_ref(i)?));
                    }
                    Ok(out)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn get_column_values(
        &self,
        table: &str,
        column: &str,
    ) -> ConnectorResult<Vec<serde_json::Value>> {
        let query = self.sql.select_column(table, column);
        self.run(format!("reading '{}.{}'", table, column), move |c| {
            let mut stmt = c.prepare(&query)?;
            let values = stmt
                .query_map([], |row| Ok(sql_to_json(row.get_ref(0)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(values)
        })
        .await
    }

    async fn upsert_row(
        &self,
        table: &str,
        key_columns: &[String],
        row: &Row,
    ) -> ConnectorResult<WriteOutcome> {
        self.ensure_writable(table)?;
        let Upsert {
            update,
            count,
            insert,
        } = self.sql.upsert(table, row, key_columns);

        self.run(format!("upserting into '{}'", table), move |c| {
            let tx = c.transaction()?;
            if let Some(update) = update {
                if execute(&tx, &update)? > 0 {
                    tx.commit()?;
                    return Ok(WriteOutcome::Updated);
                }
            }
            let existing: i64 = tx.query_row(
                &count.sql,
                rusqlite::params_from_iter(count.params.iter().map(json_to_sql)),
                |r| r.get(0),
            )?;
            let outcome = if existing > 0 {
                WriteOutcome::Unchanged
            } else {
                execute(&tx, &insert)?;
                WriteOutcome::Inserted
            };
            tx.commit()?;
            Ok(outcome)
        })
        .await
    }

    async fn insert_row(&self, table: &str, row: &Row) -> ConnectorResult<()> {
        self.ensure_writable(table)?;
        let insert = self.sql.insert(table, row);
        self.run(format!("inserting into '{}'", table), move |c| {
            execute(c, &insert).map(|_| ())
        })
        .await
    }

    async fn truncate_table(&self, table: &str) -> ConnectorResult<()> {
        self.ensure_writable(table)?;
        let statements = self.sql.truncate(table);
        let name = table.to_string();
        self.run(format!("truncating '{}'", table), move |c| {
            let tx = c.transaction()?;
            for stmt in &statements {
                execute(&tx, stmt)?;
            }
            let has_sequence: i64 = tx.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'sqlite_sequence'",
                [],
                |r| r.get(0),
            )?;
            if has_sequence > 0 {
                tx.execute(
                    "DELETE FROM sqlite_sequence WHERE name = ?1",
                    rusqlite::params![name],
                )?;
            }
            tx.commit()
        })
        .await
    }

    async fn delete_rows_not_in(
        &self,
        table: &str,
        column: &str,
        keep: &[serde_json::Value],
    ) -> ConnectorResult<u64> {
        self.ensure_writable(table)?;
        let present = self.get_column_values(table, column).await?;
        let keep: HashSet<String> = keep.iter().map(value_fingerprint).collect();

        let mut seen = HashSet::new();
        let doomed: Vec<serde_json::Value> = present
            .into_iter()
            .filter(|v| !v.is_null() && !keep.contains(&value_fingerprint(v)))
            .filter(|v| seen.insert(value_fingerprint(v)))
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }

        let statements: Vec<Statement> = doomed
            .chunks(DELETE_CHUNK)
            .map(|chunk| self.sql.delete_in(table, column, chunk))
            .collect();
        self.run(format!("deleting orphans from '{}'", table), move |c| {
            let tx = c.transaction()?;
            let mut removed = 0u64;
            for stmt in &statements {
                removed += execute(&tx, stmt)? as u64;
            }
            tx.commit()?;
            Ok(removed)
        })
        .await
    }
}
