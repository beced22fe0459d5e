use super::{
    ConnectionConfig, ConnectorError, ConnectorResult, DatabaseConnector, DatabaseEngine,
    WriteOutcome,
};
use crate::db::schema::{binary_bytes, binary_value, value_fingerprint, Row, TableSpec};
use crate::db::sql_generator::{SqlGenerator, Statement, Upsert};
use async_trait::async_trait;
use mysql_async::consts::ColumnType;
use mysql_async::prelude::*;
use mysql_async::{
    Column, Conn, Opts, OptsBuilder, Params, Pool, Row as MySqlRow, TxOpts, Value as MyValue,
};
use std::collections::HashSet;

const DELETE_CHUNK: usize = 1000;

/// MySQL server error codes the connector classifies.
const ER_NO_SUCH_TABLE: u16 = 1146;
const ER_CANT_EXECUTE_IN_READ_ONLY_TRANSACTION: u16 = 1792;

/// Collation id of the `binary` character set.
const BINARY_COLLATION: u16 = 63;

/// MySQL connector using mysql_async
pub struct MySqlConnector {
    config: ConnectionConfig,
    pool: Option<Pool>,
    sql: SqlGenerator,
}

impl MySqlConnector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            pool: None,
            sql: SqlGenerator::new(DatabaseEngine::MySql),
        }
    }

    async fn conn(&self) -> ConnectorResult<Conn> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| ConnectorError::Unavailable("MySQL pool is not open".into()))?;
        pool.get_conn()
            .await
            .map_err(|e| map_mysql_error("getting MySQL connection", e))
    }

    fn ensure_writable(&self, table: &str) -> ConnectorResult<()> {
        if self.config.read_only {
            return Err(ConnectorError::ReadOnly(table.to_string()));
        }
        Ok(())
    }

    async fn exec_affected(&self, what: &str, stmt: Statement) -> ConnectorResult<u64> {
        let mut conn = self.conn().await?;
        conn.exec_drop(stmt.sql, to_params(&stmt.params))
            .await
            .map_err(|e| map_mysql_error(what, e))?;
        Ok(conn.affected_rows())
    }
}

fn map_mysql_error(what: &str, err: mysql_async::Error) -> ConnectorError {
    match err {
        mysql_async::Error::Io(_) | mysql_async::Error::Driver(_) => {
            ConnectorError::Unavailable(format!("{}: {}", what, err))
        }
        mysql_async::Error::Server(ref e) if e.code == ER_NO_SUCH_TABLE => {
            ConnectorError::UnknownTable(e.message.clone())
        }
        mysql_async::Error::Server(ref e) if e.code == ER_CANT_EXECUTE_IN_READ_ONLY_TRANSACTION => {
            ConnectorError::ReadOnly(format!("{}: {}", what, e.message))
        }
        other => ConnectorError::Query(format!("{}: {}", what, other)),
    }
}

fn json_to_mysql(value: &serde_json::Value) -> MyValue {
    match value {
        serde_json::Value::Null => MyValue::NULL,
        serde_json::Value::Bool(b) => MyValue::from(*b as i64),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                MyValue::from(i)
            } else if let Some(u) = n.as_u64() {
                MyValue::from(u)
            } else {
                MyValue::from(n.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::String(s) => MyValue::from(s.as_str()),
        other => match binary_bytes(other) {
            Some(bytes) => MyValue::Bytes(bytes),
            None => MyValue::from(other.to_string()),
        },
    }
}

/// BLOB, BINARY and VARBINARY columns. Numeric columns also report the
/// binary collation but arrive as text.
fn is_binary_column(column: &Column) -> bool {
    column.character_set() == BINARY_COLLATION
        && matches!(
            column.column_type(),
            ColumnType::MYSQL_TYPE_TINY_BLOB
                | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
                | ColumnType::MYSQL_TYPE_LONG_BLOB
                | ColumnType::MYSQL_TYPE_BLOB
                | ColumnType::MYSQL_TYPE_STRING
                | ColumnType::MYSQL_TYPE_VAR_STRING
                | ColumnType::MYSQL_TYPE_VARCHAR
        )
}

fn mysql_to_json(value: &MyValue, binary: bool) -> serde_json::Value {
    match value {
        MyValue::NULL => serde_json::Value::Null,
        MyValue::Bytes(b) if binary => binary_value(b),
        MyValue::Bytes(b) => match std::str::from_utf8(b) {
            Ok(text) => serde_json::Value::String(text.to_string()),
            Err(_) => binary_value(b),
        },
        MyValue::Int(i) => serde_json::json!(i),
        MyValue::UInt(u) => serde_json::json!(u),
        MyValue::Float(f) => serde_json::json!(f),
        MyValue::Double(d) => serde_json::json!(d),
        MyValue::Date(y, mo, d, h, mi, s, us) => {
            let mut text = format!("{:04}-{:02}-{:02} {:02}:{:02}:{:02}", y, mo, d, h, mi, s);
            if *us > 0 {
                text.push_str(&format!(".{:06}", us));
            }
            serde_json::Value::String(text)
        }
        MyValue::Time(neg, days, h, mi, s, _) => {
            let hours = *days as u64 * 24 + *h as u64;
            let sign = if *neg { "-" } else { "" };
            serde_json::Value::String(format!("{}{:02}:{:02}:{:02}", sign, hours, mi, s))
        }
    }
}

fn to_params(values: &[serde_json::Value]) -> Params {
    if values.is_empty() {
        Params::Empty
    } else {
        Params::Positional(values.iter().map(json_to_mysql).collect())
    }
}

fn to_row(row: &MySqlRow) -> Row {
    row.columns_ref()
        .iter()
        .enumerate()
        .map(|(i, col)| {
            let binary = is_binary_column(col);
            let value = row
                .as_ref(i)
                .map(|v| mysql_to_json(v, binary))
                .unwrap_or(serde_json::Value::Null);
            (col.name_str().into_owned(), value)
        })
        .collect()
}

#[async_trait]
impl DatabaseConnector for MySqlConnector {
    async fn connect(&mut self) -> ConnectorResult<()> {
        let mut init = vec!["SET NAMES utf8mb4".to_string()];
        if self.config.read_only {
            init.push("SET SESSION TRANSACTION READ ONLY".to_string());
        }
        let builder = OptsBuilder::default()
            .ip_or_hostname(self.config.host.clone().unwrap_or_else(|| "localhost".into()))
            .tcp_port(self.config.port.unwrap_or(3306))
            .db_name(self.config.database.clone())
            .user(self.config.username.clone())
            .pass(self.config.password.clone())
            .init(init);
        let pool = Pool::new(Opts::from(builder));

        let mut conn = pool
            .get_conn()
            .await
            .map_err(|e| map_mysql_error("creating MySQL pool", e))?;
        conn.query_drop("SELECT 1")
            .await
            .map_err(|e| map_mysql_error("testing MySQL connection", e))?;
        drop(conn);

        self.pool = Some(pool);
        Ok(())
    }

    async fn disconnect(&mut self) -> ConnectorResult<()> {
        if let Some(pool) = self.pool.take() {
            pool.disconnect()
                .await
                .map_err(|e| map_mysql_error("closing MySQL pool", e))?;
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.pool.is_some()
    }

    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::MySql
    }

    fn is_read_only(&self) -> bool {
        self.config.read_only
    }

    async fn get_tables(&self) -> ConnectorResult<Vec<String>> {
        let mut conn = self.conn().await?;
        conn.query::<String, _>("SHOW TABLES")
            .await
            .map_err(|e| map_mysql_error("listing tables", e))
    }

    async fn get_table_spec(&self, table: &str) -> ConnectorResult<TableSpec> {
        let mut conn = self.conn().await?;
        let columns: Vec<String> = conn
            .exec(
                "SELECT COLUMN_NAME FROM INFORMATION_SCHEMA.COLUMNS \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
                 ORDER BY ORDINAL_POSITION",
                (table,),
            )
            .await
            .map_err(|e| map_mysql_error("introspecting columns", e))?;
        if columns.is_empty() {
            return Err(ConnectorError::UnknownTable(table.to_string()));
        }

        let key_columns: Vec<String> = conn
            .exec(
                "SELECT COLUMN_NAME FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
                 AND CONSTRAINT_NAME = 'PRIMARY' ORDER BY ORDINAL_POSITION",
                (table,),
            )
            .await
            .map_err(|e| map_mysql_error("introspecting primary key", e))?;

        Ok(TableSpec {
            name: table.to_string(),
            key_columns,
            columns,
        })
    }

    async fn get_rows(&self, table: &str) -> ConnectorResult<Vec<Row>> {
        let mut conn = self.conn().await?;
        // Binary protocol keeps integers typed.
        let rows: Vec<MySqlRow> = conn
            .exec(self.sql.select_all(table), ())
            .await
            .map_err(|e| map_mysql_error(&format!("reading '{}'", table), e))?;
        Ok(rows.iter().map(to_row).collect())
    }

    async fn get_column_values(
        &self,
        table: &str,
        column: &str,
    ) -> ConnectorResult<Vec<serde_json::Value>> {
        let mut conn = self.conn().await?;
        let rows: Vec<MySqlRow> = conn
            .exec(self.sql.select_column(table, column), ())
            .await
            .map_err(|e| map_mysql_error(&format!("reading '{}.{}'", table, column), e))?;
        Ok(rows
            .iter()
            .map(|r| {
                let binary = r.columns_ref().first().map_or(false, is_binary_column);
                r.as_ref(0)
                    .map(|v| mysql_to_json(v, binary))
                    .unwrap_or(serde_json::Value::Null)
            })
            .collect())
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

        let what = format!("upserting into '{}'", table);
        let mut conn = self.conn().await?;
        let mut tx = conn
            .start_transaction(TxOpts::default())
            .await
            .map_err(|e| map_mysql_error(&what, e))?;

        // Affected rows count changed rows only, and the WHERE clause
        // already skips identical rows.
        if let Some(update) = update {
            tx.exec_drop(update.sql, to_params(&update.params))
                .await
                .map_err(|e| map_mysql_error(&what, e))?;
            if tx.affected_rows() > 0 {
                tx.commit().await.map_err(|e| map_mysql_error(&what, e))?;
                return Ok(WriteOutcome::Updated);
            }
        }
        let existing: Option<i64> = tx
            .exec_first(count.sql, to_params(&count.params))
            .await
            .map_err(|e| map_mysql_error(&what, e))?;
        let outcome = if existing.unwrap_or(0) > 0 {
            WriteOutcome::Unchanged
        } else {
            tx.exec_drop(insert.sql, to_params(&insert.params))
                .await
                .map_err(|e| map_mysql_error(&what, e))?;
            WriteOutcome::Inserted
        };
        tx.commit().await.map_err(|e| map_mysql_error(&what, e))?;
        Ok(outcome)
    }

    async fn insert_row(&self, table: &str, row: &Row) -> ConnectorResult<()> {
        self.ensure_writable(table)?;
        let stmt = self.sql.insert(table, row);
        self.exec_affected(&format!("inserting into '{}'", table), stmt)
            .await
            .map(|_| ())
    }

    async fn truncate_table(&self, table: &str) -> ConnectorResult<()> {
        self.ensure_writable(table)?;
        for stmt in self.sql.truncate(table) {
            self.exec_affected(&format!("truncating '{}'", table), stmt)
                .await?;
        }
        Ok(())
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

        let what = format!("deleting orphans from '{}'", table);
        let mut conn = self.conn().await?;
        let mut tx = conn
            .start_transaction(TxOpts::default())
            .await
            .map_err(|e| map_mysql_error(&what, e))?;
        let mut removed = 0u64;
        for chunk in doomed.chunks(DELETE_CHUNK) {
            let stmt = self.sql.delete_in(table, column, chunk);
            tx.exec_drop(stmt.sql, to_params(&stmt.params))
                .await
                .map_err(|e| map_mysql_error(&what, e))?;
            removed += tx.affected_rows();
        }
        tx.commit().await.map_err(|e| map_mysql_error(&what, e))?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_values_bind_as_mysql_values() {
        assert_eq!(json_to_mysql(&json!(null)), MyValue::NULL);
        assert_eq!(json_to_mysql(&json!(true)), MyValue::Int(1));
        assert_eq!(json_to_mysql(&json!(42)), MyValue::Int(42));
        assert_eq!(json_to_mysql(&json!(u64::MAX)), MyValue::UInt(u64::MAX));
        assert_eq!(json_to_mysql(&json!(1.5)), MyValue::Double(1.5));
        assert_eq!(json_to_mysql(&json!("en")), MyValue::Bytes(b"en".to_vec()));
        assert_eq!(
            json_to_mysql(&binary_value(&[0x00, 0xff])),
            MyValue::Bytes(vec![0x00, 0xff])
        );
    }

    #[test]
    fn mysql_values_read_back_as_json() {
        assert_eq!(mysql_to_json(&MyValue::Int(-3), false), json!(-3));
        assert_eq!(mysql_to_json(&MyValue::Bytes(b"node".to_vec()), false), json!("node"));
        assert_eq!(
            mysql_to_json(&MyValue::Date(2015, 6, 1, 13, 5, 9, 0), false),
            json!("2015-06-01 13:05:09")
        );
        assert_eq!(
            mysql_to_json(&MyValue::Time(false, 1, 2, 3, 4, 0), false),
            json!("26:03:04")
        );
    }

    #[test]
    fn binary_bytes_are_never_decoded_as_text() {
        let raw = vec![0x00, 0xff, 0xfe, 0x80];
        let from_blob = mysql_to_json(&MyValue::Bytes(raw.clone()), true);
        assert_eq!(binary_bytes(&from_blob), Some(raw.clone()));
        assert_eq!(json_to_mysql(&from_blob), MyValue::Bytes(raw.clone()));

        // Invalid UTF-8 in a text column is kept as bytes too.
        let from_text = mysql_to_json(&MyValue::Bytes(raw.clone()), false);
        assert_eq!(binary_bytes(&from_text), Some(raw));

        let serialized = mysql_to_json(&MyValue::Bytes(b"a:1:{}".to_vec()), true);
        assert_eq!(binary_bytes(&serialized), Some(b"a:1:{}".to_vec()));
    }

    #[test]
    fn empty_params_bind_nothing() {
        assert!(matches!(to_params(&[]), Params::Empty));
        assert!(matches!(to_params(&[json!(1)]), Params::Positional(_)));
    }

    #[test]
    fn read_only_refuses_writes_without_connecting() {
        let conn = MySqlConnector::new(ConnectionConfig {
            engine: DatabaseEngine::MySql,
            read_only: true,
            ..Default::default()
        });
        assert_eq!(
            conn.ensure_writable("users"),
            Err(ConnectorError::ReadOnly("users".into()))
        );
    }
}
