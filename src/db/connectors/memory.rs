use super::{ConnectorError, ConnectorResult, DatabaseConnector, DatabaseEngine, WriteOutcome};
use crate::db::schema::{value_fingerprint, MergeKey, Row, TableSpec};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct MemoryTable {
    spec: TableSpec,
    rows: Vec<Row>,
    defaults: HashMap<String, serde_json::Value>,
    identity: Option<String>,
    next_identity: i64,
}

impl MemoryTable {
    fn find(&self, key: &MergeKey) -> Option<usize> {
        self.rows.iter().position(|r| {
            MergeKey::from_row(r, &self.spec.key_columns)
                .map(|k| &k == key)
                .unwrap_or(false)
        })
    }

    fn check_columns(&self, row: &Row) -> ConnectorResult<()> {
        let unknown = self.spec.unknown_columns(row);
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(ConnectorError::Query(format!(
                "Unknown column(s) {} in '{}'",
                unknown.join(", "),
                self.spec.name
            )))
        }
    }

    fn insert(&mut self, row: &Row) -> ConnectorResult<()> {
        self.check_columns(row)?;
        let mut full: Row = self
            .spec
            .columns
            .iter()
            .map(|c| {
                let value = self.defaults.get(c).cloned().unwrap_or(serde_json::Value::Null);
                (c.clone(), value)
            })
            .collect();
        full.extend(row.iter().map(|(k, v)| (k.clone(), v.clone())));

        if let Some(ref identity) = self.identity {
            match full.get(identity).and_then(|v| v.as_i64()) {
                Some(explicit) => self.next_identity = self.next_identity.max(explicit + 1),
                None => {
                    full.insert(identity.clone(), serde_json::json!(self.next_identity));
                    self.next_identity += 1;
                }
            }
        }

        if !self.spec.key_columns.is_empty() {
            let key = MergeKey::from_row(&full, &self.spec.key_columns).map_err(|missing| {
                ConnectorError::Query(format!(
                    "Field(s) {} of '{}' doesn't have a default value",
                    missing.join(", "),
                    self.spec.name
                ))
            })?;
            if self.find(&key).is_some() {
                return Err(ConnectorError::Query(format!(
                    "Duplicate entry '{}' for key 'PRIMARY' in '{}'",
                    key.fingerprint(),
                    self.spec.name
                )));
            }
        }

        self.rows.push(full);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, MemoryTable>,
    unavailable: bool,
    rejected_tables: HashSet<String>,
}

/// In-process connector holding tables in memory. Enforces primary key
/// uniqueness and column existence the way a real database would.
#[derive(Debug)]
pub struct MemoryConnector {
    state: Mutex<MemoryState>,
    read_only: bool,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            read_only: false,
        }
    }

    /// Refuse every write, like a source opened read-only.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn with_table(self, spec: TableSpec, rows: Vec<Row>) -> Self {
        self.create_table(spec, rows);
        self
    }

    /// Declare an auto-increment column filled on insert when absent.
    pub fn with_identity(self, table: &str, column: &str) -> Self {
        if let Some(t) = self.lock_state().tables.get_mut(table) {
            t.identity = Some(column.to_string());
            let max = t
                .rows
                .iter()
                .filter_map(|r| r.get(column).and_then(|v| v.as_i64()))
                .max()
                .unwrap_or(0);
            t.next_identity = max + 1;
        }
        self
    }

    /// Destination-defined default used when an insert omits the column.
    pub fn with_column_default(self, table: &str, column: &str, value: serde_json::Value) -> Self {
        if let Some(t) = self.lock_state().tables.get_mut(table) {
            t.defaults.insert(column.to_string(), value);
        }
        self
    }

    pub fn create_table(&self, spec: TableSpec, rows: Vec<Row>) {
        let name = spec.name.clone();
        let table = MemoryTable {
            spec,
            rows,
            defaults: HashMap::new(),
            identity: None,
            next_identity: 1,
        };
        self.lock_state().tables.insert(name, table);
    }

    /// Simulate losing the connection: every call fails with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock_state().unavailable = unavailable;
    }

    /// Make every write to `table` fail with a `Query` error.
    pub fn reject_writes_to(&self, table: &str) {
        self.lock_state().rejected_tables.insert(table.to_string());
    }

    /// Snapshot of a table's rows in storage order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock_state()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock_state()
            .tables
            .get(table)
            .map_or(0, |t| t.rows.len())
    }

    /// Value the identity column will receive on the next implicit insert.
    pub fn next_identity(&self, table: &str) -> Option<i64> {
        self.lock_state()
            .tables
            .get(table)
            .filter(|t| t.identity.is_some())
            .map(|t| t.next_identity)
    }

    fn lock_state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read(&self) -> ConnectorResult<MutexGuard<'_, MemoryState>> {
        let state = self.lock_state();
        if state.unavailable {
            return Err(ConnectorError::Unavailable(
                "memory connector is offline".to_string(),
            ));
        }
        Ok(state)
    }

    fn write(&self, table: &str) -> ConnectorResult<MutexGuard<'_, MemoryState>> {
        let state = self.read()?;
        if self.read_only {
            return Err(ConnectorError::ReadOnly(table.to_string()));
        }
        if state.rejected_tables.contains(table) {
            return Err(ConnectorError::Query(format!("writes to '{}' rejected", table)));
        }
        Ok(state)
    }
}

fn table_mut<'a>(state: &'a mut MemoryState, table: &str) -> ConnectorResult<&'a mut MemoryTable> {
    state
        .tables
        .get_mut(table)
        .ok_or_else(|| ConnectorError::UnknownTable(table.to_string()))
}

#[async_trait]
impl DatabaseConnector for MemoryConnector {
    async fn connect(&mut self) -> ConnectorResult<()> {
        self.read().map(|_| ())
    }

    async fn disconnect(&mut self) -> ConnectorResult<()> {
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        !self.lock_state().unavailable
    }

    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::Memory
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    async fn get_tables(&self) -> ConnectorResult<Vec<String>> {
        let state = self.read()?;
        let mut names: Vec<String> = state.tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn get_table_spec(&self, table: &str) -> ConnectorResult<TableSpec> {
        let state = self.read()?;
        state
            .tables
            .get(table)
            .map(|t| t.spec.clone())
            .ok_or_else(|| ConnectorError::UnknownTable(table.to_string()))
    }

    async fn get_rows(&self, table: &str) -> ConnectorResult<Vec<Row>> {
        let state = self.read()?;
        state
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .ok_or_else(|| ConnectorError::UnknownTable(table.to_string()))
    }

    async fn get_column_values(
        &self,
        table: &str,
        column: &str,
    ) -> ConnectorResult<Vec<serde_json::Value>> {
        let state = self.read()?;
        let t = state
            .tables
            .get(table)
            .ok_or_else(|| ConnectorError::UnknownTable(table.to_string()))?;
        if !t.spec.has_column(column) {
            return Err(ConnectorError::Query(format!(
                "Unknown column '{}' in '{}'",
                column, table
            )));
        }
        Ok(t.rows
            .iter()
            .map(|r| r.get(column).cloned().unwrap_or(serde_json::Value::Null))
            .collect())
    }

    async fn upsert_row(
        &self,
        table: &str,
        key_columns: &[String],
        row: &Row,
    ) -> ConnectorResult<WriteOutcome> {
        let mut state = self.write(table)?;
        let t = table_mut(&mut state, table)?;
        t.check_columns(row)?;

        let key = MergeKey::from_row(row, key_columns).map_err(|missing| {
            ConnectorError::Query(format!("missing key column(s) {}", missing.join(", ")))
        })?;
        let existing = t.rows.iter().position(|r| {
            MergeKey::from_row(r, key_columns)
                .map(|k| k == key)
                .unwrap_or(false)
        });

        match existing {
            Some(idx) => {
                let stored = &mut t.rows[idx];
                let changed = row.iter().any(|(col, value)| {
                    stored
                        .get(col)
                        .map_or(true, |old| value_fingerprint(old) != value_fingerprint(value))
                });
                if !changed {
                    return Ok(WriteOutcome::Unchanged);
                }
                for (col, value) in row {
                    if !key_columns.contains(col) {
                        stored.insert(col.clone(), value.clone());
                    }
                }
                Ok(WriteOutcome::Updated)
            }
            None => {
                t.insert(row)?;
                Ok(WriteOutcome::Inserted)
            }
        }
    }

    async fn insert_row(&self, table: &str, row: &Row) -> ConnectorResult<()> {
        let mut state = self.write(table)?;
        table_mut(&mut state, table)?.insert(row)
    }

    async fn truncate_table(&self, table: &str) -> ConnectorResult<()> {
        let mut state = self.write(table)?;
        let t = table_mut(&mut state, table)?;
        t.rows.clear();
        t.next_identity = 1;
        Ok(())
    }

    async fn delete_rows_not_in(
        &self,
        table: &str,
        column: &str,
        keep: &[serde_json::Value],
    ) -> ConnectorResult<u64> {
        let mut state = self.write(table)?;
        let t = table_mut(&mut state, table)?;
        if !t.spec.has_column(column) {
            return Err(ConnectorError::Query(format!(
                "Unknown column '{}' in '{}'",
                column, table
            )));
        }
        let keep: HashSet<String> = keep.iter().map(value_fingerprint).collect();
        let before = t.rows.len();
        // NULL never matches NOT IN, so rows without a value survive.
        t.rows.retain(|r| {
            r.get(column)
                .map_or(true, |v| v.is_null() || keep.contains(&value_fingerprint(v)))
        });
        Ok((before - t.rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, serde_json::Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn users() -> MemoryConnector {
        MemoryConnector::new().with_table(
            TableSpec::new("users", &["uid"], &["uid", "name"]),
            vec![row(&[("uid", json!(1)), ("name", json!("admin"))])],
        )
    }

    fn key() -> Vec<String> {
        vec!["uid".to_string()]
    }

    #[tokio::test]
    async fn upsert_inserts_updates_and_detects_noop() {
        let db = users();
        let fresh = row(&[("uid", json!(2)), ("name", json!("bob"))]);
        assert_eq!(db.upsert_row("users", &key(), &fresh).await.unwrap(), WriteOutcome::Inserted);
        assert_eq!(db.upsert_row("users", &key(), &fresh).await.unwrap(), WriteOutcome::Unchanged);

        let renamed = row(&[("uid", json!("2")), ("name", json!("robert"))]);
        assert_eq!(db.upsert_row("users", &key(), &renamed).await.unwrap(), WriteOutcome::Updated);
        assert_eq!(db.row_count("users"), 2);
    }

    #[tokio::test]
    async fn insert_enforces_primary_key() {
        let db = users();
        let err = db
            .insert_row("users", &row(&[("uid", json!(1)), ("name", json!("dup"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Query(_)));
    }

    #[tokio::test]
    async fn unknown_columns_are_rejected() {
        let db = users();
        let err = db
            .upsert_row("users", &key(), &row(&[("uid", json!(9)), ("mail", json!("x"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Query(_)));
    }

    #[tokio::test]
    async fn read_only_refuses_writes() {
        let db = users().read_only();
        let err = db.truncate_table("users").await.unwrap_err();
        assert_eq!(err, ConnectorError::ReadOnly("users".into()));
        assert_eq!(db.row_count("users"), 1);
    }

    #[tokio::test]
    async fn truncate_resets_identity() {
        let db = users().with_identity("users", "uid");
        assert_eq!(db.next_identity("users"), Some(2));
        db.truncate_table("users").await.unwrap();
        assert_eq!(db.next_identity("users"), Some(1));
        db.insert_row("users", &row(&[("name", json!("first"))])).await.unwrap();
        assert_eq!(db.rows("users")[0]["uid"], json!(1));
    }

    #[tokio::test]
    async fn column_defaults_fill_omitted_columns() {
        let db = MemoryConnector::new()
            .with_table(TableSpec::new("t", &["id"], &["id", "langcode"]), vec![])
            .with_column_default("t", "langcode", json!("und"));
        db.insert_row("t", &row(&[("id", json!(1))])).await.unwrap();
        assert_eq!(db.rows("t")[0]["langcode"], json!("und"));
    }

    #[tokio::test]
    async fn delete_not_in_compares_canonically() {
        let db = MemoryConnector::new().with_table(
            TableSpec::new("t", &["id"], &["id"]),
            (1..=5).map(|i| row(&[("id", json!(i))])).collect(),
        );
        let removed = db
            .delete_rows_not_in("t", "id", &[json!("1"), json!(2), json!(3)])
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(db.row_count("t"), 3);
    }

    #[tokio::test]
    async fn unavailable_fails_every_call() {
        let db = users();
        db.set_unavailable(true);
        assert!(db.get_rows("users").await.unwrap_err().is_run_fatal());
        assert!(!db.is_connected().await);
    }

    #[tokio::test]
    async fn rejected_table_fails_writes_only() {
        let db = users();
        db.reject_writes_to("users");
        assert!(db.get_rows("users").await.is_ok());
        let err = db.insert_row("users", &row(&[("uid", json!(5))])).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Query(_)));
    }
}
