use super::connectors::DatabaseEngine;
use super::schema::Row;

/// A statement with positional `?` placeholders and its bound values.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<serde_json::Value>,
}

/// The statements one keyed upsert runs inside a single transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Upsert {
    pub update: Option<Statement>,
    pub count: Statement,
    pub insert: Statement,
}

/// Engine-aware SQL statement generator. Columns are always emitted in
/// sorted order so the same row produces the same statement text.
pub struct SqlGenerator {
    engine: DatabaseEngine,
}

impl SqlGenerator {
    pub fn new(engine: DatabaseEngine) -> Self {
        Self { engine }
    }

    /// Quote an identifier for the target engine.
    pub fn quote_ident(&self, name: &str) -> String {
        match self.engine {
            DatabaseEngine::MySql => format!("`{}`", name.replace('`', "``")),
            _ => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    fn sorted_columns(row: &Row) -> Vec<&String> {
        let mut cols: Vec<&String> = row.keys().collect();
        cols.sort();
        cols
    }

    fn placeholders(n: usize) -> String {
        vec!["?"; n].join(", ")
    }

    fn key_predicate(&self, row: &Row, key_columns: &[String]) -> (String, Vec<serde_json::Value>) {
        let clause = key_columns
            .iter()
            .map(|k| format!("{} = ?", self.quote_ident(k)))
            .collect::<Vec<_>>()
            .join(" AND ");
        let params = key_columns
            .iter()
            .map(|k| row.get(k).cloned().unwrap_or(serde_json::Value::Null))
            .collect();
        (clause, params)
    }

    /// `SELECT * FROM table`
    pub fn select_all(&self, table: &str) -> String {
        format!("SELECT * FROM {}", self.quote_ident(table))
    }

    /// `SELECT column FROM table`
    pub fn select_column(&self, table: &str, column: &str) -> String {
        format!(
            "SELECT {} FROM {}",
            self.quote_ident(column),
            self.quote_ident(table)
        )
    }

    /// Generate an INSERT statement.
    pub fn insert(&self, table: &str, row: &Row) -> Statement {
        let cols = Self::sorted_columns(row);
        let col_list = cols
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        Statement {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.quote_ident(table),
                col_list,
                Self::placeholders(cols.len())
            ),
            params: cols.iter().map(|c| row[*c].clone()).collect(),
        }
    }

    /// Null-safe "column differs from ?" for the target engine.
    fn differs(&self, column: &str) -> String {
        let q = self.quote_ident(column);
        match self.engine {
            DatabaseEngine::MySql => format!("NOT ({} <=> ?)", q),
            _ => format!("{} IS NOT ?", q),
        }
    }

    /// UPDATE of every non-key column, keyed on `key_columns`, touching the
    /// row only when some value actually differs. `None` when the row
    /// carries nothing but key columns.
    pub fn update(&self, table: &str, row: &Row, key_columns: &[String]) -> Option<Statement> {
        let set_cols: Vec<&String> = Self::sorted_columns(row)
            .into_iter()
            .filter(|c| !key_columns.contains(c))
            .collect();
        if set_cols.is_empty() {
            return None;
        }
        let set_clause = set_cols
            .iter()
            .map(|c| format!("{} = ?", self.quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        let changed = set_cols
            .iter()
            .map(|c| self.differs(c))
            .collect::<Vec<_>>()
            .join(" OR ");
        let (where_clause, key_params) = self.key_predicate(row, key_columns);
        let set_params = set_cols.iter().map(|c| row[*c].clone());
        let params: Vec<serde_json::Value> = set_params
            .clone()
            .chain(key_params)
            .chain(set_params)
            .collect();
        Some(Statement {
            sql: format!(
                "UPDATE {} SET {} WHERE {} AND ({})",
                self.quote_ident(table),
                set_clause,
                where_clause,
                changed
            ),
            params,
        })
    }

    /// `SELECT COUNT(*)` of rows matching the key.
    pub fn count_by_key(&self, table: &str, row: &Row, key_columns: &[String]) -> Statement {
        let (where_clause, params) = self.key_predicate(row, key_columns);
        Statement {
            sql: format!(
                "SELECT COUNT(*) FROM {} WHERE {}",
                self.quote_ident(table),
                where_clause
            ),
            params,
        }
    }

    /// Statements for a keyed upsert: update when present and different,
    /// otherwise count to tell "unchanged" from "missing", then insert.
    pub fn upsert(&self, table: &str, row: &Row, key_columns: &[String]) -> Upsert {
        Upsert {
            update: self.update(table, row, key_columns),
            count: self.count_by_key(table, row, key_columns),
            insert: self.insert(table, row),
        }
    }

    /// Statements that empty a table and reset its identity counter.
    pub fn truncate(&self, table: &str) -> Vec<Statement> {
        let quoted = self.quote_ident(table);
        match self.engine {
            DatabaseEngine::MySql => vec![
                Statement {
                    sql: format!("TRUNCATE TABLE {}", quoted),
                    params: vec![],
                },
                Statement {
                    sql: format!("ALTER TABLE {} AUTO_INCREMENT = 1", quoted),
                    params: vec![],
                },
            ],
            _ => vec![Statement {
                sql: format!("DELETE FROM {}", quoted),
                params: vec![],
            }],
        }
    }

    /// `DELETE ... WHERE column IN (...)` for an explicit value list.
    pub fn delete_in(&self, table: &str, column: &str, values: &[serde_json::Value]) -> Statement {
        Statement {
            sql: format!(
                "DELETE FROM {} WHERE {} IN ({})",
                self.quote_ident(table),
                self.quote_ident(column),
                Self::placeholders(values.len())
            ),
            params: values.to_vec(),
        }
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

    fn key(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_insert_sorted_and_parameterized() {
        let gen = SqlGenerator::new(DatabaseEngine::Sqlite);
        let stmt = gen.insert("users", &row(&[("name", json!("Alice")), ("id", json!(1))]));
        assert_eq!(stmt.sql, r#"INSERT INTO "users" ("id", "name") VALUES (?, ?)"#);
        assert_eq!(stmt.params, vec![json!(1), json!("Alice")]);
    }

    #[test]
    fn test_quote_ident_escapes() {
        let mysql = SqlGenerator::new(DatabaseEngine::MySql);
        assert_eq!(mysql.quote_ident("we`ird"), "`we``ird`");
        let sqlite = SqlGenerator::new(DatabaseEngine::Sqlite);
        assert_eq!(sqlite.quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_update_sets_non_key_columns_only_when_changed() {
        let gen = SqlGenerator::new(DatabaseEngine::Sqlite);
        let r = row(&[("id", json!(1)), ("lang", json!("en")), ("name", json!("x"))]);
        let stmt = gen.update("t", &r, &key(&["id", "lang"])).unwrap();
        assert_eq!(
            stmt.sql,
            r#"UPDATE "t" SET "name" = ? WHERE "id" = ? AND "lang" = ? AND ("name" IS NOT ?)"#
        );
        assert_eq!(stmt.params, vec![json!("x"), json!(1), json!("en"), json!("x")]);
    }

    #[test]
    fn test_update_key_only_row_is_none() {
        let gen = SqlGenerator::new(DatabaseEngine::Sqlite);
        assert!(gen.update("t", &row(&[("id", json!(1))]), &key(&["id"])).is_none());
    }

    #[test]
    fn test_mysql_upsert_matches_on_configured_key() {
        let gen = SqlGenerator::new(DatabaseEngine::MySql);
        let r = row(&[
            ("uid", json!(9)),
            ("name", json!("admin")),
            ("langcode", json!("en")),
        ]);
        let upsert = gen.upsert("users_field_data", &r, &key(&["name", "langcode"]));

        let update = upsert.update.unwrap();
        assert_eq!(
            update.sql,
            "UPDATE `users_field_data` SET `uid` = ? WHERE `name` = ? AND `langcode` = ? AND (NOT (`uid` <=> ?))"
        );
        assert_eq!(update.params, vec![json!(9), json!("admin"), json!("en"), json!(9)]);
        assert_eq!(
            upsert.count.sql,
            "SELECT COUNT(*) FROM `users_field_data` WHERE `name` = ? AND `langcode` = ?"
        );
        assert!(upsert.insert.sql.starts_with("INSERT INTO `users_field_data`"));
        assert!(!upsert.insert.sql.contains("DUPLICATE"));
    }

    #[test]
    fn test_key_only_upsert_counts_then_inserts() {
        let gen = SqlGenerator::new(DatabaseEngine::MySql);
        let upsert = gen.upsert(
            "user__roles",
            &row(&[("entity_id", json!(1)), ("roles_target_id", json!("admin"))]),
            &key(&["entity_id", "roles_target_id"]),
        );
        assert!(upsert.update.is_none());
        assert_eq!(upsert.count.params, vec![json!(1), json!("admin")]);
        assert!(upsert.insert.sql.starts_with("INSERT INTO `user__roles`"));
    }

    #[test]
    fn test_truncate_resets_auto_increment_on_mysql() {
        let gen = SqlGenerator::new(DatabaseEngine::MySql);
        let stmts = gen.truncate("menu_tree");
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[1].sql, "ALTER TABLE `menu_tree` AUTO_INCREMENT = 1");
    }

    #[test]
    fn test_delete_in() {
        let gen = SqlGenerator::new(DatabaseEngine::Sqlite);
        let stmt = gen.delete_in("t", "id", &[json!(4), json!(5)]);
        assert_eq!(stmt.sql, r#"DELETE FROM "t" WHERE "id" IN (?, ?)"#);
        assert_eq!(stmt.params.len(), 2);
    }
}
