use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::connectors::DatabaseConnector;
use super::error::MigrationError;
use super::schema::value_fingerprint;

/// Remove destination rows whose key no longer exists in the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupSpec {
    pub source_table: String,
    pub source_column: String,
    pub destination_table: String,
    pub destination_column: String,
}

impl CleanupSpec {
    pub fn new(
        source_table: &str,
        source_column: &str,
        destination_table: &str,
        destination_column: &str,
    ) -> Self {
        Self {
            source_table: source_table.to_string(),
            source_column: source_column.to_string(),
            destination_table: destination_table.to_string(),
            destination_column: destination_column.to_string(),
        }
    }
}

/// Delete every destination row whose key value is absent from the source's
/// live key set. Returns the number of rows deleted.
///
/// An empty source key set deletes nothing and yields
/// `MigrationError::UnsafeCleanupGuard`; callers report it as a warning.
pub async fn remove_orphans(
    source: &dyn DatabaseConnector,
    destination: &dyn DatabaseConnector,
    spec: &CleanupSpec,
) -> Result<u64, MigrationError> {
    let values = source
        .get_column_values(&spec.source_table, &spec.source_column)
        .await?;

    let mut seen = HashSet::new();
    let keep: Vec<serde_json::Value> = values
        .into_iter()
        .filter(|v| !v.is_null())
        .filter(|v| seen.insert(value_fingerprint(v)))
        .collect();

    if keep.is_empty() {
        log::warn!(
            "Not cleaning {}.{}: {}.{} is empty",
            spec.destination_table,
            spec.destination_column,
            spec.source_table,
            spec.source_column
        );
        return Err(MigrationError::UnsafeCleanupGuard {
            source_table: spec.source_table.clone(),
            destination_table: spec.destination_table.clone(),
        });
    }

    let deleted = destination
        .delete_rows_not_in(&spec.destination_table, &spec.destination_column, &keep)
        .await?;
    if deleted > 0 {
        log::info!(
            "Removed {} orphaned row(s) from {}",
            deleted,
            spec.destination_table
        );
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connectors::memory::MemoryConnector;
    use crate::db::connectors::ConnectorError;
    use crate::db::schema::{Row, TableSpec};
    use serde_json::json;

    fn ids(values: &[serde_json::Value]) -> Vec<Row> {
        values
            .iter()
            .map(|v| [("id".to_string(), v.clone())].into_iter().collect())
            .collect()
    }

    fn table(name: &str, values: &[serde_json::Value]) -> MemoryConnector {
        MemoryConnector::new().with_table(TableSpec::new(name, &["id"], &["id"]), ids(values))
    }

    fn spec() -> CleanupSpec {
        CleanupSpec::new("old", "id", "new", "id")
    }

    #[tokio::test]
    async fn converges_on_source_keys() {
        let source = table("old", &[json!(1), json!(2), json!(3)]);
        let destination = table("new", &[json!(1), json!(2), json!(3), json!(4), json!(5)]);

        let deleted = remove_orphans(&source, &destination, &spec()).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(destination.row_count("new"), 3);

        // Second pass is a no-op.
        assert_eq!(remove_orphans(&source, &destination, &spec()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_source_is_guarded() {
        let source = table("old", &[]);
        let destination = table("new", &[json!(1), json!(2)]);

        let err = remove_orphans(&source, &destination, &spec()).await.unwrap_err();
        assert!(matches!(err, MigrationError::UnsafeCleanupGuard { .. }));
        assert_eq!(destination.row_count("new"), 2);
    }

    #[tokio::test]
    async fn null_only_source_is_guarded() {
        let source = table("old", &[json!(null)]);
        let destination = table("new", &[json!(1)]);
        assert!(remove_orphans(&source, &destination, &spec()).await.is_err());
        assert_eq!(destination.row_count("new"), 1);
    }

    #[tokio::test]
    async fn string_and_numeric_keys_compare_equal() {
        let source = table("old", &[json!("1"), json!("2")]);
        let destination = table("new", &[json!(1), json!(2), json!(9)]);
        assert_eq!(remove_orphans(&source, &destination, &spec()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unreachable_source_is_a_connector_error() {
        let source = table("old", &[json!(1)]);
        source.set_unavailable(true);
        let destination = table("new", &[json!(1)]);
        let err = remove_orphans(&source, &destination, &spec()).await.unwrap_err();
        assert_eq!(
            err,
            MigrationError::Connector(ConnectorError::Unavailable(
                "memory connector is offline".into()
            ))
        );
    }
}
