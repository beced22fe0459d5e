use super::connectors::ConnectorError;
use thiserror::Error;

/// Errors produced while migrating a unit.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MigrationError {
    /// Column differences no rule explains. The table is skipped.
    #[error(
        "schema of '{table}' cannot be reconciled: only in source [{}], only in destination [{}]",
        .only_in_source.join(", "),
        .only_in_destination.join(", ")
    )]
    SchemaReconciliation {
        table: String,
        only_in_source: Vec<String>,
        only_in_destination: Vec<String>,
    },

    /// One row could not be mapped, transformed or validated. The row is skipped.
    #[error("row {key} of '{table}': {message}")]
    RowTransform {
        table: String,
        key: String,
        message: String,
    },

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    /// Cleanup was requested against an empty source key set.
    #[error(
        "refusing to clean '{destination_table}': source '{source_table}' returned no keys"
    )]
    UnsafeCleanupGuard {
        source_table: String,
        destination_table: String,
    },

    /// Merge mode needs a key and the destination declares none.
    #[error("'{table}' has no key columns; merge mode needs a key")]
    MissingKey { table: String },
}

impl MigrationError {
    /// True when the whole run must stop.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, MigrationError::Connector(e) if e.is_run_fatal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconciliation_message_lists_both_sides() {
        let err = MigrationError::SchemaReconciliation {
            table: "node__body".into(),
            only_in_source: vec!["body_format".into(), "body_extra".into()],
            only_in_destination: vec!["body_new".into()],
        };
        assert_eq!(
            err.to_string(),
            "schema of 'node__body' cannot be reconciled: only in source [body_format, body_extra], only in destination [body_new]"
        );
    }

    #[test]
    fn only_unavailable_connector_errors_stop_the_run() {
        let down: MigrationError = ConnectorError::Unavailable("gone".into()).into();
        let query: MigrationError = ConnectorError::Query("bad".into()).into();
        assert!(down.is_run_fatal());
        assert!(!query.is_run_fatal());
        assert!(!MigrationError::MissingKey { table: "t".into() }.is_run_fatal());
    }
}
