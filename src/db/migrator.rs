use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use super::cleanup::{remove_orphans, CleanupSpec};
use super::connectors::{DatabaseConnector, WriteOutcome};
use super::error::MigrationError;
use super::reconciler::{reconcile, ColumnMapping, Reconciliation};
use super::rules::{DeltaRule, RuleSet};
use super::schema::{describe_key, MergeKey, Row, TableSpec};
use super::transformer::{Emitted, RowContext, RowTransform};

// ---------------------------------------------------------------------------
// Enums & configuration types
// ---------------------------------------------------------------------------

/// How rows reach the destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Upsert by merge key; re-running converges.
    #[default]
    Merge,
    /// Truncate every destination table, reset identities and insert.
    Replace,
}

/// A destination table and the key rows are matched on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub table: String,
    /// Falls back to the table's introspected primary key when empty.
    pub key_columns: Vec<String>,
}

impl Destination {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            key_columns: Vec::new(),
        }
    }

    pub fn with_key(mut self, key_columns: &[&str]) -> Self {
        self.key_columns = key_columns.iter().map(|c| c.to_string()).collect();
        self
    }
}

/// One source table moved into one or more destination tables.
#[derive(Clone)]
pub struct MigrationUnit {
    pub name: String,
    pub source_table: String,
    pub destination: Destination,
    /// Further tables the transform may address.
    pub extra_destinations: Vec<Destination>,
    /// Unit-scoped rules, tried before the plan's catalogue.
    pub rules: Vec<DeltaRule>,
    pub transform: Option<Arc<dyn RowTransform>>,
    /// Whether one source row may produce more than one destination row.
    pub fan_out: bool,
    pub write_mode: WriteMode,
    pub cleanup: Vec<CleanupSpec>,
}

impl MigrationUnit {
    pub fn new(source_table: &str, destination_table: &str) -> Self {
        Self {
            name: destination_table.to_string(),
            source_table: source_table.to_string(),
            destination: Destination::new(destination_table),
            extra_destinations: Vec::new(),
            rules: Vec::new(),
            transform: None,
            fan_out: false,
            write_mode: WriteMode::Merge,
            cleanup: Vec::new(),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_key(mut self, key_columns: &[&str]) -> Self {
        self.destination = self.destination.with_key(key_columns);
        self
    }

    pub fn with_rule(mut self, rule: DeltaRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_transform(mut self, transform: Arc<dyn RowTransform>) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_extra_destination(mut self, destination: Destination) -> Self {
        self.extra_destinations.push(destination);
        self
    }

    pub fn fan_out(mut self, allowed: bool) -> Self {
        self.fan_out = allowed;
        self
    }

    pub fn write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    pub fn with_cleanup(mut self, spec: CleanupSpec) -> Self {
        self.cleanup.push(spec);
        self
    }

    fn destinations(&self) -> impl Iterator<Item = &Destination> {
        std::iter::once(&self.destination).chain(self.extra_destinations.iter())
    }
}

impl fmt::Debug for MigrationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationUnit")
            .field("name", &self.name)
            .field("source_table", &self.source_table)
            .field("destination", &self.destination)
            .field("extra_destinations", &self.extra_destinations)
            .field("rules", &self.rules.len())
            .field("transform", &self.transform.is_some())
            .field("fan_out", &self.fan_out)
            .field("write_mode", &self.write_mode)
            .field("cleanup", &self.cleanup)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Final state of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitStatus {
    Completed,
    /// Finished, but some rows were skipped with errors.
    CompletedWithErrors,
    /// Schema could not be reconciled; nothing was written.
    Skipped,
    /// A table-fatal error stopped the unit part way.
    Failed,
}

/// Result of migrating one unit.
#[derive(Debug, Clone)]
pub struct UnitReport {
    pub unit: String,
    pub status: UnitStatus,
    pub rows_read: usize,
    pub rows_inserted: usize,
    pub rows_updated: usize,
    pub rows_unchanged: usize,
    pub rows_deleted: u64,
    pub rows_skipped: usize,
    pub row_errors: Vec<MigrationError>,
    /// The table-fatal error when status is `Skipped` or `Failed`.
    pub failure: Option<MigrationError>,
    pub warnings: Vec<String>,
    pub applied_rules: Vec<String>,
    pub duration_ms: u64,
}

impl UnitReport {
    fn new(unit: &str) -> Self {
        Self {
            unit: unit.to_string(),
            status: UnitStatus::Completed,
            rows_read: 0,
            rows_inserted: 0,
            rows_updated: 0,
            rows_unchanged: 0,
            rows_deleted: 0,
            rows_skipped: 0,
            row_errors: Vec::new(),
            failure: None,
            warnings: Vec::new(),
            applied_rules: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Rows inserted or updated.
    pub fn rows_written(&self) -> usize {
        self.rows_inserted + self.rows_updated
    }

    fn warn(&mut self, message: String) {
        log::warn!("{}", message);
        self.warnings.push(message);
    }
}

// ---------------------------------------------------------------------------
// Core public API
// ---------------------------------------------------------------------------

/// Migrate one unit from `source` into `destination`.
///
/// Table-fatal problems end up in the returned report (`Skipped` or
/// `Failed`). Only run-fatal errors, such as a lost connection, are
/// returned as `Err` and should stop the run.
pub async fn migrate_unit(
    source: &dyn DatabaseConnector,
    destination: &dyn DatabaseConnector,
    unit: &MigrationUnit,
    catalogue: &RuleSet,
) -> Result<UnitReport, MigrationError> {
    let start = Instant::now();
    let mut report = UnitReport::new(&unit.name);

    let outcome = run_unit(source, destination, unit, catalogue, &mut report).await;
    report.duration_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(()) => {
            report.status = if report.row_errors.is_empty() {
                UnitStatus::Completed
            } else {
                UnitStatus::CompletedWithErrors
            };
            log::info!(
                "{}: {} read, {} inserted, {} updated, {} unchanged, {} skipped, {} deleted",
                unit.name,
                report.rows_read,
                report.rows_inserted,
                report.rows_updated,
                report.rows_unchanged,
                report.rows_skipped,
                report.rows_deleted
            );
            Ok(report)
        }
        Err(e) if e.is_run_fatal() => {
            log::error!("{}: {}", unit.name, e);
            Err(e)
        }
        Err(e) => {
            report.status = match e {
                MigrationError::SchemaReconciliation { .. } => UnitStatus::Skipped,
                _ => UnitStatus::Failed,
            };
            log::error!("{}: {}", unit.name, e);
            report.failure = Some(e);
            Ok(report)
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// A destination table resolved against its live schema.
struct Target {
    spec: TableSpec,
    key_columns: Vec<String>,
}

async fn resolve_targets(
    destination: &dyn DatabaseConnector,
    unit: &MigrationUnit,
) -> Result<HashMap<String, Target>, MigrationError> {
    let mut targets = HashMap::new();
    for dest in unit.destinations() {
        let spec = destination.get_table_spec(&dest.table).await?;
        let key_columns = if dest.key_columns.is_empty() {
            spec.key_columns.clone()
        } else {
            dest.key_columns.clone()
        };
        if key_columns.is_empty() && unit.write_mode == WriteMode::Merge {
            return Err(MigrationError::MissingKey {
                table: dest.table.clone(),
            });
        }
        targets.insert(dest.table.clone(), Target { spec, key_columns });
    }
    Ok(targets)
}

async fn run_unit(
    source: &dyn DatabaseConnector,
    destination: &dyn DatabaseConnector,
    unit: &MigrationUnit,
    catalogue: &RuleSet,
    report: &mut UnitReport,
) -> Result<(), MigrationError> {
    // Everything that can reject the table happens before the first write.
    let source_spec = source.get_table_spec(&unit.source_table).await?;
    let targets = resolve_targets(destination, unit).await?;
    let primary = &targets[&unit.destination.table].spec;

    let Reconciliation {
        mapping,
        applied_rules,
        warnings,
    } = reconcile(
        &source_spec,
        primary,
        unit.rules.iter().chain(catalogue.iter()),
    )?;
    report.applied_rules = applied_rules;
    report.warnings.extend(warnings);

    let rows = source.get_rows(&unit.source_table).await?;
    report.rows_read = rows.len();

    if unit.write_mode == WriteMode::Replace {
        for dest in unit.destinations() {
            destination.truncate_table(&dest.table).await?;
            log::info!("Truncated {}", dest.table);
        }
    }

    let mut seen: HashSet<(String, MergeKey)> = HashSet::new();
    for row in &rows {
        let emitted = match prepare_row(unit, &mapping, &targets, row) {
            Ok(emitted) => emitted,
            Err(message) => {
                let err = MigrationError::RowTransform {
                    table: unit.destination.table.clone(),
                    key: describe_key(row, &source_spec.key_columns),
                    message,
                };
                log::warn!("{}", err);
                report.row_errors.push(err);
                report.rows_skipped += 1;
                continue;
            }
        };
        if emitted.is_empty() {
            report.rows_skipped += 1;
            continue;
        }

        for (out, key) in emitted {
            if let Some(key) = key {
                if !seen.insert((out.table.clone(), key.clone())) {
                    report.warn(format!(
                        "{}: key ({}) written more than once; the last source row wins",
                        out.table, key
                    ));
                }
            }
            write_row(destination, unit, &targets[&out.table], &out, report).await?;
        }
    }

    for spec in &unit.cleanup {
        match remove_orphans(source, destination, spec).await {
            Ok(deleted) => report.rows_deleted += deleted,
            Err(e @ MigrationError::UnsafeCleanupGuard { .. }) => {
                report.warnings.push(e.to_string());
            }
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

/// Map, transform and validate one source row. Nothing is written unless
/// every resulting row is valid.
fn prepare_row(
    unit: &MigrationUnit,
    mapping: &ColumnMapping,
    targets: &HashMap<String, Target>,
    row: &Row,
) -> Result<Vec<(Emitted, Option<MergeKey>)>, String> {
    let mapped = mapping.apply(row)?;

    let emitted = match unit.transform {
        Some(ref transform) => {
            let ctx = RowContext {
                source_table: &unit.source_table,
                destination_table: &unit.destination.table,
                source: row,
            };
            transform.transform(&ctx, mapped).map_err(|e| e.to_string())?
        }
        None => vec![Emitted::new(&unit.destination.table, mapped)],
    };

    if emitted.len() > 1 && !unit.fan_out {
        return Err(format!(
            "transform produced {} rows but the unit does not allow fan-out",
            emitted.len()
        ));
    }

    emitted
        .into_iter()
        .map(|out| {
            let target = targets
                .get(&out.table)
                .ok_or_else(|| format!("'{}' is not a declared destination", out.table))?;
            let unknown = target.spec.unknown_columns(&out.row);
            if !unknown.is_empty() {
                return Err(format!(
                    "'{}' has no column(s) {}",
                    out.table,
                    unknown.join(", ")
                ));
            }
            let key = if target.key_columns.is_empty() {
                None
            } else {
                match MergeKey::from_row(&out.row, &target.key_columns) {
                    Ok(key) => Some(key),
                    Err(_) if unit.write_mode == WriteMode::Replace => None,
                    Err(missing) => {
                        return Err(format!(
                            "missing key column(s) {} for '{}'",
                            missing.join(", "),
                            out.table
                        ))
                    }
                }
            };
            Ok((out, key))
        })
        .collect()
}

async fn write_row(
    destination: &dyn DatabaseConnector,
    unit: &MigrationUnit,
    target: &Target,
    out: &Emitted,
    report: &mut UnitReport,
) -> Result<(), MigrationError> {
    match unit.write_mode {
        WriteMode::Merge => {
            match destination
                .upsert_row(&out.table, &target.key_columns, &out.row)
                .await?
            {
                WriteOutcome::Inserted => report.rows_inserted += 1,
                WriteOutcome::Updated => report.rows_updated += 1,
                WriteOutcome::Unchanged => report.rows_unchanged += 1,
            }
        }
        WriteMode::Replace => {
            destination.insert_row(&out.table, &out.row).await?;
            report.rows_inserted += 1;
        }
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
