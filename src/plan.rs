//! JSON plan file: connections, the rule catalogue and the ordered list of
//! units to migrate.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::db::cleanup::CleanupSpec;
use crate::db::connectors::{ConnectionConfig, DatabaseConnector, DatabaseEngine};
use crate::db::discover::{discover_tables, Discovery};
use crate::db::error::MigrationError;
use crate::db::migrator::{Destination, MigrationUnit, WriteMode};
use crate::db::rules::{DeltaAction, DeltaRule, Pattern, RuleSet};
use crate::db::transformer::{DeclarativeTransform, Projection, TransformStep};
use crate::security::{
    resolve_password, validate_file_path, validate_identifier, validate_identifiers,
    ConnectionRole, CredentialError, CredentialStore,
};

/// Environment variable naming the plan file.
pub const PLAN_ENV: &str = "DRIFT_MIGRATE_PLAN";
pub const DEFAULT_PLAN_PATH: &str = "migration.json";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlanFile {
    pub source: ConnectionConfig,
    pub destination: ConnectionConfig,
    #[serde(default)]
    pub journal_path: Option<PathBuf>,
    #[serde(default)]
    pub rules: RuleSet,
    pub units: Vec<UnitSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitSpec {
    Table(TableUnit),
    Discover(DiscoverUnit),
}

/// One explicitly named table.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TableUnit {
    pub source: String,
    /// Same name as the source when absent.
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub key: Vec<String>,
    #[serde(default)]
    pub write_mode: WriteMode,
    #[serde(default)]
    pub fan_out: bool,
    /// Rules for this unit only, tried before the plan's catalogue.
    #[serde(default)]
    pub rules: Vec<DeltaRule>,
    /// source column -> destination column
    #[serde(default)]
    pub renames: BTreeMap<String, String>,
    /// Literal values for destination-only columns.
    #[serde(default)]
    pub defaults: BTreeMap<String, serde_json::Value>,
    /// Source columns deliberately left behind.
    #[serde(default)]
    pub drop: Vec<String>,
    #[serde(default)]
    pub steps: Vec<TransformStep>,
    #[serde(default)]
    pub projections: Vec<Projection>,
    #[serde(default)]
    pub cleanup: Vec<CleanupDecl>,
}

/// Orphan cleanup as written in a plan; omitted tables default to the
/// unit's own source and destination.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CleanupDecl {
    #[serde(default)]
    pub source_table: Option<String>,
    pub source_column: String,
    #[serde(default)]
    pub destination_table: Option<String>,
    /// Same as `source_column` when absent.
    #[serde(default)]
    pub destination_column: Option<String>,
}

/// Every common table selected by name prefix.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoverUnit {
    #[serde(flatten)]
    pub discovery: Discovery,
    #[serde(default)]
    pub write_mode: WriteMode,
    #[serde(default)]
    pub key: Vec<String>,
    #[serde(default)]
    pub cleanup: Option<DiscoverCleanup>,
}

/// Clean each discovered table's `column` against one source key column.
/// Tables without that column are left alone.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoverCleanup {
    pub source_table: String,
    pub source_column: String,
    pub column: String,
}

impl PlanFile {
    /// Read, parse and validate a plan file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("Invalid plan file {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let plan: PlanFile = serde_json::from_str(text).context("Failed to parse plan")?;
        plan.validate()?;
        Ok(plan)
    }

    /// Plan path from the environment, or the default.
    pub fn path_from_env() -> PathBuf {
        std::env::var_os(PLAN_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PLAN_PATH))
    }

    pub fn validate(&self) -> Result<()> {
        validate_connection(&self.source).context("Invalid source connection")?;
        validate_connection(&self.destination).context("Invalid destination connection")?;
        if self.destination.read_only {
            bail!("The destination connection must not be read-only");
        }
        if let Some(ref path) = self.journal_path {
            validate_file_path(&path.to_string_lossy()).context("Invalid journal path")?;
        }
        for (i, unit) in self.units.iter().enumerate() {
            match unit {
                UnitSpec::Table(t) => t
                    .validate()
                    .with_context(|| format!("Invalid unit #{} ({})", i + 1, t.source))?,
                UnitSpec::Discover(d) => d
                    .validate()
                    .with_context(|| format!("Invalid discovery unit #{}", i + 1))?,
            }
        }
        Ok(())
    }

    /// Replace configured passwords with the ones held by `store`.
    pub fn resolve_credentials(&mut self, store: &dyn CredentialStore) -> Result<(), CredentialError> {
        resolve_password(&mut self.source, ConnectionRole::Source, store)?;
        resolve_password(&mut self.destination, ConnectionRole::Destination, store)
    }

    /// Expand the plan into runnable units, in declaration order.
    pub async fn build_units(
        &self,
        source: &dyn DatabaseConnector,
        destination: &dyn DatabaseConnector,
    ) -> Result<Vec<MigrationUnit>, MigrationError> {
        let mut units = Vec::new();
        for spec in &self.units {
            match spec {
                UnitSpec::Table(t) => units.push(t.to_unit()),
                UnitSpec::Discover(d) => units.extend(d.expand(source, destination).await?),
            }
        }
        Ok(units)
    }
}

fn validate_connection(config: &ConnectionConfig) -> Result<()> {
    match config.engine {
        DatabaseEngine::Sqlite => {
            let path = config
                .file_path
                .as_deref()
                .context("SQLite connections need a file_path")?;
            validate_file_path(path)?;
        }
        DatabaseEngine::MySql => {
            if config.database.as_deref().map_or(true, str::is_empty) {
                bail!("MySQL connections need a database");
            }
        }
        DatabaseEngine::Memory => {}
    }
    Ok(())
}

impl TableUnit {
    pub fn destination_table(&self) -> &str {
        self.destination.as_deref().unwrap_or(&self.source)
    }

    fn validate(&self) -> Result<()> {
        validate_identifier(&self.source)?;
        validate_identifier(self.destination_table())?;
        validate_identifiers(&self.key)?;
        validate_identifiers(self.renames.keys().chain(self.renames.values()))?;
        validate_identifiers(self.defaults.keys())?;
        validate_identifiers(&self.drop)?;
        for projection in &self.projections {
            validate_identifier(&projection.table)?;
            validate_identifiers(&projection.key)?;
            validate_identifiers(projection.columns.keys().chain(projection.columns.values()))?;
        }
        if !self.projections.is_empty() && !self.fan_out {
            bail!("projections produce several rows per source row; set fan_out");
        }
        for c in &self.cleanup {
            validate_identifier(&c.source_column)?;
            validate_identifiers(
                c.source_table
                    .iter()
                    .chain(&c.destination_table)
                    .chain(&c.destination_column),
            )?;
        }
        Ok(())
    }

    /// Unit-scoped rules for the declared renames, defaults and drops.
    fn unit_rules(&self) -> Vec<DeltaRule> {
        // Validated identifiers never contain `*`, so these are exact names.
        let exact = |name: &str| Pattern::new(name);
        let mut rules = self.rules.clone();
        for (from, to) in &self.renames {
            if let Ok(from_pattern) = exact(from) {
                rules.push(DeltaRule::new(
                    &format!("rename {} to {}", from, to),
                    None,
                    DeltaAction::Rename {
                        from: from_pattern,
                        to: to.clone(),
                    },
                ));
            }
        }
        for (column, value) in &self.defaults {
            if let Ok(column_pattern) = exact(column) {
                rules.push(DeltaRule::new(
                    &format!("default {}", column),
                    None,
                    DeltaAction::DefaultAdded {
                        column: column_pattern,
                        value: value.clone(),
                    },
                ));
            }
        }
        for column in &self.drop {
            if let Ok(column_pattern) = exact(column) {
                rules.push(DeltaRule::new(
                    &format!("drop {}", column),
                    None,
                    DeltaAction::DropRemoved {
                        columns: vec![column_pattern],
                    },
                ));
            }
        }
        rules
    }

    pub fn to_unit(&self) -> MigrationUnit {
        let destination = self.destination_table();
        let mut unit = MigrationUnit::new(&self.source, destination)
            .named(self.name.as_deref().unwrap_or(destination))
            .fan_out(self.fan_out)
            .write_mode(self.write_mode);
        unit.destination.key_columns = self.key.clone();
        unit.rules = self.unit_rules();

        for projection in &self.projections {
            unit.extra_destinations.push(Destination {
                table: projection.table.clone(),
                key_columns: projection.key.clone(),
            });
        }
        if !self.steps.is_empty() || !self.projections.is_empty() {
            unit.transform = Some(Arc::new(DeclarativeTransform::new(
                self.steps.clone(),
                self.projections.clone(),
            )));
        }
        for c in &self.cleanup {
            unit.cleanup.push(CleanupSpec {
                source_table: c.source_table.clone().unwrap_or_else(|| self.source.clone()),
                source_column: c.source_column.clone(),
                destination_table: c
                    .destination_table
                    .clone()
                    .unwrap_or_else(|| destination.to_string()),
                destination_column: c
                    .destination_column
                    .clone()
                    .unwrap_or_else(|| c.source_column.clone()),
            });
        }
        unit
    }
}

impl DiscoverUnit {
    fn validate(&self) -> Result<()> {
        if self.discovery.prefixes.is_empty() {
            bail!("a discovery unit needs at least one prefix");
        }
        validate_identifiers(&self.discovery.prefixes)?;
        validate_identifiers(
            self.discovery
                .prefix_renames
                .iter()
                .chain(&self.discovery.name_overrides)
                .flat_map(|(k, v)| [k, v]),
        )?;
        validate_identifiers(&self.key)?;
        if let Some(ref c) = self.cleanup {
            validate_identifiers([&c.source_table, &c.source_column, &c.column])?;
        }
        Ok(())
    }

    async fn expand(
        &self,
        source: &dyn DatabaseConnector,
        destination: &dyn DatabaseConnector,
    ) -> Result<Vec<MigrationUnit>, MigrationError> {
        let pairs = discover_tables(source, destination, &self.discovery).await?;
        let mut units = Vec::with_capacity(pairs.len());
        for (source_table, destination_table) in pairs {
            let mut unit =
                MigrationUnit::new(&source_table, &destination_table).write_mode(self.write_mode);
            unit.destination.key_columns = self.key.clone();
            if let Some(ref c) = self.cleanup {
                let spec = destination.get_table_spec(&destination_table).await?;
                if spec.has_column(&c.column) {
                    unit.cleanup.push(CleanupSpec::new(
                        &c.source_table,
                        &c.source_column,
                        &destination_table,
                        &c.column,
                    ));
                }
            }
            units.push(unit);
        }
        Ok(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connectors::memory::MemoryConnector;
    use crate::db::schema::TableSpec;
    use crate::security::InMemoryCredentialStore;
    use serde_json::json;

    fn plan(units: serde_json::Value) -> serde_json::Value {
        json!({
            "source": { "engine": "Memory" },
            "destination": { "engine": "Memory", "read_only": false },
            "units": units
        })
    }

    fn parse(value: serde_json::Value) -> Result<PlanFile> {
        PlanFile::from_json(&value.to_string())
    }

    #[test]
    fn table_unit_defaults() {
        let p = parse(plan(json!([{ "kind": "table", "source": "users" }]))).unwrap();
        let UnitSpec::Table(ref t) = p.units[0] else {
            panic!("expected a table unit");
        };
        assert_eq!(t.destination_table(), "users");
        assert_eq!(t.write_mode, WriteMode::Merge);
        let unit = t.to_unit();
        assert_eq!(unit.name, "users");
        assert!(unit.transform.is_none());
        assert!(!unit.fan_out);
    }

    #[test]
    fn read_only_destination_is_rejected() {
        let mut value = plan(json!([]));
        value["destination"]["read_only"] = json!(true);
        assert!(parse(value).is_err());
    }

    #[test]
    fn projections_need_fan_out() {
        let units = json!([{
            "kind": "table", "source": "taxonomy_term_data",
            "projections": [ { "table": "taxonomy_term_field_data", "columns": { "tid": "tid" } } ]
        }]);
        let err = parse(plan(units)).unwrap_err();
        assert!(format!("{:#}", err).contains("fan_out"));
    }

    #[test]
    fn unsafe_identifiers_are_rejected() {
        let units = json!([{ "kind": "table", "source": "users; DROP TABLE x" }]);
        assert!(parse(plan(units)).is_err());
    }

    #[test]
    fn bad_filter_is_rejected_at_load() {
        let units = json!([{
            "kind": "table", "source": "users",
            "steps": [ { "step": "row_filter", "expression": "uid > 0" } ]
        }]);
        assert!(parse(plan(units)).is_err());
    }

    #[test]
    fn table_unit_builds_rules_and_cleanup() {
        let units = json!([{
            "kind": "table", "source": "users_roles", "destination": "user__roles",
            "key": ["entity_id", "roles_target_id"],
            "renames": { "rid": "roles_target_id" },
            "defaults": { "bundle": "user" },
            "drop": ["legacy"],
            "cleanup": [ { "source_table": "users", "source_column": "uid", "destination_column": "entity_id" } ]
        }]);
        let p = parse(plan(units)).unwrap();
        let UnitSpec::Table(ref t) = p.units[0] else {
            panic!("expected a table unit");
        };
        let unit = t.to_unit();
        assert_eq!(unit.destination.key_columns, vec!["entity_id", "roles_target_id"]);
        assert_eq!(unit.rules.len(), 3);
        assert_eq!(
            unit.cleanup,
            vec![CleanupSpec::new("users", "uid", "user__roles", "entity_id")]
        );
    }

    #[test]
    fn credentials_override_file_passwords() {
        let mut p = parse(plan(json!([]))).unwrap();
        let store = InMemoryCredentialStore::new();
        store.store("DRIFT_SOURCE_PASSWORD", "from-env").unwrap();
        p.resolve_credentials(&store).unwrap();
        assert_eq!(p.source.password.as_deref(), Some("from-env"));
        assert_eq!(p.destination.password, None);
    }

    #[tokio::test]
    async fn discovery_expands_to_common_tables() {
        let units = json!([{
            "kind": "discover",
            "prefixes": ["node", "custom_block"],
            "prefix_renames": { "custom_block": "block_content" },
            "write_mode": "replace",
            "cleanup": { "source_table": "node", "source_column": "nid", "column": "entity_id" }
        }]);
        let p = parse(plan(units)).unwrap();

        let source = MemoryConnector::new()
            .with_table(TableSpec::new("node", &["nid"], &["nid"]), vec![])
            .with_table(TableSpec::new("node__body", &["entity_id"], &["entity_id"]), vec![])
            .with_table(TableSpec::new("custom_block__body", &["entity_id"], &["entity_id"]), vec![]);
        let destination = MemoryConnector::new()
            .with_table(TableSpec::new("node", &["nid"], &["nid"]), vec![])
            .with_table(TableSpec::new("node__body", &["entity_id"], &["entity_id"]), vec![])
            .with_table(TableSpec::new("block_content__body", &["entity_id"], &["entity_id"]), vec![]);

        let built = p.build_units(&source, &destination).await.unwrap();
        let names: Vec<&str> = built.iter().map(|u| u.destination.table.as_str()).collect();
        assert_eq!(names, vec!["block_content__body", "node", "node__body"]);
        assert!(built.iter().all(|u| u.write_mode == WriteMode::Replace));
        // The base table has no entity_id column.
        assert!(built[1].cleanup.is_empty());
        assert_eq!(built[2].cleanup.len(), 1);
    }
}
