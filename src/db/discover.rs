use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::connectors::{ConnectorResult, DatabaseConnector};

/// Which source tables a discovery unit expands to, and what they are
/// called in the destination.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Discovery {
    /// A table matches a prefix when it equals it or starts with `<prefix>_`.
    pub prefixes: Vec<String>,
    /// Old name prefix -> new name prefix (`custom_block` -> `block_content`).
    #[serde(default)]
    pub prefix_renames: BTreeMap<String, String>,
    /// Exact source name -> destination name, checked before prefix renames.
    #[serde(default)]
    pub name_overrides: BTreeMap<String, String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

fn has_prefix(table: &str, prefix: &str) -> bool {
    table == prefix
        || table
            .strip_prefix(prefix)
            .map_or(false, |rest| rest.starts_with('_'))
}

impl Discovery {
    pub fn selects(&self, table: &str) -> bool {
        !self.exclude.iter().any(|e| e == table)
            && self.prefixes.iter().any(|p| has_prefix(table, p))
    }

    /// Destination name for a source table.
    pub fn destination_name(&self, table: &str) -> String {
        if let Some(name) = self.name_overrides.get(table) {
            return name.clone();
        }
        // Longest old prefix first so `menu_link` wins over `menu`.
        let mut renames: Vec<(&String, &String)> = self.prefix_renames.iter().collect();
        renames.sort_by_key(|(old, _)| std::cmp::Reverse(old.len()));
        renames
            .into_iter()
            .find(|(old, _)| has_prefix(table, old))
            .map(|(old, new)| format!("{}{}", new, &table[old.len()..]))
            .unwrap_or_else(|| table.to_string())
    }

    /// (source, destination) pairs, in source order, for tables that exist
    /// on both sides.
    pub fn select(&self, source_tables: &[String], destination_tables: &[String]) -> Vec<(String, String)> {
        let existing: HashSet<&str> = destination_tables.iter().map(String::as_str).collect();
        let mut seen = HashSet::new();
        let mut pairs = Vec::new();
        for table in source_tables.iter().filter(|t| self.selects(t)) {
            let target = self.destination_name(table);
            if !existing.contains(target.as_str()) {
                log::debug!("{} has no destination table {}, skipped", table, target);
                continue;
            }
            if seen.insert(target.clone()) {
                pairs.push((table.clone(), target));
            }
        }
        pairs
    }
}

/// List both databases and select the common tables.
pub async fn discover_tables(
    source: &dyn DatabaseConnector,
    destination: &dyn DatabaseConnector,
    discovery: &Discovery,
) -> ConnectorResult<Vec<(String, String)>> {
    let source_tables = source.get_tables().await?;
    let destination_tables = destination.get_tables().await?;
    let pairs = discovery.select(&source_tables, &destination_tables);
    log::info!(
        "Discovered {} table(s) for prefixes {}",
        pairs.len(),
        discovery.prefixes.join(", ")
    );
    Ok(pairs)
}
