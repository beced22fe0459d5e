use super::error::MigrationError;
use super::rules::{DeltaAction, DeltaRule};
use super::schema::{Row, TableSpec};
use serde::Serialize;

/// How source rows become destination rows for one table pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ColumnMapping {
    /// (source column, destination column), source column order.
    pub pairs: Vec<(String, String)>,
    /// Literal values for destination-only columns.
    pub defaults: Vec<(String, serde_json::Value)>,
    /// Source columns not carried over.
    pub dropped: Vec<String>,
}

impl ColumnMapping {
    pub fn identity(columns: &[String]) -> Self {
        Self {
            pairs: columns.iter().map(|c| (c.clone(), c.clone())).collect(),
            ..Default::default()
        }
    }

    /// Project a source row onto destination columns.
    pub fn apply(&self, row: &Row) -> Result<Row, String> {
        let mut out = Row::with_capacity(self.pairs.len() + self.defaults.len());
        for (from, to) in &self.pairs {
            let value = row
                .get(from)
                .ok_or_else(|| format!("source row has no column '{}'", from))?;
            out.insert(to.clone(), value.clone());
        }
        for (column, value) in &self.defaults {
            out.insert(column.clone(), value.clone());
        }
        Ok(out)
    }

    pub fn destination_columns(&self) -> impl Iterator<Item = &String> {
        self.pairs
            .iter()
            .map(|(_, to)| to)
            .chain(self.defaults.iter().map(|(c, _)| c))
    }
}

/// Outcome of reconciling one table pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reconciliation {
    pub mapping: ColumnMapping,
    pub applied_rules: Vec<String>,
    pub warnings: Vec<String>,
}

/// Working state: the part of the delta no rule has explained yet.
struct Pending<'a> {
    source: &'a TableSpec,
    only_in_source: Vec<String>,
    only_in_destination: Vec<String>,
    mapping: ColumnMapping,
}

impl Pending<'_> {
    fn take_source(&mut self, column: &str) -> bool {
        let before = self.only_in_source.len();
        self.only_in_source.retain(|c| c != column);
        before != self.only_in_source.len()
    }

    fn take_destination(&mut self, column: &str) -> bool {
        let before = self.only_in_destination.len();
        self.only_in_destination.retain(|c| c != column);
        before != self.only_in_destination.len()
    }

    /// Apply one rule when its whole precondition holds. Returns whether it
    /// applied.
    fn apply(&mut self, rule: &DeltaRule) -> bool {
        match &rule.action {
            DeltaAction::DropRemoved { columns } => {
                let matched: Vec<String> = self
                    .only_in_source
                    .iter()
                    .filter(|c| columns.iter().any(|p| p.matches(c)))
                    .cloned()
                    .collect();
                let every_pattern_hit = columns
                    .iter()
                    .all(|p| self.only_in_source.iter().any(|c| p.matches(c)));
                if columns.is_empty() || !every_pattern_hit {
                    return false;
                }
                for column in matched {
                    self.take_source(&column);
                    self.mapping.dropped.push(column);
                }
                true
            }
            DeltaAction::DropAllRemoved => {
                if !self.only_in_destination.is_empty() || self.only_in_source.is_empty() {
                    return false;
                }
                self.mapping.dropped.append(&mut self.only_in_source);
                true
            }
            DeltaAction::DefaultAdded { column, value } => {
                let matched: Vec<String> = self
                    .only_in_destination
                    .iter()
                    .filter(|c| column.matches(c))
                    .cloned()
                    .collect();
                if matched.is_empty() {
                    return false;
                }
                for c in matched {
                    self.take_destination(&c);
                    self.mapping.defaults.push((c, value.clone()));
                }
                true
            }
            DeltaAction::Rename { from, to } => {
                let renames: Vec<(String, String)> = self
                    .only_in_source
                    .iter()
                    .filter_map(|c| from.substitute(c, to).map(|t| (c.clone(), t)))
                    .filter(|(_, t)| self.only_in_destination.contains(t))
                    .collect();
                if renames.is_empty() {
                    return false;
                }
                for (old, new) in renames {
                    self.take_source(&old);
                    self.take_destination(&new);
                    self.mapping.pairs.push((old, new));
                }
                true
            }
            DeltaAction::Split { from, into } => {
                let all_added = !into.is_empty()
                    && into.iter().all(|c| self.only_in_destination.contains(c));
                if !self.source.has_column(from) || !all_added {
                    return false;
                }
                self.take_source(from);
                for column in into {
                    self.take_destination(column);
                    self.mapping.pairs.push((from.clone(), column.clone()));
                }
                true
            }
        }
    }
}

/// Work out how `source` rows map onto `destination` rows.
///
/// Rules are tried in order; `drop_all_removed` rules run last. At most one
/// residual unexplained column is tolerated with a warning; anything more is
/// a `SchemaReconciliation` error carrying the full column delta.
pub fn reconcile<'r, I>(
    source: &TableSpec,
    destination: &TableSpec,
    rules: I,
) -> Result<Reconciliation, MigrationError>
where
    I: IntoIterator<Item = &'r DeltaRule>,
{
    let only_in_source: Vec<String> = source
        .columns
        .iter()
        .filter(|c| !destination.has_column(c))
        .cloned()
        .collect();
    let only_in_destination: Vec<String> = destination
        .columns
        .iter()
        .filter(|c| !source.has_column(c))
        .cloned()
        .collect();

    let common: Vec<String> = source
        .columns
        .iter()
        .filter(|c| destination.has_column(c))
        .cloned()
        .collect();

    let mut pending = Pending {
        source,
        only_in_source: only_in_source.clone(),
        only_in_destination: only_in_destination.clone(),
        mapping: ColumnMapping::identity(&common),
    };
    let mut applied_rules = Vec::new();
    let mut warnings = Vec::new();

    let (drop_all, ordered): (Vec<&DeltaRule>, Vec<&DeltaRule>) = rules
        .into_iter()
        .filter(|r| r.applies_to(&source.name, &destination.name))
        .partition(|r| r.is_drop_all());

    for rule in ordered.into_iter().chain(drop_all) {
        if pending.only_in_source.is_empty() && pending.only_in_destination.is_empty() {
            break;
        }
        if pending.apply(rule) {
            log::debug!("{}: applied rule '{}'", destination.name, rule.name);
            applied_rules.push(rule.name.clone());
        }
    }

    let residual = pending.only_in_source.len() + pending.only_in_destination.len();
    if residual > 1 {
        return Err(MigrationError::SchemaReconciliation {
            table: destination.name.clone(),
            only_in_source,
            only_in_destination,
        });
    }

    if let Some(column) = pending.only_in_source.pop() {
        let msg = format!(
            "{}: source column '{}' has no destination counterpart and is dropped",
            destination.name, column
        );
        log::warn!("{}", msg);
        warnings.push(msg);
        pending.mapping.dropped.push(column);
    }
    if let Some(column) = pending.only_in_destination.pop() {
        let msg = format!(
            "{}: destination column '{}' is not populated and keeps its default",
            destination.name, column
        );
        log::warn!("{}", msg);
        warnings.push(msg);
    }

    Ok(Reconciliation {
        mapping: pending.mapping,
        applied_rules,
        warnings,
    })
}
