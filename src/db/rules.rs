use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RuleError {
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// A name pattern where `*` matches any run of characters. Everything else
/// is literal. The first `*` is captured so renames can carry it over
/// (`*_url` -> `*_uri`).
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pattern {
    text: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(text: &str) -> Result<Self, RuleError> {
        let body = text
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join("(.*)");
        let regex = Regex::new(&format!("^{}$", body)).map_err(|e| RuleError::InvalidPattern {
            pattern: text.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            text: text.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    /// Text matched by the first `*`, when the pattern has one.
    pub fn capture<'a>(&self, name: &'a str) -> Option<&'a str> {
        self.regex
            .captures(name)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }

    /// Substitute the first `*` of `template` with what this pattern
    /// captured from `name`. Templates without `*` are returned as-is.
    pub fn substitute(&self, name: &str, template: &str) -> Option<String> {
        if !self.matches(name) {
            return None;
        }
        match self.capture(name) {
            Some(captured) => Some(template.replacen('*', captured, 1)),
            None => Some(template.to_string()),
        }
    }
}

impl TryFrom<String> for Pattern {
    type Error = RuleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Pattern::new(&value)
    }
}

impl From<Pattern> for String {
    fn from(p: Pattern) -> Self {
        p.text
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pattern({:?})", self.text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

/// What a rule does to the still-unexplained column delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DeltaAction {
    /// Every pattern must match at least one source-only column; all
    /// matches are dropped.
    DropRemoved { columns: Vec<Pattern> },
    /// Drop every remaining source-only column. Only applies when no
    /// destination-only column is left unexplained.
    DropAllRemoved,
    /// Fill matching destination-only columns with a literal.
    DefaultAdded {
        column: Pattern,
        value: serde_json::Value,
    },
    /// Map a source-only column onto a destination-only one.
    Rename { from: Pattern, to: String },
    /// Copy one source column into several destination-only columns.
    Split { from: String, into: Vec<String> },
}

/// A named, table-scoped reconciliation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaRule {
    pub name: String,
    /// Table name pattern; every table when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tables: Option<Pattern>,
    #[serde(flatten)]
    pub action: DeltaAction,
}

impl DeltaRule {
    pub fn new(name: &str, tables: Option<Pattern>, action: DeltaAction) -> Self {
        Self {
            name: name.to_string(),
            tables,
            action,
        }
    }

    pub fn applies_to(&self, source_table: &str, destination_table: &str) -> bool {
        self.tables.as_ref().map_or(true, |p| {
            p.matches(destination_table) || p.matches(source_table)
        })
    }

    pub fn is_drop_all(&self) -> bool {
        matches!(self.action, DeltaAction::DropAllRemoved)
    }
}

/// Rule catalogue in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    rules: Vec<DeltaRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<DeltaRule>) -> Self {
        Self { rules }
    }

    pub fn push(&mut self, rule: DeltaRule) {
        self.rules.push(rule);
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeltaRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules scoped to a table pair, in declaration order.
    pub fn for_tables<'a>(
        &'a self,
        source_table: &'a str,
        destination_table: &'a str,
    ) -> impl Iterator<Item = &'a DeltaRule> + 'a {
        self.rules
            .iter()
            .filter(move |r| r.applies_to(source_table, destination_table))
    }
}
