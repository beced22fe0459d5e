use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use super::document::{patch_json_column, PrefixReplace, PrefixReplacement};
use super::schema::Row;

/// Errors raised while transforming one row. The row is skipped.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransformError {
    #[error("column '{0}' not found")]
    MissingColumn(String),
    #[error("{0}")]
    Invalid(String),
}

/// What a transform sees besides the mapped row.
#[derive(Debug, Clone, Copy)]
pub struct RowContext<'a> {
    pub source_table: &'a str,
    /// Primary destination table of the unit.
    pub destination_table: &'a str,
    /// The raw source row, before column mapping.
    pub source: &'a Row,
}

/// One destination row produced by a transform.
#[derive(Debug, Clone, PartialEq)]
pub struct Emitted {
    pub table: String,
    pub row: Row,
}

impl Emitted {
    pub fn new(table: &str, row: Row) -> Self {
        Self {
            table: table.to_string(),
            row,
        }
    }
}

/// Turns one mapped source row into zero or more destination rows.
pub trait RowTransform: Send + Sync {
    fn transform(&self, ctx: &RowContext<'_>, mapped: Row) -> Result<Vec<Emitted>, TransformError>;
}

impl<F> RowTransform for F
where
    F: Fn(&RowContext<'_>, Row) -> Result<Vec<Emitted>, TransformError> + Send + Sync,
{
    fn transform(&self, ctx: &RowContext<'_>, mapped: Row) -> Result<Vec<Emitted>, TransformError> {
        self(ctx, mapped)
    }
}

// ---------------------------------------------------------------------------
// Declarative steps
// ---------------------------------------------------------------------------

/// Target type for `type_cast`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CastType {
    String,
    Number,
    Boolean,
}

/// A value mapping entry for lookup-based transforms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueMapping {
    pub source_value: serde_json::Value,
    pub target_value: serde_json::Value,
}

/// A single per-row transformation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum TransformStep {
    RenameColumn { from: String, to: String },
    TypeCast { column: String, target_type: CastType },
    ValueMap { column: String, mappings: Vec<ValueMapping> },
    ComputedColumn { name: String, expression: Expression },
    DefaultForNull { column: String, default_value: serde_json::Value },
    RowFilter { expression: Filter },
    DropColumn { column: String },
    ReplacePrefix { column: String, replacements: Vec<PrefixReplacement> },
    /// Column holds a JSON document whose strings get prefix replacements.
    PatchDocument { column: String, replacements: Vec<PrefixReplacement> },
}

impl TransformStep {
    /// Apply the step. `Ok(None)` means the row was filtered out.
    pub fn apply(&self, mut row: Row) -> Result<Option<Row>, TransformError> {
        match self {
            TransformStep::RenameColumn { from, to } => {
                if let Some(value) = row.remove(from) {
                    row.insert(to.clone(), value);
                }
            }
            TransformStep::TypeCast { column, target_type } => {
                if let Some(val) = row.get(column) {
                    let converted = cast_value(val, *target_type);
                    row.insert(column.clone(), converted);
                }
            }
            TransformStep::ValueMap { column, mappings } => {
                if let Some(val) = row.get(column) {
                    if let Some(m) = mappings.iter().find(|m| &m.source_value == val) {
                        row.insert(column.clone(), m.target_value.clone());
                    }
                }
            }
            TransformStep::ComputedColumn { name, expression } => {
                let value = expression.evaluate(&row)?;
                row.insert(name.clone(), value);
            }
            TransformStep::DefaultForNull {
                column,
                default_value,
            } => {
                if row.get(column).map_or(true, |v| v.is_null()) {
                    row.insert(column.clone(), default_value.clone());
                }
            }
            TransformStep::RowFilter { expression } => {
                if !expression.keeps(&row) {
                    return Ok(None);
                }
            }
            TransformStep::DropColumn { column } => {
                row.remove(column);
            }
            TransformStep::ReplacePrefix {
                column,
                replacements,
            } => {
                let patch = PrefixReplace::new(replacements.clone());
                if let Some(serde_json::Value::String(s)) = row.get_mut(column) {
                    if let Some(new) = patch.rewrite(s) {
                        *s = new;
                    }
                }
            }
            TransformStep::PatchDocument {
                column,
                replacements,
            } => {
                let patch = PrefixReplace::new(replacements.clone());
                patch_json_column(&mut row, column, &patch)?;
            }
        }
        Ok(Some(row))
    }
}

/// Apply steps in order. `Ok(None)` when any step filtered the row out.
pub fn apply_steps(steps: &[TransformStep], row: Row) -> Result<Option<Row>, TransformError> {
    let mut current = row;
    for step in steps {
        match step.apply(current)? {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

// ---------------------------------------------------------------------------
// Step helpers
// ---------------------------------------------------------------------------

/// Convert a value to the requested type. Unconvertible values are left
/// unchanged.
fn cast_value(val: &serde_json::Value, target: CastType) -> serde_json::Value {
    use serde_json::Value;

    match target {
        CastType::String => match val {
            Value::String(_) | Value::Null => val.clone(),
            Value::Number(n) => Value::String(n.to_string()),
            Value::Bool(b) => Value::String(b.to_string()),
            other => Value::String(other.to_string()),
        },
        CastType::Number => match val {
            Value::String(s) => {
                if let Ok(n) = s.parse::<i64>() {
                    Value::Number(n.into())
                } else {
                    s.parse::<f64>()
                        .ok()
                        .and_then(serde_json::Number::from_f64)
                        .map(Value::Number)
                        .unwrap_or_else(|| val.clone())
                }
            }
            Value::Bool(b) => Value::Number((*b as i64).into()),
            _ => val.clone(),
        },
        CastType::Boolean => match val {
            Value::Number(n) => Value::Bool(n.as_f64().map_or(true, |f| f != 0.0)),
            Value::String(s) => match s.to_lowercase().as_str() {
                "true" | "1" | "yes" => Value::Bool(true),
                "false" | "0" | "no" => Value::Bool(false),
                _ => val.clone(),
            },
            _ => val.clone(),
        },
    }
}

fn value_to_string(val: &serde_json::Value) -> String {
    match val {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Body of a `'...'` literal with doubled quotes unescaped.
fn quoted_literal(text: &str) -> Option<String> {
    let t = text.trim();
    let body = t.strip_prefix('\'')?.strip_suffix('\'')?;
    if body.replace("''", "").contains('\'') {
        return None;
    }
    Some(body.replace("''", "'"))
}

/// Split on `||` outside quoted literals.
fn split_concat(expr: &str) -> Result<Vec<&str>, TransformError> {
    let bytes = expr.as_bytes();
    let mut parts = Vec::new();
    let mut in_quote = false;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => in_quote = !in_quote,
            b'|' if !in_quote && bytes.get(i + 1) == Some(&b'|') => {
                parts.push(&expr[start..i]);
                i += 2;
                start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    if in_quote {
        return Err(TransformError::Invalid(format!(
            "unterminated literal in '{}'",
            expr.trim()
        )));
    }
    parts.push(&expr[start..]);
    Ok(parts)
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Literal(String),
    Column(String),
}

impl Operand {
    fn parse(text: &str) -> Result<Self, TransformError> {
        if let Some(lit) = quoted_literal(text) {
            return Ok(Operand::Literal(lit));
        }
        let name = text.trim();
        if name.is_empty() || name.contains(char::is_whitespace) || name.contains('\'') {
            return Err(TransformError::Invalid(format!(
                "cannot parse operand '{}'",
                text.trim()
            )));
        }
        Ok(Operand::Column(name.to_string()))
    }

    fn value(&self, row: &Row) -> Result<serde_json::Value, TransformError> {
        match self {
            Operand::Literal(s) => Ok(serde_json::Value::String(s.clone())),
            Operand::Column(c) => row
                .get(c)
                .cloned()
                .ok_or_else(|| TransformError::MissingColumn(c.clone())),
        }
    }
}

/// `'literal'`, `column`, or `a || 'literal' || b`, parsed when the plan is
/// read and kept alongside its source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Expression {
    text: String,
    operands: Vec<Operand>,
}

impl Expression {
    pub fn parse(text: &str) -> Result<Self, TransformError> {
        let operands = split_concat(text)?
            .into_iter()
            .map(Operand::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            text: text.to_string(),
            operands,
        })
    }

    fn evaluate(&self, row: &Row) -> Result<serde_json::Value, TransformError> {
        if let [single] = self.operands.as_slice() {
            return single.value(row);
        }
        let mut out = String::new();
        for part in &self.operands {
            out.push_str(&value_to_string(&part.value(row)?));
        }
        Ok(serde_json::Value::String(out))
    }
}

impl TryFrom<String> for Expression {
    type Error = TransformError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        Self::parse(&text)
    }
}

impl From<Expression> for String {
    fn from(expression: Expression) -> Self {
        expression.text
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    IsNull(String),
    IsNotNull(String),
    Equals(String, String),
    NotEquals(String, String),
}

/// `col IS NULL`, `col IS NOT NULL`, `col = 'v'` or `col != 'v'`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Filter {
    text: String,
    condition: Condition,
}

impl Filter {
    pub fn parse(expression: &str) -> Result<Self, TransformError> {
        let expr = expression.trim();
        // IS NOT NULL before IS NULL so the shorter suffix doesn't match first.
        let condition = if let Some(col) = expr.strip_suffix(" IS NOT NULL") {
            Condition::IsNotNull(col.trim().to_string())
        } else if let Some(col) = expr.strip_suffix(" IS NULL") {
            Condition::IsNull(col.trim().to_string())
        } else if let Some((col, val)) = parse_comparison(expr, "!=") {
            Condition::NotEquals(col, val)
        } else if let Some((col, val)) = parse_comparison(expr, "=") {
            Condition::Equals(col, val)
        } else {
            return Err(TransformError::Invalid(format!(
                "unsupported filter expression '{}'",
                expr
            )));
        };
        Ok(Self {
            text: expression.to_string(),
            condition,
        })
    }

    fn keeps(&self, row: &Row) -> bool {
        let text = |col: &str| row.get(col).filter(|v| !v.is_null()).map(value_to_string);
        match &self.condition {
            Condition::IsNull(col) => row.get(col).map_or(true, |v| v.is_null()),
            Condition::IsNotNull(col) => row.get(col).map_or(false, |v| !v.is_null()),
            Condition::Equals(col, val) => text(col.as_str()).as_deref() == Some(val.as_str()),
            Condition::NotEquals(col, val) => text(col.as_str()).as_deref() != Some(val.as_str()),
        }
    }
}

impl TryFrom<String> for Filter {
    type Error = TransformError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        Self::parse(&text)
    }
}

impl From<Filter> for String {
    fn from(filter: Filter) -> Self {
        filter.text
    }
}

/// Parse `"column_name OP 'value'"` into `(column_name, value)`.
fn parse_comparison(expr: &str, op: &str) -> Option<(String, String)> {
    let (col, raw) = expr.split_once(op)?;
    let col = col.trim();
    if col.is_empty() || col.contains(char::is_whitespace) || col.contains('\'') {
        return None;
    }
    Some((col.to_string(), quoted_literal(raw)?))
}

// ---------------------------------------------------------------------------
// Declarative transform with projections
// ---------------------------------------------------------------------------

/// An extra destination row built from the raw source row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub table: String,
    /// Merge key for this table; the destination's primary key when empty.
    #[serde(default)]
    pub key: Vec<String>,
    /// destination column -> source column
    #[serde(default)]
    pub columns: BTreeMap<String, String>,
    #[serde(default)]
    pub defaults: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub steps: Vec<TransformStep>,
}

impl Projection {
    fn build(&self, source: &Row) -> Result<Option<Row>, TransformError> {
        let mut row = Row::with_capacity(self.columns.len() + self.defaults.len());
        for (to, from) in &self.columns {
            let value = source
                .get(from)
                .ok_or_else(|| TransformError::MissingColumn(from.clone()))?;
            row.insert(to.clone(), value.clone());
        }
        for (column, value) in &self.defaults {
            row.insert(column.clone(), value.clone());
        }
        apply_steps(&self.steps, row)
    }
}

/// Steps over the mapped row, then one row per projection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeclarativeTransform {
    pub steps: Vec<TransformStep>,
    pub projections: Vec<Projection>,
}

impl DeclarativeTransform {
    pub fn new(steps: Vec<TransformStep>, projections: Vec<Projection>) -> Self {
        Self { steps, projections }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && self.projections.is_empty()
    }
}

impl RowTransform for DeclarativeTransform {
    fn transform(&self, ctx: &RowContext<'_>, mapped: Row) -> Result<Vec<Emitted>, TransformError> {
        let Some(primary) = apply_steps(&self.steps, mapped)? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity(1 + self.projections.len());
        out.push(Emitted::new(ctx.destination_table, primary));
        for projection in &self.projections {
            if let Some(row) = projection.build(ctx.source)? {
                out.push(Emitted::new(&projection.table, row));
            }
        }
        Ok(out)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row_from_json(v: serde_json::Value) -> Row {
        match v {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => panic!("expected JSON object"),
        }
    }

    fn run(step: TransformStep, v: serde_json::Value) -> Option<Row> {
        step.apply(row_from_json(v)).unwrap()
    }

    // -----------------------------------------------------------------------
    // Single steps
    // -----------------------------------------------------------------------

    #[test]
    fn rename_column_moves_value() {
        let out = run(
            TransformStep::RenameColumn {
                from: "old".into(),
                to: "new".into(),
            },
            json!({"old": "hello", "other": 1}),
        )
        .unwrap();
        assert_eq!(out["new"], json!("hello"));
        assert!(!out.contains_key("old"));
    }

    #[test]
    fn type_cast_variants() {
        let num = |v: serde_json::Value| {
            run(
                TransformStep::TypeCast {
                    column: "v".into(),
                    target_type: CastType::Number,
                },
                json!({ "v": v }),
            )
            .unwrap()["v"]
                .clone()
        };
        assert_eq!(num(json!("42")), json!(42));
        assert_eq!(num(json!("3.5")), json!(3.5));
        assert_eq!(num(json!("abc")), json!("abc"));
        assert_eq!(num(json!(true)), json!(1));

        let out = run(
            TransformStep::TypeCast {
                column: "v".into(),
                target_type: CastType::Boolean,
            },
            json!({"v": 0}),
        )
        .unwrap();
        assert_eq!(out["v"], json!(false));
    }

    #[test]
    fn value_map_renames_identifiers() {
        let step = TransformStep::ValueMap {
            column: "entity_type".into(),
            mappings: vec![ValueMapping {
                source_value: json!("custom_block"),
                target_value: json!("block_content"),
            }],
        };
        let out = step
            .apply(row_from_json(json!({"entity_type": "custom_block"})))
            .unwrap()
            .unwrap();
        assert_eq!(out["entity_type"], json!("block_content"));
        let untouched = step
            .apply(row_from_json(json!({"entity_type": "node"})))
            .unwrap()
            .unwrap();
        assert_eq!(untouched["entity_type"], json!("node"));
    }

    #[test]
    fn computed_concat_with_literal() {
        let out = run(
            TransformStep::ComputedColumn {
                name: "field_link_uri".into(),
                expression: Expression::parse("'internal:/' || field_link_url").unwrap(),
            },
            json!({"field_link_url": "node/1"}),
        )
        .unwrap();
        assert_eq!(out["field_link_uri"], json!("internal:/node/1"));
    }

    #[test]
    fn computed_missing_column_is_an_error() {
        let step = TransformStep::ComputedColumn {
            name: "x".into(),
            expression: Expression::parse("a || b").unwrap(),
        };
        assert_eq!(
            step.apply(row_from_json(json!({"a": 1}))).unwrap_err(),
            TransformError::MissingColumn("b".into())
        );
    }

    #[test]
    fn computed_literal_and_copy() {
        let lit = run(
            TransformStep::ComputedColumn {
                name: "bundle".into(),
                expression: Expression::parse("'user'").unwrap(),
            },
            json!({}),
        )
        .unwrap();
        assert_eq!(lit["bundle"], json!("user"));
        let copy = run(
            TransformStep::ComputedColumn {
                name: "revision_id".into(),
                expression: Expression::parse("entity_id").unwrap(),
            },
            json!({"entity_id": 4}),
        )
        .unwrap();
        assert_eq!(copy["revision_id"], json!(4));
    }

    #[test]
    fn default_for_null_fills_missing_and_null() {
        let step = TransformStep::DefaultForNull {
            column: "langcode".into(),
            default_value: json!("en"),
        };
        let a = step.apply(row_from_json(json!({"langcode": null}))).unwrap().unwrap();
        let b = step.apply(row_from_json(json!({}))).unwrap().unwrap();
        let c = step.apply(row_from_json(json!({"langcode": "fr"}))).unwrap().unwrap();
        assert_eq!(a["langcode"], json!("en"));
        assert_eq!(b["langcode"], json!("en"));
        assert_eq!(c["langcode"], json!("fr"));
    }

    #[test]
    fn row_filter_expressions() {
        let keep = |expr: &str, v| {
            TransformStep::RowFilter {
                expression: Filter::parse(expr).unwrap(),
            }
            .apply(row_from_json(v))
            .unwrap()
            .is_some()
        };
        assert!(keep("uid IS NOT NULL", json!({"uid": 1})));
        assert!(!keep("uid IS NOT NULL", json!({"uid": null})));
        assert!(keep("uid IS NULL", json!({})));
        assert!(keep("status = '1'", json!({"status": 1})));
        assert!(!keep("name != 'anonymous'", json!({"name": "anonymous"})));
    }

    #[test]
    fn unsupported_expressions_are_rejected() {
        assert!(Filter::parse("uid > 0").is_err());
        assert!(Filter::parse("'uid' = 'x'").is_err());
        assert!(Expression::parse("'open || b").is_err());
        assert!(Expression::parse("two words").is_err());
        assert!(Expression::parse("'a' || b").is_ok());
    }

    #[test]
    fn concat_separator_inside_literal_is_text() {
        let out = run(
            TransformStep::ComputedColumn {
                name: "x".into(),
                expression: Expression::parse("'a||b' || col || 'it''s'").unwrap(),
            },
            json!({"col": "-"}),
        )
        .unwrap();
        assert_eq!(out["x"], json!("a||b-it's"));
    }

    #[test]
    fn filter_literal_may_contain_operators() {
        let filter = Filter::parse("route = 'a!=b'").unwrap();
        assert!(filter.keeps(&row_from_json(json!({"route": "a!=b"}))));
        assert!(!filter.keeps(&row_from_json(json!({"route": "a"}))));
    }

    #[test]
    fn expressions_parse_once_when_deserialized() {
        let step: TransformStep = serde_json::from_value(json!({
            "step": "computed_column",
            "name": "field_link_uri",
            "expression": "'internal:/' || field_link_url"
        }))
        .unwrap();
        let TransformStep::ComputedColumn { ref expression, .. } = step else {
            panic!("expected computed_column");
        };
        assert_eq!(expression.operands.len(), 2);
        assert_eq!(
            serde_json::to_value(&step).unwrap()["expression"],
            json!("'internal:/' || field_link_url")
        );

        let bad: Result<TransformStep, _> = serde_json::from_value(json!({
            "step": "row_filter",
            "expression": "uid > 0"
        }));
        assert!(bad.is_err());
    }

    #[test]
    fn replace_prefix_rewrites_route_names() {
        let out = run(
            TransformStep::ReplacePrefix {
                column: "route_name".into(),
                replacements: vec![PrefixReplacement::new("custom_block.", "block_content.")],
            },
            json!({"route_name": "custom_block.add_page"}),
        )
        .unwrap();
        assert_eq!(out["route_name"], json!("block_content.add_page"));
    }

    #[test]
    fn steps_deserialize_with_tag() {
        let steps: Vec<TransformStep> = serde_json::from_value(json!([
            { "step": "drop_column", "column": "x" },
            { "step": "type_cast", "column": "y", "target_type": "number" },
            { "step": "patch_document", "column": "data",
              "replacements": [ { "from": "custom_block", "to": "block_content" } ] }
        ]))
        .unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(
            steps[1],
            TransformStep::TypeCast {
                column: "y".into(),
                target_type: CastType::Number
            }
        );
    }

    // -----------------------------------------------------------------------
    // Transforms
    // -----------------------------------------------------------------------

    #[test]
    fn declarative_transform_fans_out() {
        let transform = DeclarativeTransform::new(
            vec![],
            vec![Projection {
                table: "taxonomy_term_field_data".into(),
                key: vec!["tid".into()],
                columns: [("tid", "tid"), ("name", "name")]
                    .into_iter()
                    .map(|(a, b)| (a.to_string(), b.to_string()))
                    .collect(),
                defaults: [("default_langcode".to_string(), json!(1))].into_iter().collect(),
                steps: vec![],
            }],
        );
        let source = row_from_json(json!({"tid": 5, "name": "x", "vid": "tags"}));
        let ctx = RowContext {
            source_table: "taxonomy_term_data",
            destination_table: "taxonomy_term_data",
            source: &source,
        };
        let mapped = row_from_json(json!({"tid": 5, "vid": "tags"}));
        let out = transform.transform(&ctx, mapped).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].table, "taxonomy_term_data");
        assert_eq!(out[1].table, "taxonomy_term_field_data");
        assert_eq!(out[1].row["name"], json!("x"));
        assert_eq!(out[1].row["default_langcode"], json!(1));
    }

    #[test]
    fn filtered_primary_skips_projections() {
        let transform = DeclarativeTransform::new(
            vec![TransformStep::RowFilter {
                expression: Filter::parse("uid != '0'").unwrap(),
            }],
            vec![Projection {
                table: "users_field_data".into(),
                key: vec![],
                columns: BTreeMap::new(),
                defaults: BTreeMap::new(),
                steps: vec![],
            }],
        );
        let source = row_from_json(json!({"uid": 0}));
        let ctx = RowContext {
            source_table: "users",
            destination_table: "users",
            source: &source,
        };
        assert!(transform.transform(&ctx, source.clone()).unwrap().is_empty());
    }

    #[test]
    fn closures_are_transforms() {
        let split = |ctx: &RowContext<'_>, row: Row| -> Result<Vec<Emitted>, TransformError> {
            Ok(vec![
                Emitted::new(ctx.destination_table, row.clone()),
                Emitted::new("audit", row),
            ])
        };
        let source = row_from_json(json!({"id": 1}));
        let ctx = RowContext {
            source_table: "s",
            destination_table: "d",
            source: &source,
        };
        assert_eq!(split.transform(&ctx, source.clone()).unwrap().len(), 2);
    }
}
