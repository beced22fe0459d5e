//! Patching of structured configuration values stored in a column.
//!
//! A document is any `serde_json::Value` tree. Patches are pure functions
//! over that tree so callers can plug in their own rewrites.

use super::transformer::{Emitted, RowContext, RowTransform, TransformError};
use super::schema::Row;
use serde::{Deserialize, Serialize};

/// A rewrite applied in place to a document tree.
pub trait DocumentPatch: Send + Sync {
    /// Returns the number of values changed.
    fn patch(&self, document: &mut serde_json::Value) -> usize;
}

/// One `from` prefix and its replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefixReplacement {
    pub from: String,
    pub to: String,
}

impl PrefixReplacement {
    pub fn new(from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// Rewrite the leading part of string values. The first matching
/// replacement wins; only the prefix is replaced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrefixReplace {
    pub replacements: Vec<PrefixReplacement>,
}

impl PrefixReplace {
    pub fn new(replacements: Vec<PrefixReplacement>) -> Self {
        Self { replacements }
    }

    /// Rewrite a single string, if any prefix matches.
    pub fn rewrite(&self, text: &str) -> Option<String> {
        self.replacements.iter().find_map(|r| {
            text.strip_prefix(r.from.as_str())
                .map(|rest| format!("{}{}", r.to, rest))
        })
    }
}

impl DocumentPatch for PrefixReplace {
    fn patch(&self, document: &mut serde_json::Value) -> usize {
        match document {
            serde_json::Value::String(s) => match self.rewrite(s) {
                Some(new) if new != *s => {
                    *s = new;
                    1
                }
                _ => 0,
            },
            serde_json::Value::Array(items) => items.iter_mut().map(|v| self.patch(v)).sum(),
            serde_json::Value::Object(map) => map.values_mut().map(|v| self.patch(v)).sum(),
            _ => 0,
        }
    }
}

/// Parse a JSON-encoded column, patch it and re-encode it. NULL passes through.
pub fn patch_json_column(
    row: &mut Row,
    column: &str,
    patch: &dyn DocumentPatch,
) -> Result<usize, TransformError> {
    let Some(value) = row.get_mut(column) else {
        return Err(TransformError::MissingColumn(column.to_string()));
    };
    match value {
        serde_json::Value::Null => Ok(0),
        serde_json::Value::String(text) => {
            let mut document: serde_json::Value = serde_json::from_str(text).map_err(|e| {
                TransformError::Invalid(format!("column '{}' is not a JSON document: {}", column, e))
            })?;
            let changed = patch.patch(&mut document);
            if changed > 0 {
                *text = document.to_string();
            }
            Ok(changed)
        }
        structured => Ok(patch.patch(structured)),
    }
}

/// Wraps a document patch as a row transform over one column.
pub struct DocumentTransform<P: DocumentPatch> {
    column: String,
    patch: P,
}

impl<P: DocumentPatch> DocumentTransform<P> {
    pub fn new(column: &str, patch: P) -> Self {
        Self {
            column: column.to_string(),
            patch,
        }
    }
}

impl<P: DocumentPatch> RowTransform for DocumentTransform<P> {
    fn transform(&self, ctx: &RowContext<'_>, mut mapped: Row) -> Result<Vec<Emitted>, TransformError> {
        patch_json_column(&mut mapped, &self.column, &self.patch)?;
        Ok(vec![Emitted::new(ctx.destination_table, mapped)])
    }
}
