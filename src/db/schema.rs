use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A database row as a map of column names to JSON values.
pub type Row = std::collections::HashMap<String, serde_json::Value>;

/// Live structure of one table, read at the start of a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    /// Primary or composite key columns, in key order. May be empty.
    pub key_columns: Vec<String>,
    /// Every column, in ordinal order.
    pub columns: Vec<String>,
}

impl TableSpec {
    pub fn new(name: &str, key_columns: &[&str], columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            key_columns: key_columns.iter().map(|c| c.to_string()).collect(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Columns of `row` that this table does not have, sorted.
    pub fn unknown_columns(&self, row: &Row) -> Vec<String> {
        let mut unknown: Vec<String> = row
            .keys()
            .filter(|c| !self.has_column(c))
            .cloned()
            .collect();
        unknown.sort();
        unknown
    }
}

/// Object key marking a binary column value inside a `Row`. The bytes are
/// carried as lowercase hex so they survive the JSON value model intact.
pub const BINARY_TAG: &str = "$binary";

/// Wrap raw bytes read from a BLOB/VARBINARY column.
pub fn binary_value(bytes: &[u8]) -> serde_json::Value {
    let mut map = serde_json::Map::with_capacity(1);
    map.insert(BINARY_TAG.to_string(), serde_json::Value::String(hex::encode(bytes)));
    serde_json::Value::Object(map)
}

/// The bytes of a value built by [`binary_value`], if it is one.
pub fn binary_bytes(value: &serde_json::Value) -> Option<Vec<u8>> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    hex::decode(map.get(BINARY_TAG)?.as_str()?).ok()
}

/// Canonical text form of a value, used to compare keys across engines that
/// hand back `5`, `"5"` or `true` for the same stored value.
pub fn value_fingerprint(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(true) => "1".to_string(),
        serde_json::Value::Bool(false) => "0".to_string(),
        other => match binary_bytes(other) {
            Some(bytes) => format!("x'{}'", hex::encode(bytes)),
            None => other.to_string(),
        },
    }
}

/// Ordered key values identifying one destination row.
#[derive(Debug, Clone)]
pub struct MergeKey {
    pub columns: Vec<String>,
    pub values: Vec<serde_json::Value>,
    fingerprint: String,
}

impl MergeKey {
    /// Extract the key from `row`. Returns the names of absent or NULL key
    /// columns on failure.
    pub fn from_row(row: &Row, key_columns: &[String]) -> Result<Self, Vec<String>> {
        let missing: Vec<String> = key_columns
            .iter()
            .filter(|c| row.get(*c).map_or(true, |v| v.is_null()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(missing);
        }

        let values: Vec<serde_json::Value> = key_columns
            .iter()
            .map(|c| row.get(c).cloned().unwrap_or(serde_json::Value::Null))
            .collect();
        let fingerprint = values
            .iter()
            .map(|v| value_fingerprint(v).replace('\\', "\\\\").replace('|', "\\|"))
            .collect::<Vec<_>>()
            .join("|");

        Ok(Self {
            columns: key_columns.to_vec(),
            values,
            fingerprint,
        })
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl PartialEq for MergeKey {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl Eq for MergeKey {}

impl Hash for MergeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fingerprint.hash(state);
    }
}

impl fmt::Display for MergeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .columns
            .iter()
            .zip(&self.values)
            .map(|(c, v)| format!("{}={}", c, value_fingerprint(v)))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// Best-effort description of a row's key for error reports, tolerating
/// missing columns.
pub fn describe_key(row: &Row, key_columns: &[String]) -> String {
    if key_columns.is_empty() {
        return "<no key>".to_string();
    }
    key_columns
        .iter()
        .map(|c| {
            let v = row
                .get(c)
                .map(value_fingerprint)
                .unwrap_or_else(|| "?".to_string());
            format!("{}={}", c, v)
        })
        .collect::<Vec<_>>()
        .join(", ")
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

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn numeric_and_string_keys_are_equal() {
        let a = MergeKey::from_row(&row(&[("id", json!(5))]), &cols(&["id"])).unwrap();
        let b = MergeKey::from_row(&row(&[("id", json!("5"))]), &cols(&["id"])).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn composite_key_order_matters() {
        let r = row(&[("a", json!(1)), ("b", json!(2))]);
        let ab = MergeKey::from_row(&r, &cols(&["a", "b"])).unwrap();
        let ba = MergeKey::from_row(&r, &cols(&["b", "a"])).unwrap();
        assert_ne!(ab, ba);
        assert_eq!(ab.fingerprint(), "1|2");
    }

    #[test]
    fn separator_in_value_does_not_collide() {
        let one = MergeKey::from_row(
            &row(&[("a", json!("x|y")), ("b", json!("z"))]),
            &cols(&["a", "b"]),
        )
        .unwrap();
        let two = MergeKey::from_row(
            &row(&[("a", json!("x")), ("b", json!("y|z"))]),
            &cols(&["a", "b"]),
        )
        .unwrap();
        assert_ne!(one, two);
    }

    #[test]
    fn missing_and_null_key_columns_are_reported() {
        let r = row(&[("id", json!(null))]);
        let err = MergeKey::from_row(&r, &cols(&["id", "langcode"])).unwrap_err();
        assert_eq!(err, cols(&["id", "langcode"]));
    }

    #[test]
    fn display_names_columns() {
        let key = MergeKey::from_row(
            &row(&[("entity_id", json!(3)), ("langcode", json!("en"))]),
            &cols(&["entity_id", "langcode"]),
        )
        .unwrap();
        assert_eq!(key.to_string(), "entity_id=3, langcode=en");
    }

    #[test]
    fn unknown_columns_sorted() {
        let spec = TableSpec::new("t", &["id"], &["id", "name"]);
        let r = row(&[("id", json!(1)), ("zeta", json!(1)), ("alpha", json!(1))]);
        assert_eq!(spec.unknown_columns(&r), cols(&["alpha", "zeta"]));
    }

    #[test]
    fn binary_values_keep_every_byte() {
        let raw = [0x00, 0xff, 0xfe, 0x80];
        let v = binary_value(&raw);
        assert_eq!(v, json!({ "$binary": "00fffe80" }));
        assert_eq!(binary_bytes(&v), Some(raw.to_vec()));
        assert_eq!(value_fingerprint(&v), "x'00fffe80'");
        assert_eq!(binary_bytes(&json!({ "$binary": "zz" })), None);
        assert_eq!(binary_bytes(&json!({ "$binary": "00", "other": 1 })), None);
        assert_eq!(binary_bytes(&json!("00fffe80")), None);
    }

    #[test]
    fn describe_key_tolerates_gaps() {
        let r = row(&[("id", json!(7))]);
        assert_eq!(describe_key(&r, &cols(&["id", "vid"])), "id=7, vid=?");
        assert_eq!(describe_key(&r, &[]), "<no key>");
    }
}
