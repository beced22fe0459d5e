use std::fmt;

/// Errors raised while validating plan input.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    TooLong { max: usize, actual: usize },
    NullBytes,
    PathTraversal,
    InvalidIdentifier(String),
    EmptyInput,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::TooLong { max, actual } => {
                write!(f, "Input length {} exceeds maximum of {}", actual, max)
            }
            ValidationError::NullBytes => write!(f, "Input contains null bytes"),
            ValidationError::PathTraversal => write!(f, "Path traversal pattern detected"),
            ValidationError::InvalidIdentifier(reason) => {
                write!(f, "Invalid SQL identifier: {}", reason)
            }
            ValidationError::EmptyInput => write!(f, "Input must not be empty"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Keywords that are never accepted as a bare table or column name.
const RESERVED_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "INSERT", "UPDATE", "ALTER", "CREATE", "EXEC", "EXECUTE", "UNION",
    "SELECT", "TRUNCATE", "GRANT", "REVOKE",
];

/// MySQL caps identifiers at 64 characters, SQLite does not; 128 covers both.
const MAX_IDENTIFIER_LEN: usize = 128;

/// Validate that a string is a safe SQL identifier (table or column name).
///
/// Valid identifiers start with a letter or underscore, contain only ASCII
/// letters, digits and underscores, and are not a reserved keyword.
pub fn validate_identifier(name: &str) -> Result<(), ValidationError> {
    let Some(first) = name.chars().next() else {
        return Err(ValidationError::EmptyInput);
    };

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(ValidationError::TooLong {
            max: MAX_IDENTIFIER_LEN,
            actual: name.len(),
        });
    }

    if name.contains('\0') {
        return Err(ValidationError::NullBytes);
    }

    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(ValidationError::InvalidIdentifier(format!(
            "'{}' must start with a letter or underscore",
            name
        )));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ValidationError::InvalidIdentifier(format!(
            "'{}' must contain only letters, digits, and underscores",
            name
        )));
    }

    let upper = name.to_uppercase();
    if RESERVED_KEYWORDS.iter().any(|k| upper == *k) {
        return Err(ValidationError::InvalidIdentifier(format!(
            "'{}' is a reserved SQL keyword",
            name
        )));
    }

    Ok(())
}

/// Validate every identifier in a list, reporting the first failure.
pub fn validate_identifiers<'a, I>(names: I) -> Result<(), ValidationError>
where
    I: IntoIterator<Item = &'a String>,
{
    names.into_iter().try_for_each(|n| validate_identifier(n))
}

/// Validate a database file path (SQLite) or journal path.
pub fn validate_file_path(path: &str) -> Result<(), ValidationError> {
    if path.is_empty() {
        return Err(ValidationError::EmptyInput);
    }
    if path.contains('\0') {
        return Err(ValidationError::NullBytes);
    }
    if path.contains("../") || path.contains("..\\") {
        return Err(ValidationError::PathTraversal);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_drupal_style_names() {
        assert!(validate_identifier("node__field_link").is_ok());
        assert!(validate_identifier("_tmp").is_ok());
        assert!(validate_identifier("taxonomy_term_field_data").is_ok());
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(validate_identifier(""), Err(ValidationError::EmptyInput));
    }

    #[test]
    fn rejects_leading_digit() {
        assert!(matches!(
            validate_identifier("1users"),
            Err(ValidationError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn rejects_punctuation() {
        assert!(validate_identifier("users; DROP").is_err());
        assert!(validate_identifier("a-b").is_err());
        assert!(validate_identifier("a.b").is_err());
    }

    #[test]
    fn rejects_keywords_case_insensitively() {
        assert!(validate_identifier("select").is_err());
        assert!(validate_identifier("Truncate").is_err());
        assert!(validate_identifier("selected").is_ok());
    }

    #[test]
    fn rejects_overlong_identifier() {
        let name = "a".repeat(129);
        assert_eq!(
            validate_identifier(&name),
            Err(ValidationError::TooLong {
                max: 128,
                actual: 129
            })
        );
    }

    #[test]
    fn validates_lists() {
        let ok = vec!["a".to_string(), "b".to_string()];
        let bad = vec!["a".to_string(), "b c".to_string()];
        assert!(validate_identifiers(&ok).is_ok());
        assert!(validate_identifiers(&bad).is_err());
    }

    #[test]
    fn file_paths() {
        assert!(validate_file_path("/var/lib/site.sqlite").is_ok());
        assert_eq!(
            validate_file_path("../../etc/passwd"),
            Err(ValidationError::PathTraversal)
        );
        assert_eq!(validate_file_path(""), Err(ValidationError::EmptyInput));
    }
}
