//! Identifier quoting and validation for PostgreSQL

use std::sync::LazyLock;

use regex::Regex;

static IDENTIFIER: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$"));

/// PostgreSQL reserved keywords that cannot be used as unquoted identifiers
pub const POSTGRES_RESERVED_WORDS: &[&str] = &[
    "ALL",
    "ANALYSE",
    "ANALYZE",
    "AND",
    "ANY",
    "ARRAY",
    "AS",
    "ASC",
    "ASYMMETRIC",
    "BOTH",
    "CASE",
    "CAST",
    "CHECK",
    "COLLATE",
    "COLUMN",
    "CONSTRAINT",
    "CREATE",
    "CURRENT_CATALOG",
    "CURRENT_DATE",
    "CURRENT_ROLE",
    "CURRENT_TIME",
    "CURRENT_TIMESTAMP",
    "CURRENT_USER",
    "DEFAULT",
    "DEFERRABLE",
    "DESC",
    "DISTINCT",
    "DO",
    "ELSE",
    "END",
    "EXCEPT",
    "FALSE",
    "FETCH",
    "FOR",
    "FOREIGN",
    "FROM",
    "GRANT",
    "GROUP",
    "HAVING",
    "IN",
    "INITIALLY",
    "INTERSECT",
    "INTO",
    "LATERAL",
    "LEADING",
    "LIMIT",
    "LOCALTIME",
    "LOCALTIMESTAMP",
    "NOT",
    "NULL",
    "OFFSET",
    "ON",
    "ONLY",
    "OR",
    "ORDER",
    "PLACING",
    "PRIMARY",
    "REFERENCES",
    "RETURNING",
    "SELECT",
    "SESSION_USER",
    "SOME",
    "SYMMETRIC",
    "TABLE",
    "THEN",
    "TO",
    "TRAILING",
    "TRUE",
    "UNION",
    "UNIQUE",
    "USER",
    "USING",
    "VARIADIC",
    "WHEN",
    "WHERE",
    "WINDOW",
    "WITH",
];

/// Quote a SQL identifier, doubling embedded quotes
///
/// ```
/// use runtara_model::sql::quote_identifier;
///
/// let quoted = quote_identifier("my_table");
/// assert_eq!(quoted, "\"my_table\"");
/// ```
pub fn quote_identifier(identifier: &str) -> String {
    let escaped = identifier.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

/// Quote a possibly qualified name: `p.title` becomes `"p"."title"`, `*` and
/// `p.*` keep their star unquoted
pub fn quote_qualified(name: &str) -> String {
    name.split('.')
        .map(|part| {
            if part == "*" {
                part.to_string()
            } else {
                quote_identifier(part)
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Validate a table or column name
///
/// Names start with a lowercase letter, contain only lowercase letters,
/// digits and underscores, and are neither a PostgreSQL reserved word nor
/// one of `reserved_columns`.
///
/// ```
/// use runtara_model::sql::validate_identifier;
///
/// assert!(validate_identifier("products", &[]).is_ok());
/// assert!(validate_identifier("select", &[]).is_err());
/// assert!(validate_identifier("id", &["id"]).is_err());
/// ```
pub fn validate_identifier(name: &str, reserved_columns: &[&str]) -> Result<(), String> {
    if name.is_empty() {
        return Err("Identifier cannot be empty".to_string());
    }

    let pattern = IDENTIFIER.as_ref().map_err(|e| e.to_string())?;
    if !pattern.is_match(name) {
        return Err(format!(
            "Identifier '{}' is invalid. Must start with a lowercase letter and contain only lowercase letters, numbers, and underscores.",
            name
        ));
    }

    if POSTGRES_RESERVED_WORDS.contains(&name.to_uppercase().as_str()) {
        return Err(format!(
            "Identifier '{}' is a PostgreSQL reserved keyword and cannot be used.",
            name
        ));
    }

    if reserved_columns.contains(&name) {
        return Err(format!(
            "Column name '{}' is reserved and cannot be used.",
            name
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier_escapes_quotes() {
        assert_eq!(quote_identifier("users"), "\"users\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_identifier("my.table"), "\"my.table\"");
    }

    #[test]
    fn test_quote_qualified() {
        assert_eq!(quote_qualified("p.title"), "\"p\".\"title\"");
        assert_eq!(quote_qualified("title"), "\"title\"");
        assert_eq!(quote_qualified("p.*"), "\"p\".*");
        assert_eq!(quote_qualified("*"), "*");
    }

    #[test]
    fn test_validate_identifier_shapes() {
        assert!(validate_identifier("post_tags_2", &[]).is_ok());
        for bad in ["", "1posts", "_posts", "Posts", "my-table", "schema.table", "a b"] {
            assert!(validate_identifier(bad, &[]).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_validate_identifier_reserved() {
        let err = validate_identifier("order", &[]).unwrap_err();
        assert!(err.contains("reserved keyword"));

        assert!(validate_identifier("id", &["id"]).is_err());
        assert!(validate_identifier("id", &[]).is_ok());
    }
}
