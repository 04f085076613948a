//! Column and index definitions used by table schemas
//!
//! Column types double as the validation rules applied to write payloads and
//! as the source of PostgreSQL DDL types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sql::sanitize::quote_identifier;

/// Column type definition with validation and SQL mapping
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ColumnType {
    /// Text field (maps to TEXT)
    String,

    /// 64-bit integer field (maps to BIGINT)
    Integer,

    /// Decimal field with precision and scale (maps to NUMERIC)
    Decimal {
        #[serde(default = "default_precision")]
        precision: u8,
        #[serde(default = "default_scale")]
        scale: u8,
    },

    /// Boolean field
    Boolean,

    /// Timestamp with time zone, RFC 3339 on the wire
    Timestamp,

    /// Binary JSON (maps to JSONB)
    Json,

    /// Text restricted to a fixed set of values
    Enum { values: Vec<String> },
}

fn default_precision() -> u8 {
    19
}

fn default_scale() -> u8 {
    4
}

impl ColumnType {
    /// Create a Decimal type with specified precision and scale
    pub fn decimal(precision: u8, scale: u8) -> Self {
        ColumnType::Decimal { precision, scale }
    }

    /// Map an `information_schema.columns.data_type` value back to a column type
    pub fn from_pg_data_type(data_type: &str) -> Self {
        match data_type.to_lowercase().as_str() {
            "bigint" | "integer" | "smallint" => ColumnType::Integer,
            "numeric" | "decimal" | "real" | "double precision" => ColumnType::Decimal {
                precision: default_precision(),
                scale: default_scale(),
            },
            "boolean" => ColumnType::Boolean,
            "timestamp with time zone" | "timestamp without time zone" | "date" => {
                ColumnType::Timestamp
            }
            "json" | "jsonb" => ColumnType::Json,
            _ => ColumnType::String,
        }
    }

    /// Convert column type to PostgreSQL type string
    pub fn to_sql_type(&self, column_name: &str) -> String {
        match self {
            ColumnType::String => "TEXT".to_string(),
            ColumnType::Integer => "BIGINT".to_string(),
            ColumnType::Decimal { precision, scale } => {
                format!("NUMERIC({},{})", precision, scale)
            }
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Timestamp => "TIMESTAMP WITH TIME ZONE".to_string(),
            ColumnType::Json => "JSONB".to_string(),
            ColumnType::Enum { values } => format!(
                "TEXT CHECK ({} IN ({}))",
                quote_identifier(column_name),
                values
                    .iter()
                    .map(|v| format!("'{}'", v.replace('\'', "''")))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }

    /// Validate that a JSON value is compatible with this column type
    ///
    /// NULL always passes here; nullability is checked against the column.
    pub fn validate_value(&self, value: &Value) -> Result<(), String> {
        if value.is_null() {
            return Ok(());
        }

        match (self, value) {
            (ColumnType::String, Value::String(_)) => Ok(()),
            (ColumnType::Integer, Value::Number(n)) if n.is_i64() => Ok(()),
            (ColumnType::Integer, Value::String(s)) => s
                .parse::<i64>()
                .map(|_| ())
                .map_err(|_| format!("Cannot convert '{}' to integer", s)),
            (ColumnType::Decimal { .. }, Value::Number(_)) => Ok(()),
            (ColumnType::Decimal { .. }, Value::String(s)) => s
                .parse::<f64>()
                .map(|_| ())
                .map_err(|_| format!("Cannot convert '{}' to decimal", s)),
            (ColumnType::Boolean, Value::Bool(_)) => Ok(()),
            (ColumnType::Boolean, Value::String(s)) => match s.to_lowercase().as_str() {
                "true" | "false" | "1" | "0" | "yes" | "no" => Ok(()),
                _ => Err(format!("Cannot convert '{}' to boolean", s)),
            },
            (ColumnType::Timestamp, Value::String(s)) => chrono::DateTime::parse_from_rfc3339(s)
                .map(|_| ())
                .map_err(|e| format!("Invalid timestamp format: {}", e)),
            (ColumnType::Json, _) => Ok(()),
            (ColumnType::Enum { values }, Value::String(s)) => {
                if values.contains(s) {
                    Ok(())
                } else {
                    Err(format!("Value '{}' not in enum values: {:?}", s, values))
                }
            }
            _ => Err(format!("Type mismatch: expected {:?}, got {}", self, value)),
        }
    }
}

/// Default applied by the database when a column is omitted
///
/// Only literal defaults are known on the client side; `create_many` fills
/// them into every row so that bulk payloads share one column set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DefaultValue {
    /// SQL expression evaluated by the database, e.g. `NOW()`
    Expression { expression: String },
    /// Literal JSON value
    Literal(Value),
}

impl DefaultValue {
    /// The literal value, if this default is not a database expression
    pub fn literal(&self) -> Option<&Value> {
        match self {
            DefaultValue::Literal(value) => Some(value),
            DefaultValue::Expression { .. } => None,
        }
    }
}

fn default_nullable() -> bool {
    true
}

/// Column definition within a table schema
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,

    #[serde(flatten)]
    pub column_type: ColumnType,

    /// Whether the column allows NULL values (default: true)
    #[serde(default = "default_nullable")]
    pub nullable: bool,

    #[serde(default)]
    pub unique: bool,

    /// Part of the primary key
    #[serde(default)]
    pub primary: bool,

    /// Values are generated by the database on insert
    #[serde(default, rename = "autoIncrement")]
    pub auto_increment: bool,

    #[serde(rename = "default", skip_serializing_if = "Option::is_none")]
    pub default_value: Option<DefaultValue>,
}

impl ColumnDefinition {
    /// Create a new column definition with a name and type
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            unique: false,
            primary: false,
            auto_increment: false,
            default_value: None,
        }
    }

    /// Auto-incrementing integer primary key
    pub fn serial(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Integer)
            .primary()
            .auto_increment()
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Mark as primary key (implies NOT NULL)
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self.nullable = false;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Set a literal default value
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(DefaultValue::Literal(value.into()));
        self
    }

    /// Set a default evaluated by the database (e.g. `NOW()`)
    pub fn default_expression(mut self, expression: impl Into<String>) -> Self {
        self.default_value = Some(DefaultValue::Expression {
            expression: expression.into(),
        });
        self
    }

    /// Validate a payload value against type and nullability
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        if value.is_null() && !self.nullable && !self.auto_increment {
            return Err(format!("Column '{}' does not allow NULL values", self.name));
        }
        self.column_type
            .validate_value(value)
            .map_err(|e| format!("Invalid value for column '{}': {}", self.name, e))
    }
}

/// Index definition within a table schema
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexDefinition {
    pub name: String,

    pub columns: Vec<String>,

    #[serde(default)]
    pub unique: bool,
}

impl IndexDefinition {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // =========================================================================
    // ColumnType SQL Generation Tests
    // =========================================================================

    #[test]
    fn test_column_type_sql() {
        assert_eq!(ColumnType::String.to_sql_type("name"), "TEXT");
        assert_eq!(ColumnType::Integer.to_sql_type("count"), "BIGINT");
        assert_eq!(ColumnType::decimal(10, 2).to_sql_type("price"), "NUMERIC(10,2)");
        assert_eq!(
            ColumnType::Timestamp.to_sql_type("at"),
            "TIMESTAMP WITH TIME ZONE"
        );
        assert_eq!(ColumnType::Json.to_sql_type("meta"), "JSONB");
    }

    #[test]
    fn test_column_type_enum_sql_escapes_quotes() {
        let enum_type = ColumnType::Enum {
            values: vec!["it's".to_string(), "normal".to_string()],
        };
        let sql = enum_type.to_sql_type("status");
        assert_eq!(sql, "TEXT CHECK (\"status\" IN ('it''s', 'normal'))");
    }

    #[test]
    fn test_from_pg_data_type() {
        assert_eq!(ColumnType::from_pg_data_type("bigint"), ColumnType::Integer);
        assert_eq!(ColumnType::from_pg_data_type("BOOLEAN"), ColumnType::Boolean);
        assert_eq!(ColumnType::from_pg_data_type("jsonb"), ColumnType::Json);
        assert_eq!(
            ColumnType::from_pg_data_type("character varying"),
            ColumnType::String
        );
        assert!(matches!(
            ColumnType::from_pg_data_type("numeric"),
            ColumnType::Decimal { .. }
        ));
    }

    // =========================================================================
    // Serialization Tests
    // =========================================================================

    #[test]
    fn test_column_type_serialization() {
        let json = serde_json::to_string(&ColumnType::String).unwrap();
        assert_eq!(json, r#"{"type":"string"}"#);

        let col: ColumnType =
            serde_json::from_str(r#"{"type":"decimal","precision":15,"scale":3}"#).unwrap();
        assert_eq!(col, ColumnType::decimal(15, 3));
    }

    #[test]
    fn test_column_definition_round_trip_with_defaults() {
        let col = ColumnDefinition::new("status", ColumnType::String).default("active");
        let json = serde_json::to_value(&col).unwrap();
        assert_eq!(json["default"], json!("active"));

        let back: ColumnDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(back.default_value, Some(DefaultValue::Literal(json!("active"))));

        let col = ColumnDefinition::new("at", ColumnType::Timestamp).default_expression("NOW()");
        let json = serde_json::to_value(&col).unwrap();
        let back: ColumnDefinition = serde_json::from_value(json).unwrap();
        assert!(back.default_value.unwrap().literal().is_none());
    }

    // =========================================================================
    // Value Validation Tests
    // =========================================================================

    #[test]
    fn test_validate_coercions() {
        assert!(ColumnType::Integer.validate_value(&json!("123")).is_ok());
        assert!(ColumnType::Integer.validate_value(&json!("12.34")).is_err());
        assert!(ColumnType::decimal(10, 2).validate_value(&json!("9.5")).is_ok());
        assert!(ColumnType::Boolean.validate_value(&json!("yes")).is_ok());
        assert!(ColumnType::Boolean.validate_value(&json!("maybe")).is_err());
    }

    #[test]
    fn test_validate_type_mismatch() {
        assert!(ColumnType::String.validate_value(&json!(123)).is_err());
        assert!(ColumnType::Integer.validate_value(&json!(true)).is_err());
        assert!(
            ColumnType::Timestamp
                .validate_value(&json!("2024-01-15T10:30:00Z"))
                .is_ok()
        );
        assert!(ColumnType::Timestamp.validate_value(&json!("2024-01-15")).is_err());
    }

    #[test]
    fn test_validate_integer_range() {
        assert!(ColumnType::Integer.validate_value(&json!(i64::MAX)).is_ok());
        assert!(ColumnType::Integer.validate_value(&json!(i64::MIN)).is_ok());
        assert!(ColumnType::Integer.validate_value(&json!(u64::MAX)).is_err());
        assert!(ColumnType::Integer.validate_value(&json!(1.5)).is_err());
    }

    #[test]
    fn test_validate_enum_is_case_sensitive() {
        let t = ColumnType::Enum {
            values: vec!["pending".to_string(), "active".to_string()],
        };
        assert!(t.validate_value(&json!("pending")).is_ok());
        assert!(t.validate_value(&json!("PENDING")).is_err());
    }

    // =========================================================================
    // ColumnDefinition Tests
    // =========================================================================

    #[test]
    fn test_column_definition_builders() {
        let col = ColumnDefinition::new("sku", ColumnType::String)
            .not_null()
            .unique();
        assert!(!col.nullable);
        assert!(col.unique);
        assert!(!col.primary);

        let id = ColumnDefinition::serial("id");
        assert!(id.primary);
        assert!(id.auto_increment);
        assert!(!id.nullable);
    }

    #[test]
    fn test_column_definition_validate_nullability() {
        let col = ColumnDefinition::new("name", ColumnType::String).not_null();
        let err = col.validate(&Value::Null).unwrap_err();
        assert!(err.contains("does not allow NULL"));

        // generated keys may be passed as NULL and filled in by the database
        assert!(ColumnDefinition::serial("id").validate(&Value::Null).is_ok());
    }

    #[test]
    fn test_index_definition() {
        let idx = IndexDefinition::new("idx_email", vec!["email".to_string()]).unique();
        assert_eq!(idx.columns, vec!["email"]);
        assert!(idx.unique);
    }
}
