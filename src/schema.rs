//! Table schema consumed for field filtering and default-value resolution
//!
//! A schema is either declared on a repository's configuration or obtained
//! from the driver through `describe_table`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{ColumnDefinition, IndexDefinition};

/// Columns and indexes of one table
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Schema {
    /// Database table name
    pub table: String,
    /// Column definitions in table order
    pub columns: Vec<ColumnDefinition>,
    /// Index definitions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexDefinition>,
}

impl Schema {
    pub fn new(table: impl Into<String>, columns: Vec<ColumnDefinition>) -> Self {
        Self {
            table: table.into(),
            columns,
            indexes: Vec::new(),
        }
    }

    /// Set indexes
    pub fn with_indexes(mut self, indexes: Vec<IndexDefinition>) -> Self {
        self.indexes = indexes;
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// First column flagged as primary key
    pub fn primary_key(&self) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.primary)
            .map(|c| c.name.as_str())
    }

    /// Literal defaults keyed by column, NULL for columns without one
    ///
    /// Columns whose default is a database expression or that are generated
    /// by the database are left out so the database can fill them in.
    pub fn literal_defaults(&self) -> Map<String, Value> {
        let mut defaults = Map::new();
        for col in &self.columns {
            if col.auto_increment {
                continue;
            }
            match &col.default_value {
                Some(default) => {
                    if let Some(value) = default.literal() {
                        defaults.insert(col.name.clone(), value.clone());
                    }
                }
                None => {
                    defaults.insert(col.name.clone(), Value::Null);
                }
            }
        }
        defaults
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnType;
    use serde_json::json;

    fn users() -> Schema {
        Schema::new(
            "users",
            vec![
                ColumnDefinition::serial("id"),
                ColumnDefinition::new("name", ColumnType::String).not_null(),
                ColumnDefinition::new("status", ColumnType::String).default("active"),
                ColumnDefinition::new("created_at", ColumnType::Timestamp)
                    .default_expression("NOW()"),
            ],
        )
    }

    #[test]
    fn test_schema_lookup() {
        let schema = users();
        assert_eq!(schema.primary_key(), Some("id"));
        assert!(schema.has_column("status"));
        assert!(!schema.has_column("missing"));
        assert_eq!(
            schema.column_names(),
            vec!["id", "name", "status", "created_at"]
        );
    }

    #[test]
    fn test_literal_defaults_skip_generated_columns() {
        let defaults = users().literal_defaults();
        assert_eq!(defaults.get("status"), Some(&json!("active")));
        assert_eq!(defaults.get("name"), Some(&Value::Null));
        assert!(!defaults.contains_key("id"));
        assert!(!defaults.contains_key("created_at"));
    }

    #[test]
    fn test_schema_serialization() {
        let schema = users().with_indexes(vec![IndexDefinition::new(
            "users_name_idx",
            vec!["name".to_string()],
        )]);
        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(json["table"], json!("users"));
        assert_eq!(json["indexes"][0]["name"], json!("users_name_idx"));

        let back: Schema = serde_json::from_value(json).unwrap();
        assert_eq!(back, schema);
    }
}
