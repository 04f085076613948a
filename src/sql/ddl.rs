//! DDL generation for PostgreSQL tables and indexes

use serde_json::Value;

use crate::schema::Schema;
use crate::sql::sanitize::quote_identifier;
use crate::types::{ColumnDefinition, ColumnType, DefaultValue, IndexDefinition};

/// Generates CREATE / DROP statements from schema definitions
pub struct DdlGenerator;

impl DdlGenerator {
    /// Generate CREATE TABLE from a schema
    ///
    /// A single auto-increment integer primary key becomes `BIGSERIAL PRIMARY
    /// KEY`; composite primary keys get a table-level constraint.
    pub fn create_table(schema: &Schema) -> String {
        let primary: Vec<&ColumnDefinition> = schema.columns.iter().filter(|c| c.primary).collect();
        let inline_primary = primary.len() == 1;

        let mut column_defs: Vec<String> = schema
            .columns
            .iter()
            .map(|col| Self::format_column_definition(col, inline_primary))
            .collect();

        if primary.len() > 1 {
            let columns: Vec<String> = primary.iter().map(|c| quote_identifier(&c.name)).collect();
            column_defs.push(format!("PRIMARY KEY ({})", columns.join(", ")));
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_identifier(&schema.table),
            column_defs.join(", ")
        )
    }

    pub fn drop_table(table_name: &str) -> String {
        format!("DROP TABLE IF EXISTS {} CASCADE", quote_identifier(table_name))
    }

    pub fn create_index(table_name: &str, index: &IndexDefinition) -> String {
        let quoted_columns: Vec<String> = index
            .columns
            .iter()
            .map(|col| quote_identifier(col))
            .collect();

        let unique_clause = if index.unique { "UNIQUE " } else { "" };

        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {}({})",
            unique_clause,
            quote_identifier(&index.name),
            quote_identifier(table_name),
            quoted_columns.join(", ")
        )
    }

    pub fn drop_index(index_name: &str) -> String {
        format!("DROP INDEX IF EXISTS {}", quote_identifier(index_name))
    }

    /// Format one column for CREATE TABLE
    pub fn format_column_definition(col: &ColumnDefinition, inline_primary: bool) -> String {
        let serial = col.auto_increment && col.column_type == ColumnType::Integer;
        let sql_type = if serial {
            "BIGSERIAL".to_string()
        } else {
            col.column_type.to_sql_type(&col.name)
        };
        let mut parts = vec![quote_identifier(&col.name), sql_type];

        if col.primary && inline_primary {
            parts.push("PRIMARY KEY".to_string());
        } else if !col.nullable {
            parts.push("NOT NULL".to_string());
        }

        if col.unique && !col.primary {
            parts.push("UNIQUE".to_string());
        }

        match &col.default_value {
            Some(DefaultValue::Literal(value)) if !serial => {
                parts.push(format!("DEFAULT {}", sql_literal(value)));
            }
            Some(DefaultValue::Expression { expression }) if !serial => {
                parts.push(format!("DEFAULT {}", expression));
            }
            _ => {}
        }

        parts.join(" ")
    }
}

/// Inline a JSON literal as SQL
fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'::jsonb", other.to_string().replace('\'', "''")),
    }
}
