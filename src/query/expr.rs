//! Expressions: a single field / operator / value comparison or a raw fragment

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::{ModelError, Result};

/// Comparison operator of an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
    Regexp,
    NotRegexp,
    In,
    NotIn,
    Between,
    NotBetween,
    Null,
    NotNull,
    Raw,
}

impl Operator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
            Operator::Regexp => "REGEXP",
            Operator::NotRegexp => "NOT REGEXP",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::Between => "BETWEEN",
            Operator::NotBetween => "NOT BETWEEN",
            Operator::Null => "IS NULL",
            Operator::NotNull => "IS NOT NULL",
            Operator::Raw => "RAW",
        }
    }

    /// Operators that take no value
    pub fn is_unary(&self) -> bool {
        matches!(self, Operator::Null | Operator::NotNull | Operator::Raw)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for Operator {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        Ok(match normalized.to_uppercase().as_str() {
            "=" | "==" => Operator::Eq,
            "!=" | "<>" => Operator::NotEq,
            ">" => Operator::Gt,
            ">=" => Operator::Gte,
            "<" => Operator::Lt,
            "<=" => Operator::Lte,
            "LIKE" => Operator::Like,
            "NOT LIKE" => Operator::NotLike,
            "REGEXP" => Operator::Regexp,
            "NOT REGEXP" => Operator::NotRegexp,
            "IN" => Operator::In,
            "NOT IN" => Operator::NotIn,
            "BETWEEN" => Operator::Between,
            "NOT BETWEEN" => Operator::NotBetween,
            "IS NULL" | "NULL" => Operator::Null,
            "IS NOT NULL" | "NOT NULL" => Operator::NotNull,
            _ => {
                return Err(ModelError::invalid_query(format!(
                    "Unsupported operator '{}'",
                    s
                )));
            }
        })
    }
}

/// Argument of a function call
#[derive(Debug, Clone, PartialEq)]
pub enum FuncArg {
    /// Column reference
    Field(String),
    /// Bound literal
    Literal(Value),
    /// Verbatim SQL, e.g. `*`
    Raw(String),
}

/// SQL function call usable in place of a field, e.g. `SUM(price)`
#[derive(Debug, Clone, PartialEq)]
pub struct Func {
    name: String,
    args: Vec<FuncArg>,
    alias: Option<String>,
}

impl Func {
    pub fn new(name: impl Into<String>, args: Vec<FuncArg>) -> Self {
        Self {
            name: name.into().to_uppercase(),
            args,
            alias: None,
        }
    }

    /// `COUNT(*)`, or `COUNT(field)` which skips NULLs
    pub fn count(field: Option<&str>) -> Self {
        let arg = match field {
            Some(f) => FuncArg::Field(f.to_string()),
            None => FuncArg::Raw("*".to_string()),
        };
        Self::new("COUNT", vec![arg])
    }

    pub fn sum(field: impl Into<String>) -> Self {
        Self::new("SUM", vec![FuncArg::Field(field.into())])
    }

    pub fn avg(field: impl Into<String>) -> Self {
        Self::new("AVG", vec![FuncArg::Field(field.into())])
    }

    pub fn min(field: impl Into<String>) -> Self {
        Self::new("MIN", vec![FuncArg::Field(field.into())])
    }

    pub fn max(field: impl Into<String>) -> Self {
        Self::new("MAX", vec![FuncArg::Field(field.into())])
    }

    pub fn as_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[FuncArg] {
        &self.args
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Key under which the function's result appears in a row
    pub fn output_name(&self) -> String {
        match &self.alias {
            Some(alias) => alias.clone(),
            None => self.to_string(),
        }
    }

    /// Whether the function aggregates rows
    pub fn is_aggregate(&self) -> bool {
        matches!(self.name.as_str(), "COUNT" | "SUM" | "AVG" | "MIN" | "MAX")
    }
}

impl fmt::Display for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| match arg {
                FuncArg::Field(name) | FuncArg::Raw(name) => name.clone(),
                FuncArg::Literal(value) => value.to_string(),
            })
            .collect();
        write!(f, "{}({})", self.name, args.join(", "))
    }
}

/// Left-hand side of an expression or an entry in a field list
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    /// Column name, optionally qualified as `alias.column`
    Column(String),
    Func(Func),
    Raw(String),
}

impl Field {
    /// Column name without its qualifier
    pub fn column_name(&self) -> Option<&str> {
        match self {
            Field::Column(name) => Some(name.rsplit('.').next().unwrap_or(name)),
            _ => None,
        }
    }

    /// Key under which the field appears in a result row
    pub fn output_name(&self) -> String {
        match self {
            Field::Column(name) => name.rsplit('.').next().unwrap_or(name).to_string(),
            Field::Func(func) => func.output_name(),
            Field::Raw(sql) => sql.clone(),
        }
    }
}

impl From<&str> for Field {
    fn from(name: &str) -> Self {
        Field::Column(name.to_string())
    }
}

impl From<String> for Field {
    fn from(name: String) -> Self {
        Field::Column(name)
    }
}

impl From<&String> for Field {
    fn from(name: &String) -> Self {
        Field::Column(name.clone())
    }
}

impl From<Func> for Field {
    fn from(func: Func) -> Self {
        Field::Func(func)
    }
}

/// A single comparison; immutable once constructed
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    field: Field,
    operator: Operator,
    value: Value,
}

impl Expression {
    /// Build an expression, checking that the value fits the operator
    pub fn new(field: impl Into<Field>, operator: Operator, value: impl Into<Value>) -> Result<Self> {
        let field = field.into();
        let value = value.into();

        let value = match operator {
            Operator::In | Operator::NotIn => {
                if !value.is_array() {
                    return Err(ModelError::invalid_query(format!(
                        "{} requires an array value",
                        operator
                    )));
                }
                value
            }
            Operator::Between | Operator::NotBetween => match value.as_array() {
                Some(bounds) if bounds.len() == 2 => value,
                _ => {
                    return Err(ModelError::invalid_query(format!(
                        "{} requires a two-element array",
                        operator
                    )));
                }
            },
            Operator::Null | Operator::NotNull | Operator::Raw => Value::Null,
            _ => value,
        };

        Ok(Self {
            field,
            operator,
            value,
        })
    }

    pub(crate) fn unchecked(field: Field, operator: Operator, value: Value) -> Self {
        Self {
            field,
            operator,
            value,
        }
    }

    /// Verbatim SQL fragment
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            field: Field::Raw(sql.into()),
            operator: Operator::Raw,
            value: Value::Null,
        }
    }

    pub fn field(&self) -> &Field {
        &self.field
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}
