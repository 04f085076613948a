//! Boolean condition trees with one fixed conjunction per node
//!
//! Mixing conjunctions requires an explicit nested group:
//!
//! ```
//! use runtara_model::query::{Conjunction, Predicate};
//! use serde_json::json;
//!
//! // status = 'active' AND (age > 30 OR vip = true)
//! let mut predicate = Predicate::new(Conjunction::And);
//! (&mut predicate).eq("status", json!("active")).either(|p| {
//!     p.gt("age", json!(30)).eq("vip", json!(true));
//! });
//! assert_eq!(predicate.len(), 2);
//! ```

use std::fmt;

use serde_json::Value;

use super::expr::{Expression, Field, Operator};
use crate::error::{ModelError, Result};

/// How the clauses of a predicate combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Conjunction {
    And,
    Or,
    Xor,
}

impl Conjunction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Conjunction::And => "AND",
            Conjunction::Or => "OR",
            Conjunction::Xor => "XOR",
        }
    }
}

impl fmt::Display for Conjunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// One member of a predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Expr(Expression),
    Group(Predicate),
}

/// Ordered clauses combined by a single conjunction
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    conjunction: Conjunction,
    clauses: Vec<Clause>,
}

impl Predicate {
    pub fn new(conjunction: Conjunction) -> Self {
        Self {
            conjunction,
            clauses: Vec::new(),
        }
    }

    pub fn conjunction(&self) -> Conjunction {
        self.conjunction
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// An empty predicate means "no filter"
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    /// Append a clause under an explicit conjunction
    ///
    /// Fails when `conjunction` differs from the one this predicate was
    /// created with.
    pub fn append(&mut self, conjunction: Conjunction, clause: Clause) -> Result<&mut Self> {
        if conjunction != self.conjunction {
            return Err(ModelError::conflicting_predicate(format!(
                "Predicate clause already created using \"{}\" conjunction, cannot add \"{}\"",
                self.conjunction, conjunction
            )));
        }
        self.clauses.push(clause);
        Ok(self)
    }

    /// Add an expression with an explicit operator
    pub fn add(
        &mut self,
        field: impl Into<Field>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Result<&mut Self> {
        let expr = Expression::new(field, operator, value)?;
        self.clauses.push(Clause::Expr(expr));
        Ok(self)
    }

    /// Add a prebuilt expression
    pub fn expr(&mut self, expr: Expression) -> &mut Self {
        self.clauses.push(Clause::Expr(expr));
        self
    }

    // callers guarantee the value shape the operator expects
    fn push(&mut self, field: impl Into<Field>, operator: Operator, value: Value) -> &mut Self {
        self.clauses
            .push(Clause::Expr(Expression::unchecked(field.into(), operator, value)));
        self
    }

    /// `field = value`, or `field IS NULL` for a NULL value
    pub fn eq(&mut self, field: impl Into<Field>, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        if value.is_null() {
            self.push(field, Operator::Null, Value::Null)
        } else {
            self.push(field, Operator::Eq, value)
        }
    }

    /// `field != value`, or `field IS NOT NULL` for a NULL value
    pub fn not_eq(&mut self, field: impl Into<Field>, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        if value.is_null() {
            self.push(field, Operator::NotNull, Value::Null)
        } else {
            self.push(field, Operator::NotEq, value)
        }
    }

    pub fn gt(&mut self, field: impl Into<Field>, value: impl Into<Value>) -> &mut Self {
        self.push(field, Operator::Gt, value.into())
    }

    pub fn gte(&mut self, field: impl Into<Field>, value: impl Into<Value>) -> &mut Self {
        self.push(field, Operator::Gte, value.into())
    }

    pub fn lt(&mut self, field: impl Into<Field>, value: impl Into<Value>) -> &mut Self {
        self.push(field, Operator::Lt, value.into())
    }

    pub fn lte(&mut self, field: impl Into<Field>, value: impl Into<Value>) -> &mut Self {
        self.push(field, Operator::Lte, value.into())
    }

    pub fn like(&mut self, field: impl Into<Field>, pattern: impl Into<String>) -> &mut Self {
        self.push(field, Operator::Like, Value::String(pattern.into()))
    }

    pub fn not_like(&mut self, field: impl Into<Field>, pattern: impl Into<String>) -> &mut Self {
        self.push(field, Operator::NotLike, Value::String(pattern.into()))
    }

    pub fn regexp(&mut self, field: impl Into<Field>, pattern: impl Into<String>) -> &mut Self {
        self.push(field, Operator::Regexp, Value::String(pattern.into()))
    }

    pub fn not_regexp(&mut self, field: impl Into<Field>, pattern: impl Into<String>) -> &mut Self {
        self.push(field, Operator::NotRegexp, Value::String(pattern.into()))
    }

    pub fn in_list<I, V>(&mut self, field: impl Into<Field>, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.push(field, Operator::In, Value::Array(values))
    }

    pub fn not_in<I, V>(&mut self, field: impl Into<Field>, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.push(field, Operator::NotIn, Value::Array(values))
    }

    pub fn between(
        &mut self,
        field: impl Into<Field>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> &mut Self {
        self.push(
            field,
            Operator::Between,
            Value::Array(vec![low.into(), high.into()]),
        )
    }

    pub fn not_between(
        &mut self,
        field: impl Into<Field>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> &mut Self {
        self.push(
            field,
            Operator::NotBetween,
            Value::Array(vec![low.into(), high.into()]),
        )
    }

    pub fn null(&mut self, field: impl Into<Field>) -> &mut Self {
        self.push(field, Operator::Null, Value::Null)
    }

    pub fn not_null(&mut self, field: impl Into<Field>) -> &mut Self {
        self.push(field, Operator::NotNull, Value::Null)
    }

    pub fn raw(&mut self, sql: impl Into<String>) -> &mut Self {
        self.clauses.push(Clause::Expr(Expression::raw(sql)));
        self
    }

    /// Nested AND group
    pub fn also(&mut self, f: impl FnOnce(&mut Predicate)) -> &mut Self {
        self.group(Conjunction::And, f)
    }

    /// Nested OR group
    pub fn either(&mut self, f: impl FnOnce(&mut Predicate)) -> &mut Self {
        self.group(Conjunction::Or, f)
    }

    /// Nested XOR group
    pub fn maybe(&mut self, f: impl FnOnce(&mut Predicate)) -> &mut Self {
        self.group(Conjunction::Xor, f)
    }

    fn group(&mut self, conjunction: Conjunction, f: impl FnOnce(&mut Predicate)) -> &mut Self {
        let mut nested = Predicate::new(conjunction);
        f(&mut nested);
        if !nested.is_empty() {
            self.clauses.push(Clause::Group(nested));
        }
        self
    }

    /// Comparison values in depth-first clause order
    pub fn values(&self) -> Vec<&Value> {
        let mut values = Vec::new();
        collect_values(self, &mut values);
        values
    }
}

fn collect_values<'a>(predicate: &'a Predicate, out: &mut Vec<&'a Value>) {
    for clause in &predicate.clauses {
        match clause {
            Clause::Expr(expr) => {
                if !expr.operator().is_unary() {
                    out.push(expr.value());
                }
            }
            Clause::Group(group) => collect_values(group, out),
        }
    }
}
