//! PostgreSQL rendering of [`Query`] values
//!
//! Values never appear in the SQL text: every comparison value and payload
//! value becomes a numbered `$n` parameter, in the order it is rendered.

use serde_json::Value;

use crate::error::{ModelError, Result};
use crate::query::{
    Clause, CompoundFlag, Conjunction, Expression, Field, Func, FuncArg, Operator, Predicate, Query,
    QueryType,
};
use crate::sql::ddl::DdlGenerator;
use crate::sql::sanitize::{quote_identifier, quote_qualified};

/// A bound parameter and the column it is compared with or written to
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub value: Value,
    pub column: Option<String>,
}

/// SQL text with its parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
}

/// Render a query as PostgreSQL
pub fn render(query: &Query) -> Result<Statement> {
    let mut renderer = Renderer::default();
    let sql = renderer.statement(query)?;
    Ok(Statement {
        sql,
        params: renderer.params,
    })
}

#[derive(Default)]
struct Renderer {
    params: Vec<Param>,
}

impl Renderer {
    fn bind(&mut self, value: &Value, column: Option<&str>) -> String {
        self.params.push(Param {
            value: value.clone(),
            column: column.map(str::to_string),
        });
        format!("${}", self.params.len())
    }

    fn statement(&mut self, query: &Query) -> Result<String> {
        let needs_table = !matches!(query.query_type(), QueryType::CreateTable | QueryType::DropIndex);
        if needs_table && query.table().is_empty() {
            return Err(ModelError::invalid_query(format!(
                "{} query has no table",
                query.query_type()
            )));
        }

        match query.query_type() {
            QueryType::Select => self.select(query),
            QueryType::Insert | QueryType::MultiInsert => self.insert(query),
            QueryType::Update => self.update(query),
            QueryType::Delete => {
                let mut sql = format!("DELETE FROM {}", table_ref(query));
                if let Some(predicate) = query.conditions() {
                    sql.push_str(" WHERE ");
                    sql.push_str(&self.predicate(predicate)?);
                }
                Ok(sql)
            }
            QueryType::Truncate => Ok(format!("TRUNCATE TABLE {}", quote_identifier(query.table()))),
            QueryType::CreateTable => {
                let Some(schema) = query.table_schema() else {
                    return Err(ModelError::invalid_query("create_table query has no schema"));
                };
                let mut schema = schema.clone();
                if !query.table().is_empty() {
                    schema.table = query.table().to_string();
                }
                Ok(DdlGenerator::create_table(&schema))
            }
            QueryType::DropTable => Ok(DdlGenerator::drop_table(query.table())),
            QueryType::CreateIndex => match query.index_definition() {
                Some(index) => Ok(DdlGenerator::create_index(query.table(), index)),
                None => Err(ModelError::invalid_query("create_index query has no index")),
            },
            QueryType::DropIndex => match query.index_definition() {
                Some(index) => Ok(DdlGenerator::drop_index(&index.name)),
                None => Err(ModelError::invalid_query("drop_index query has no index")),
            },
        }
    }

    fn select(&mut self, query: &Query) -> Result<String> {
        let mut columns = Vec::new();
        for field in query.field_list() {
            columns.push(self.field(field, true)?);
        }
        if columns.is_empty() {
            columns.push("*".to_string());
        }
        for join in query.joins() {
            columns.extend(join.field_list().iter().map(|f| quote_qualified(f)));
        }

        let mut sql = String::from("SELECT ");
        if query.is_distinct() {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&columns.join(", "));
        sql.push_str(" FROM ");
        sql.push_str(&table_ref(query));

        for join in query.joins() {
            sql.push(' ');
            sql.push_str(join.join_type().as_sql());
            sql.push(' ');
            sql.push_str(&quote_identifier(join.table()));
            if join.alias() != join.table() {
                sql.push(' ');
                sql.push_str(&quote_identifier(join.alias()));
            }
            let on: Vec<String> = join
                .conditions()
                .iter()
                .map(|(left, right)| format!("{} = {}", quote_qualified(left), quote_qualified(right)))
                .collect();
            sql.push_str(" ON ");
            sql.push_str(&if on.is_empty() { "TRUE".to_string() } else { on.join(" AND ") });
        }

        if let Some(predicate) = query.conditions() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.predicate(predicate)?);
        }
        if !query.grouping().is_empty() {
            let groups: Vec<String> = query.grouping().iter().map(|g| quote_qualified(g)).collect();
            sql.push_str(" GROUP BY ");
            sql.push_str(&groups.join(", "));
        }
        if let Some(predicate) = query.having_conditions() {
            sql.push_str(" HAVING ");
            sql.push_str(&self.predicate(predicate)?);
        }
        if !query.ordering().is_empty() {
            let mut orders = Vec::new();
            for (field, order) in query.ordering() {
                orders.push(format!("{} {}", self.field(field, false)?, order.as_sql()));
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&orders.join(", "));
        }
        if let Some(limit) = query.limit_count() {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = query.offset_count() {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        if query.compounds().is_empty() {
            return Ok(sql);
        }

        let mut compound = format!("({})", sql);
        for part in query.compounds() {
            let flag = match part.flag {
                CompoundFlag::All => " ALL",
                CompoundFlag::Distinct => "",
            };
            let other = self.select(&part.query)?;
            compound.push_str(&format!(" {}{} ({})", part.kind.as_sql(), flag, other));
        }
        Ok(compound)
    }

    fn insert(&mut self, query: &Query) -> Result<String> {
        let table = quote_identifier(query.table());
        let Some(first) = query.payload().first() else {
            return Err(ModelError::invalid_query("insert query has no data"));
        };
        if first.is_empty() {
            if query.payload().len() > 1 {
                return Err(ModelError::invalid_query("multi_insert rows have no columns"));
            }
            return Ok(format!("INSERT INTO {} DEFAULT VALUES RETURNING *", table));
        }

        let width = first.len();
        let columns: Vec<String> = query
            .bindings()
            .iter()
            .take(width)
            .map(|b| quote_identifier(&b.field))
            .collect();

        let mut tuples = Vec::new();
        for chunk in query.bindings().chunks(width) {
            let placeholders: Vec<String> = chunk
                .iter()
                .map(|b| self.bind(&b.value, Some(&b.field)))
                .collect();
            tuples.push(format!("({})", placeholders.join(", ")));
        }

        Ok(format!(
            "INSERT INTO {} ({}) VALUES {} RETURNING *",
            table,
            columns.join(", "),
            tuples.join(", ")
        ))
    }

    fn update(&mut self, query: &Query) -> Result<String> {
        if query.bindings().is_empty() {
            return Err(ModelError::invalid_query("update query has no data"));
        }
        let assignments: Vec<String> = query
            .bindings()
            .iter()
            .map(|b| format!("{} = {}", quote_identifier(&b.field), self.bind(&b.value, Some(&b.field))))
            .collect();

        let mut sql = format!("UPDATE {} SET {}", table_ref(query), assignments.join(", "));
        if let Some(predicate) = query.conditions() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.predicate(predicate)?);
        }
        Ok(sql)
    }

    fn predicate(&mut self, predicate: &Predicate) -> Result<String> {
        let mut parts = Vec::with_capacity(predicate.len());
        for clause in predicate.clauses() {
            parts.push(match clause {
                Clause::Expr(expr) => self.expression(expr)?,
                Clause::Group(group) => format!("({})", self.predicate(group)?),
            });
        }

        Ok(match predicate.conjunction() {
            Conjunction::And => parts.join(" AND "),
            Conjunction::Or => parts.join(" OR "),
            // a XOR b XOR c as ((a) <> (b)) <> (c)
            Conjunction::Xor => {
                let mut parts = parts.into_iter();
                let first = parts.next().unwrap_or_default();
                parts.fold(first, |acc, next| format!("({}) <> ({})", acc, next))
            }
        })
    }

    fn expression(&mut self, expr: &Expression) -> Result<String> {
        if expr.operator() == Operator::Raw {
            return self.field(expr.field(), false);
        }
        let field = self.field(expr.field(), false)?;
        // patterns are text whatever the column type
        let column = match expr.operator() {
            Operator::Like | Operator::NotLike | Operator::Regexp | Operator::NotRegexp => None,
            _ => expr.field().column_name(),
        };
        let value = expr.value();

        Ok(match expr.operator() {
            Operator::Null => format!("{} IS NULL", field),
            Operator::NotNull => format!("{} IS NOT NULL", field),
            Operator::Eq if value.is_null() => format!("{} IS NULL", field),
            Operator::NotEq if value.is_null() => format!("{} IS NOT NULL", field),
            Operator::NotEq => format!("{} <> {}", field, self.bind(value, column)),
            Operator::Regexp => format!("{} ~ {}", field, self.bind(value, column)),
            Operator::NotRegexp => format!("{} !~ {}", field, self.bind(value, column)),
            Operator::In | Operator::NotIn => {
                let items = value.as_array().map(Vec::as_slice).unwrap_or_default();
                if items.is_empty() {
                    return Ok(if expr.operator() == Operator::In { "FALSE" } else { "TRUE" }.to_string());
                }
                let placeholders: Vec<String> = items.iter().map(|v| self.bind(v, column)).collect();
                format!("{} {} ({})", field, expr.operator().as_sql(), placeholders.join(", "))
            }
            Operator::Between | Operator::NotBetween => {
                let (Some(low), Some(high)) = (
                    value.as_array().and_then(|b| b.first()),
                    value.as_array().and_then(|b| b.get(1)),
                ) else {
                    return Err(ModelError::invalid_query(format!(
                        "{} requires a two-element array",
                        expr.operator()
                    )));
                };
                let low = self.bind(low, column);
                let high = self.bind(high, column);
                format!("{} {} {} AND {}", field, expr.operator().as_sql(), low, high)
            }
            op => format!("{} {} {}", field, op.as_sql(), self.bind(value, column)),
        })
    }

    /// Render a field; `aliased` adds `AS` for aliased functions in select lists
    fn field(&mut self, field: &Field, aliased: bool) -> Result<String> {
        Ok(match field {
            Field::Column(name) => quote_qualified(name),
            Field::Raw(sql) => sql.clone(),
            Field::Func(func) => {
                let call = self.func(func);
                match func.alias() {
                    Some(alias) if aliased => format!("{} AS {}", call, quote_identifier(alias)),
                    _ => call,
                }
            }
        })
    }

    fn func(&mut self, func: &Func) -> String {
        let args: Vec<String> = func
            .args()
            .iter()
            .map(|arg| match arg {
                FuncArg::Field(name) => quote_qualified(name),
                FuncArg::Literal(value) => self.bind(value, None),
                FuncArg::Raw(sql) => sql.clone(),
            })
            .collect();
        format!("{}({})", func.name(), args.join(", "))
    }
}

fn table_ref(query: &Query) -> String {
    let table = quote_identifier(query.table());
    if query.alias() != query.table() {
        format!("{} AS {}", table, quote_identifier(query.alias()))
    } else {
        table
    }
}
