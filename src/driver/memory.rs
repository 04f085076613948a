//! In-memory driver
//!
//! Evaluates queries against tables held in process memory. Useful for tests
//! and for exercising repository logic without a database: it honours
//! predicates, ordering, paging, aggregates, compounds and transactions, and
//! can be told to fail specific statements.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Number, Value};
use tracing::{debug, info};

use super::{Context, Driver, ResultSet, Resolution, TransactionDepth};
use crate::entity::Row;
use crate::error::{ModelError, Result};
use crate::query::{
    Clause, CompoundFlag, CompoundKind, Conjunction, Expression, Field, Func, FuncArg, Operator,
    Order, Predicate, Query, QueryType,
};
use crate::schema::Schema;

#[derive(Debug, Clone, Default)]
struct Table {
    schema: Option<Schema>,
    rows: Vec<Row>,
    next_id: i64,
}

impl Table {
    fn new(schema: Option<Schema>) -> Self {
        Self {
            schema,
            rows: Vec::new(),
            next_id: 1,
        }
    }

    fn primary_key(&self) -> String {
        self.schema
            .as_ref()
            .and_then(|s| s.primary_key())
            .unwrap_or("id")
            .to_string()
    }

    /// Insert a row, generating the integer key when absent
    fn insert(&mut self, mut row: Row) -> Result<Value> {
        if let Some(schema) = &self.schema {
            for (column, default) in schema.literal_defaults() {
                row.entry(column).or_insert(default);
            }
        }

        let pk = self.primary_key();
        let id = match row.get(&pk) {
            Some(Value::Null) | None => {
                let id = Value::from(self.next_id);
                row.insert(pk.clone(), id.clone());
                id
            }
            Some(id) => id.clone(),
        };

        if self.rows.iter().any(|r| r.get(&pk) == Some(&id)) {
            return Err(ModelError::driver(format!(
                "duplicate key value violates primary key: {} = {}",
                pk, id
            )));
        }
        if let Some(n) = id.as_i64() {
            // Saturates at i64::MAX; the next generated key then collides and is rejected
            self.next_id = self.next_id.max(n.saturating_add(1));
        }

        self.rows.push(row);
        Ok(id)
    }
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, Table>,
    snapshot: Option<BTreeMap<String, Table>>,
    depth: TransactionDepth,
    context: Context,
    last_ids: HashMap<String, Value>,
    faults: Vec<(QueryType, String)>,
    executed: Vec<(Context, QueryType, String)>,
}

/// Driver keeping tables in memory
#[derive(Debug, Default)]
pub struct MemoryDriver {
    state: Mutex<State>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| ModelError::driver("memory driver state is poisoned"))
    }

    /// Create (or replace) a table with a schema
    pub fn create_table(&self, schema: Schema) -> Result<()> {
        let mut state = self.state()?;
        state
            .tables
            .insert(schema.table.clone(), Table::new(Some(schema)));
        Ok(())
    }

    /// Make every later statement of `query_type` on `table` fail
    pub fn fail_on(&self, query_type: QueryType, table: impl Into<String>) -> Result<()> {
        self.state()?.faults.push((query_type, table.into()));
        Ok(())
    }

    pub fn clear_faults(&self) -> Result<()> {
        self.state()?.faults.clear();
        Ok(())
    }

    /// Current rows of `table`
    pub fn rows(&self, table: &str) -> Result<Vec<Row>> {
        Ok(self
            .state()?
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default())
    }

    /// Statements executed so far as `(context, type, table)`
    pub fn executed(&self) -> Result<Vec<(Context, QueryType, String)>> {
        Ok(self.state()?.executed.clone())
    }

    pub fn in_transaction(&self) -> Result<bool> {
        Ok(self.state()?.depth.is_active())
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    fn name(&self) -> &str {
        "memory"
    }

    fn set_context(&self, context: Context) {
        if let Ok(mut state) = self.state.lock() {
            state.context = context;
        }
    }

    async fn execute(&self, query: &Query) -> Result<ResultSet> {
        let mut state = self.state()?;
        let table = query.table().to_string();
        debug!(
            driver = "memory",
            query_type = %query.query_type(),
            table = %table,
            context = ?state.context,
            "executing query"
        );

        if state
            .faults
            .iter()
            .any(|(t, name)| *t == query.query_type() && *name == table)
        {
            return Err(ModelError::driver(format!(
                "injected failure for {} on '{}'",
                query.query_type(),
                table
            )));
        }
        let context = state.context;
        state.executed.push((context, query.query_type(), table.clone()));

        match query.query_type() {
            QueryType::Select => select(&state.tables, query).map(ResultSet::from_rows),
            QueryType::Insert | QueryType::MultiInsert => {
                // Rows land on a copy so a failing row leaves the table untouched
                let mut target = state
                    .tables
                    .get(&table)
                    .cloned()
                    .unwrap_or_else(|| Table::new(query.table_schema().cloned()));
                let mut last = None;
                for row in query.payload() {
                    last = Some(target.insert(row.clone())?);
                }
                state.tables.insert(table.clone(), target);
                let affected = query.payload().len() as u64;
                if let Some(id) = last {
                    state.last_ids.insert(table, id);
                }
                Ok(ResultSet::affected(affected))
            }
            QueryType::Update => {
                let Some(data) = query.payload().first() else {
                    return Err(ModelError::invalid_query("update without data"));
                };
                let Some(target) = state.tables.get_mut(&table) else {
                    return Ok(ResultSet::affected(0));
                };
                let mut affected = 0;
                for row in target.rows.iter_mut() {
                    if row_matches(row, query.conditions())? {
                        for (column, value) in data {
                            row.insert(column.clone(), value.clone());
                        }
                        affected += 1;
                    }
                }
                Ok(ResultSet::affected(affected))
            }
            QueryType::Delete => {
                let Some(target) = state.tables.get_mut(&table) else {
                    return Ok(ResultSet::affected(0));
                };
                let mut kept = Vec::with_capacity(target.rows.len());
                let mut affected = 0;
                for row in target.rows.drain(..) {
                    if row_matches(&row, query.conditions())? {
                        affected += 1;
                    } else {
                        kept.push(row);
                    }
                }
                target.rows = kept;
                Ok(ResultSet::affected(affected))
            }
            QueryType::Truncate => {
                let affected = state
                    .tables
                    .get_mut(&table)
                    .map(|t| {
                        let n = t.rows.len() as u64;
                        t.rows.clear();
                        t.next_id = 1;
                        n
                    })
                    .unwrap_or(0);
                Ok(ResultSet::affected(affected))
            }
            QueryType::CreateTable => {
                let schema = query.table_schema().cloned();
                state
                    .tables
                    .entry(table)
                    .or_insert_with(|| Table::new(schema));
                Ok(ResultSet::default())
            }
            QueryType::DropTable => {
                state.tables.remove(&table);
                Ok(ResultSet::default())
            }
            // indexes have no effect on in-memory scans
            QueryType::CreateIndex | QueryType::DropIndex => Ok(ResultSet::default()),
        }
    }

    async fn last_insert_id(&self, table: &str, _primary_key: &str) -> Result<Option<Value>> {
        Ok(self.state()?.last_ids.get(table).cloned())
    }

    async fn start_transaction(&self) -> Result<bool> {
        let mut state = self.state()?;
        if state.depth.begin() {
            state.snapshot = Some(state.tables.clone());
            info!(driver = "memory", "transaction started");
            return Ok(true);
        }
        Ok(false)
    }

    async fn commit_transaction(&self) -> Result<bool> {
        let mut state = self.state()?;
        match state.depth.commit()? {
            Resolution::Nested => Ok(false),
            Resolution::Commit => {
                state.snapshot = None;
                info!(driver = "memory", "transaction committed");
                Ok(true)
            }
            Resolution::Rollback => {
                if let Some(snapshot) = state.snapshot.take() {
                    state.tables = snapshot;
                }
                info!(driver = "memory", "transaction rolled back on commit");
                Err(ModelError::transaction(
                    "transaction was marked rollback-only by a nested rollback",
                ))
            }
        }
    }

    async fn rollback_transaction(&self) -> Result<bool> {
        let mut state = self.state()?;
        match state.depth.rollback()? {
            Resolution::Nested => Ok(false),
            _ => {
                if let Some(snapshot) = state.snapshot.take() {
                    state.tables = snapshot;
                }
                info!(driver = "memory", "transaction rolled back");
                Ok(true)
            }
        }
    }

    async fn describe_table(&self, table: &str) -> Result<Option<Schema>> {
        Ok(self
            .state()?
            .tables
            .get(table)
            .and_then(|t| t.schema.clone()))
    }
}

// =============================================================================
// SELECT evaluation
// =============================================================================

fn select(tables: &BTreeMap<String, Table>, query: &Query) -> Result<Vec<Row>> {
    if !query.joins().is_empty() {
        return Err(ModelError::driver("memory driver does not support joins"));
    }

    let source = tables.get(query.table()).map(|t| t.rows.as_slice()).unwrap_or(&[]);
    let mut rows = Vec::new();
    for row in source {
        if row_matches(row, query.conditions())? {
            rows.push(row.clone());
        }
    }

    let aggregated = !query.grouping().is_empty()
        || query
            .field_list()
            .iter()
            .any(|f| matches!(f, Field::Func(func) if func.is_aggregate()));

    let mut output = if aggregated {
        let mut grouped = aggregate(query, &rows)?;
        sort_rows(&mut grouped, query.ordering());
        grouped
    } else {
        sort_rows(&mut rows, query.ordering());
        rows.iter()
            .map(|row| project(row, query.field_list()))
            .collect::<Result<Vec<_>>>()?
    };

    if query.is_distinct() {
        output = dedupe(output);
    }

    for compound in query.compounds() {
        let other = select(tables, &compound.query)?;
        output = combine(output, other, compound.kind, compound.flag);
    }

    let offset = query.offset_count().unwrap_or(0) as usize;
    let limit = query.limit_count().map(|l| l as usize).unwrap_or(usize::MAX);
    Ok(output.into_iter().skip(offset).take(limit).collect())
}

fn project(row: &Row, fields: &[Field]) -> Result<Row> {
    if fields.is_empty() {
        return Ok(row.clone());
    }
    let mut out = Row::new();
    for field in fields {
        match field {
            Field::Column(_) => {
                let name = field.output_name();
                let value = row.get(&name).cloned().unwrap_or(Value::Null);
                out.insert(name, value);
            }
            _ => return Err(unsupported_field(field)),
        }
    }
    Ok(out)
}

fn aggregate(query: &Query, rows: &[Row]) -> Result<Vec<Row>> {
    let mut groups: Vec<Vec<&Row>> = Vec::new();
    if query.grouping().is_empty() {
        groups.push(rows.iter().collect());
    } else {
        let mut index: HashMap<String, usize> = HashMap::new();
        for row in rows {
            let key: Vec<&Value> = query
                .grouping()
                .iter()
                .map(|g| row.get(strip_qualifier(g)).unwrap_or(&Value::Null))
                .collect();
            let key = serde_json::to_string(&key)?;
            match index.get(&key) {
                Some(&i) => groups[i].push(row),
                None => {
                    index.insert(key, groups.len());
                    groups.push(vec![row]);
                }
            }
        }
    }

    let mut output = Vec::new();
    for group in groups {
        let resolve = |field: &Field| -> Result<Value> {
            match field {
                Field::Column(_) => Ok(group
                    .first()
                    .and_then(|r| r.get(&field.output_name()))
                    .cloned()
                    .unwrap_or(Value::Null)),
                Field::Func(func) if func.is_aggregate() => aggregate_value(func, &group),
                _ => Err(unsupported_field(field)),
            }
        };

        if let Some(having) = query.having_conditions() {
            if !eval_predicate(having, &resolve)? {
                continue;
            }
        }

        let mut out = Row::new();
        let fields: Vec<Field> = if query.field_list().is_empty() {
            query.grouping().iter().map(Field::from).collect()
        } else {
            query.field_list().to_vec()
        };
        for field in &fields {
            out.insert(field.output_name(), resolve(field)?);
        }
        output.push(out);
    }
    Ok(output)
}

fn aggregate_value(func: &Func, rows: &[&Row]) -> Result<Value> {
    let column = match func.args().first() {
        Some(FuncArg::Field(name)) => Some(strip_qualifier(name)),
        Some(FuncArg::Raw(raw)) if raw == "*" => None,
        None => None,
        _ => {
            return Err(ModelError::driver(format!(
                "memory driver cannot evaluate {}",
                func
            )));
        }
    };
    let values: Vec<&Value> = match column {
        Some(column) => rows
            .iter()
            .filter_map(|r| r.get(column))
            .filter(|v| !v.is_null())
            .collect(),
        None => rows.iter().map(|_| &Value::Null).collect(),
    };

    Ok(match func.name() {
        "COUNT" => Value::from(values.len() as u64),
        "SUM" => {
            let numbers: Vec<f64> = values.iter().filter_map(|v| as_f64(v)).collect();
            if numbers.is_empty() {
                Value::Null
            } else {
                let exact = values
                    .iter()
                    .try_fold(0i64, |total, v| total.checked_add(v.as_i64()?));
                match exact {
                    Some(total) => Value::from(total),
                    None => number(numbers.iter().sum()),
                }
            }
        }
        "AVG" => {
            let numbers: Vec<f64> = values.iter().filter_map(|v| as_f64(v)).collect();
            if numbers.is_empty() {
                Value::Null
            } else {
                number(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        "MIN" => values
            .iter()
            .min_by(|a, b| compare(a, b).unwrap_or(Ordering::Equal))
            .map(|v| (*v).clone())
            .unwrap_or(Value::Null),
        "MAX" => values
            .iter()
            .max_by(|a, b| compare(a, b).unwrap_or(Ordering::Equal))
            .map(|v| (*v).clone())
            .unwrap_or(Value::Null),
        other => {
            return Err(ModelError::driver(format!(
                "memory driver does not know function {}",
                other
            )));
        }
    })
}

fn sort_rows(rows: &mut [Row], ordering: &[(Field, Order)]) {
    if ordering.is_empty() {
        return;
    }
    let keys: Vec<(String, Order)> = ordering
        .iter()
        .map(|(field, order)| (field.output_name(), *order))
        .collect();

    rows.sort_by(|a, b| {
        for (key, order) in &keys {
            let left = a.get(key).unwrap_or(&Value::Null);
            let right = b.get(key).unwrap_or(&Value::Null);
            // NULLs sort last ascending, first descending
            let ordering = match (left.is_null(), right.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => compare(left, right).unwrap_or(Ordering::Equal),
            };
            let ordering = match order {
                Order::Asc => ordering,
                Order::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn dedupe(rows: Vec<Row>) -> Vec<Row> {
    let mut out: Vec<Row> = Vec::with_capacity(rows.len());
    for row in rows {
        if !out.contains(&row) {
            out.push(row);
        }
    }
    out
}

fn combine(left: Vec<Row>, right: Vec<Row>, kind: CompoundKind, flag: CompoundFlag) -> Vec<Row> {
    let combined = match kind {
        CompoundKind::Union => {
            let mut all = left;
            all.extend(right);
            all
        }
        CompoundKind::Intersect => {
            let mut pool = right;
            let mut out = Vec::new();
            for row in left {
                if let Some(pos) = pool.iter().position(|r| *r == row) {
                    pool.remove(pos);
                    out.push(row);
                }
            }
            out
        }
        CompoundKind::Except => {
            let mut pool = right;
            let mut out = Vec::new();
            for row in left {
                match pool.iter().position(|r| *r == row) {
                    Some(pos) if flag == CompoundFlag::All => {
                        pool.remove(pos);
                    }
                    Some(_) => {}
                    None => out.push(row),
                }
            }
            out
        }
    };
    match flag {
        CompoundFlag::All => combined,
        CompoundFlag::Distinct => dedupe(combined),
    }
}

// =============================================================================
// Predicate evaluation
// =============================================================================

fn row_matches(row: &Row, predicate: Option<&Predicate>) -> Result<bool> {
    let Some(predicate) = predicate else {
        return Ok(true);
    };
    let resolve = |field: &Field| -> Result<Value> {
        match field {
            Field::Column(_) => Ok(row.get(&field.output_name()).cloned().unwrap_or(Value::Null)),
            _ => Err(unsupported_field(field)),
        }
    };
    eval_predicate(predicate, &resolve)
}

fn eval_predicate(predicate: &Predicate, resolve: &dyn Fn(&Field) -> Result<Value>) -> Result<bool> {
    let mut results = Vec::with_capacity(predicate.len());
    for clause in predicate.clauses() {
        results.push(match clause {
            Clause::Expr(expr) => eval_expression(expr, resolve)?,
            Clause::Group(group) => eval_predicate(group, resolve)?,
        });
    }
    Ok(match predicate.conjunction() {
        Conjunction::And => results.iter().all(|r| *r),
        Conjunction::Or => results.iter().any(|r| *r),
        Conjunction::Xor => results.iter().filter(|r| **r).count() % 2 == 1,
    })
}

fn eval_expression(expr: &Expression, resolve: &dyn Fn(&Field) -> Result<Value>) -> Result<bool> {
    if expr.operator() == Operator::Raw {
        return Err(unsupported_field(expr.field()));
    }
    let actual = resolve(expr.field())?;
    let expected = expr.value();

    Ok(match expr.operator() {
        Operator::Null => actual.is_null(),
        Operator::NotNull => !actual.is_null(),
        Operator::Eq => compare(&actual, expected) == Some(Ordering::Equal),
        Operator::NotEq => matches!(compare(&actual, expected), Some(o) if o != Ordering::Equal),
        Operator::Gt => compare(&actual, expected) == Some(Ordering::Greater),
        Operator::Gte => matches!(
            compare(&actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Operator::Lt => compare(&actual, expected) == Some(Ordering::Less),
        Operator::Lte => matches!(
            compare(&actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        Operator::Like | Operator::NotLike => {
            let Some(text) = as_text(&actual) else {
                return Ok(false);
            };
            let matched = like_regex(expected)?.is_match(&text);
            matched == (expr.operator() == Operator::Like)
        }
        Operator::Regexp | Operator::NotRegexp => {
            let Some(text) = as_text(&actual) else {
                return Ok(false);
            };
            let pattern = expected.as_str().unwrap_or_default();
            let re = Regex::new(pattern)
                .map_err(|e| ModelError::driver(format!("invalid regular expression: {}", e)))?;
            re.is_match(&text) == (expr.operator() == Operator::Regexp)
        }
        Operator::In | Operator::NotIn => {
            if actual.is_null() {
                return Ok(false);
            }
            let found = expected
                .as_array()
                .map(|items| items.iter().any(|v| compare(&actual, v) == Some(Ordering::Equal)))
                .unwrap_or(false);
            found == (expr.operator() == Operator::In)
        }
        Operator::Between | Operator::NotBetween => {
            let Some([low, high]) = expected.as_array().map(Vec::as_slice).and_then(|b| b.first_chunk::<2>())
            else {
                return Ok(false);
            };
            let (Some(lo), Some(hi)) = (compare(&actual, low), compare(&actual, high)) else {
                return Ok(false);
            };
            let inside = lo != Ordering::Less && hi != Ordering::Greater;
            inside == (expr.operator() == Operator::Between)
        }
        Operator::Raw => false,
    })
}

/// SQL-style comparison; `None` when either side is NULL or types differ
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::Number(x), Value::String(s)) => x.as_f64()?.partial_cmp(&s.parse::<f64>().ok()?),
        (Value::String(s), Value::Number(y)) => s.parse::<f64>().ok()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (x, y) if x == y => Some(Ordering::Equal),
        _ => None,
    }
}

fn like_regex(pattern: &Value) -> Result<Regex> {
    let pattern = pattern.as_str().unwrap_or_default();
    let mut re = String::from("^");
    for c in pattern.chars() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| ModelError::driver(format!("invalid LIKE pattern: {}", e)))
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn number(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}

fn strip_qualifier(column: &str) -> &str {
    column.rsplit('.').next().unwrap_or(column)
}

fn unsupported_field(field: &Field) -> ModelError {
    ModelError::driver(format!(
        "memory driver cannot evaluate '{}'",
        field.output_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColumnDefinition, ColumnType};
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    async fn seeded() -> MemoryDriver {
        let driver = MemoryDriver::new();
        let mut insert = Query::new(QueryType::MultiInsert);
        insert
            .from("people")
            .rows(vec![
                row(json!({"name": "Ann", "age": 25, "team": "a"})),
                row(json!({"name": "Bob", "age": 35, "team": "b"})),
                row(json!({"name": "Cid", "age": 45, "team": "a"})),
                row(json!({"name": "Dee", "age": null, "team": "b"})),
            ])
            .unwrap();
        driver.execute(&insert).await.unwrap();
        driver
    }

    fn select(table: &str) -> Query {
        let mut query = Query::new(QueryType::Select);
        query.from(table);
        query
    }

    // =========================================================================
    // Insert Tests
    // =========================================================================

    #[tokio::test]
    async fn test_insert_generates_sequential_ids() {
        let driver = seeded().await;
        let rows = driver.rows("people").unwrap();
        let ids: Vec<&Value> = rows.iter().map(|r| &r["id"]).collect();
        assert_eq!(ids, vec![&json!(1), &json!(2), &json!(3), &json!(4)]);
        assert_eq!(
            driver.last_insert_id("people", "id").await.unwrap(),
            Some(json!(4))
        );
    }

    #[tokio::test]
    async fn test_duplicate_primary_key_is_rejected() {
        let driver = seeded().await;
        let mut insert = Query::new(QueryType::Insert);
        insert.from("people").data(row(json!({"id": 2, "name": "Eve"}))).unwrap();
        assert!(matches!(
            driver.execute(&insert).await.unwrap_err(),
            ModelError::Driver(_)
        ));
    }

    #[tokio::test]
    async fn test_schema_defaults_fill_missing_columns() {
        let driver = MemoryDriver::new();
        driver
            .create_table(Schema::new(
                "flags",
                vec![
                    ColumnDefinition::serial("id"),
                    ColumnDefinition::new("on", ColumnType::Boolean).default(false),
                ],
            ))
            .unwrap();
        let mut insert = Query::new(QueryType::Insert);
        insert.from("flags").data(Row::new()).unwrap();
        driver.execute(&insert).await.unwrap();
        assert_eq!(driver.rows("flags").unwrap()[0]["on"], json!(false));
    }

    #[tokio::test]
    async fn test_failed_multi_insert_writes_nothing() {
        let driver = MemoryDriver::new();
        let mut seed = Query::new(QueryType::Insert);
        seed.from("items").data(row(json!({"id": 3}))).unwrap();
        driver.execute(&seed).await.unwrap();

        let mut insert = Query::new(QueryType::MultiInsert);
        insert
            .from("items")
            .rows(vec![row(json!({"id": 1})), row(json!({"id": 2})), row(json!({"id": 3}))])
            .unwrap();
        assert!(matches!(
            driver.execute(&insert).await.unwrap_err(),
            ModelError::Driver(_)
        ));
        assert_eq!(driver.rows("items").unwrap(), vec![row(json!({"id": 3}))]);
    }

    #[tokio::test]
    async fn test_largest_explicit_key_exhausts_generation() {
        let driver = MemoryDriver::new();
        let mut insert = Query::new(QueryType::Insert);
        insert.from("items").data(row(json!({"id": i64::MAX}))).unwrap();
        driver.execute(&insert).await.unwrap();

        let mut next = Query::new(QueryType::Insert);
        next.from("items").data(row(json!({"name": "x"}))).unwrap();
        assert!(matches!(
            driver.execute(&next).await.unwrap_err(),
            ModelError::Driver(_)
        ));
        assert_eq!(driver.rows("items").unwrap().len(), 1);
    }

    // =========================================================================
    // Select Tests
    // =========================================================================

    #[tokio::test]
    async fn test_predicates_and_ordering() {
        let driver = seeded().await;
        let mut query = select("people");
        query
            .where_op("age", Operator::Gte, json!(30))
            .unwrap()
            .order_by("age", Order::Desc)
            .fields(["name"]);

        let rows = driver.execute(&query).await.unwrap().fetch_all();
        assert_eq!(rows, vec![row(json!({"name": "Cid"})), row(json!({"name": "Bob"}))]);
    }

    #[tokio::test]
    async fn test_or_xor_and_null_semantics() {
        let driver = seeded().await;

        let mut query = select("people");
        query
            .or_where("name", json!("Ann"))
            .unwrap()
            .or_where("age", Value::Null)
            .unwrap();
        assert_eq!(driver.execute(&query).await.unwrap().count(), 2);

        // exactly one of: team = a, age > 30
        let mut query = select("people");
        query
            .xor_where("team", json!("a"))
            .unwrap()
            .xor_where_op("age", Operator::Gt, json!(30))
            .unwrap();
        let names: Vec<Value> = driver
            .execute(&query)
            .await
            .unwrap()
            .fetch_all()
            .into_iter()
            .map(|r| r["name"].clone())
            .collect();
        assert_eq!(names, vec![json!("Ann"), json!("Bob")]);
    }

    #[tokio::test]
    async fn test_like_regexp_in_between() {
        let driver = seeded().await;
        let count = |f: fn(&mut Predicate)| {
            let mut query = select("people");
            query.where_with(|p| f(p)).unwrap();
            query
        };

        let q = count(|p| {
            p.like("name", "_o%");
        });
        assert_eq!(driver.execute(&q).await.unwrap().count(), 1);

        let q = count(|p| {
            p.regexp("name", "^(Ann|Dee)$");
        });
        assert_eq!(driver.execute(&q).await.unwrap().count(), 2);

        let q = count(|p| {
            p.not_in("name", [json!("Ann"), json!("Bob")]);
        });
        assert_eq!(driver.execute(&q).await.unwrap().count(), 2);

        let q = count(|p| {
            p.between("age", json!(30), json!(45));
        });
        assert_eq!(driver.execute(&q).await.unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_aggregates_with_group_and_having() {
        let driver = seeded().await;

        let mut query = select("people");
        query.func(Func::count(None).as_alias("n"));
        assert_eq!(driver.execute(&query).await.unwrap().scalar(), Some(&json!(4)));

        let mut query = select("people");
        query.func(Func::avg("age").as_alias("avg"));
        assert_eq!(driver.execute(&query).await.unwrap().scalar(), Some(&json!(35.0)));

        let mut query = select("people");
        query
            .fields(["team"])
            .func(Func::count(Some("age")).as_alias("aged"))
            .group_by(["team"])
            .having_op(Func::count(Some("age")), Operator::Gt, json!(1))
            .unwrap();
        let rows = driver.execute(&query).await.unwrap().fetch_all();
        assert_eq!(rows, vec![row(json!({"team": "a", "aged": 2}))]);
    }

    #[tokio::test]
    async fn test_sum_past_integer_range_is_float() {
        let driver = MemoryDriver::new();
        let mut insert = Query::new(QueryType::MultiInsert);
        insert
            .from("totals")
            .rows(vec![row(json!({"n": i64::MAX})), row(json!({"n": i64::MAX}))])
            .unwrap();
        driver.execute(&insert).await.unwrap();

        let mut query = select("totals");
        query.func(Func::sum("n").as_alias("total"));
        let result = driver.execute(&query).await.unwrap();
        assert_eq!(result.scalar().and_then(Value::as_f64), Some(2.0 * i64::MAX as f64));

        let mut query = select("people");
        query.func(Func::sum("age").as_alias("total"));
        let driver = seeded().await;
        assert_eq!(driver.execute(&query).await.unwrap().scalar(), Some(&json!(105)));
    }

    #[tokio::test]
    async fn test_compounds() {
        let driver = seeded().await;
        let teams = |team: &str| {
            let mut query = select("people");
            query.fields(["team"]).where_("team", json!(team)).unwrap();
            query
        };

        let mut union = teams("a");
        union.union(teams("b")).unwrap();
        assert_eq!(driver.execute(&union).await.unwrap().count(), 2);

        let mut union_all = teams("a");
        union_all.union_all(teams("b")).unwrap();
        assert_eq!(driver.execute(&union_all).await.unwrap().count(), 4);

        let mut everyone = select("people");
        everyone.fields(["team"]);
        let mut except = everyone.clone();
        except.except(teams("a")).unwrap();
        assert_eq!(
            driver.execute(&except).await.unwrap().fetch_all(),
            vec![row(json!({"team": "b"}))]
        );

        let mut intersect = everyone;
        intersect.intersect(teams("b")).unwrap();
        assert_eq!(driver.execute(&intersect).await.unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_paging() {
        let driver = seeded().await;
        let mut query = select("people");
        query.order_by("id", Order::Asc).offset(1).limit(2);
        let ids: Vec<Value> = driver
            .execute(&query)
            .await
            .unwrap()
            .fetch_all()
            .into_iter()
            .map(|r| r["id"].clone())
            .collect();
        assert_eq!(ids, vec![json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn test_joins_are_unsupported() {
        let driver = seeded().await;
        let mut query = select("people");
        query.inner_join(crate::query::Join::new(crate::query::JoinType::Inner, "teams"));
        assert!(driver.execute(&query).await.is_err());
    }

    // =========================================================================
    // Update / Delete Tests
    // =========================================================================

    #[tokio::test]
    async fn test_update_and_delete_scoped() {
        let driver = seeded().await;

        let mut update = Query::new(QueryType::Update);
        update
            .from("people")
            .data(row(json!({"team": "c"})))
            .unwrap()
            .where_("team", json!("a"))
            .unwrap();
        assert_eq!(driver.execute(&update).await.unwrap().affected_count(), 2);

        let mut delete = Query::new(QueryType::Delete);
        delete.from("people").where_("team", json!("c")).unwrap();
        assert_eq!(driver.execute(&delete).await.unwrap().affected_count(), 2);
        assert_eq!(driver.rows("people").unwrap().len(), 2);
    }

    // =========================================================================
    // Transaction Tests
    // =========================================================================

    #[tokio::test]
    async fn test_rollback_restores_snapshot() {
        let driver = seeded().await;
        assert!(driver.start_transaction().await.unwrap());
        assert!(!driver.start_transaction().await.unwrap());

        let mut delete = Query::new(QueryType::Delete);
        delete.from("people");
        driver.execute(&delete).await.unwrap();
        assert!(driver.rows("people").unwrap().is_empty());

        assert!(!driver.rollback_transaction().await.unwrap());
        assert!(driver.commit_transaction().await.is_err());
        assert_eq!(driver.rows("people").unwrap().len(), 4);
        assert!(!driver.in_transaction().unwrap());
    }

    #[tokio::test]
    async fn test_fault_injection_and_statement_log() {
        let driver = seeded().await;
        driver.fail_on(QueryType::Delete, "people").unwrap();

        let mut delete = Query::new(QueryType::Delete);
        delete.from("people");
        assert!(driver.execute(&delete).await.is_err());

        driver.clear_faults().unwrap();
        driver.set_context(Context::Delete);
        driver.execute(&delete).await.unwrap();

        let executed = driver.executed().unwrap();
        assert_eq!(executed.len(), 2);
        assert_eq!(
            executed[1],
            (Context::Delete, QueryType::Delete, "people".to_string())
        );
    }
}
