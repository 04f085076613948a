//! Query construction
//!
//! A [`Query`] is a mutable, driver-independent description of one statement:
//! its type, target table, field list, WHERE / HAVING predicates, joins,
//! grouping, ordering, paging, compounds, write payload and bindings. Drivers
//! turn it into whatever their backend speaks.
//!
//! ```
//! use runtara_model::query::{Operator, Order, Query, QueryType};
//! use serde_json::json;
//!
//! let mut query = Query::new(QueryType::Select);
//! query
//!     .from("users")
//!     .fields(["id", "name", "id"])
//!     .order_by("name", Order::Asc)
//!     .limit(10);
//! query.where_("status", json!("active"))?.where_op("age", Operator::Gt, json!(30))?;
//!
//! assert_eq!(query.field_list().len(), 2);
//! # Ok::<(), runtara_model::ModelError>(())
//! ```

pub mod expr;
pub mod join;
pub mod predicate;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value;

use crate::entity::{Entity, Row};
use crate::error::{ModelError, Result};
use crate::finder::Finder;
use crate::relation::{Cardinality, Relation};
use crate::repository::Repository;
use crate::schema::Schema;
use crate::types::IndexDefinition;

pub use expr::{Expression, Field, Func, FuncArg, Operator};
pub use join::{Join, JoinType};
pub use predicate::{Clause, Conjunction, Predicate};

/// Callback that scopes a query, e.g. relation conditions or bulk filters
pub type Scope = Arc<dyn Fn(&mut Query) -> Result<()> + Send + Sync>;

/// Wrap a closure as a [`Scope`]
pub fn scope<F>(f: F) -> Scope
where
    F: Fn(&mut Query) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Statement kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    Insert,
    MultiInsert,
    Select,
    Update,
    Delete,
    Truncate,
    CreateTable,
    CreateIndex,
    DropTable,
    DropIndex,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Insert => "insert",
            QueryType::MultiInsert => "multi_insert",
            QueryType::Select => "select",
            QueryType::Update => "update",
            QueryType::Delete => "delete",
            QueryType::Truncate => "truncate",
            QueryType::CreateTable => "create_table",
            QueryType::CreateIndex => "create_index",
            QueryType::DropTable => "drop_table",
            QueryType::DropIndex => "drop_index",
        }
    }

    /// Whether the statement modifies data or structure
    pub fn is_write(&self) -> bool {
        !matches!(self, QueryType::Select)
    }

    pub fn is_ddl(&self) -> bool {
        matches!(
            self,
            QueryType::CreateTable
                | QueryType::CreateIndex
                | QueryType::DropTable
                | QueryType::DropIndex
        )
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
        Ok(match normalized.as_str() {
            "insert" => QueryType::Insert,
            "multi_insert" | "multiinsert" => QueryType::MultiInsert,
            "select" => QueryType::Select,
            "update" => QueryType::Update,
            "delete" => QueryType::Delete,
            "truncate" => QueryType::Truncate,
            "create_table" => QueryType::CreateTable,
            "create_index" => QueryType::CreateIndex,
            "drop_table" => QueryType::DropTable,
            "drop_index" => QueryType::DropIndex,
            _ => return Err(ModelError::UnsupportedQueryType(s.to_string())),
        })
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl Order {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

impl FromStr for Order {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "asc" => Ok(Order::Asc),
            "desc" => Ok(Order::Desc),
            _ => Err(ModelError::invalid_query(format!(
                "Unknown sort direction '{}'",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundKind {
    Union,
    Intersect,
    Except,
}

impl CompoundKind {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CompoundKind::Union => "UNION",
            CompoundKind::Intersect => "INTERSECT",
            CompoundKind::Except => "EXCEPT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompoundFlag {
    All,
    #[default]
    Distinct,
}

/// A SELECT combined with the owning query
#[derive(Debug, Clone)]
pub struct Compound {
    pub kind: CompoundKind,
    pub flag: CompoundFlag,
    pub query: Query,
}

/// A write value in statement order
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub field: String,
    pub value: Value,
}

/// Request to load a relation alongside the main result
#[derive(Clone)]
pub struct EagerLoad {
    pub alias: String,
    pub scope: Option<Scope>,
}

impl fmt::Debug for EagerLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EagerLoad")
            .field("alias", &self.alias)
            .field("scoped", &self.scope.is_some())
            .finish()
    }
}

/// Get the predicate in `slot`, creating it with `conjunction` on first use
fn predicate_slot(slot: &mut Option<Predicate>, conjunction: Conjunction) -> Result<&mut Predicate> {
    let predicate = slot.get_or_insert_with(|| Predicate::new(conjunction));
    if predicate.conjunction() != conjunction {
        if !predicate.is_empty() {
            return Err(ModelError::conflicting_predicate(format!(
                "Predicate clause already created using \"{}\" conjunction, cannot add \"{}\"",
                predicate.conjunction(),
                conjunction
            )));
        }
        *predicate = Predicate::new(conjunction);
    }
    Ok(predicate)
}

macro_rules! predicate_methods {
    ($slot:ident, $conjunction:expr, $eq:ident, $op:ident, $with:ident) => {
        pub fn $eq(&mut self, field: impl Into<Field>, value: impl Into<Value>) -> Result<&mut Self> {
            predicate_slot(&mut self.$slot, $conjunction)?.eq(field, value);
            Ok(self)
        }

        pub fn $op(
            &mut self,
            field: impl Into<Field>,
            operator: Operator,
            value: impl Into<Value>,
        ) -> Result<&mut Self> {
            predicate_slot(&mut self.$slot, $conjunction)?.add(field, operator, value)?;
            Ok(self)
        }

        pub fn $with(&mut self, f: impl FnOnce(&mut Predicate)) -> Result<&mut Self> {
            f(predicate_slot(&mut self.$slot, $conjunction)?);
            Ok(self)
        }
    };
}

/// Driver-independent statement description
#[derive(Debug, Clone)]
pub struct Query {
    query_type: QueryType,
    table: String,
    alias: Option<String>,
    fields: Vec<Field>,
    distinct: bool,
    where_: Option<Predicate>,
    having: Option<Predicate>,
    joins: Vec<Join>,
    group_by: Vec<String>,
    order_by: Vec<(Field, Order)>,
    limit: Option<u64>,
    offset: Option<u64>,
    compounds: Vec<Compound>,
    payload: Vec<Row>,
    bindings: Vec<Binding>,
    attributes: BTreeMap<String, Value>,
    schema: Option<Schema>,
    index: Option<IndexDefinition>,
    cache_key: Option<String>,
    cache_length: Option<u64>,
    eager: Vec<EagerLoad>,
    repository: Option<Repository>,
}

impl Query {
    pub fn new(query_type: QueryType) -> Self {
        Self {
            query_type,
            table: String::new(),
            alias: None,
            fields: Vec::new(),
            distinct: false,
            where_: None,
            having: None,
            joins: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            compounds: Vec::new(),
            payload: Vec::new(),
            bindings: Vec::new(),
            attributes: BTreeMap::new(),
            schema: None,
            index: None,
            cache_key: None,
            cache_length: None,
            eager: Vec::new(),
            repository: None,
        }
    }

    // =========================================================================
    // Target
    // =========================================================================

    pub fn from(&mut self, table: impl Into<String>) -> &mut Self {
        self.table = table.into();
        self
    }

    pub fn as_alias(&mut self, alias: impl Into<String>) -> &mut Self {
        self.alias = Some(alias.into());
        self
    }

    /// Change the statement kind; payload and bindings are always cleared
    pub fn set_type(&mut self, query_type: QueryType) -> &mut Self {
        self.query_type = query_type;
        self.payload.clear();
        self.bindings.clear();
        self
    }

    pub(crate) fn set_repository(&mut self, repository: Repository) -> &mut Self {
        self.repository = Some(repository);
        self
    }

    // =========================================================================
    // Field list
    // =========================================================================

    /// Append fields; SELECT lists keep only the first occurrence of each
    pub fn fields<I, F>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Field>,
    {
        for field in fields {
            self.add_field(field);
        }
        self
    }

    pub fn add_field(&mut self, field: impl Into<Field>) -> &mut Self {
        let field = field.into();
        if self.query_type == QueryType::Select && self.fields.contains(&field) {
            return self;
        }
        self.fields.push(field);
        self
    }

    pub fn func(&mut self, func: Func) -> &mut Self {
        self.add_field(Field::Func(func))
    }

    pub(crate) fn replace_fields(&mut self, fields: Vec<Field>) -> &mut Self {
        self.fields = fields;
        self
    }

    pub fn distinct(&mut self) -> &mut Self {
        self.distinct = true;
        self
    }

    // =========================================================================
    // Payload
    // =========================================================================

    /// Set the row written by an INSERT or UPDATE
    pub fn data(&mut self, row: Row) -> Result<&mut Self> {
        if !matches!(self.query_type, QueryType::Insert | QueryType::Update) {
            return Err(ModelError::invalid_query(format!(
                "data() requires an insert or update query, got {}",
                self.query_type
            )));
        }
        self.bindings = row
            .iter()
            .map(|(field, value)| Binding {
                field: field.clone(),
                value: value.clone(),
            })
            .collect();
        self.payload = vec![row];
        Ok(self)
    }

    /// Set the rows written by a MULTI_INSERT; all rows must share one field set
    pub fn rows(&mut self, rows: Vec<Row>) -> Result<&mut Self> {
        if self.query_type != QueryType::MultiInsert {
            return Err(ModelError::invalid_query(format!(
                "rows() requires a multi_insert query, got {}",
                self.query_type
            )));
        }
        let Some(first) = rows.first() else {
            return Err(ModelError::invalid_query("rows() requires at least one row"));
        };

        let columns: Vec<String> = first.keys().cloned().collect();
        let expected: BTreeSet<&String> = columns.iter().collect();
        for (i, row) in rows.iter().enumerate() {
            let actual: BTreeSet<&String> = row.keys().collect();
            if actual != expected {
                return Err(ModelError::invalid_query(format!(
                    "Row {} has a different field set than the first row",
                    i
                )));
            }
        }

        self.bindings = rows
            .iter()
            .flat_map(|row| {
                columns.iter().map(move |column| Binding {
                    field: column.clone(),
                    value: row.get(column).cloned().unwrap_or(Value::Null),
                })
            })
            .collect();
        self.payload = rows;
        Ok(self)
    }

    // =========================================================================
    // Predicates
    // =========================================================================

    predicate_methods!(where_, Conjunction::And, where_, where_op, where_with);
    predicate_methods!(where_, Conjunction::Or, or_where, or_where_op, or_where_with);
    predicate_methods!(where_, Conjunction::Xor, xor_where, xor_where_op, xor_where_with);
    predicate_methods!(having, Conjunction::And, having, having_op, having_with);
    predicate_methods!(having, Conjunction::Or, or_having, or_having_op, or_having_with);
    predicate_methods!(having, Conjunction::Xor, xor_having, xor_having_op, xor_having_with);

    /// Whether the WHERE predicate holds at least one clause
    pub fn has_conditions(&self) -> bool {
        self.where_.as_ref().is_some_and(|p| !p.is_empty())
    }

    /// Apply a scope callback to this query
    pub fn bind_scope(&mut self, scope: &Scope) -> Result<&mut Self> {
        scope(self)?;
        Ok(self)
    }

    // =========================================================================
    // Joins
    // =========================================================================

    pub fn inner_join(&mut self, join: Join) -> &mut Self {
        self.push_join(JoinType::Inner, join)
    }

    pub fn left_join(&mut self, join: Join) -> &mut Self {
        self.push_join(JoinType::Left, join)
    }

    pub fn right_join(&mut self, join: Join) -> &mut Self {
        self.push_join(JoinType::Right, join)
    }

    pub fn outer_join(&mut self, join: Join) -> &mut Self {
        self.push_join(JoinType::Outer, join)
    }

    pub fn straight_join(&mut self, join: Join) -> &mut Self {
        self.push_join(JoinType::Straight, join)
    }

    fn push_join(&mut self, join_type: JoinType, join: Join) -> &mut Self {
        let alias = self.alias().to_string();
        self.joins.push(join.retype(join_type).qualify(&alias));
        self
    }

    /// Join the table behind a relation, deriving the ON columns from its keys
    pub fn join_relation(
        &mut self,
        join_type: JoinType,
        relation: &Relation,
        fields: &[&str],
    ) -> Result<&mut Self> {
        let related = relation.related();
        let join = Join::new(join_type, related.table_name())
            .as_alias(relation.alias())
            .fields(fields.iter().copied());

        let join = match relation.cardinality() {
            Cardinality::OneToOne | Cardinality::OneToMany => {
                let local_key = match &self.repository {
                    Some(repository) => repository.cached_primary_key(),
                    None => "id".to_string(),
                };
                join.on(local_key, relation.related_foreign_key())
            }
            Cardinality::ManyToOne => {
                join.on(relation.foreign_key(), related.cached_primary_key())
            }
            Cardinality::ManyToMany => {
                return Err(ModelError::invalid_query(format!(
                    "Cannot join many-to-many relation '{}' directly",
                    relation.alias()
                )));
            }
        };
        Ok(self.push_join(join_type, join))
    }

    // =========================================================================
    // Grouping, ordering and paging
    // =========================================================================

    pub fn group_by<I, S>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn order_by(&mut self, field: impl Into<Field>, order: Order) -> &mut Self {
        self.order_by.push((field.into(), order));
        self
    }

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(&mut self, offset: u64) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    pub(crate) fn clear_paging(&mut self) -> &mut Self {
        self.order_by.clear();
        self.limit = None;
        self.offset = None;
        self
    }

    // =========================================================================
    // Compounds
    // =========================================================================

    pub fn union(&mut self, query: Query) -> Result<&mut Self> {
        self.compound(CompoundKind::Union, CompoundFlag::Distinct, query)
    }

    pub fn union_all(&mut self, query: Query) -> Result<&mut Self> {
        self.compound(CompoundKind::Union, CompoundFlag::All, query)
    }

    pub fn intersect(&mut self, query: Query) -> Result<&mut Self> {
        self.compound(CompoundKind::Intersect, CompoundFlag::Distinct, query)
    }

    pub fn intersect_all(&mut self, query: Query) -> Result<&mut Self> {
        self.compound(CompoundKind::Intersect, CompoundFlag::All, query)
    }

    pub fn except(&mut self, query: Query) -> Result<&mut Self> {
        self.compound(CompoundKind::Except, CompoundFlag::Distinct, query)
    }

    pub fn except_all(&mut self, query: Query) -> Result<&mut Self> {
        self.compound(CompoundKind::Except, CompoundFlag::All, query)
    }

    /// Attach a SELECT; both sides must be SELECT queries
    pub fn compound(
        &mut self,
        kind: CompoundKind,
        flag: CompoundFlag,
        query: Query,
    ) -> Result<&mut Self> {
        if query.query_type != QueryType::Select || self.query_type != QueryType::Select {
            return Err(ModelError::invalid_compound(format!(
                "{} requires select queries, got {} and {}",
                kind.as_sql(),
                self.query_type,
                query.query_type
            )));
        }
        self.compounds.push(Compound { kind, flag, query });
        Ok(self)
    }

    // =========================================================================
    // Miscellaneous
    // =========================================================================

    /// Free-form attribute passed through to the driver
    pub fn attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Cache hints; carried for the driver, never acted on here
    pub fn cache(&mut self, key: impl Into<String>, length_secs: u64) -> &mut Self {
        self.cache_key = Some(key.into());
        self.cache_length = Some(length_secs);
        self
    }

    /// Table schema for CREATE TABLE, or column types for parameter binding
    pub fn schema(&mut self, schema: Schema) -> &mut Self {
        self.schema = Some(schema);
        self
    }

    /// Index for CREATE INDEX / DROP INDEX
    pub fn index(&mut self, index: IndexDefinition) -> &mut Self {
        self.index = Some(index);
        self
    }

    /// Load relation `alias` with the result
    pub fn with(&mut self, alias: impl Into<String>, scope: Option<Scope>) -> &mut Self {
        self.eager.push(EagerLoad {
            alias: alias.into(),
            scope,
        });
        self
    }

    pub(crate) fn take_eager_loads(&mut self) -> Vec<EagerLoad> {
        std::mem::take(&mut self.eager)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn query_type(&self) -> QueryType {
        self.query_type
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Alias of the driving table, defaulting to its name
    pub fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    pub fn field_list(&self) -> &[Field] {
        &self.fields
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    pub fn conditions(&self) -> Option<&Predicate> {
        self.where_.as_ref().filter(|p| !p.is_empty())
    }

    pub fn having_conditions(&self) -> Option<&Predicate> {
        self.having.as_ref().filter(|p| !p.is_empty())
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn grouping(&self) -> &[String] {
        &self.group_by
    }

    pub fn ordering(&self) -> &[(Field, Order)] {
        &self.order_by
    }

    pub fn limit_count(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset_count(&self) -> Option<u64> {
        self.offset
    }

    pub fn compounds(&self) -> &[Compound] {
        &self.compounds
    }

    /// Rows to write, in payload order
    pub fn payload(&self) -> &[Row] {
        &self.payload
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    pub fn table_schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    pub fn index_definition(&self) -> Option<&IndexDefinition> {
        self.index.as_ref()
    }

    pub fn cache_key(&self) -> Option<&str> {
        self.cache_key.as_deref()
    }

    pub fn cache_length(&self) -> Option<u64> {
        self.cache_length
    }

    pub fn eager_loads(&self) -> &[EagerLoad] {
        &self.eager
    }

    pub fn repository(&self) -> Result<&Repository> {
        self.repository.as_ref().ok_or_else(|| {
            ModelError::MissingRepository(format!(
                "Query on '{}' is not attached to a repository",
                self.table
            ))
        })
    }

    // =========================================================================
    // Shortcuts through the owning repository
    // =========================================================================

    pub async fn count(&self) -> Result<u64> {
        self.repository()?.count(self.clone()).await
    }

    pub async fn sum(&self, field: &str) -> Result<f64> {
        self.repository()?.sum(self.clone(), field).await
    }

    pub async fn avg(&self, field: &str) -> Result<f64> {
        self.repository()?.avg(self.clone(), field).await
    }

    pub async fn min(&self, field: &str) -> Result<Value> {
        self.repository()?.min(self.clone(), field).await
    }

    pub async fn max(&self, field: &str) -> Result<Value> {
        self.repository()?.max(self.clone(), field).await
    }

    pub async fn first(&self) -> Result<Option<Entity>> {
        let result = self.repository()?.find(self.clone(), Finder::First).await?;
        Ok(result.into_first())
    }

    pub async fn all(&self) -> Result<Vec<Entity>> {
        let result = self.repository()?.find(self.clone(), Finder::All).await?;
        Ok(result.into_all())
    }

    /// Key / value pairs, e.g. for select boxes
    pub async fn lists(&self, key: &str, value: &str) -> Result<Vec<(Value, Value)>> {
        let finder = Finder::List {
            key: Some(key.to_string()),
            value: Some(value.to_string()),
        };
        let result = self.repository()?.find(self.clone(), finder).await?;
        Ok(result.into_list())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    // =========================================================================
    // QueryType Tests
    // =========================================================================

    #[test]
    fn test_query_type_from_str() {
        assert_eq!("select".parse::<QueryType>().unwrap(), QueryType::Select);
        assert_eq!("MULTI_INSERT".parse::<QueryType>().unwrap(), QueryType::MultiInsert);
        assert_eq!("create table".parse::<QueryType>().unwrap(), QueryType::CreateTable);

        let err = "merge".parse::<QueryType>().unwrap_err();
        assert!(matches!(err, ModelError::UnsupportedQueryType(_)));
        assert!(err.is_construction_error());
    }

    #[test]
    fn test_order_from_str() {
        assert_eq!("DESC".parse::<Order>().unwrap(), Order::Desc);
        assert_eq!(" asc ".parse::<Order>().unwrap(), Order::Asc);
        assert!("sideways".parse::<Order>().is_err());
    }

    // =========================================================================
    // Field List Tests
    // =========================================================================

    #[test]
    fn test_select_fields_deduplicate_in_order() {
        let mut query = Query::new(QueryType::Select);
        query.fields(["a", "b", "a"]);
        let names: Vec<String> = query.field_list().iter().map(Field::output_name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_func_fields() {
        let mut query = Query::new(QueryType::Select);
        query.func(Func::count(None)).func(Func::count(None));
        assert_eq!(query.field_list().len(), 1);
    }

    // =========================================================================
    // Payload Tests
    // =========================================================================

    #[test]
    fn test_set_type_clears_payload_and_bindings() {
        let mut query = Query::new(QueryType::Insert);
        query.data(row(json!({"name": "A"}))).unwrap();
        assert_eq!(query.bindings().len(), 1);

        for next in [QueryType::Insert, QueryType::Select, QueryType::Update] {
            query.set_type(next);
            assert!(query.payload().is_empty());
            assert!(query.bindings().is_empty());
        }
    }

    #[test]
    fn test_data_requires_write_type() {
        let mut query = Query::new(QueryType::Select);
        let err = query.data(row(json!({"name": "A"}))).unwrap_err();
        assert!(matches!(err, ModelError::InvalidQuery(_)));
    }

    #[test]
    fn test_rows_flatten_bindings_in_column_order() {
        let mut query = Query::new(QueryType::MultiInsert);
        query
            .rows(vec![
                row(json!({"a": 1, "b": 2})),
                row(json!({"b": 4, "a": 3})),
            ])
            .unwrap();

        let values: Vec<&Value> = query.bindings().iter().map(|b| &b.value).collect();
        assert_eq!(values, vec![&json!(1), &json!(2), &json!(3), &json!(4)]);
    }

    #[test]
    fn test_rows_require_uniform_field_sets() {
        let mut query = Query::new(QueryType::MultiInsert);
        let err = query
            .rows(vec![row(json!({"a": 1})), row(json!({"a": 2, "b": 3}))])
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidQuery(_)));
        assert!(query.payload().is_empty());
    }

    // =========================================================================
    // Predicate Tests
    // =========================================================================

    #[test]
    fn test_where_conjunction_conflicts() {
        let mut query = Query::new(QueryType::Select);
        query.where_("a", json!(1)).unwrap().where_("b", json!(2)).unwrap();

        let err = query.or_where("c", json!(3)).unwrap_err();
        assert!(matches!(err, ModelError::ConflictingPredicate(_)));
        assert_eq!(query.conditions().map(Predicate::len), Some(2));

        // HAVING is an independent slot
        assert!(query.or_having("d", json!(4)).is_ok());
    }

    #[test]
    fn test_where_with_nested_group() {
        let mut query = Query::new(QueryType::Select);
        query
            .where_("type", json!("post"))
            .unwrap()
            .where_with(|p| {
                p.either(|p| {
                    p.eq("status", json!("draft")).null("published_at");
                });
            })
            .unwrap();

        let predicate = query.conditions().unwrap();
        assert_eq!(predicate.len(), 2);
        assert_eq!(predicate.values(), vec![&json!("post"), &json!("draft")]);
    }

    #[test]
    fn test_where_null_becomes_is_null() {
        let mut query = Query::new(QueryType::Select);
        query.where_("deleted_at", Value::Null).unwrap();
        match &query.conditions().unwrap().clauses()[0] {
            Clause::Expr(expr) => assert_eq!(expr.operator(), Operator::Null),
            Clause::Group(_) => panic!("expected expression"),
        }
    }

    #[test]
    fn test_bind_scope_applies_callback() {
        let mut query = Query::new(QueryType::Select);
        let active = scope(|q| {
            q.where_("status", json!("active"))?;
            Ok(())
        });
        query.bind_scope(&active).unwrap();
        assert!(query.has_conditions());
    }

    // =========================================================================
    // Compound Tests
    // =========================================================================

    #[test]
    fn test_compound_rejects_non_select() {
        for other in [QueryType::Insert, QueryType::Update, QueryType::Delete] {
            let mut query = Query::new(QueryType::Select);
            assert!(matches!(
                query.union(Query::new(other)).unwrap_err(),
                ModelError::InvalidCompound(_)
            ));
            assert!(query.intersect(Query::new(other)).is_err());
            assert!(query.except_all(Query::new(other)).is_err());
            assert!(query.compounds().is_empty());
        }
    }

    #[test]
    fn test_compounds_keep_append_order() {
        let mut query = Query::new(QueryType::Select);
        query
            .union(Query::new(QueryType::Select))
            .unwrap()
            .except_all(Query::new(QueryType::Select))
            .unwrap();
        let kinds: Vec<(CompoundKind, CompoundFlag)> =
            query.compounds().iter().map(|c| (c.kind, c.flag)).collect();
        assert_eq!(
            kinds,
            vec![
                (CompoundKind::Union, CompoundFlag::Distinct),
                (CompoundKind::Except, CompoundFlag::All)
            ]
        );
    }

    // =========================================================================
    // Join Tests
    // =========================================================================

    #[test]
    fn test_join_is_qualified_against_alias() {
        let mut query = Query::new(QueryType::Select);
        query
            .from("posts")
            .as_alias("p")
            .left_join(Join::new(JoinType::Inner, "users").on("user_id", "id"));

        let join = &query.joins()[0];
        assert_eq!(join.join_type(), JoinType::Left);
        assert_eq!(
            join.conditions()[0],
            ("p.user_id".to_string(), "users.id".to_string())
        );
    }

    #[tokio::test]
    async fn test_shortcuts_require_repository() {
        let query = Query::new(QueryType::Select);
        assert!(matches!(
            query.count().await.unwrap_err(),
            ModelError::MissingRepository(_)
        ));
    }
}
