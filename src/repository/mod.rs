//! Persistence orchestrator
//!
//! A [`Repository`] owns one table: it builds queries for it, resolves its
//! schema, primary key and display field, runs lifecycle hooks around every
//! read and write, and sequences multi-table writes (relation upserts and
//! cascading deletes) inside driver transactions.
//!
//! Repositories are cheap to clone; clones share relations, hooks and the
//! resolution cache.
//!
//! ```
//! use std::sync::Arc;
//! use runtara_model::{MemoryDriver, Repository, RepositoryConfig};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> runtara_model::Result<()> {
//! let users = Repository::new(
//!     Arc::new(MemoryDriver::new()),
//!     RepositoryConfig::builder("users").build(),
//! );
//!
//! let data = json!({"name": "Ann"}).as_object().cloned().unwrap_or_default();
//! let id = users.create(data).await?;
//! assert_eq!(id, Some(json!(1)));
//! # Ok(())
//! # }
//! ```

mod delete;
mod eager;
mod save;

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::RepositoryConfig;
use crate::driver::{Context, Driver, ResultSet};
use crate::entity::{Entity, Row};
use crate::error::{ModelError, Result};
use crate::finder::{FindResult, Finder};
use crate::hooks::{Behavior, FindOutcome, Hooks, Outcome, SaveKind};
use crate::query::{Field, Func, Query, QueryType, Scope};
use crate::relation::{Cardinality, Relation};
use crate::schema::Schema;

pub use delete::DeleteOptions;
pub use save::SaveOptions;

/// Values resolved once per repository
#[derive(Debug, Default)]
struct Memo {
    schema: Option<Option<Schema>>,
    primary_key: Option<String>,
    display_field: Option<String>,
}

struct Inner {
    driver: Arc<dyn Driver>,
    config: RepositoryConfig,
    relations: RwLock<Vec<Relation>>,
    hooks: RwLock<Hooks>,
    behaviors: RwLock<Vec<String>>,
    memo: Mutex<Memo>,
}

/// Handle to the persistence orchestrator of one table
#[derive(Clone)]
pub struct Repository {
    inner: Arc<Inner>,
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("table", &self.table_name())
            .field("driver", &self.inner.driver.name())
            .finish()
    }
}

impl Repository {
    pub fn new(driver: Arc<dyn Driver>, config: RepositoryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                driver,
                config,
                relations: RwLock::new(Vec::new()),
                hooks: RwLock::new(Hooks::new()),
                behaviors: RwLock::new(Vec::new()),
                memo: Mutex::new(Memo::default()),
            }),
        }
    }

    /// Table name including prefix
    pub fn table_name(&self) -> String {
        self.inner.config.table_name()
    }

    pub fn alias(&self) -> String {
        self.inner.config.alias()
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.inner.config
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.inner.driver
    }

    // =========================================================================
    // Relations, hooks and behaviors
    // =========================================================================

    pub fn add_relation(&self, relation: Relation) -> &Self {
        self.inner
            .relations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(relation);
        self
    }

    pub fn relations(&self) -> Vec<Relation> {
        self.inner
            .relations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn relation(&self, alias: &str) -> Result<Relation> {
        self.relations()
            .into_iter()
            .find(|r| r.alias() == alias)
            .ok_or_else(|| {
                ModelError::RelationNotFound(format!(
                    "'{}' is not a relation of '{}'",
                    alias,
                    self.table_name()
                ))
            })
    }

    /// Snapshot of the registered hooks
    pub fn hooks(&self) -> Hooks {
        self.inner
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Register hooks through a closure
    pub fn with_hooks(&self, f: impl FnOnce(&mut Hooks)) -> &Self {
        f(&mut self
            .inner
            .hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner));
        self
    }

    pub fn on_pre_find<F>(&self, priority: i32, hook: F) -> &Self
    where
        F: Fn(&mut Query, &Finder) -> FindOutcome + Send + Sync + 'static,
    {
        self.with_hooks(|hooks| {
            hooks.on_pre_find(priority, hook);
        })
    }

    pub fn on_post_find<F>(&self, priority: i32, hook: F) -> &Self
    where
        F: Fn(&mut Vec<Row>, &Finder) + Send + Sync + 'static,
    {
        self.with_hooks(|hooks| {
            hooks.on_post_find(priority, hook);
        })
    }

    pub fn on_pre_save<F>(&self, priority: i32, hook: F) -> &Self
    where
        F: Fn(Option<&Value>, &mut Row, SaveKind) -> Outcome + Send + Sync + 'static,
    {
        self.with_hooks(|hooks| {
            hooks.on_pre_save(priority, hook);
        })
    }

    pub fn on_post_save<F>(&self, priority: i32, hook: F) -> &Self
    where
        F: Fn(&Value, bool) + Send + Sync + 'static,
    {
        self.with_hooks(|hooks| {
            hooks.on_post_save(priority, hook);
        })
    }

    pub fn on_pre_delete<F>(&self, priority: i32, hook: F) -> &Self
    where
        F: Fn(&Value, &mut bool) -> Outcome + Send + Sync + 'static,
    {
        self.with_hooks(|hooks| {
            hooks.on_pre_delete(priority, hook);
        })
    }

    pub fn on_post_delete<F>(&self, priority: i32, hook: F) -> &Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.with_hooks(|hooks| {
            hooks.on_post_delete(priority, hook);
        })
    }

    /// Attach a behavior's hooks and remember its name
    pub fn add_behavior<B: Behavior + ?Sized>(&self, behavior: &B) -> &Self {
        self.with_hooks(|hooks| behavior.attach(hooks));
        self.inner
            .behaviors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(behavior.name().to_string());
        self
    }

    pub fn has_behavior(&self, name: &str) -> bool {
        self.inner
            .behaviors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|b| b == name)
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    fn memo(&self) -> std::sync::MutexGuard<'_, Memo> {
        self.inner.memo.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Table schema: the configured one, else whatever the driver describes
    pub async fn schema(&self) -> Result<Option<Schema>> {
        if let Some(schema) = &self.inner.config.schema {
            return Ok(Some(schema.clone()));
        }
        if let Some(schema) = &self.memo().schema {
            return Ok(schema.clone());
        }

        let schema = self.driver().describe_table(&self.table_name()).await?;
        debug!(table = %self.table_name(), found = schema.is_some(), "described table");
        self.memo().schema = Some(schema.clone());
        Ok(schema)
    }

    pub async fn primary_key(&self) -> Result<String> {
        if let Some(pk) = self.known_primary_key() {
            return Ok(pk);
        }
        let pk = self
            .schema()
            .await?
            .and_then(|s| s.primary_key().map(str::to_string))
            .unwrap_or_else(|| "id".to_string());
        self.memo().primary_key = Some(pk.clone());
        Ok(pk)
    }

    fn known_primary_key(&self) -> Option<String> {
        if let Some(pk) = &self.inner.config.primary_key {
            return Some(pk.clone());
        }
        self.memo().primary_key.clone()
    }

    /// Primary key without touching the driver; `id` when not yet resolved
    pub fn cached_primary_key(&self) -> String {
        self.known_primary_key()
            .or_else(|| {
                let config_schema = self.inner.config.schema.as_ref();
                let memo = self.memo();
                let described = memo.schema.as_ref().and_then(Option::as_ref);
                config_schema
                    .or(described)
                    .and_then(|s| s.primary_key())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "id".to_string())
    }

    /// First configured display candidate present in the schema, else the primary key
    pub async fn display_field(&self) -> Result<String> {
        if let Some(field) = self.memo().display_field.clone() {
            return Ok(field);
        }
        let schema = self.schema().await?;
        let field = match &schema {
            Some(schema) => self
                .inner
                .config
                .display_field
                .iter()
                .find(|candidate| schema.has_column(candidate))
                .cloned(),
            None => None,
        };
        let field = match field {
            Some(field) => field,
            None => self.primary_key().await?,
        };
        self.memo().display_field = Some(field.clone());
        Ok(field)
    }

    /// Forget resolved schema, primary key and display field
    pub fn reset_schema(&self) {
        *self.memo() = Memo::default();
    }

    // =========================================================================
    // Query factories and dispatch
    // =========================================================================

    /// New query on this table, attached to this repository
    pub fn query(&self, query_type: QueryType) -> Query {
        let mut query = self.driver().new_query(query_type);
        query.from(self.table_name());
        if let Some(alias) = &self.inner.config.alias {
            query.as_alias(alias.clone());
        }
        query.set_repository(self.clone());
        query
    }

    pub fn select<I, F>(&self, fields: I) -> Query
    where
        I: IntoIterator<Item = F>,
        F: Into<Field>,
    {
        let mut query = self.query(QueryType::Select);
        query.fields(fields);
        query
    }

    /// Execute any query on this repository's driver in the matching context
    pub async fn execute(&self, mut query: Query) -> Result<ResultSet> {
        self.run(&mut query).await
    }

    async fn run(&self, query: &mut Query) -> Result<ResultSet> {
        if query.table_schema().is_none() && query.table() == self.table_name() {
            if let Some(schema) = self.schema().await? {
                query.schema(schema);
            }
        }
        let driver = self.driver();
        driver.set_context(Context::for_query(query.query_type()));
        driver.execute(query).await
    }

    /// Run `work` inside a transaction; roll back and re-raise on error
    pub async fn transactional<T, F>(&self, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        let driver = self.driver();
        driver.start_transaction().await?;
        match work.await {
            Ok(value) => {
                driver.commit_transaction().await?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback) = driver.rollback_transaction().await {
                    warn!(table = %self.table_name(), %error, %rollback, "rollback failed");
                }
                Err(error)
            }
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Run `query` through the read pipeline and shape it with `finder`
    pub async fn find(&self, mut query: Query, finder: Finder) -> Result<FindResult> {
        let hooks = self.hooks();
        let eager = query.take_eager_loads();
        finder.prepare(&mut query);

        let mut rows = match hooks.pre_find(&mut query, &finder) {
            FindOutcome::Abort => return Ok(FindResult::empty(&finder)),
            FindOutcome::Override(rows) => rows,
            FindOutcome::Continue => {
                if !query.joins().is_empty() && query.field_list().is_empty() {
                    self.expand_driving_fields(&mut query).await?;
                }
                self.run(&mut query).await?.fetch_all()
            }
        };

        hooks.post_find(&mut rows, &finder);
        if !eager.is_empty() && !rows.is_empty() {
            self.load_eager(&mut rows, eager).await?;
        }

        let (key, value) = match &finder {
            Finder::List { key, value } => {
                let key = match key {
                    Some(key) => key.clone(),
                    None => self.primary_key().await?,
                };
                let value = match value {
                    Some(value) => value.clone(),
                    None => self.display_field().await?,
                };
                (key, value)
            }
            _ => (String::new(), String::new()),
        };

        let entities = rows.into_iter().map(Entity::new).collect();
        Ok(finder.resolve(entities, &key, &value))
    }

    /// Joined columns must not shadow the driving table's, so list them all
    async fn expand_driving_fields(&self, query: &mut Query) -> Result<()> {
        let alias = query.alias().to_string();
        let fields = match self.schema().await? {
            Some(schema) => schema
                .column_names()
                .into_iter()
                .map(|column| Field::Column(format!("{}.{}", alias, column)))
                .collect(),
            None => vec![Field::Column(format!("{}.*", alias))],
        };
        query.replace_fields(fields);
        Ok(())
    }

    /// Evaluate one aggregate function over the rows `query` selects
    pub async fn aggregate(&self, mut query: Query, func: Func) -> Result<Value> {
        query
            .clear_paging()
            .replace_fields(vec![Field::Func(func.as_alias("aggregate"))]);
        let result = self.run(&mut query).await?;
        Ok(result.scalar().cloned().unwrap_or(Value::Null))
    }

    pub async fn count(&self, query: Query) -> Result<u64> {
        let value = self.aggregate(query, Func::count(None)).await?;
        Ok(value
            .as_u64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
            .unwrap_or(0))
    }

    pub async fn sum(&self, query: Query, field: &str) -> Result<f64> {
        Ok(as_f64(&self.aggregate(query, Func::sum(field)).await?))
    }

    pub async fn avg(&self, query: Query, field: &str) -> Result<f64> {
        Ok(as_f64(&self.aggregate(query, Func::avg(field)).await?))
    }

    pub async fn min(&self, query: Query, field: &str) -> Result<Value> {
        self.aggregate(query, Func::min(field)).await
    }

    pub async fn max(&self, query: Query, field: &str) -> Result<Value> {
        self.aggregate(query, Func::max(field)).await
    }

    /// Record by primary key
    pub async fn read(&self, id: impl Into<Value>) -> Result<Option<Entity>> {
        let query = self.scoped_by_id(id.into()).await?;
        Ok(self.find(query, Finder::First).await?.into_first())
    }

    /// Record by primary key, further narrowed by `scope`
    pub async fn read_with(&self, id: impl Into<Value>, scope: &Scope) -> Result<Option<Entity>> {
        let mut query = self.scoped_by_id(id.into()).await?;
        query.bind_scope(scope)?;
        Ok(self.find(query, Finder::First).await?.into_first())
    }

    pub async fn exists(&self, id: impl Into<Value>) -> Result<bool> {
        let query = self.scoped_by_id(id.into()).await?;
        Ok(self.count(query).await? > 0)
    }

    async fn scoped_by_id(&self, id: Value) -> Result<Query> {
        let pk = self.primary_key().await?;
        let mut query = self.query(QueryType::Select);
        query.where_(pk, id)?;
        Ok(query)
    }

    /// Dependent relations a cascading delete has to visit
    fn has_dependents(&self) -> bool {
        self.relations()
            .iter()
            .any(|r| r.is_dependent() && r.cardinality() != Cardinality::ManyToOne)
    }
}

fn as_f64(value: &Value) -> f64 {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(0.0)
}
