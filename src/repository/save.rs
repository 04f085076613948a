//! Create, update and upsert, including nested relation data

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, instrument};

use super::Repository;
use crate::entity::Row;
use crate::error::{ModelError, Result};
use crate::hooks::{Outcome, SaveKind};
use crate::query::{QueryType, Scope};
use crate::relation::{Cardinality, Relation};
use crate::schema::Schema;

/// Options for single-record writes
#[derive(Debug, Clone, Copy)]
pub struct SaveOptions {
    /// Run pre/post save hooks (default: true)
    pub callbacks: bool,
    /// Wrap the write and its relation upserts in one transaction (default: true)
    pub atomic: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            callbacks: true,
            atomic: true,
        }
    }
}

impl SaveOptions {
    pub fn without_callbacks() -> Self {
        Self {
            callbacks: false,
            ..Self::default()
        }
    }
}

type RelatedData = Vec<(Relation, Value)>;

impl Repository {
    /// Insert one record; returns its primary key, `None` when a hook vetoed
    pub async fn create(&self, data: Row) -> Result<Option<Value>> {
        self.create_with(data, SaveOptions::default()).await
    }

    #[instrument(skip(self, data, options), fields(table = %self.table_name()))]
    pub async fn create_with(&self, data: Row, options: SaveOptions) -> Result<Option<Value>> {
        let (mut row, related) = self.split_relations(data)?;

        let hooks = self.hooks();
        if options.callbacks && hooks.pre_save(None, &mut row, SaveKind::Create) == Outcome::Abort {
            debug!("create vetoed by hook");
            return Ok(None);
        }
        let schema = self.schema().await?;
        let row = self.filter_payload(row, schema.as_ref())?;

        let related_empty = related.is_empty();
        let work = async {
            let id = self.insert_row(row).await?;
            if let Some(id) = &id {
                if !related.is_empty() {
                    self.apply_relations(id, related).await?;
                }
            }
            Ok::<_, ModelError>(id)
        };
        let id = if options.atomic && !related_empty {
            self.transactional(work).await?
        } else {
            work.await?
        };

        if let (Some(id), true) = (&id, options.callbacks) {
            hooks.post_save(id, true);
        }
        Ok(id)
    }

    /// Update the record with primary key `id`; returns the affected row count
    pub async fn update(&self, id: impl Into<Value>, data: Row) -> Result<u64> {
        self.update_with(id.into(), data, SaveOptions::default()).await
    }

    #[instrument(skip(self, data, options), fields(table = %self.table_name()))]
    pub async fn update_with(&self, id: Value, data: Row, options: SaveOptions) -> Result<u64> {
        let (mut row, related) = self.split_relations(data)?;

        let hooks = self.hooks();
        if options.callbacks
            && hooks.pre_save(Some(&id), &mut row, SaveKind::Update) == Outcome::Abort
        {
            debug!(%id, "update vetoed by hook");
            return Ok(0);
        }
        let schema = self.schema().await?;
        let mut row = self.filter_payload(row, schema.as_ref())?;
        let pk = self.primary_key().await?;
        row.remove(&pk);

        let related_empty = related.is_empty();
        let work = async {
            let affected = if row.is_empty() {
                u64::from(self.exists(id.clone()).await?)
            } else {
                let mut query = self.query(QueryType::Update);
                query.data(row)?.where_(pk.as_str(), id.clone())?;
                self.run(&mut query).await?.affected_count()
            };
            if affected > 0 && !related.is_empty() {
                self.apply_relations(&id, related).await?;
            }
            Ok::<_, ModelError>(affected)
        };
        let affected = if options.atomic && !related_empty {
            self.transactional(work).await?
        } else {
            work.await?
        };

        if affected > 0 && options.callbacks {
            hooks.post_save(&id, false);
        }
        Ok(affected)
    }

    /// Update when the record exists, create otherwise
    ///
    /// The id comes from `id` or, failing that, from the primary key in
    /// `data`. Returns the record's id, `None` when nothing was written.
    pub async fn upsert(&self, data: Row, id: Option<Value>) -> Result<Option<Value>> {
        self.upsert_with(data, id, SaveOptions::default()).await
    }

    pub async fn upsert_with(
        &self,
        data: Row,
        id: Option<Value>,
        options: SaveOptions,
    ) -> Result<Option<Value>> {
        self.check_relations(&data)?;
        let pk = self.primary_key().await?;
        let id = id
            .or_else(|| data.get(&pk).cloned())
            .filter(|v| !v.is_null());

        match id {
            Some(id) if self.exists(id.clone()).await? => {
                let affected = self.update_with(id.clone(), data, options).await?;
                Ok((affected > 0).then_some(id))
            }
            _ => self.create_with(data, options).await,
        }
    }

    /// Insert many records in one statement, without hooks
    ///
    /// Missing columns get their schema default. The primary key is
    /// stripped unless `allow_pk` is set. Returns the inserted row count.
    #[instrument(skip(self, rows), fields(table = %self.table_name(), rows = rows.len()))]
    pub async fn create_many(&self, rows: Vec<Row>, allow_pk: bool) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let schema = self.schema().await?;
        let pk = self.primary_key().await?;
        let defaults = schema.as_ref().map(Schema::literal_defaults).unwrap_or_default();

        let rows = rows
            .into_iter()
            .map(|mut row| {
                for (column, value) in &defaults {
                    row.entry(column.clone()).or_insert_with(|| value.clone());
                }
                if !allow_pk {
                    row.remove(&pk);
                }
                self.filter_payload(row, schema.as_ref())
            })
            .collect::<Result<Vec<_>>>()?;

        let mut query = self.query(QueryType::MultiInsert);
        query.rows(rows)?;
        Ok(self.run(&mut query).await?.affected_count())
    }

    /// Update every record `scope` selects; an empty scope is rejected
    #[instrument(skip(self, data, scope), fields(table = %self.table_name()))]
    pub async fn update_many(&self, data: Row, scope: &Scope) -> Result<u64> {
        let mut query = self.query(QueryType::Update);
        query.bind_scope(scope)?;
        if !query.has_conditions() {
            return Err(ModelError::unscoped_mutation(format!(
                "update_many on '{}' needs a WHERE condition",
                self.table_name()
            )));
        }

        let ids = Value::Array(self.scoped_ids(scope).await?);
        let hooks = self.hooks();
        let mut row = data;
        if hooks.pre_save(Some(&ids), &mut row, SaveKind::Update) == Outcome::Abort {
            return Ok(0);
        }
        let schema = self.schema().await?;
        let row = self.filter_payload(row, schema.as_ref())?;
        if row.is_empty() {
            return Ok(0);
        }

        query.data(row)?;
        let affected = self.run(&mut query).await?.affected_count();
        if affected > 0 {
            hooks.post_save(&ids, false);
        }
        Ok(affected)
    }

    /// Primary keys of the records `scope` selects
    pub(super) async fn scoped_ids(&self, scope: &Scope) -> Result<Vec<Value>> {
        let pk = self.primary_key().await?;
        let mut query = self.select([pk.as_str()]);
        query.bind_scope(scope)?;
        Ok(self
            .run(&mut query)
            .await?
            .fetch_all()
            .into_iter()
            .filter_map(|mut row| row.remove(&pk))
            .collect())
    }

    /// Write nested relation data for the record `id` in one transaction
    ///
    /// `data` maps relation aliases to their payloads; every payload is
    /// shape-checked before anything is written.
    pub async fn upsert_relations(&self, id: &Value, data: Row) -> Result<()> {
        let (rest, related) = self.split_relations(data)?;
        if let Some(key) = rest.keys().next() {
            return Err(ModelError::RelationNotFound(format!(
                "'{}' is not a relation of '{}'",
                key,
                self.table_name()
            )));
        }
        self.transactional(self.apply_relations(id, related)).await
    }

    // =========================================================================
    // Payload preparation
    // =========================================================================

    /// Separate relation payloads from column values, checking their shape
    fn split_relations(&self, data: Row) -> Result<(Row, RelatedData)> {
        let relations = self.relations();
        let mut row = Row::new();
        let mut related = Vec::new();
        for (key, value) in data {
            match relations.iter().find(|r| r.alias() == key) {
                Some(relation) => {
                    relation.validate_data(&value)?;
                    related.push((relation.clone(), value));
                }
                None => {
                    row.insert(key, value);
                }
            }
        }
        Ok((row, related))
    }

    fn check_relations(&self, data: &Row) -> Result<()> {
        for relation in self.relations() {
            if let Some(value) = data.get(relation.alias()) {
                relation.validate_data(value)?;
            }
        }
        Ok(())
    }

    /// Drop columns the schema does not know and type-check the rest
    fn filter_payload(&self, row: Row, schema: Option<&Schema>) -> Result<Row> {
        let Some(schema) = schema else {
            return Ok(row);
        };
        let validate = self.config().validate;
        let mut filtered = Row::new();
        for (column, value) in row {
            match schema.column(&column) {
                Some(definition) => {
                    if validate {
                        definition.validate(&value).map_err(ModelError::validation)?;
                    }
                    filtered.insert(column, value);
                }
                None => debug!(%column, table = %self.table_name(), "dropping unknown column"),
            }
        }
        Ok(filtered)
    }

    async fn insert_row(&self, row: Row) -> Result<Option<Value>> {
        let pk = self.primary_key().await?;
        let given = row.get(&pk).filter(|v| !v.is_null()).cloned();

        let mut query = self.query(QueryType::Insert);
        query.data(row)?;
        if self.run(&mut query).await?.affected_count() == 0 {
            return Ok(None);
        }
        if given.is_some() {
            return Ok(given);
        }
        Ok(self
            .driver()
            .last_insert_id(&self.table_name(), &pk)
            .await?
            .filter(|v| !v.is_null()))
    }

    // =========================================================================
    // Relation upserts
    // =========================================================================

    fn apply_relations<'a>(
        &'a self,
        id: &'a Value,
        related: RelatedData,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for (relation, data) in related {
                match relation.cardinality() {
                    Cardinality::OneToOne => {
                        self.upsert_child(&relation, id, object(&relation, data)?).await?;
                    }
                    Cardinality::OneToMany => {
                        for item in items(data) {
                            self.upsert_child(&relation, id, object(&relation, item)?).await?;
                        }
                    }
                    Cardinality::ManyToMany => {
                        for item in items(data) {
                            self.link(&relation, id, object(&relation, item)?).await?;
                        }
                    }
                    Cardinality::ManyToOne => relation.validate_data(&data)?,
                }
            }
            Ok(())
        })
    }

    async fn upsert_child(&self, relation: &Relation, id: &Value, mut row: Row) -> Result<()> {
        row.insert(relation.related_foreign_key().to_string(), id.clone());
        relation.related().upsert(row, None).await?;
        Ok(())
    }

    /// Upsert the related record, then add the junction row unless present
    async fn link(&self, relation: &Relation, id: &Value, mut row: Row) -> Result<()> {
        let junction = relation.junction().ok_or_else(|| {
            ModelError::invalid_relation_data(format!(
                "many-to-many relation '{}' has no junction table",
                relation.alias()
            ))
        })?;
        let related_key = relation.related_foreign_key();

        let referenced = row.remove(related_key).filter(|v| !v.is_null());
        let related_id = match referenced {
            Some(related_id) if row.is_empty() => Some(related_id),
            referenced => {
                if let Some(related_id) = referenced {
                    let related_pk = relation.related().primary_key().await?;
                    row.entry(related_pk).or_insert(related_id);
                }
                relation.related().upsert(row, None).await?
            }
        };
        let Some(related_id) = related_id else {
            return Ok(());
        };

        let mut existing = junction.query(QueryType::Select);
        existing
            .where_(relation.foreign_key(), id.clone())?
            .where_(related_key, related_id.clone())?;
        if junction.count(existing).await? > 0 {
            debug!(relation = relation.alias(), %id, %related_id, "junction row present");
            return Ok(());
        }

        let mut link = Row::new();
        link.insert(relation.foreign_key().to_string(), id.clone());
        link.insert(related_key.to_string(), related_id);
        junction.create_with(link, SaveOptions::without_callbacks()).await?;
        Ok(())
    }
}

fn object(relation: &Relation, value: Value) -> Result<Row> {
    match value {
        Value::Object(row) => Ok(row),
        other => Err(ModelError::invalid_relation_data(format!(
            "relation '{}' expects records, got {}",
            relation.alias(),
            other
        ))),
    }
}

fn items(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}
