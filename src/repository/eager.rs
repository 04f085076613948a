//! Eager loading of related records into find results

use std::collections::{HashMap, HashSet};

use futures::future::BoxFuture;
use serde_json::Value;

use super::Repository;
use crate::entity::Row;
use crate::error::{ModelError, Result};
use crate::finder::Finder;
use crate::query::{EagerLoad, Query, QueryType};
use crate::relation::{Cardinality, Relation};

/// Lookup key for a column value
fn key(value: &Value) -> String {
    value.to_string()
}

/// Distinct non-null values of `column` across `rows`
fn collect_keys(rows: &[Row], column: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    rows.iter()
        .filter_map(|row| row.get(column))
        .filter(|value| !value.is_null() && seen.insert(key(value)))
        .cloned()
        .collect()
}

impl Repository {
    /// Attach each requested relation to `rows` under its alias
    ///
    /// One query per relation (two for many-to-many), never one per row.
    pub(super) fn load_eager<'a>(
        &'a self,
        rows: &'a mut Vec<Row>,
        loads: Vec<EagerLoad>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for load in loads {
                let relation = self.relation(&load.alias)?;
                let mut query = relation.related().query(QueryType::Select);
                if let Some(scope) = relation.condition_scope() {
                    query.bind_scope(scope)?;
                }
                if let Some(scope) = &load.scope {
                    query.bind_scope(scope)?;
                }

                match relation.cardinality() {
                    Cardinality::OneToOne | Cardinality::OneToMany => {
                        self.load_children(rows, &relation, query).await?
                    }
                    Cardinality::ManyToOne => load_parents(rows, &relation, query).await?,
                    Cardinality::ManyToMany => self.load_linked(rows, &relation, query).await?,
                }
            }
            Ok(())
        })
    }

    async fn load_children(&self, rows: &mut [Row], relation: &Relation, mut query: Query) -> Result<()> {
        let pk = self.primary_key().await?;
        let foreign_key = relation.related_foreign_key();
        let ids = collect_keys(rows, &pk);

        let mut grouped: HashMap<String, Vec<Value>> = HashMap::new();
        if !ids.is_empty() {
            query.where_with(|p| {
                p.in_list(foreign_key, ids);
            })?;
            for child in fetch(relation, query).await? {
                if let Some(parent) = child.get(foreign_key) {
                    grouped.entry(key(parent)).or_default().push(Value::Object(child));
                }
            }
        }

        for row in rows.iter_mut() {
            let children = row
                .get(&pk)
                .and_then(|id| grouped.get(&key(id)))
                .cloned()
                .unwrap_or_default();
            let value = match relation.cardinality() {
                Cardinality::OneToOne => children.into_iter().next().unwrap_or(Value::Null),
                _ => Value::Array(children),
            };
            row.insert(relation.alias().to_string(), value);
        }
        Ok(())
    }

    async fn load_linked(&self, rows: &mut [Row], relation: &Relation, mut query: Query) -> Result<()> {
        let junction = relation.junction().ok_or_else(|| {
            ModelError::invalid_relation_data(format!(
                "many-to-many relation '{}' has no junction table",
                relation.alias()
            ))
        })?;
        let pk = self.primary_key().await?;
        let related_pk = relation.related().primary_key().await?;
        let (foreign_key, related_key) = (relation.foreign_key(), relation.related_foreign_key());
        let ids = collect_keys(rows, &pk);

        let mut links: Vec<(Value, Value)> = Vec::new();
        if !ids.is_empty() {
            let mut lookup = junction.select([foreign_key, related_key]);
            lookup.where_with(|p| {
                p.in_list(foreign_key, ids);
            })?;
            links = junction
                .run(&mut lookup)
                .await?
                .fetch_all()
                .into_iter()
                .filter_map(|mut link| Some((link.remove(foreign_key)?, link.remove(related_key)?)))
                .collect();
        }

        let mut related: HashMap<String, Value> = HashMap::new();
        let targets: Vec<Value> = {
            let mut seen = HashSet::new();
            links
                .iter()
                .map(|(_, target)| target)
                .filter(|target| seen.insert(key(target)))
                .cloned()
                .collect()
        };
        if !targets.is_empty() {
            query.where_with(|p| {
                p.in_list(related_pk.as_str(), targets);
            })?;
            for record in fetch(relation, query).await? {
                if let Some(id) = record.get(&related_pk) {
                    related.insert(key(id), Value::Object(record));
                }
            }
        }

        for row in rows.iter_mut() {
            let owner = row.get(&pk).map(key);
            let linked: Vec<Value> = links
                .iter()
                .filter(|(source, _)| owner.as_deref() == Some(key(source).as_str()))
                .filter_map(|(_, target)| related.get(&key(target)).cloned())
                .collect();
            row.insert(relation.alias().to_string(), Value::Array(linked));
        }
        Ok(())
    }
}

async fn load_parents(rows: &mut [Row], relation: &Relation, mut query: Query) -> Result<()> {
    let related_pk = relation.related().primary_key().await?;
    let foreign_key = relation.foreign_key();
    let ids = collect_keys(rows, foreign_key);

    let mut parents: HashMap<String, Value> = HashMap::new();
    if !ids.is_empty() {
        query.where_with(|p| {
            p.in_list(related_pk.as_str(), ids);
        })?;
        for parent in fetch(relation, query).await? {
            if let Some(id) = parent.get(&related_pk) {
                parents.insert(key(id), Value::Object(parent));
            }
        }
    }

    for row in rows.iter_mut() {
        let parent = row
            .get(foreign_key)
            .and_then(|id| parents.get(&key(id)))
            .cloned()
            .unwrap_or(Value::Null);
        row.insert(relation.alias().to_string(), parent);
    }
    Ok(())
}

/// Related rows through the related repository's own find pipeline
async fn fetch(relation: &Relation, query: Query) -> Result<Vec<Row>> {
    Ok(relation
        .related()
        .find(query, Finder::All)
        .await?
        .into_all()
        .into_iter()
        .map(|entity| entity.into_map())
        .collect())
}
