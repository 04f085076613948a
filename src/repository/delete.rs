//! Single, cascading and bulk deletes

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, instrument};

use super::Repository;
use crate::error::{ModelError, Result};
use crate::hooks::Outcome;
use crate::query::{Query, QueryType, Scope};
use crate::relation::{Cardinality, Relation};

/// Options for single-record deletes
#[derive(Debug, Clone, Copy)]
pub struct DeleteOptions {
    /// Remove dependent related records first (default: true)
    pub cascade: bool,
    /// Run pre/post delete hooks (default: true)
    pub callbacks: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            cascade: true,
            callbacks: true,
        }
    }
}

impl Repository {
    /// Delete the record with primary key `id`; true when a row was removed
    pub async fn delete(&self, id: impl Into<Value>) -> Result<bool> {
        self.delete_with(id.into(), DeleteOptions::default()).await
    }

    #[instrument(skip(self, options), fields(table = %self.table_name()))]
    pub async fn delete_with(&self, id: Value, options: DeleteOptions) -> Result<bool> {
        let hooks = self.hooks();
        let mut cascade = options.cascade;
        if options.callbacks && hooks.pre_delete(&id, &mut cascade) == Outcome::Abort {
            debug!(%id, "delete vetoed by hook");
            return Ok(false);
        }

        let deleted = if cascade && self.has_dependents() {
            self.transactional(async {
                self.cascade_dependents(id.clone()).await?;
                self.delete_row(&id).await
            })
            .await?
        } else {
            self.delete_row(&id).await?
        };

        if deleted && options.callbacks {
            hooks.post_delete(&id);
        }
        Ok(deleted)
    }

    /// Remove everything that depends on `id`, leaving the record itself
    #[instrument(skip(self), fields(table = %self.table_name()))]
    pub async fn delete_dependents(&self, id: Value) -> Result<()> {
        self.transactional(self.cascade_dependents(id)).await
    }

    /// Delete every record `scope` selects; an empty scope is rejected
    #[instrument(skip(self, scope), fields(table = %self.table_name()))]
    pub async fn delete_many(&self, scope: &Scope) -> Result<u64> {
        let mut query = self.query(QueryType::Delete);
        query.bind_scope(scope)?;
        if !query.has_conditions() {
            return Err(ModelError::unscoped_mutation(format!(
                "delete_many on '{}' needs a WHERE condition",
                self.table_name()
            )));
        }

        let ids = Value::Array(self.scoped_ids(scope).await?);
        let hooks = self.hooks();
        let mut cascade = false;
        if hooks.pre_delete(&ids, &mut cascade) == Outcome::Abort {
            return Ok(0);
        }

        let affected = self.run(&mut query).await?.affected_count();
        if affected > 0 {
            hooks.post_delete(&ids);
        }
        Ok(affected)
    }

    async fn delete_row(&self, id: &Value) -> Result<bool> {
        let pk = self.primary_key().await?;
        let mut query = self.query(QueryType::Delete);
        query.where_(pk.as_str(), id.clone())?;
        Ok(self.run(&mut query).await?.affected_count() > 0)
    }

    /// Depth-first walk over dependent relations; children go before parents
    fn cascade_dependents(&self, id: Value) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            for relation in self.relations() {
                if !relation.is_dependent() {
                    continue;
                }
                match relation.cardinality() {
                    Cardinality::OneToOne | Cardinality::OneToMany => {
                        delete_children(&relation, &id).await?;
                    }
                    Cardinality::ManyToMany => {
                        if let Some(junction) = relation.junction() {
                            let mut query = junction.query(QueryType::Delete);
                            query.where_(relation.foreign_key(), id.clone())?;
                            let removed = junction.run(&mut query).await?.affected_count();
                            debug!(relation = relation.alias(), %id, removed, "junction rows removed");
                        }
                    }
                    Cardinality::ManyToOne => {}
                }
            }
            Ok(())
        })
    }
}

async fn delete_children(relation: &Relation, id: &Value) -> Result<()> {
    let related = relation.related();
    let related_pk = related.primary_key().await?;

    let mut children = related.select([related_pk.as_str()]);
    scope_to_parent(&mut children, relation, id)?;
    for mut child in related.run(&mut children).await?.fetch_all() {
        if let Some(child_id) = child.remove(&related_pk) {
            related.cascade_dependents(child_id).await?;
        }
    }

    let mut query = related.query(QueryType::Delete);
    scope_to_parent(&mut query, relation, id)?;
    let removed = related.run(&mut query).await?.affected_count();
    debug!(relation = relation.alias(), %id, removed, "dependents removed");
    Ok(())
}

fn scope_to_parent(query: &mut Query, relation: &Relation, id: &Value) -> Result<()> {
    query.where_(relation.related_foreign_key(), id.clone())?;
    if let Some(scope) = relation.condition_scope() {
        query.bind_scope(scope)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepositoryConfig;
    use crate::driver::MemoryDriver;
    use crate::entity::Row;
    use crate::query::{scope, Operator};
    use serde_json::json;
    use std::sync::Arc;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    async fn blog(driver: Arc<MemoryDriver>) -> (Repository, Repository, Repository) {
        let posts = Repository::new(driver.clone(), RepositoryConfig::builder("posts").build());
        let comments = Repository::new(driver.clone(), RepositoryConfig::builder("comments").build());
        let votes = Repository::new(driver, RepositoryConfig::builder("votes").build());

        posts.add_relation(Relation::one_to_many("comments", comments.clone(), "post_id"));
        comments.add_relation(Relation::one_to_many("votes", votes.clone(), "comment_id"));

        for post in 1..=2 {
            posts.create(row(json!({"title": format!("p{}", post)}))).await.unwrap();
            let comment = comments
                .create(row(json!({"post_id": post, "body": "c"})))
                .await
                .unwrap()
                .unwrap();
            votes.create(row(json!({"comment_id": comment}))).await.unwrap();
        }
        (posts, comments, votes)
    }

    // =========================================================================
    // Cascade Tests
    // =========================================================================

    #[tokio::test]
    async fn test_cascade_removes_grandchildren_first() {
        let driver = Arc::new(MemoryDriver::new());
        let (posts, _, _) = blog(driver.clone()).await;

        assert!(posts.delete(1).await.unwrap());
        assert_eq!(driver.rows("posts").unwrap().len(), 1);
        assert_eq!(driver.rows("comments").unwrap().len(), 1);
        assert_eq!(driver.rows("votes").unwrap().len(), 1);

        let deletes: Vec<String> = driver
            .executed()
            .unwrap()
            .into_iter()
            .filter(|(_, kind, _)| *kind == QueryType::Delete)
            .map(|(_, _, table)| table)
            .collect();
        assert_eq!(deletes, vec!["votes", "comments", "posts"]);
    }

    #[tokio::test]
    async fn test_cascade_failure_rolls_back() {
        let driver = Arc::new(MemoryDriver::new());
        let (posts, _, _) = blog(driver.clone()).await;
        driver.fail_on(QueryType::Delete, "comments").unwrap();

        assert!(posts.delete(1).await.is_err());
        assert_eq!(driver.rows("votes").unwrap().len(), 2);
        assert_eq!(driver.rows("posts").unwrap().len(), 2);
        assert!(!driver.in_transaction().unwrap());
    }

    #[tokio::test]
    async fn test_hook_can_disable_cascade() {
        let driver = Arc::new(MemoryDriver::new());
        let (posts, _, _) = blog(driver.clone()).await;
        posts.on_pre_delete(1, |_, cascade| {
            *cascade = false;
            Outcome::Continue
        });

        assert!(posts.delete(2).await.unwrap());
        assert_eq!(driver.rows("comments").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_dependents_keeps_record() {
        let driver = Arc::new(MemoryDriver::new());
        let (posts, _, _) = blog(driver.clone()).await;

        posts.delete_dependents(json!(1)).await.unwrap();
        assert_eq!(driver.rows("posts").unwrap().len(), 2);
        assert_eq!(driver.rows("comments").unwrap().len(), 1);
    }

    // =========================================================================
    // Bulk Tests
    // =========================================================================

    #[tokio::test]
    async fn test_delete_many() {
        let driver = Arc::new(MemoryDriver::new());
        let repo = Repository::new(driver.clone(), RepositoryConfig::builder("people").build());
        for age in [20, 31, 35, 40, 25] {
            repo.create(row(json!({"age": age}))).await.unwrap();
        }

        let unscoped = scope(|_| Ok(()));
        assert!(matches!(
            repo.delete_many(&unscoped).await.unwrap_err(),
            ModelError::UnscopedMutation(_)
        ));

        let older = scope(|q| {
            q.where_op("age", Operator::Gt, 30)?;
            Ok(())
        });
        assert_eq!(repo.delete_many(&older).await.unwrap(), 3);
        assert_eq!(repo.count(repo.query(QueryType::Select)).await.unwrap(), 2);
    }
}
