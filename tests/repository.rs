//! End-to-end repository behavior on the in-memory driver

use std::sync::{Arc, Mutex};

use runtara_model::{
    ColumnDefinition, ColumnType, FindOutcome, MemoryDriver, ModelError, Operator, Outcome,
    QueryType, Relation, Repository, RepositoryConfig, Row, Schema, scope,
};
use serde_json::{Value, json};

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

fn users(driver: &Arc<MemoryDriver>) -> Repository {
    Repository::new(driver.clone(), RepositoryConfig::builder("users").build())
}

// ==================== CRUD ====================

#[tokio::test]
async fn test_create_then_read() {
    let driver = Arc::new(MemoryDriver::new());
    let users = users(&driver);

    assert_eq!(users.create(row(json!({"name": "A"}))).await.unwrap(), Some(json!(1)));
    let found = users.read(1).await.unwrap().expect("record");
    assert_eq!(found.get("name"), Some(&json!("A")));
}

#[tokio::test]
async fn test_update_then_read() {
    let driver = Arc::new(MemoryDriver::new());
    let users = users(&driver);
    users.create(row(json!({"name": "A"}))).await.unwrap();

    assert_eq!(users.update(1, row(json!({"name": "B"}))).await.unwrap(), 1);
    let found = users.read(1).await.unwrap().expect("record");
    assert_eq!(found.get("name"), Some(&json!("B")));
}

#[tokio::test]
async fn test_upsert_existing_id_never_duplicates() {
    let driver = Arc::new(MemoryDriver::new());
    let users = users(&driver);
    users.create(row(json!({"name": "A"}))).await.unwrap();

    for name in ["B", "C"] {
        let id = users.upsert(row(json!({"id": 1, "name": name})), None).await.unwrap();
        assert_eq!(id, Some(json!(1)));
    }
    let stored = driver.rows("users").unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["name"], json!("C"));
}

#[tokio::test]
async fn test_context_follows_operation() {
    let driver = Arc::new(MemoryDriver::new());
    let users = users(&driver);
    users.create(row(json!({"name": "A"}))).await.unwrap();
    users.read(1).await.unwrap();
    users.delete(1).await.unwrap();

    let contexts: Vec<_> = driver
        .executed()
        .unwrap()
        .into_iter()
        .map(|(context, kind, _)| (kind, context))
        .collect();
    assert_eq!(
        contexts,
        vec![
            (QueryType::Insert, runtara_model::Context::Write),
            (QueryType::Select, runtara_model::Context::Read),
            (QueryType::Delete, runtara_model::Context::Delete),
        ]
    );
}

// ==================== Bulk mutations ====================

#[tokio::test]
async fn test_delete_many_over_five_rows() {
    let driver = Arc::new(MemoryDriver::new());
    let users = users(&driver);
    let rows = [22, 31, 44, 58, 19]
        .into_iter()
        .map(|age| row(json!({"age": age})))
        .collect();
    users.create_many(rows, false).await.unwrap();

    let deleted = Arc::new(Mutex::new(Value::Null));
    let seen = deleted.clone();
    users.on_post_delete(1, move |ids| *seen.lock().unwrap() = ids.clone());

    let older = scope(|q| {
        q.where_op("age", Operator::Gt, 30)?;
        Ok(())
    });
    assert_eq!(users.delete_many(&older).await.unwrap(), 3);
    assert_eq!(users.count(users.query(QueryType::Select)).await.unwrap(), 2);
    assert_eq!(*deleted.lock().unwrap(), json!([2, 3, 4]));
}

#[tokio::test]
async fn test_unscoped_bulk_mutations_fail_before_io() {
    let driver = Arc::new(MemoryDriver::new());
    let users = users(&driver);

    let scopes = [
        scope(|_| Ok(())),
        scope(|q| {
            q.limit(5);
            Ok(())
        }),
        scope(|q| {
            q.having("n", 1)?;
            Ok(())
        }),
    ];
    for unscoped in &scopes {
        assert!(matches!(
            users.delete_many(unscoped).await.unwrap_err(),
            ModelError::UnscopedMutation(_)
        ));
        assert!(matches!(
            users.update_many(row(json!({"name": "x"})), unscoped).await.unwrap_err(),
            ModelError::UnscopedMutation(_)
        ));
    }
    assert!(driver.executed().unwrap().is_empty());
}

// ==================== Cascades ====================

async fn parent_with_children(driver: &Arc<MemoryDriver>, children: usize) -> Repository {
    let parents = Repository::new(driver.clone(), RepositoryConfig::builder("parents").build());
    let kids = Repository::new(driver.clone(), RepositoryConfig::builder("children").build());
    parents.add_relation(Relation::one_to_many("children", kids.clone(), "parent_id"));

    parents.create(row(json!({"name": "p"}))).await.unwrap();
    parents.create(row(json!({"name": "other"}))).await.unwrap();
    for _ in 0..children {
        kids.create(row(json!({"parent_id": 1}))).await.unwrap();
    }
    kids.create(row(json!({"parent_id": 2}))).await.unwrap();
    parents
}

fn total_rows(driver: &MemoryDriver) -> usize {
    ["parents", "children"]
        .iter()
        .map(|t| driver.rows(t).unwrap().len())
        .sum()
}

#[tokio::test]
async fn test_cascade_removes_children_and_parent() {
    let driver = Arc::new(MemoryDriver::new());
    let parents = parent_with_children(&driver, 4).await;
    let before = total_rows(&driver);

    assert!(parents.delete(1).await.unwrap());
    assert_eq!(before - total_rows(&driver), 4 + 1);
}

#[tokio::test]
async fn test_cascade_failure_removes_nothing() {
    let driver = Arc::new(MemoryDriver::new());
    let parents = parent_with_children(&driver, 4).await;
    let before = total_rows(&driver);
    driver.fail_on(QueryType::Delete, "children").unwrap();

    assert!(matches!(parents.delete(1).await.unwrap_err(), ModelError::Driver(_)));
    assert_eq!(total_rows(&driver), before);
    assert!(!driver.in_transaction().unwrap());
}

// ==================== Relations ====================

#[tokio::test]
async fn test_many_to_many_upsert_is_idempotent() {
    let driver = Arc::new(MemoryDriver::new());
    let posts = Repository::new(driver.clone(), RepositoryConfig::builder("posts").build());
    let tags = Repository::new(driver.clone(), RepositoryConfig::builder("tags").build());
    let post_tags = Repository::new(driver.clone(), RepositoryConfig::builder("post_tags").build());
    posts.add_relation(Relation::many_to_many("tags", tags.clone(), post_tags, "post_id", "tag_id"));

    let id = posts
        .create(row(json!({"title": "t", "tags": [{"name": "rust"}]})))
        .await
        .unwrap()
        .expect("post id");
    for _ in 0..2 {
        posts
            .upsert_relations(&id, row(json!({"tags": [{"tag_id": 1}, {"id": 1, "name": "rust"}]})))
            .await
            .unwrap();
    }

    assert_eq!(driver.rows("post_tags").unwrap().len(), 1);
    assert_eq!(driver.rows("tags").unwrap().len(), 1);
}

#[tokio::test]
async fn test_relation_shape_checked_before_io() {
    let driver = Arc::new(MemoryDriver::new());
    let posts = Repository::new(driver.clone(), RepositoryConfig::builder("posts").build());
    let authors = Repository::new(driver.clone(), RepositoryConfig::builder("authors").build());
    let comments = Repository::new(driver.clone(), RepositoryConfig::builder("comments").build());
    posts
        .add_relation(Relation::many_to_one("author", authors, "author_id"))
        .add_relation(Relation::one_to_many("comments", comments, "post_id"));

    for data in [
        json!({"title": "t", "comments": {"body": "not a list"}}),
        json!({"title": "t", "author": {"name": "x"}}),
    ] {
        assert!(matches!(
            posts.create(row(data)).await.unwrap_err(),
            ModelError::InvalidRelationData(_)
        ));
    }
    assert!(driver.executed().unwrap().is_empty());
}

#[tokio::test]
async fn test_nested_children_are_stamped_and_loaded() {
    let driver = Arc::new(MemoryDriver::new());
    let posts = Repository::new(driver.clone(), RepositoryConfig::builder("posts").build());
    let comments = Repository::new(driver.clone(), RepositoryConfig::builder("comments").build());
    posts.add_relation(Relation::one_to_many("comments", comments, "post_id"));

    let data = json!({"title": "t", "comments": [{"body": "a"}, {"body": "b"}]});
    let id = posts.create(row(data)).await.unwrap().expect("post id");

    let mut query = posts.query(QueryType::Select);
    query.where_("id", id).unwrap().with("comments", None);
    let post = query.first().await.unwrap().expect("post");
    let bodies: Vec<Value> = post
        .get("comments")
        .and_then(Value::as_array)
        .map(|c| c.iter().filter_map(|c| c.get("body").cloned()).collect())
        .unwrap_or_default();
    assert_eq!(bodies, vec![json!("a"), json!("b")]);
    assert!(driver.rows("comments").unwrap().iter().all(|c| c["post_id"] == json!(1)));
}

#[tokio::test]
async fn test_failed_child_insert_rolls_back_parent() {
    let driver = Arc::new(MemoryDriver::new());
    let posts = Repository::new(driver.clone(), RepositoryConfig::builder("posts").build());
    let comments = Repository::new(driver.clone(), RepositoryConfig::builder("comments").build());
    posts.add_relation(Relation::one_to_many("comments", comments.clone(), "post_id"));
    driver.fail_on(QueryType::Insert, "comments").unwrap();

    let data = json!({"title": "t", "comments": [{"body": "a"}]});
    assert!(matches!(posts.create(row(data)).await.unwrap_err(), ModelError::Driver(_)));
    assert_eq!(posts.count(posts.query(QueryType::Select)).await.unwrap(), 0);
    assert_eq!(comments.count(comments.query(QueryType::Select)).await.unwrap(), 0);
    assert!(!driver.in_transaction().unwrap());
}

// ==================== Key generation ====================

#[tokio::test]
async fn test_largest_explicit_key_is_stored() {
    let driver = Arc::new(MemoryDriver::new());
    let users = users(&driver);

    let id = users.create(row(json!({"id": i64::MAX, "name": "x"}))).await.unwrap();
    assert_eq!(id, Some(json!(i64::MAX)));
    assert!(users.create(row(json!({"name": "y"}))).await.is_err());
    assert_eq!(driver.rows("users").unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_many_is_all_or_nothing() {
    let driver = Arc::new(MemoryDriver::new());
    let users = users(&driver);
    users.create(row(json!({"id": 3}))).await.unwrap();

    let batch = vec![row(json!({"id": 1})), row(json!({"id": 2})), row(json!({"id": 3}))];
    assert!(users.create_many(batch, true).await.is_err());
    assert_eq!(driver.rows("users").unwrap().len(), 1);
}

// ==================== Hooks & validation ====================

#[tokio::test]
async fn test_hook_outcomes() {
    let driver = Arc::new(MemoryDriver::new());
    let users = users(&driver);
    users.create(row(json!({"name": "A"}))).await.unwrap();

    users.on_pre_save(1, |_, _, _| Outcome::Abort);
    assert_eq!(users.create(row(json!({"name": "B"}))).await.unwrap(), None);
    assert_eq!(users.update(1, row(json!({"name": "B"}))).await.unwrap(), 0);

    users.on_pre_delete(1, |_, _| Outcome::Abort);
    assert!(!users.delete(1).await.unwrap());

    let executed = driver.executed().unwrap().len();
    users.on_pre_find(1, |_, _| FindOutcome::Override(vec![]));
    assert!(users.read(1).await.unwrap().is_none());
    assert_eq!(driver.executed().unwrap().len(), executed);
}

#[tokio::test]
async fn test_schema_validation_rejects_mismatch() {
    let driver = Arc::new(MemoryDriver::new());
    let schema = Schema::new(
        "scores",
        vec![
            ColumnDefinition::serial("id"),
            ColumnDefinition::new("points", ColumnType::Integer).not_null(),
        ],
    );
    let scores = Repository::new(
        driver.clone(),
        RepositoryConfig::builder("scores").schema(schema).build(),
    );

    for data in [json!({"points": "lots"}), json!({"points": null})] {
        assert!(matches!(
            scores.create(row(data)).await.unwrap_err(),
            ModelError::Validation(_)
        ));
    }
    assert!(driver.executed().unwrap().is_empty());
    assert_eq!(scores.create(row(json!({"points": 3}))).await.unwrap(), Some(json!(1)));
}
