//! # runtara-model
//!
//! Database-agnostic query construction and a relational persistence layer.
//!
//! A [`Query`] describes one statement independently of any backend. A
//! [`Repository`] owns one table and runs queries through a [`Driver`],
//! wrapping every read and write in lifecycle hooks and sequencing
//! multi-table writes inside transactions.
//!
//! ## Features
//!
//! - **Query Builder**: Fields, aggregate functions, AND/OR/XOR predicates, joins, grouping, paging and compound queries
//! - **Repositories**: Create, read, update, upsert, bulk and cascading deletes with pre/post hooks
//! - **Relations**: One-to-one, one-to-many, many-to-one and many-to-many with eager loading and nested saves
//! - **Drivers**: PostgreSQL through sqlx, plus an in-memory driver for tests and prototyping
//! - **SQL Injection Prevention**: Identifiers are quoted and every value is bound as a parameter
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use runtara_model::{PgConfig, PgDriver, Relation, Repository, RepositoryConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = Arc::new(PgDriver::connect(&PgConfig::builder("postgres://localhost/mydb").build()).await?);
//!
//!     let comments = Repository::new(driver.clone(), RepositoryConfig::builder("comments").build());
//!     let posts = Repository::new(driver, RepositoryConfig::builder("posts").build());
//!     posts.add_relation(Relation::one_to_many("comments", comments, "post_id"));
//!
//!     // Create a post and its comments in one transaction
//!     let data = json!({
//!         "title": "Hello",
//!         "comments": [{"body": "First!"}]
//!     });
//!     let id = posts.create(data.as_object().cloned().unwrap_or_default()).await?;
//!
//!     // Load it back with its comments
//!     let mut query = posts.query(runtara_model::QueryType::Select);
//!     query.where_("id", id.unwrap_or_default())?.with("comments", None);
//!     let post = query.first().await?;
//!
//!     // Removes the comments first, then the post
//!     if let Some(post) = post {
//!         posts.delete(post.get("id").cloned().unwrap_or_default()).await?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use runtara_model::{PgConfig, RepositoryConfig};
//!
//! let pg = PgConfig::builder("postgres://localhost/mydb")
//!     .read_url("postgres://replica/mydb") // SELECTs outside transactions
//!     .max_connections(10)
//!     .build();
//!
//! let users = RepositoryConfig::builder("users")
//!     .prefix("app_")                   // Table becomes app_users
//!     .primary_key("user_id")           // Otherwise resolved from the schema
//!     .display_field(["full_name"])     // Value column for list finders
//!     .build();
//! assert_eq!(users.table_name(), "app_users");
//! ```

pub mod config;
pub mod driver;
pub mod entity;
pub mod error;
pub mod finder;
pub mod hooks;
pub mod query;
pub mod relation;
pub mod repository;
pub mod schema;
pub mod sql;
pub mod types;

// Re-export main types for convenience
pub use config::{PgConfig, PgConfigBuilder, RepositoryConfig, RepositoryConfigBuilder};
pub use driver::{Context, Driver, MemoryDriver, PgDriver, ResultSet};
pub use entity::{Entity, Row};
pub use error::{ModelError, Result};
pub use finder::{FindResult, Finder};
pub use hooks::{Behavior, FindOutcome, Hooks, Outcome, SaveKind};
pub use query::{
    Conjunction, Field, Func, Join, JoinType, Operator, Order, Predicate, Query, QueryType, Scope,
    scope,
};
pub use relation::{Cardinality, Relation};
pub use repository::{DeleteOptions, Repository, SaveOptions};
pub use schema::Schema;
pub use types::{ColumnDefinition, ColumnType, DefaultValue, IndexDefinition};

// Re-export SQL utilities for advanced users
pub use sql::ddl::DdlGenerator;
pub use sql::sanitize::{quote_identifier, validate_identifier};
