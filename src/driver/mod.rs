//! Driver capability consumed by repositories
//!
//! A driver executes [`Query`] values against one backend. It owns dialect
//! rendering, connections and transactions; repositories only decide what to
//! run and in which context.

mod memory;
mod postgres;

use async_trait::async_trait;
use serde_json::Value;

pub use memory::MemoryDriver;
pub use postgres::PgDriver;

use crate::entity::Row;
use crate::error::{ModelError, Result};
use crate::query::{Query, QueryType};
use crate::schema::Schema;

/// Connection context selected before dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Context {
    #[default]
    Read,
    Write,
    Delete,
}

impl Context {
    /// Context a statement of this type runs in
    pub fn for_query(query_type: QueryType) -> Self {
        match query_type {
            QueryType::Select => Context::Read,
            QueryType::Delete | QueryType::Truncate | QueryType::DropTable | QueryType::DropIndex => {
                Context::Delete
            }
            _ => Context::Write,
        }
    }
}

/// Rows and affected count of one executed statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    rows: Vec<Row>,
    affected: u64,
}

impl ResultSet {
    pub fn new(rows: Vec<Row>, affected: u64) -> Self {
        Self { rows, affected }
    }

    pub fn from_rows(rows: Vec<Row>) -> Self {
        let affected = rows.len() as u64;
        Self { rows, affected }
    }

    pub fn affected(affected: u64) -> Self {
        Self {
            rows: Vec::new(),
            affected,
        }
    }

    /// Number of rows returned
    pub fn count(&self) -> usize {
        self.rows.len()
    }

    pub fn fetch(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn fetch_all(self) -> Vec<Row> {
        self.rows
    }

    pub fn affected_count(&self) -> u64 {
        self.affected
    }

    /// First column of the first row, for aggregate queries
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.values().next())
    }
}

/// Backend executing queries
#[async_trait]
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    fn new_query(&self, query_type: QueryType) -> Query {
        Query::new(query_type)
    }

    /// Select the connection context for subsequent statements
    fn set_context(&self, context: Context);

    async fn execute(&self, query: &Query) -> Result<ResultSet>;

    /// Primary key generated by the most recent insert into `table`
    async fn last_insert_id(&self, table: &str, primary_key: &str) -> Result<Option<Value>>;

    /// Returns true when this call opened the outermost transaction
    async fn start_transaction(&self) -> Result<bool>;

    /// Returns true when this call committed the outermost transaction
    async fn commit_transaction(&self) -> Result<bool>;

    /// Returns true when this call rolled back the outermost transaction
    async fn rollback_transaction(&self) -> Result<bool>;

    /// Columns of `table`, or `None` when it does not exist
    async fn describe_table(&self, table: &str) -> Result<Option<Schema>>;
}

/// What the backend has to do after a commit or rollback request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// An enclosing transaction is still open
    Nested,
    Commit,
    Rollback,
}

/// Nesting counter for driver transactions
///
/// Only the outermost start, commit or rollback reaches the backend. A
/// rollback at an inner level marks the transaction rollback-only, so the
/// outermost commit turns into a rollback.
#[derive(Debug, Default)]
pub struct TransactionDepth {
    depth: usize,
    rollback_only: bool,
}

impl TransactionDepth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_active(&self) -> bool {
        self.depth > 0
    }

    /// Enter a level; true when the backend must begin
    pub fn begin(&mut self) -> bool {
        self.depth += 1;
        if self.depth == 1 {
            self.rollback_only = false;
        }
        self.depth == 1
    }

    pub fn commit(&mut self) -> Result<Resolution> {
        self.leave("commit")?;
        Ok(match (self.depth, self.rollback_only) {
            (0, false) => Resolution::Commit,
            (0, true) => Resolution::Rollback,
            _ => Resolution::Nested,
        })
    }

    pub fn rollback(&mut self) -> Result<Resolution> {
        self.leave("rollback")?;
        self.rollback_only = true;
        Ok(if self.depth == 0 {
            Resolution::Rollback
        } else {
            Resolution::Nested
        })
    }

    fn leave(&mut self, action: &str) -> Result<()> {
        if self.depth == 0 {
            return Err(ModelError::transaction(format!(
                "{} without an open transaction",
                action
            )));
        }
        self.depth -= 1;
        Ok(())
    }
}
