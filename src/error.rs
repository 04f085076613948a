//! Error types for query construction and persistence operations

use thiserror::Error;

/// Errors that can occur while building or executing queries
///
/// Construction errors are raised before any I/O and are deterministic for a
/// given input. Execution errors come from the driver and are propagated
/// unchanged (after a rollback, when raised inside a transaction).
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported query type: {0}")]
    UnsupportedQueryType(String),

    #[error("Conflicting predicate: {0}")]
    ConflictingPredicate(String),

    #[error("Invalid compound query: {0}")]
    InvalidCompound(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid relation data: {0}")]
    InvalidRelationData(String),

    #[error("Unscoped bulk mutation: {0}")]
    UnscopedMutation(String),

    #[error("Relation not found: {0}")]
    RelationNotFound(String),

    #[error("Missing repository: {0}")]
    MissingRepository(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflicting_predicate(msg: impl Into<String>) -> Self {
        Self::ConflictingPredicate(msg.into())
    }

    pub fn invalid_compound(msg: impl Into<String>) -> Self {
        Self::InvalidCompound(msg.into())
    }

    pub fn invalid_query(msg: impl Into<String>) -> Self {
        Self::InvalidQuery(msg.into())
    }

    pub fn invalid_relation_data(msg: impl Into<String>) -> Self {
        Self::InvalidRelationData(msg.into())
    }

    pub fn unscoped_mutation(msg: impl Into<String>) -> Self {
        Self::UnscopedMutation(msg.into())
    }

    pub fn driver(msg: impl Into<String>) -> Self {
        Self::Driver(msg.into())
    }

    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Whether this error was raised while building an operation, before any I/O
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::UnsupportedQueryType(_)
                | Self::ConflictingPredicate(_)
                | Self::InvalidCompound(_)
                | Self::InvalidQuery(_)
                | Self::InvalidRelationData(_)
                | Self::UnscopedMutation(_)
                | Self::RelationNotFound(_)
                | Self::MissingRepository(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
