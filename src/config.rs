//! Configuration for repositories and the PostgreSQL driver
//!
//! Both follow the same builder pattern: required values go to `builder(..)`,
//! everything else has a default.

use crate::schema::Schema;

/// Display field candidates tried in order when none is configured
pub const DEFAULT_DISPLAY_FIELDS: &[&str] = &["title", "name", "id"];

/// Configuration for one repository (one table)
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Database table name, without prefix
    pub table: String,
    /// Prefix prepended to the table name (default: none)
    pub prefix: String,
    /// Alias used to qualify columns in joins (default: the table name)
    pub alias: Option<String>,
    /// Primary key column; resolved from the schema when unset
    pub primary_key: Option<String>,
    /// Candidate columns used as the human-readable value in list finders
    pub display_field: Vec<String>,
    /// Declared schema; when unset the driver is asked to describe the table
    pub schema: Option<Schema>,
    /// Whether write payloads are type-checked against the schema
    pub validate: bool,
}

impl RepositoryConfig {
    /// Create a new configuration builder
    pub fn builder(table: impl Into<String>) -> RepositoryConfigBuilder {
        RepositoryConfigBuilder::new(table)
    }

    /// Table name including prefix
    pub fn table_name(&self) -> String {
        format!("{}{}", self.prefix, self.table)
    }

    /// Alias used for the driving table in queries
    pub fn alias(&self) -> String {
        self.alias.clone().unwrap_or_else(|| self.table.clone())
    }
}

/// Builder for RepositoryConfig
#[derive(Debug)]
pub struct RepositoryConfigBuilder {
    table: String,
    prefix: String,
    alias: Option<String>,
    primary_key: Option<String>,
    display_field: Vec<String>,
    schema: Option<Schema>,
    validate: bool,
}

impl RepositoryConfigBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            prefix: String::new(),
            alias: None,
            primary_key: None,
            display_field: DEFAULT_DISPLAY_FIELDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            schema: None,
            validate: true,
        }
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = Some(column.into());
        self
    }

    /// Replace the display field candidates
    pub fn display_field<I, S>(mut self, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.display_field = candidates.into_iter().map(Into::into).collect();
        self
    }

    /// Declare the table schema instead of describing it through the driver
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Enable or disable payload validation (default: true)
    pub fn validate(mut self, enabled: bool) -> Self {
        self.validate = enabled;
        self
    }

    pub fn build(self) -> RepositoryConfig {
        RepositoryConfig {
            table: self.table,
            prefix: self.prefix,
            alias: self.alias,
            primary_key: self.primary_key,
            display_field: self.display_field,
            schema: self.schema,
            validate: self.validate,
        }
    }
}

/// Configuration for the PostgreSQL driver
#[derive(Debug, Clone)]
pub struct PgConfig {
    /// Primary database URL (writes, deletes, transactions)
    pub database_url: String,
    /// Optional read replica used for the read context
    pub read_url: Option<String>,
    /// Pool size per URL
    pub max_connections: u32,
}

impl PgConfig {
    pub fn builder(database_url: impl Into<String>) -> PgConfigBuilder {
        PgConfigBuilder::new(database_url)
    }
}

/// Builder for PgConfig
#[derive(Debug)]
pub struct PgConfigBuilder {
    database_url: String,
    read_url: Option<String>,
    max_connections: u32,
}

impl PgConfigBuilder {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            read_url: None,
            max_connections: 10,
        }
    }

    /// Route reads outside transactions to a replica
    pub fn read_url(mut self, url: impl Into<String>) -> Self {
        self.read_url = Some(url.into());
        self
    }

    /// Set the pool size (default: 10)
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn build(self) -> PgConfig {
        PgConfig {
            database_url: self.database_url,
            read_url: self.read_url,
            max_connections: self.max_connections,
        }
    }
}
