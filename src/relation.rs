//! Relations between repositories
//!
//! A relation is declared on the owning repository and names the repository
//! on the other side. Key columns live on different tables depending on the
//! cardinality:
//!
//! | cardinality    | `foreign_key`         | `related_foreign_key`   |
//! |----------------|-----------------------|-------------------------|
//! | one-to-one     | -                     | on the related table    |
//! | one-to-many    | -                     | on the related table    |
//! | many-to-one    | on the owning table   | -                       |
//! | many-to-many   | on the junction table | on the junction table   |

use std::fmt;

use serde_json::Value;

use crate::error::{ModelError, Result};
use crate::query::Scope;
use crate::repository::Repository;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Cardinality::OneToOne => "one-to-one",
            Cardinality::OneToMany => "one-to-many",
            Cardinality::ManyToOne => "many-to-one",
            Cardinality::ManyToMany => "many-to-many",
        })
    }
}

/// A named link from the owning repository to a related one
#[derive(Clone)]
pub struct Relation {
    alias: String,
    cardinality: Cardinality,
    related: Repository,
    foreign_key: String,
    related_foreign_key: String,
    junction: Option<Repository>,
    dependent: bool,
    conditions: Option<Scope>,
}

impl Relation {
    fn new(alias: impl Into<String>, cardinality: Cardinality, related: Repository) -> Self {
        Self {
            alias: alias.into(),
            cardinality,
            related,
            foreign_key: String::new(),
            related_foreign_key: String::new(),
            junction: None,
            dependent: !matches!(cardinality, Cardinality::ManyToOne),
            conditions: None,
        }
    }

    /// `related_foreign_key` is the column on the related table pointing back here
    pub fn one_to_one(
        alias: impl Into<String>,
        related: Repository,
        related_foreign_key: impl Into<String>,
    ) -> Self {
        let mut relation = Self::new(alias, Cardinality::OneToOne, related);
        relation.related_foreign_key = related_foreign_key.into();
        relation
    }

    pub fn one_to_many(
        alias: impl Into<String>,
        related: Repository,
        related_foreign_key: impl Into<String>,
    ) -> Self {
        let mut relation = Self::new(alias, Cardinality::OneToMany, related);
        relation.related_foreign_key = related_foreign_key.into();
        relation
    }

    /// `foreign_key` is the column on the owning table pointing at the related row
    pub fn many_to_one(
        alias: impl Into<String>,
        related: Repository,
        foreign_key: impl Into<String>,
    ) -> Self {
        let mut relation = Self::new(alias, Cardinality::ManyToOne, related);
        relation.foreign_key = foreign_key.into();
        relation
    }

    /// Both keys are columns of the junction table: `foreign_key` points at
    /// the owning row, `related_foreign_key` at the related row
    pub fn many_to_many(
        alias: impl Into<String>,
        related: Repository,
        junction: Repository,
        foreign_key: impl Into<String>,
        related_foreign_key: impl Into<String>,
    ) -> Self {
        let mut relation = Self::new(alias, Cardinality::ManyToMany, related);
        relation.junction = Some(junction);
        relation.foreign_key = foreign_key.into();
        relation.related_foreign_key = related_foreign_key.into();
        relation
    }

    /// Whether related rows are deleted with the owner
    ///
    /// Many-to-many relations always drop their junction rows.
    pub fn dependent(mut self, dependent: bool) -> Self {
        self.dependent = dependent || self.cardinality == Cardinality::ManyToMany;
        self
    }

    /// Extra scope applied whenever related rows are queried or deleted
    pub fn conditions(mut self, scope: Scope) -> Self {
        self.conditions = Some(scope);
        self
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn related(&self) -> &Repository {
        &self.related
    }

    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    pub fn related_foreign_key(&self) -> &str {
        &self.related_foreign_key
    }

    pub fn junction(&self) -> Option<&Repository> {
        self.junction.as_ref()
    }

    pub fn is_dependent(&self) -> bool {
        self.dependent
    }

    pub fn condition_scope(&self) -> Option<&Scope> {
        self.conditions.as_ref()
    }

    /// Check the shape of nested save data for this relation
    pub fn validate_data(&self, data: &Value) -> Result<()> {
        let shape_error = |expected: &str| {
            Err(ModelError::invalid_relation_data(format!(
                "{} relation '{}' expects {}",
                self.cardinality, self.alias, expected
            )))
        };

        match self.cardinality {
            Cardinality::OneToOne => {
                if !data.is_object() {
                    return shape_error("a single record");
                }
            }
            Cardinality::OneToMany => {
                if !data.is_array() {
                    return shape_error("a list of records");
                }
            }
            Cardinality::ManyToMany => match data.as_array() {
                Some(items) if items.iter().all(Value::is_object) => {}
                _ => return shape_error("a list of records"),
            },
            Cardinality::ManyToOne => {
                return Err(ModelError::invalid_relation_data(format!(
                    "many-to-one relation '{}' is written through column '{}'",
                    self.alias, self.foreign_key
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation")
            .field("alias", &self.alias)
            .field("cardinality", &self.cardinality)
            .field("related", &self.related.table_name())
            .field("foreign_key", &self.foreign_key)
            .field("related_foreign_key", &self.related_foreign_key)
            .field("junction", &self.junction.as_ref().map(Repository::table_name))
            .field("dependent", &self.dependent)
            .finish()
    }
}
