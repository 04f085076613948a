//! Finder strategies: how a result set is shaped for the caller

use serde_json::Value;

use crate::entity::Entity;
use crate::query::Query;

/// Result shape requested from `Repository::find`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finder {
    /// At most one entity
    First,
    /// Every matching entity
    All,
    /// `(key, value)` pairs; unset columns fall back to the primary key and
    /// the display field of the repository
    List {
        key: Option<String>,
        value: Option<String>,
    },
}

impl Finder {
    pub fn list() -> Self {
        Finder::List {
            key: None,
            value: None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Finder::First => "first",
            Finder::All => "all",
            Finder::List { .. } => "list",
        }
    }

    /// Adjust the query before it is executed
    pub fn prepare(&self, query: &mut Query) {
        if matches!(self, Finder::First) {
            query.limit(1);
        }
    }

    /// Shape entities into the result; `key` / `value` are the resolved list columns
    pub fn resolve(&self, entities: Vec<Entity>, key: &str, value: &str) -> FindResult {
        match self {
            Finder::First => FindResult::One(entities.into_iter().next()),
            Finder::All => FindResult::Many(entities),
            Finder::List { .. } => FindResult::List(
                entities
                    .into_iter()
                    .map(|e| {
                        (
                            e.get(key).cloned().unwrap_or(Value::Null),
                            e.get(value).cloned().unwrap_or(Value::Null),
                        )
                    })
                    .collect(),
            ),
        }
    }
}

/// Output of a finder
#[derive(Debug, Clone, PartialEq)]
pub enum FindResult {
    One(Option<Entity>),
    Many(Vec<Entity>),
    List(Vec<(Value, Value)>),
}

impl FindResult {
    /// An empty result of the shape `finder` produces
    pub fn empty(finder: &Finder) -> Self {
        match finder {
            Finder::First => FindResult::One(None),
            Finder::All => FindResult::Many(Vec::new()),
            Finder::List { .. } => FindResult::List(Vec::new()),
        }
    }

    pub fn into_first(self) -> Option<Entity> {
        match self {
            FindResult::One(entity) => entity,
            FindResult::Many(entities) => entities.into_iter().next(),
            FindResult::List(_) => None,
        }
    }

    pub fn into_all(self) -> Vec<Entity> {
        match self {
            FindResult::One(entity) => entity.into_iter().collect(),
            FindResult::Many(entities) => entities,
            FindResult::List(_) => Vec::new(),
        }
    }

    pub fn into_list(self) -> Vec<(Value, Value)> {
        match self {
            FindResult::List(pairs) => pairs,
            _ => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FindResult::One(entity) => entity.is_none(),
            FindResult::Many(entities) => entities.is_empty(),
            FindResult::List(pairs) => pairs.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryType;
    use serde_json::json;

    fn entity(value: Value) -> Entity {
        match value {
            Value::Object(map) => Entity::new(map),
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_first_limits_query() {
        let mut query = Query::new(QueryType::Select);
        Finder::First.prepare(&mut query);
        assert_eq!(query.limit_count(), Some(1));

        let mut query = Query::new(QueryType::Select);
        Finder::All.prepare(&mut query);
        assert_eq!(query.limit_count(), None);
    }

    #[test]
    fn test_resolve_shapes() {
        let rows = || {
            vec![
                entity(json!({"id": 1, "name": "A"})),
                entity(json!({"id": 2, "name": "B"})),
            ]
        };

        let first = Finder::First.resolve(rows(), "id", "name").into_first();
        assert_eq!(first.and_then(|e| e.get("name").cloned()), Some(json!("A")));

        assert_eq!(Finder::All.resolve(rows(), "id", "name").into_all().len(), 2);

        let list = Finder::list().resolve(rows(), "id", "name").into_list();
        assert_eq!(list, vec![(json!(1), json!("A")), (json!(2), json!("B"))]);
    }

    #[test]
    fn test_empty_results() {
        assert!(FindResult::empty(&Finder::First).is_empty());
        assert!(FindResult::empty(&Finder::list()).into_list().is_empty());
    }
}
