//! Read-only records returned by finders

use serde::Serialize;
use serde_json::{Map, Value};

/// A raw row as exchanged with drivers and hooks
pub type Row = Map<String, Value>;

/// Immutable record wrapping one result row
///
/// Eager-loaded relations appear as nested values under the relation alias.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct Entity {
    data: Row,
}

impl Entity {
    pub fn new(data: Row) -> Self {
        Self { data }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }

    pub fn to_map(&self) -> Row {
        self.data.clone()
    }

    pub fn into_map(self) -> Row {
        self.data
    }
}

impl From<Row> for Entity {
    fn from(data: Row) -> Self {
        Self::new(data)
    }
}
