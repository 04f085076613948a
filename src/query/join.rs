//! Join clauses attached to SELECT queries

use std::fmt;

/// Kind of join
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Outer,
    Straight,
}

impl JoinType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Outer => "FULL OUTER JOIN",
            // PostgreSQL has no STRAIGHT_JOIN
            JoinType::Straight => "INNER JOIN",
        }
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A join against another table
///
/// `on` pairs are `(left, right)` column names. Unqualified names are
/// qualified when the join is attached to a query: the left side with the
/// driving table's alias, the right side with this join's alias.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    join_type: JoinType,
    table: String,
    alias: Option<String>,
    fields: Vec<String>,
    on: Vec<(String, String)>,
}

impl Join {
    pub fn new(join_type: JoinType, table: impl Into<String>) -> Self {
        Self {
            join_type,
            table: table.into(),
            alias: None,
            fields: Vec::new(),
            on: Vec::new(),
        }
    }

    pub fn as_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Columns of the joined table to add to the select list
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn on(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.on.push((left.into(), right.into()));
        self
    }

    pub fn join_type(&self) -> JoinType {
        self.join_type
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Alias of the joined table, defaulting to its name
    pub fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    pub fn field_list(&self) -> &[String] {
        &self.fields
    }

    pub fn conditions(&self) -> &[(String, String)] {
        &self.on
    }

    pub(crate) fn retype(mut self, join_type: JoinType) -> Self {
        self.join_type = join_type;
        self
    }

    /// Qualify unqualified column names against the driving and joined aliases
    pub(crate) fn qualify(mut self, driving_alias: &str) -> Self {
        let alias = self.alias().to_string();
        self.on = self
            .on
            .into_iter()
            .map(|(left, right)| (qualify(&left, driving_alias), qualify(&right, &alias)))
            .collect();
        self.fields = self.fields.iter().map(|f| qualify(f, &alias)).collect();
        self
    }
}

fn qualify(column: &str, alias: &str) -> String {
    if column.contains('.') {
        column.to_string()
    } else {
        format!("{}.{}", alias, column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualify_on_columns() {
        let join = Join::new(JoinType::Left, "profiles")
            .on("id", "user_id")
            .on("accounts.id", "p.account_id")
            .fields(["bio"])
            .qualify("users");

        assert_eq!(join.alias(), "profiles");
        assert_eq!(
            join.conditions(),
            &[
                ("users.id".to_string(), "profiles.user_id".to_string()),
                ("accounts.id".to_string(), "p.account_id".to_string()),
            ]
        );
        assert_eq!(join.field_list(), &["profiles.bio".to_string()]);
    }

    #[test]
    fn test_alias_overrides_table_name() {
        let join = Join::new(JoinType::Inner, "users")
            .as_alias("author")
            .on("author_id", "id")
            .qualify("posts");
        assert_eq!(
            join.conditions()[0],
            ("posts.author_id".to_string(), "author.id".to_string())
        );
        assert_eq!(JoinType::Outer.to_string(), "FULL OUTER JOIN");
    }
}
