use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;

/// Row filter understood by every record store backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Neq(String, Value),
    IsNull(String),
    In(String, Vec<Value>),
    /// Case-insensitive substring match.
    Contains(String, String),
    /// Disjunction of the inner filters.
    AnyOf(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(column.to_string(), value.into())
    }

    pub fn neq(column: &str, value: impl Into<Value>) -> Self {
        Filter::Neq(column.to_string(), value.into())
    }

    pub fn is_null(column: &str) -> Self {
        Filter::IsNull(column.to_string())
    }

    pub fn is_in<V: Into<Value>>(column: &str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(column.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn contains(column: &str, needle: &str) -> Self {
        Filter::Contains(column.to_string(), needle.to_string())
    }

    pub fn any_of(filters: Vec<Filter>) -> Self {
        Filter::AnyOf(filters)
    }

    /// Evaluate the filter against a JSON row, with SQL semantics for nulls:
    /// `eq`, `neq`, `in` and `contains` never match a missing or null column.
    pub fn matches(&self, row: &Value) -> bool {
        let column = |name: &str| row.get(name).filter(|v| !v.is_null());

        match self {
            Filter::Eq(name, expected) => column(name).is_some_and(|v| v == expected),
            Filter::Neq(name, expected) => column(name).is_some_and(|v| v != expected),
            Filter::IsNull(name) => column(name).is_none(),
            Filter::In(name, values) => column(name).is_some_and(|v| values.contains(v)),
            Filter::Contains(name, needle) => column(name)
                .and_then(Value::as_str)
                .is_some_and(|s| s.to_lowercase().contains(&needle.to_lowercase())),
            Filter::AnyOf(filters) => filters.iter().any(|f| f.matches(row)),
        }
    }
}

pub fn matches_all(filters: &[Filter], row: &Value) -> bool {
    filters.iter().all(|f| f.matches(row))
}

/// Minimal table-oriented persistence used by every cell.
///
/// Implementations must make `insert` and `update` atomic with respect to
/// their unique constraints: when two writers race for the same key, exactly
/// one succeeds and the other gets [`StoreError::UniqueViolation`].
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn query(&self, table: &str, filters: &[Filter]) -> Result<Vec<Value>, StoreError>;

    async fn insert(&self, table: &str, row: Value) -> Result<Value, StoreError>;

    /// Apply `patch` to every row matching `filters`, returning the updated rows.
    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Value,
    ) -> Result<Vec<Value>, StoreError>;
}
