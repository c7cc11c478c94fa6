use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A value a [`Record`] exposes for indexed filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexValue {
    String(String),
    Int(i64),
    Bool(bool),
}

/// Equality/ordering test applied by [`crate::Store::list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
}

/// One predicate in a [`crate::Store::list`] query, ANDed with the rest.
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: IndexValue,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<IndexValue>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    fn matches(&self, indexed: &HashMap<String, IndexValue>) -> bool {
        let Some(actual) = indexed.get(&self.field) else {
            return false;
        };
        let ord = match (actual, &self.value) {
            (IndexValue::String(a), IndexValue::String(b)) => a.cmp(b),
            (IndexValue::Int(a), IndexValue::Int(b)) => a.cmp(b),
            (IndexValue::Bool(a), IndexValue::Bool(b)) => a.cmp(b),
            _ => return false,
        };
        match self.op {
            FilterOp::Eq => ord.is_eq(),
            FilterOp::Ne => ord.is_ne(),
            FilterOp::Gt => ord.is_gt(),
            FilterOp::Lt => ord.is_lt(),
            FilterOp::Gte => ord.is_ge(),
            FilterOp::Lte => ord.is_le(),
        }
    }
}

pub(crate) fn matches_all(filters: &[Filter], indexed: &HashMap<String, IndexValue>) -> bool {
    filters.iter().all(|f| f.matches(indexed))
}

impl From<&str> for IndexValue {
    fn from(s: &str) -> Self {
        IndexValue::String(s.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(s: String) -> Self {
        IndexValue::String(s)
    }
}

impl From<i64> for IndexValue {
    fn from(v: i64) -> Self {
        IndexValue::Int(v)
    }
}

impl From<bool> for IndexValue {
    fn from(v: bool) -> Self {
        IndexValue::Bool(v)
    }
}

/// A type that can live in a [`crate::Store`].
///
/// `id` and `updated_at` back the store's conditional-update fencing;
/// `indexed_fields` backs `Store::list` filtering without a full table scan
/// of the JSON payload.
pub trait Record: Serialize + for<'de> Deserialize<'de> + Clone + Send + Sync + 'static {
    fn id(&self) -> &str;
    fn updated_at(&self) -> i64;
    fn collection_name() -> &'static str;
    fn indexed_fields(&self) -> HashMap<String, IndexValue>;
}
