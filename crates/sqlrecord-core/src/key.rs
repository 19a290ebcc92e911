//! Canonical keys for bucketing related rows.
//!
//! A [`ModelKey`] is derived from the values a record holds under a list of
//! link columns. Owner records and related records that agree on those
//! values produce equal keys no matter how each side represents them
//! (model instance or plain row, `Int` or `BigInt`, number or numeric text).

use crate::value::Value;
use std::fmt;

/// A hashable key built from one or more link column values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModelKey {
    /// Key over a single column
    Scalar(String),
    /// Key over an ordered tuple of columns
    Composite(Vec<String>),
}

impl ModelKey {
    /// Build the key for a tuple of link values.
    ///
    /// Returns `None` when any component is NULL: a partially-populated
    /// composite key cannot identify a related row.
    pub fn from_values(values: &[Value]) -> Option<Self> {
        match values {
            [] => None,
            [single] => single.key_string().map(ModelKey::Scalar),
            many => many
                .iter()
                .map(Value::key_string)
                .collect::<Option<Vec<_>>>()
                .map(ModelKey::Composite),
        }
    }

    /// All keys a record contributes for the given link values.
    ///
    /// A single array-valued (SQL or JSON array) link value fans out into
    /// one key per non-null element. Every other shape yields at most one
    /// key.
    pub fn keys_for(values: &[Value]) -> Vec<Self> {
        if let [single] = values {
            if let Some(elements) = single.elements() {
                return elements
                    .iter()
                    .filter_map(Value::key_string)
                    .map(ModelKey::Scalar)
                    .collect();
            }
        }
        Self::from_values(values).into_iter().collect()
    }

    /// Number of columns this key spans.
    pub fn arity(&self) -> usize {
        match self {
            ModelKey::Scalar(_) => 1,
            ModelKey::Composite(parts) => parts.len(),
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKey::Scalar(s) => write!(f, "{s}"),
            ModelKey::Composite(parts) => write!(f, "({})", parts.join(", ")),
        }
    }
}

impl From<&str> for ModelKey {
    fn from(s: &str) -> Self {
        ModelKey::Scalar(s.to_string())
    }
}

impl From<i64> for ModelKey {
    fn from(i: i64) -> Self {
        ModelKey::Scalar(i.to_string())
    }
}
