//! Declared column types.
//!
//! Relation filtering only needs to know whether a column holds an array
//! or a JSON document; the scalar variants exist so schemas read naturally.

/// Declared type of a model column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    Integer,
    BigInt,
    Double,
    Boolean,
    Text,
    Blob,
    Timestamp,
    Json,
    JsonB,
    /// PostgreSQL-style array of the inner type.
    Array(Box<SqlType>),
}

impl SqlType {
    /// Array of `inner`.
    pub fn array_of(inner: SqlType) -> Self {
        SqlType::Array(Box::new(inner))
    }

    /// Is this an array column?
    pub const fn is_array(&self) -> bool {
        matches!(self, SqlType::Array(_))
    }

    /// Is this a JSON column?
    pub const fn is_json(&self) -> bool {
        matches!(self, SqlType::Json | SqlType::JsonB)
    }
}
