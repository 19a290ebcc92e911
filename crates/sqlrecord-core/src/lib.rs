//! Core types for SQLRecord.
//!
//! This crate provides the foundational data types shared by the query
//! layer and by data source implementations:
//!
//! - `Value` for dynamically-typed column and property values
//! - `Row` for result rows handed back by a data source
//! - `ModelKey` for bucketing related rows by link column values
//! - `SqlType` for declared column types
//! - `Error` / `Result` for every fallible operation

pub mod error;
pub mod key;
pub mod row;
pub mod types;
pub mod value;

pub use error::{ConfigError, ConfigErrorKind, Error, QueryError, QueryErrorKind, Result, TypeError};
pub use key::ModelKey;
pub use row::{FromValue, Row};
pub use types::SqlType;
pub use value::Value;
