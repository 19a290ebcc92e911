//! SQLRecord - Active Record relation loading for Rust.
//!
//! SQLRecord resolves and populates relations between model records:
//!
//! - Relations declared per model class as link + multiplicity descriptors
//! - Lazy loading with per-instance caching and N+1 detection
//! - Eager loading with one query per relation level, nested with dotted names
//! - Many-to-many through junction tables or chains of intermediate relations
//! - Inverse relations that point related records back at their owners
//! - Join loading that turns relations into SQL joins
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlrecord::prelude::*;
//!
//! let schema = Schema::new()
//!     .register(
//!         ModelClass::new("Customer", "customer")
//!             .column("id", SqlType::BigInt)
//!             .relation("orders", |ctx| {
//!                 Ok(ctx.has_many("Order", [("customer_id", "id")])?.inverse_of("customer"))
//!             }),
//!     )
//!     .register(
//!         ModelClass::new("Order", "order")
//!             .column("id", SqlType::BigInt)
//!             .column("customer_id", SqlType::BigInt)
//!             .relation("customer", |ctx| ctx.has_one("Customer", [("id", "customer_id")])),
//!     );
//!
//! let session = Session::new(connection, schema);
//!
//! // Two queries, however many customers there are
//! let customers = session.find("Customer")?.with(["orders"]).all(&session)?;
//! for customer in &customers {
//!     let orders = customer.relation("orders").map(|r| r.records()).unwrap_or_default();
//!     println!("{:?} has {} orders", customer.get("id"), orders.len());
//! }
//! ```

pub use sqlrecord_core::{
    ConfigError, ConfigErrorKind, Error, ModelKey, QueryError, QueryErrorKind, Result, Row,
    SqlType, TypeError, Value,
};
pub use sqlrecord_query::{
    ActiveQuery, ArrayRow, BinaryOp, Connection, Dialect, EagerLoading, Expr, IndexBy, Join,
    JoinType, JoinTypeSpec, JoinWithSpec, JoinsWithBuilder, JunctionRowsFinder, MemoryConnection,
    Model, ModelClass, ModelClassBuilder, ModelRelationFilter, N1QueryTracker, N1Stats, OrderBy,
    OrderDirection, QueryCallback, Record, Related, RelationContext, RelationPopulator, Schema,
    SelectStatement, Session, SessionConfig, TableNameAndAliasResolver, TableRef, Via, WithSpec,
};

/// Lower-level building blocks, for custom loaders.
pub mod engine {
    pub use sqlrecord_query::bucket::{
        Buckets, IndexedBuckets, ViaInfo, ViaMap, build_buckets, index_buckets, index_records,
        map_via,
    };
    pub use sqlrecord_query::eager::{find_with, normalize_relations};
}

/// Commonly used types, for glob import.
pub mod prelude {
    pub use crate::{
        ActiveQuery, Connection, Error, Expr, JoinType, MemoryConnection, Model, ModelClass,
        ModelKey, OrderBy, Record, Related, Result, Row, Schema, Session, SessionConfig, SqlType,
        Value,
    };
}
