//! Active query building and relation population for SQLRecord.
//!
//! `sqlrecord-query` is the **relation layer**. Model classes declare their
//! relations as [`ActiveQuery`] descriptors (link, multiplicity, via,
//! inverse); this crate turns those descriptors into filtered statements
//! and attaches the results to the owning records.
//!
//! # Role In The Architecture
//!
//! - **Lazy loading**: [`Model::relation`] loads one owner's relation on
//!   first access and caches it.
//! - **Eager loading**: [`ActiveQuery::with`] loads a relation for every
//!   result record with one query per relation level, via
//!   [`RelationPopulator`].
//! - **Join loading**: [`ActiveQuery::join_with`] turns relations into SQL
//!   joins through [`JoinsWithBuilder`].
//!
//! Statements execute through the [`Connection`] trait; [`MemoryConnection`]
//! answers them from in-memory tables. Most users reach these types through
//! the `sqlrecord` facade crate.

pub mod alias;
pub mod bucket;
pub mod clause;
pub mod connection;
pub mod eager;
pub mod expr;
pub mod filter;
pub mod join;
pub mod joins;
pub mod junction;
pub mod memory;
pub mod n1_detection;
pub mod populate;
pub mod query;
pub mod record;
pub mod schema;
pub mod session;

pub use alias::{TableNameAndAliasResolver, TableRef};
pub use bucket::{Buckets, IndexedBuckets, ViaInfo, ViaMap, build_buckets, map_via};
pub use clause::{OrderBy, OrderDirection};
pub use connection::{Connection, SelectStatement};
pub use eager::WithSpec;
pub use expr::{BinaryOp, Dialect, Expr};
pub use filter::ModelRelationFilter;
pub use join::{Join, JoinType};
pub use joins::{EagerLoading, JoinTypeSpec, JoinWithSpec, JoinsWithBuilder};
pub use junction::JunctionRowsFinder;
pub use memory::MemoryConnection;
pub use n1_detection::{CallSite, N1QueryTracker, N1Stats};
pub use populate::RelationPopulator;
pub use query::{ActiveQuery, IndexBy, QueryCallback, Via};
pub use record::{ArrayRow, Model, Record, Related};
pub use schema::{ModelClass, ModelClassBuilder, RelationContext, RelationFactory, Schema};
pub use session::{Session, SessionConfig};
