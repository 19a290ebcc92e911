//! Eager loading with `with()`.
//!
//! Relation names may be dotted (`"orders.items"`) to load nested
//! relations. Each level is resolved from the class of the level above,
//! loaded with one query for all records of that level, and the rest of
//! the path is forwarded to the child relation's own `with`.

use std::rc::Rc;

use indexmap::IndexMap;
use sqlrecord_core::Result;

use crate::populate::RelationPopulator;
use crate::query::{ActiveQuery, QueryCallback};
use crate::record::Record;
use crate::schema::ModelClass;
use crate::session::Session;

/// One requested eager load.
#[derive(Debug, Clone)]
pub struct WithSpec {
    /// Relation name, dotted for nested relations
    pub path: String,
    /// Applied to the leaf relation's query
    pub callback: Option<QueryCallback>,
}

impl WithSpec {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into().trim().to_string(),
            callback: None,
        }
    }

    pub fn with_callback(path: impl Into<String>, callback: QueryCallback) -> Self {
        Self {
            callback: Some(callback),
            ..Self::new(path)
        }
    }

    /// Split off the first segment: `"a.b.c"` -> `("a", Some("b.c"))`.
    ///
    /// Empty segments (`"a..b"`, trailing dots) are ignored.
    pub fn split(&self) -> Option<(&str, Option<String>)> {
        let mut parts = self.path.split('.').filter(|p| !p.is_empty());
        let head = parts.next()?;
        let rest: Vec<&str> = parts.collect();
        Some((head, (!rest.is_empty()).then(|| rest.join("."))))
    }
}

/// Resolve the top-level relations of `specs` on `class`.
///
/// Repeated names share one query; nested paths are pushed onto that
/// query's `with`; callbacks apply to the relation the path ends at.
pub fn normalize_relations(
    session: &Session,
    class: &Rc<ModelClass>,
    specs: &[WithSpec],
) -> Result<IndexMap<String, ActiveQuery>> {
    let mut relations: IndexMap<String, ActiveQuery> = IndexMap::new();
    for spec in specs {
        let Some((name, child)) = spec.split() else {
            continue;
        };
        if !relations.contains_key(name) {
            let relation = class.relation_query(session.schema(), None, name)?;
            relations.insert(name.to_string(), relation);
        }
        let Some(relation) = relations.get_mut(name) else {
            continue;
        };
        match (child, &spec.callback) {
            (Some(child), callback) => relation.with.push(WithSpec {
                path: child,
                callback: callback.clone(),
            }),
            (None, Some(callback)) => {
                *relation = callback.apply(std::mem::take(relation));
            }
            (None, None) => {}
        }
    }
    Ok(relations)
}

/// Load every relation in `specs` onto `records`, one relation at a time.
#[tracing::instrument(level = "debug", skip_all, fields(class = class.name(), records = records.len()))]
pub fn find_with(
    session: &Session,
    class: &Rc<ModelClass>,
    specs: &[WithSpec],
    records: &[Record],
    as_array: bool,
) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    let populator = RelationPopulator::new(session);
    for (name, relation) in normalize_relations(session, class, specs)? {
        let relation = if as_array { relation.as_array() } else { relation };
        populator.populate(&relation, &name, records)?;
    }
    Ok(())
}
