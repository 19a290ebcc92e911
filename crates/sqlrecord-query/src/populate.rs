//! Eager relation population.
//!
//! [`RelationPopulator`] loads one relation for a whole owner set with a
//! single related query (plus one query per via step) and distributes the
//! results onto each owner:
//!
//! 1. resolve the via step, if any, and filter the relation query by the
//!    owners (or by the via rows standing in for them);
//! 2. take the single-row path for a to-one relation with one owner;
//! 3. otherwise run the query once and bucket the results by owner key;
//! 4. back-link related records to their owners through `inverse_of`;
//! 5. hand every owner its bucket, or the empty value for the relation's
//!    multiplicity.

use std::rc::Rc;

use indexmap::IndexMap;
use sqlrecord_core::Result;

use crate::bucket::{Buckets, IndexedBuckets, ViaInfo, ViaMap, build_buckets, index_buckets};
use crate::junction::JunctionRowsFinder;
use crate::query::{ActiveQuery, Via};
use crate::record::{Record, Related, UniqueRecords};
use crate::session::Session;

/// Via rows resolved for one population call.
struct ViaStep {
    link: IndexMap<String, String>,
    rows: Vec<Record>,
    nested: Option<ViaMap>,
}

impl ViaStep {
    fn info(&self) -> ViaInfo<'_> {
        ViaInfo {
            link: &self.link,
            rows: &self.rows,
            nested: self.nested.as_ref(),
        }
    }
}

/// Loads a relation for many owners at once.
pub struct RelationPopulator<'s> {
    session: &'s Session,
}

impl<'s> RelationPopulator<'s> {
    pub fn new(session: &'s Session) -> Self {
        Self { session }
    }

    /// Populate relation `name` on every owner and return the related
    /// records.
    #[tracing::instrument(level = "debug", skip(self, query, owners), fields(owners = owners.len()))]
    pub fn populate(&self, query: &ActiveQuery, name: &str, owners: &[Record]) -> Result<Vec<Record>> {
        self.populate_relation(query, name, owners)
            .map(|(related, _)| related)
    }

    /// Like [`populate`](Self::populate), also returning the via map built
    /// for this level so an enclosing via chain can compose it.
    fn populate_relation(
        &self,
        query: &ActiveQuery,
        name: &str,
        owners: &[Record],
    ) -> Result<(Vec<Record>, Option<ViaMap>)> {
        let mut query = query.clone();
        query.primary_model = None;

        let via = self.resolve_via(&mut query, owners)?;

        if !query.multiple && owners.len() == 1 {
            let record = query.one(self.session)?;
            let related: Vec<Record> = record.iter().cloned().collect();
            if let Some(inverse) = query.inverse_of.clone() {
                self.populate_inverse(&query, owners, &related, &inverse)?;
            }
            let via_map = via
                .as_ref()
                .and_then(|step| build_buckets(&query.link, &related, Some(step.info())).1);
            for owner in owners {
                assign(owner, name, Related::One(record.clone()), &query);
            }
            tracing::debug!(relation = name, found = record.is_some(), "Populated single relation");
            return Ok((related, via_map));
        }

        let index_by = query.index_by.take();
        let related = query.all(self.session)?;
        if let Some(inverse) = query.inverse_of.clone() {
            self.populate_inverse(&query, owners, &related, &inverse)?;
        }
        let (buckets, via_map) = build_buckets(&query.link, &related, via.as_ref().map(ViaStep::info));
        query.index_by = index_by;

        tracing::debug!(
            relation = name,
            owners = owners.len(),
            related = related.len(),
            buckets = buckets.len(),
            "Populated relation"
        );

        let link = effective_link(&query);
        match (&query.index_by, query.multiple) {
            (Some(index_by), true) => {
                let indexed = index_buckets(buckets, index_by);
                distribute_indexed(owners, name, &indexed, &link, &query);
            }
            _ => distribute(owners, name, &buckets, &link, &query),
        }
        Ok((related, via_map))
    }

    /// Filter `query` by the owners, going through the via step if there
    /// is one.
    fn resolve_via(&self, query: &mut ActiveQuery, owners: &[Record]) -> Result<Option<ViaStep>> {
        match query.via.clone() {
            Via::None => {
                query.filter_by_models(owners)?;
                Ok(None)
            }
            Via::Junction(junction) => {
                let rows = JunctionRowsFinder::new(self.session).find(&junction, owners)?;
                query.filter_by_models(&rows)?;
                Ok(Some(ViaStep {
                    link: junction.link.clone(),
                    rows,
                    nested: None,
                }))
            }
            Via::Intermediate(via_name, via_query) => {
                let mut via_query = *via_query;
                if query.as_array {
                    via_query.as_array = true;
                }
                let (rows, nested) = self.populate_relation(&via_query, &via_name, owners)?;
                query.filter_by_models(&rows)?;
                Ok(Some(ViaStep {
                    link: via_query.link,
                    rows,
                    nested,
                }))
            }
        }
    }

    /// Point each related record back at the owner(s) it belongs to.
    fn populate_inverse(
        &self,
        query: &ActiveQuery,
        owners: &[Record],
        related: &[Record],
        inverse: &str,
    ) -> Result<()> {
        if owners.is_empty() || related.is_empty() {
            return Ok(());
        }
        let class = match related.iter().find_map(Record::as_model) {
            Some(model) => model.class(),
            None => match query.model_class() {
                Some(class) => Rc::clone(class),
                None => return Ok(()),
            },
        };
        let inverse_query = class.relation_query(self.session.schema(), None, inverse)?;
        let (owner_buckets, _) = build_buckets(inverse_query.get_link(), owners, None);
        let back_link: Vec<&String> = inverse_query.get_link().values().collect();

        for record in related {
            let mut matched = UniqueRecords::default();
            for key in record.keys(&back_link) {
                if let Some(bucket) = owner_buckets.get(&key) {
                    for owner in bucket {
                        matched.push(owner);
                    }
                }
            }
            let matched = matched.into_vec();
            let value = if inverse_query.is_multiple() {
                Related::Many(matched)
            } else {
                Related::One(matched.into_iter().next())
            };
            record.set_relation(inverse, value);
        }
        Ok(())
    }
}

/// Owner-side link properties the final buckets are keyed under: those
/// of the deepest via step, or the relation's own.
fn effective_link(query: &ActiveQuery) -> Vec<String> {
    let mut deepest = query;
    while let Some(via) = deepest.get_via().query() {
        deepest = via;
    }
    deepest.get_link().values().cloned().collect()
}

fn assign(owner: &Record, name: &str, value: Related, query: &ActiveQuery) {
    owner.set_relation(name, value);
    if let Some(model) = owner.as_model() {
        model.set_relation_dependencies(name, query);
    }
}

fn distribute(owners: &[Record], name: &str, buckets: &Buckets, link: &[String], query: &ActiveQuery) {
    for owner in owners {
        let keys = owner.keys(link);
        let merged = if let [key] = keys.as_slice() {
            buckets.get(key).cloned().unwrap_or_default()
        } else {
            let mut merged = UniqueRecords::default();
            for bucket in keys.iter().filter_map(|key| buckets.get(key)) {
                for record in bucket {
                    merged.push(record);
                }
            }
            merged.into_vec()
        };
        let value = if query.multiple {
            Related::Many(merged)
        } else {
            Related::One(merged.into_iter().next())
        };
        assign(owner, name, value, query);
    }
}

fn distribute_indexed(
    owners: &[Record],
    name: &str,
    buckets: &IndexedBuckets,
    link: &[String],
    query: &ActiveQuery,
) {
    for owner in owners {
        let mut merged: IndexMap<String, Record> = IndexMap::new();
        for key in owner.keys(link) {
            if let Some(bucket) = buckets.get(&key) {
                for (index, record) in bucket {
                    merged.insert(index.clone(), record.clone());
                }
            }
        }
        assign(owner, name, Related::Indexed(merged), query);
    }
}
