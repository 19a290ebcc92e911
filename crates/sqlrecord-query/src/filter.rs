//! Owner-set filtering for relation queries.
//!
//! Given the records a relation is loaded for, [`ModelRelationFilter`]
//! narrows the relation query to the related rows those owners can reach
//! through the relation's link.

use std::collections::HashSet;

use sqlrecord_core::{ConfigErrorKind, Error, ModelKey, Result, SqlType, Value};

use crate::alias::TableNameAndAliasResolver;
use crate::expr::Expr;
use crate::query::ActiveQuery;
use crate::record::Record;

/// Adds the owner-set condition to a relation query.
pub struct ModelRelationFilter<'q> {
    query: &'q mut ActiveQuery,
}

impl<'q> ModelRelationFilter<'q> {
    pub fn new(query: &'q mut ActiveQuery) -> Self {
        Self { query }
    }

    /// AND the owner condition onto the query.
    ///
    /// When the owners contribute no usable link values the query is
    /// marked for emulated execution and also gets an always-false
    /// condition, so it returns nothing even if the emulation flag is
    /// ignored.
    pub fn apply(self, owners: &[Record]) -> Result<()> {
        let link = self.query.get_link().clone();
        if link.is_empty() {
            return Err(Error::config(
                ConfigErrorKind::InvalidLink,
                "relation link must map at least one column",
            ));
        }

        let alias = if self.query.joins.is_empty() && self.query.join_with.is_empty() {
            None
        } else {
            Some(TableNameAndAliasResolver::alias(self.query)?)
        };
        let column = |name: &str| match &alias {
            Some(alias) => Expr::qualified(alias.as_str(), name),
            None => Expr::col(name),
        };

        let condition = if link.len() == 1 {
            let Some((related_column, owner_property)) = link.first() else {
                return Ok(());
            };
            let values = single_values(owners, owner_property);
            if values.is_empty() {
                None
            } else {
                let target = column(related_column.as_str());
                Some(match self.column_type(related_column, owners, owner_property) {
                    Some(t) if t.is_array() => target.array_overlaps(values),
                    Some(t) if t.is_json() => target.json_overlaps(values),
                    _ => target.in_list(values),
                })
            }
        } else {
            let owner_properties: Vec<&String> = link.values().collect();
            let rows = composite_values(owners, &owner_properties);
            if rows.is_empty() {
                None
            } else {
                let columns = link.keys().map(|c| column(c.as_str())).collect();
                Some(Expr::tuple_in(columns, rows))
            }
        };

        match condition {
            Some(condition) => self.query.add_condition(condition),
            None => {
                tracing::trace!(
                    owners = owners.len(),
                    "no link values, relation query emulated"
                );
                self.query.emulate_execution = true;
                self.query.add_condition(Expr::always_false());
            }
        }
        Ok(())
    }

    /// Declared type of the link column, on the related class or else on
    /// the owner class.
    fn column_type(
        &self,
        related_column: &str,
        owners: &[Record],
        owner_property: &str,
    ) -> Option<SqlType> {
        if let Some(t) = self
            .query
            .model_class()
            .and_then(|class| class.column_type(related_column))
        {
            return Some(t.clone());
        }
        owners
            .iter()
            .find_map(Record::as_model)
            .and_then(|model| model.class().column_type(owner_property).cloned())
    }
}

/// Candidate values for a single-column link: scalars deduplicated in
/// first-seen order, followed by any non-scalar values as they came.
fn single_values(owners: &[Record], property: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    let mut scalars = Vec::new();
    let mut others = Vec::new();
    let mut push = |value: Value| {
        if value.is_null() {
            return;
        }
        if !value.is_scalar() {
            others.push(value);
            return;
        }
        if let Some(key) = value.key_string() {
            if seen.insert(key) {
                scalars.push(value);
            }
        }
    };
    for owner in owners {
        let value = owner.get(property);
        match value.elements() {
            Some(elements) => elements.into_iter().for_each(&mut push),
            None => push(value),
        }
    }
    scalars.extend(others);
    scalars
}

/// One tuple per owner with every link property set, deduplicated.
fn composite_values(owners: &[Record], properties: &[&String]) -> Vec<Vec<Value>> {
    let mut seen = HashSet::new();
    owners
        .iter()
        .map(|owner| owner.values_of(properties))
        .filter(|values| match ModelKey::from_values(values) {
            Some(key) => seen.insert(key),
            None => false,
        })
        .collect()
}
